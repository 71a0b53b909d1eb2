use crate::error::AppError;

/// Checks a key-scoped rate limit stored in Redis.
///
/// Uses the INCR + EXPIRE strategy:
/// - Increments a counter for `key`
/// - On first increment, sets TTL to `window_secs`
/// - Fails with 429 once the counter exceeds `max_attempts`
///
/// Redis being unreachable does not block the caller.
pub async fn check_rate_limit(
    redis: &mut redis::aio::MultiplexedConnection,
    key: &str,
    max_attempts: u64,
    window_secs: u64,
) -> Result<(), AppError> {
    let count: u64 = redis::cmd("INCR")
        .arg(key)
        .query_async(redis)
        .await
        .unwrap_or(0);

    if count == 1 {
        // TTL only on first increment so the window does not slide
        let _: Result<(), _> = redis::cmd("EXPIRE")
            .arg(key)
            .arg(window_secs)
            .query_async(redis)
            .await;
    }

    if exceeded(count, max_attempts) {
        return Err(AppError::RateLimited(
            "Too many attempts. Try again in a few minutes.".into(),
        ));
    }

    Ok(())
}

fn exceeded(count: u64, max_attempts: u64) -> bool {
    count > max_attempts
}

pub fn login_key(email: &str) -> String {
    format!("ratelimit:login:{}", email.trim().to_lowercase())
}

pub fn reset_key(email: &str) -> String {
    format!("ratelimit:reset:{}", email.trim().to_lowercase())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_are_case_insensitive() {
        assert_eq!(login_key(" Mona@Example.com "), "ratelimit:login:mona@example.com");
        assert_eq!(reset_key("A@B.C"), "ratelimit:reset:a@b.c");
    }

    #[test]
    fn limit_trips_after_max() {
        assert!(!exceeded(5, 5));
        assert!(exceeded(6, 5));
        // Redis failure yields 0 and never blocks
        assert!(!exceeded(0, 5));
    }
}
