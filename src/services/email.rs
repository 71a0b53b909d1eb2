use std::future::Future;
use std::time::Duration;

use anyhow::Context;
use lettre::{
    message::{header::ContentType, Mailbox, MultiPart, SinglePart},
    transport::smtp::authentication::Credentials,
    AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
};
use uuid::Uuid;

use crate::config::Config;
use crate::services::metrics::EMAILS_COUNTER;

const BACKOFF_BASE: Duration = Duration::from_millis(500);

pub struct EmailService {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
    max_attempts: u32,
}

impl EmailService {
    /// Returns None if SMTP is not fully configured.
    pub fn new(config: &Config) -> Option<Self> {
        let host = config.smtp_host.as_deref()?;
        let username = config.smtp_username.clone()?;
        let password = config.smtp_password.clone()?;
        let from_addr = config.smtp_from.as_deref()?;

        let port = config.smtp_port.unwrap_or(587);
        let creds = Credentials::new(username, password);

        let transport = if port == 465 {
            AsyncSmtpTransport::<Tokio1Executor>::relay(host)
                .ok()?
                .credentials(creds)
                .build()
        } else {
            AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(host)
                .ok()?
                .port(port)
                .credentials(creds)
                .build()
        };

        let from: Mailbox = from_addr.parse().ok()?;

        Some(Self { transport, from, max_attempts: config.email_max_attempts.max(1) })
    }

    // ─── Private helpers ─────────────────────────────────────────────────────

    fn new_message_id(&self) -> String {
        format!("<{}@{}>", Uuid::new_v4(), self.from.email.domain())
    }

    fn wrap_html(content: &str) -> String {
        format!(
            r#"<!DOCTYPE html>
<html>
<head><meta charset="utf-8"><meta name="viewport" content="width=device-width,initial-scale=1"></head>
<body style="margin:0;padding:32px 16px;background:#f1f5f9;font-family:-apple-system,'Segoe UI',Roboto,Arial,sans-serif">
  <div style="max-width:520px;margin:0 auto;background:#ffffff;border-radius:12px;padding:32px">
    {content}
  </div>
</body>
</html>"#
        )
    }

    async fn send_once(&self, to: &Mailbox, subject: &str, text: &str, html: &str) -> anyhow::Result<()> {
        let email = Message::builder()
            .message_id(Some(self.new_message_id()))
            .from(self.from.clone())
            .to(to.clone())
            .subject(subject)
            .multipart(
                MultiPart::alternative()
                    .singlepart(
                        SinglePart::builder()
                            .header(ContentType::TEXT_PLAIN)
                            .body(text.to_string()),
                    )
                    .singlepart(
                        SinglePart::builder()
                            .header(ContentType::TEXT_HTML)
                            .body(html.to_string()),
                    ),
            )
            .context("Failed to build email message")?;

        self.transport
            .send(email)
            .await
            .context("Failed to send email")?;

        Ok(())
    }

    // ─── Public methods ───────────────────────────────────────────────────────

    /// Send with synchronous exponential-backoff retries. The last error is
    /// returned once every attempt has failed.
    pub async fn send(&self, to_email: &str, subject: &str, text: &str) -> anyhow::Result<()> {
        let to: Mailbox = to_email
            .parse()
            .with_context(|| format!("Invalid recipient address: {to_email}"))?;
        let html = Self::wrap_html(&text.replace('\n', "<br>"));

        let result = retry_with_backoff(self.max_attempts, BACKOFF_BASE, || {
            self.send_once(&to, subject, text, &html)
        })
        .await;

        let outcome = if result.is_ok() { "sent" } else { "failed" };
        EMAILS_COUNTER.with_label_values(&[outcome]).inc();
        result
    }

    pub async fn send_password_reset_code(&self, to_email: &str, name: &str, code: &str, ttl_minutes: i64) -> anyhow::Result<()> {
        let text = format!(
            "Hello {name},\n\nYour password reset code is {code}.\nIt expires in {ttl_minutes} minutes.\n\nIf you did not request this, you can ignore this email."
        );
        self.send(to_email, "Password reset code", &text).await
    }
}

/// Subject and body of the welcome email for a parent account created by a
/// specialist. Sent through the outbox.
pub fn account_credentials_message(
    name: &str,
    to_email: &str,
    temporary_password: &str,
    login_url: &str,
) -> (String, String) {
    let body = format!(
        "Hello {name},\n\nAn account was created for you by your child's specialist.\n\nEmail: {to_email}\nTemporary password: {temporary_password}\n\nSign in at {login_url} and change your password."
    );
    ("Your account is ready".to_string(), body)
}

/// Run `op` up to `max_attempts` times, sleeping `base * 2^n` between
/// failures.
pub async fn retry_with_backoff<T, F, Fut>(max_attempts: u32, base: Duration, mut op: F) -> anyhow::Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = anyhow::Result<T>>,
{
    let max_attempts = max_attempts.max(1);
    let mut attempt = 0;
    loop {
        attempt += 1;
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if attempt >= max_attempts => {
                tracing::warn!(attempt, "giving up after {max_attempts} attempts: {e:#}");
                return Err(e);
            }
            Err(e) => {
                let delay = backoff_delay(base, attempt);
                tracing::debug!(attempt, ?delay, "retrying after error: {e:#}");
                tokio::time::sleep(delay).await;
            }
        }
    }
}

fn backoff_delay(base: Duration, attempt: u32) -> Duration {
    base * 2u32.saturating_pow(attempt.saturating_sub(1))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn backoff_doubles() {
        let base = Duration::from_millis(500);
        assert_eq!(backoff_delay(base, 1), Duration::from_millis(500));
        assert_eq!(backoff_delay(base, 2), Duration::from_millis(1000));
        assert_eq!(backoff_delay(base, 3), Duration::from_millis(2000));
    }

    #[test]
    fn credentials_message_names_the_login() {
        let (subject, body) =
            account_credentials_message("Huda", "huda@example.com", "Tmp12345", "https://app.example.com/login");
        assert_eq!(subject, "Your account is ready");
        assert!(body.contains("huda@example.com"));
        assert!(body.contains("Tmp12345"));
        assert!(body.contains("https://app.example.com/login"));
    }

    #[tokio::test(start_paused = true)]
    async fn retries_until_success() {
        let calls = AtomicU32::new(0);
        let result = retry_with_backoff(3, Duration::from_millis(500), || {
            let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
            async move {
                if n < 3 {
                    anyhow::bail!("smtp unavailable")
                }
                Ok(n)
            }
        })
        .await;
        assert_eq!(result.unwrap(), 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn surfaces_last_error_after_max_attempts() {
        let calls = AtomicU32::new(0);
        let result: anyhow::Result<()> = retry_with_backoff(3, Duration::from_millis(500), || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { anyhow::bail!("connection refused") }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }
}
