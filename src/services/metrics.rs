use lazy_static::lazy_static;
use prometheus::{register_counter_vec, CounterVec};

lazy_static! {
    pub static ref LOGINS_COUNTER: CounterVec = register_counter_vec!(
        "api_logins_total",
        "Login attempts by outcome",
        &["status"]
    ).unwrap();

    /// Linkage state transitions: request_created, request_accepted,
    /// request_rejected, queue_accepted, queue_rejected, family_created,
    /// admin_assigned, unlinked.
    pub static ref LINKAGE_COUNTER: CounterVec = register_counter_vec!(
        "api_linkage_transitions_total",
        "Parent/specialist/child linkage transitions by kind",
        &["transition"]
    ).unwrap();

    pub static ref CONTENT_COUNTER: CounterVec = register_counter_vec!(
        "api_content_items_total",
        "Content library mutations by item type and action",
        &["content_type", "action"]
    ).unwrap();

    pub static ref SESSIONS_COUNTER: CounterVec = register_counter_vec!(
        "api_progress_sessions_total",
        "Training sessions appended to progress ledgers by entry point",
        &["entry"]
    ).unwrap();

    pub static ref OUTBOX_COUNTER: CounterVec = register_counter_vec!(
        "api_outbox_jobs_total",
        "Best-effort side-effect jobs by kind and outcome",
        &["kind", "outcome"]
    ).unwrap();

    pub static ref EMAILS_COUNTER: CounterVec = register_counter_vec!(
        "api_emails_total",
        "Outbound emails by outcome",
        &["outcome"]
    ).unwrap();
}

pub fn linkage(transition: &str) {
    LINKAGE_COUNTER.with_label_values(&[transition]).inc();
}
