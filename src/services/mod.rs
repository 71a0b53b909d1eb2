pub mod auth;
pub mod centers;
pub mod children;
pub mod content;
pub mod dashboard;
pub mod email;
pub mod exercises;
#[cfg(test)]
pub(crate) mod fixtures;
pub mod linkage;
pub mod messages;
pub mod metrics;
pub mod notifications;
pub mod outbox;
pub mod progress;
pub mod push;
pub mod realtime;
pub mod upload;
pub mod users;
