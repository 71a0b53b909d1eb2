pub mod auth;
pub mod center;
pub mod child;
pub mod exercise;
pub mod linkage;
pub mod message;
pub mod notification;
pub mod progress;
pub mod user;
