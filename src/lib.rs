// Library exports for the binary and tests
pub mod config;
pub mod db;
pub mod error;
pub mod extract;
pub mod middleware;
pub mod models;
pub mod router;
pub mod routes;
pub mod services;
pub mod state;

pub use state::AppState;
