//! Server configuration and wiring

pub mod config;
pub mod init;

pub use config::AppConfig;
pub use init::{build_app, AppState};
