pub mod config;
pub mod error;
pub mod permission;
pub mod session;
pub mod state;
