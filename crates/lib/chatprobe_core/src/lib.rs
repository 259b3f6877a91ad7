//! # chatprobe_core
//!
//! Session management for the chatprobe diagnostic client: credentials, hub
//! channels with automatic reconnection, the chat session client and the
//! orchestrator that ties them to the REST API.

pub mod api;
pub mod auth;
pub mod config;
pub mod context;
pub mod hub;
pub mod models;
pub mod orchestrator;
pub mod session;

/// Returns the crate version.
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
