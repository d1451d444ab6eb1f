//! HTTP façade for the agent core — axum routes that stream run events
//! over SSE, TOML configuration, and shared application state.

pub mod api;
pub mod config;
pub mod state;
