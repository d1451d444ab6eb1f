//! Shared domain types for Switchboard — messages, threads, runs, tool
//! records, toolsets, agent events, and the common error enum.
//!
//! Every other crate in the workspace depends on this one; it depends on
//! nothing but serde and the clock.

pub mod auth;
pub mod error;
pub mod event;
pub mod message;
pub mod run;
pub mod tool;

pub use error::{Error, Result};
