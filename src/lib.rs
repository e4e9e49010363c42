//! Troubleshooter: LLM-driven network diagnostics.
//!
//! A model walks a five-layer diagnostic ladder by calling probe tools;
//! the engine bounds the loop, correlates results into ladder state, and
//! keeps answering when remote providers fail by falling back to a local
//! model.

pub mod agent;
pub mod config;
pub mod error;
pub mod events;
pub mod inference;
pub mod ladder;
pub mod runtime;
pub mod session;
pub mod state;
pub mod tools;
pub mod types;
