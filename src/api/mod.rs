//! API Module
//!
//! This module handles the JSON-RPC API for submitting batches.
//! It provides the HTTP endpoint clients use to submit requests and inspect
//! buffered replies.

mod server;
pub use server::{AppState, Server, router};
