//! This crate submits batches of requests to an actor-model ledger as single
//! transactions and correlates the asynchronous replies back to each request.
//! It includes modules for data types, codecs, the ledger boundary, reply
//! correlation, batch execution, the JSON-RPC API, and configuration.

pub mod types; // Defines common data structures and types used throughout the system.
pub mod error; // Error types for transport, correlation and batch execution.
pub mod codec; // Encodes calls into request payloads and decodes reply payloads.
pub mod ledger; // Ledger transport boundary and the in-process sandbox ledger.
pub mod correlator; // Buffers reply events and answers lookups by request id.
pub mod batch; // Submits batches and computes per-request verdicts.
pub mod api; // Handles external API definitions and interfaces.
pub mod config; // Defines and loads system configuration.

// Re-export commonly used types and configurations for easier access.
pub use types::*;
pub use error::*;
pub use codec::{JsonCall, JsonCodec, JsonEnvelope, MessageCodec, RawCodec};
pub use config::Config;
pub use ledger::{LedgerTransport, ReplyStream, SandboxLedger};
pub use correlator::Correlator;
pub use batch::{BatchExecutor, BatchVerdict};
