//! Worker ⇄ supervisor protocol.
//!
//! Workers never hold limit state. Each authority operation becomes one JSON line on the
//! worker's stdout, tagged with a fresh id; the supervisor answers with one JSON line on
//! the worker's stdin carrying the same id.
//!
//! ```text
//! worker  ─► {"id":"…","type":"addCount","key":"0x…","score":3}
//! primary ─► {"id":"…","result":true}
//! ```
//!
//! stdout belongs to this protocol, so worker processes must log to stderr.

pub mod channel;
pub mod client;

pub use channel::serve_worker_channel;
pub use client::IpcClient;

use serde::{Deserialize, Serialize};

/// Operations a worker can ask of the authority.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum WorkerRequest {
    AddCount { key: String, score: u64 },
    AddSession { key: String, session: String },
    RemoveSession { key: String, session: String },
    GetBlockNumber { chain: String },
}

/// A request line sent by a worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerMessage {
    pub id: String,
    #[serde(flatten)]
    pub request: WorkerRequest,
}

/// Result payload of a reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageResult {
    Flag(bool),
    BlockNumber(Option<u64>),
}

/// A reply line sent by the supervisor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerReply {
    pub id: String,
    pub result: MessageResult,
}
