//! # Gate Core
//!
//! Core library for the gate JSON-RPC admission proxy.
//!
//! - **[`filter`]**: method whitelist, per-origin rate limit and block-range admission
//! - **[`upstream`]**: HTTP and multiplexed WebSocket transports sharing one filtered entry point
//! - **[`authority`]**: rate counters, session registry and the [`authority::StateAuthority`] seam
//! - **[`cache`]**: last known block per chain
//! - **[`ipc`]**: line-delimited JSON protocol between workers and the supervisor
//! - **[`supervisor`]**: worker process lifecycle
//! - **[`config`]**: layered configuration
//!
//! ## Process Layout
//!
//! ```text
//! ┌──────────────────────── supervisor ────────────────────────┐
//! │  Authority { RateLimiter, BlockCache }   WorkerSupervisor  │
//! └───────────────▲──────────────────────────────┬─────────────┘
//!                 │ stdout: requests              │ stdin: replies
//!        ┌────────┴───────┐            ┌──────────▼─────┐
//!        │    worker 0    │    ...     │    worker N    │
//!        │  IpcClient     │            │  IpcClient     │
//!        │  axum router   │            │  axum router   │
//!        └────────────────┘            └────────────────┘
//! ```
//!
//! ## Request Flow
//!
//! ```text
//! client payload ─► parse_payload ─► UpstreamTransport::send
//!                                      ├─ filter::admit ─── reject ──► error response
//!                                      └─ send_upstream ─► HTTP POST | WebSocket frame
//! ```

pub mod authority;
pub mod cache;
pub mod config;
pub mod filter;
pub mod ipc;
pub mod supervisor;
pub mod types;
pub mod upstream;
pub mod utils;
