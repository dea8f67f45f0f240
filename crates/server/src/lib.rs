//! HTTP and WebSocket front end.
//!
//! - [`router`]: axum routes for `POST /{chain}`, `GET /{chain}`, `GET /{chain}/health`
//! - [`ws`]: client WebSocket sessions and the liveness sweep
//! - [`state`]: state shared by every handler

pub mod router;
pub mod state;
pub mod ws;
