//! Integration tests for the gate JSON-RPC proxy
//!
//! This crate contains various test modules:
//!
//! - `filter_tests`: admission checks through the shared transport entry point
//! - `http_transport_tests`: HTTP forwarding and error mapping against mockito
//! - `websocket_transport_tests`: correlation, timeouts and pushes on the WebSocket transport
//! - `server_tests`: HTTP routes and client WebSocket sessions end to end
//! - `mock_infrastructure`: reusable mock backends and the router harness
//!
//! ## Running Tests
//!
//! ```bash
//! cargo test --package tests
//! ```


#[cfg(test)]
mod http_transport_tests;

#[cfg(test)]
mod websocket_transport_tests;

#[cfg(test)]
mod server_tests;
