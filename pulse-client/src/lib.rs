#![deny(missing_docs)]
//! Client for a remote diagnostic model server.
//!
//! Two request modes share one request shape, `{"question": "..."}`:
//!
//! - **Synchronous**: [`DiagnosisClient::ask`] waits for the full response and
//!   returns one decoded answer.
//! - **Streaming**: [`StreamController::start`] opens an NDJSON explanation
//!   stream and hands back a [`StreamSession`] that yields records as they
//!   arrive: per-word influence records, then the final answer.
//!
//! A controller keeps at most one streaming session active. Starting a new
//! one stops the previous session with [`StopReason::Superseded`], which
//! consumers can tell apart from a transport failure.

mod client;
mod config;
mod controller;
mod error;
mod session;

pub use client::{DiagnosisClient, QueryRequest};
pub use config::{ClientConfig, ConfigError};
pub use controller::StreamController;
pub use error::QueryError;
pub use pulse_ndjson::{MalformedLine, Record};
pub use session::{
    CollectedSession, SessionEnd, SessionEvent, SessionId, StopReason, StreamSession,
};
