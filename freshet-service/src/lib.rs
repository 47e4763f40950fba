//! Freshet Service - the RPC boundary of the Freshet client.
//!
//! This crate defines the abstract surface the consumption engine drives:
//! topic/shard metadata, cursor and record reads, record writes, the
//! consumer-group protocol (join/heartbeat/sync), and the offset protocol
//! (open/commit/get). The wire transport, serialization, and
//! authentication behind this surface are owned elsewhere.
//!
//! # Implementations
//!
//! - Production transports implement [`StreamService`] over the wire.
//! - [`SimulatedService`] is a fully scriptable in-memory implementation
//!   used by every test in the workspace: per-shard record logs, opaque
//!   cursors, per-endpoint fault injection, and call counters.

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

mod api;
mod simulated;

pub use api::{CursorInfo, CursorKind, RecordBatch, StreamService, TopicMeta};
pub use simulated::{Endpoint, SimulatedService, SyncCall};
