//! Freshet Core - domain types for the Freshet streaming client.
//!
//! This crate provides the data model shared by the service boundary and the
//! consumption engine: shard identifiers, offsets, shard metadata, records,
//! group-protocol models, the error taxonomy, configuration, and explicit
//! limits. It performs no I/O.
//!
//! # Design Principles (`TigerStyle`)
//!
//! - **Strongly-typed identifiers**: a `ShardId` is not a bare `String`
//! - **Explicit limits**: every retry budget and buffer has a named bound
//! - **No unsafe code**: Safety > Performance

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

mod config;
mod error;
mod group;
mod offset;
mod record;
mod shard;
mod types;

pub mod limits;

pub use config::{ConsumerConfig, ProducerConfig};
pub use error::{ClientError, ClientResult};
pub use group::{Assignment, GroupMembership, HeartbeatPlan};
pub use offset::Offset;
pub use record::RecordEntry;
pub use shard::{ShardDesc, ShardMeta, ShardState};
pub use types::{ShardId, Subscription, TopicPath};
