//! ### `ktap`: tap into Kafka topics
//!
//! A command-line consumer for partitioned, ordered, append-only topic logs.
//! Its core is a compact offset-specification language describing which
//! messages to read from which partitions, e.g. `3=100:300,5=43:67`,
//! `newest-10:` or `[2019-08-31]`, and a concurrent engine that resolves
//! those specifications against a live broker and streams matching messages
//! to stdout, one JSON record per message.
//!
//! See the [`offsets`] module for the language, [`consume`] for the engine.

#![deny(missing_debug_implementations)]

pub mod client;
pub mod consume;
pub mod error;
pub mod offsets;
pub mod print;
pub mod resolve;
pub mod select;
pub mod timestamp;

pub use client::{BrokerSession, Checkpoint, KafkaSession, PartitionReader, Record, Symbolic};
pub use consume::{CheckpointStore, ConsumeConfig};
pub use error::{ConsumeError, ParseError, SessionError};
pub use offsets::{parse_offsets, Anchor, Delta, Interval, OffsetSpec, Position, ALL_PARTITIONS};
pub use print::{ConsumedMessage, Encoding};
pub use timestamp::{parse_time, TimeRange};
