//! gitpulse - Local telemetry receiver for Git Trace2 event streams
//!
//! Accepts line-delimited Trace2 JSON events from short-lived Git client
//! processes over a local transport (Unix domain socket on POSIX, named
//! pipe on Windows), folds each connection's stream into a per-process
//! dataset, decides how much detail to keep via configurable filtering,
//! and hands the result to a downstream span consumer as a hierarchical
//! span tree.

pub mod config;
pub mod dataset;
pub mod events;
pub mod export;
pub mod filter;
pub mod pii;
pub mod server;

pub use config::Config;
pub use dataset::Dataset;
pub use export::{SpanBatch, SpanConsumer};
pub use filter::DetailLevel;
pub use server::{Receiver, ReceiverHandle};
