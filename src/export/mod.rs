//! Conversion of a finalized dataset into an attributed span tree, and the
//! downstream consumer boundary.

pub mod consumer;
pub mod semconv;
pub mod spans;

pub use consumer::{ConsumerError, JsonLineConsumer, SpanConsumer};
pub use spans::{to_span_batch, SpanBatch, SpanRecord};
