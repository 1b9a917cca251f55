//! The downstream consumer boundary.
//!
//! The receiver hands each finalized span batch to a [`SpanConsumer`];
//! everything past that seam (exporter pipelines, network transports) is
//! someone else's problem. Consumers must tolerate concurrent calls from
//! many workers.

use async_trait::async_trait;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

use super::spans::SpanBatch;

/// Error surfaced by a consumer. Failures are logged by the worker; they
/// never affect other datasets.
#[derive(Error, Debug)]
#[error("{0}")]
pub struct ConsumerError(pub String);

/// Downstream sink for finalized span batches.
#[async_trait]
pub trait SpanConsumer: Send + Sync {
    async fn consume(&self, batch: SpanBatch) -> Result<(), ConsumerError>;
}

/// A consumer that writes each batch as one JSON line to a writer.
///
/// This is the stand-in pipeline used by the bundled binary (writing to
/// stdout) and by tests; production deployments plug in their own
/// consumer.
pub struct JsonLineConsumer<W> {
    writer: Mutex<W>,
}

impl<W> JsonLineConsumer<W>
where
    W: tokio::io::AsyncWrite + Unpin + Send,
{
    pub fn new(writer: W) -> Self {
        JsonLineConsumer {
            writer: Mutex::new(writer),
        }
    }
}

#[async_trait]
impl<W> SpanConsumer for JsonLineConsumer<W>
where
    W: tokio::io::AsyncWrite + Unpin + Send,
{
    async fn consume(&self, batch: SpanBatch) -> Result<(), ConsumerError> {
        let mut line = serde_json::to_vec(&batch)
            .map_err(|e| ConsumerError(format!("could not serialize span batch: {e}")))?;
        line.push(b'\n');

        let mut writer = self.writer.lock().await;
        writer
            .write_all(&line)
            .await
            .map_err(|e| ConsumerError(format!("could not write span batch: {e}")))?;
        writer
            .flush()
            .await
            .map_err(|e| ConsumerError(format!("could not flush span batch: {e}")))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    #[tokio::test]
    async fn test_json_line_consumer_writes_one_line_per_batch() {
        let buffer: Vec<u8> = Vec::new();
        let consumer = JsonLineConsumer::new(buffer);

        let batch = SpanBatch {
            resource: BTreeMap::new(),
            spans: Vec::new(),
        };
        consumer.consume(batch.clone()).await.unwrap();
        consumer.consume(batch).await.unwrap();

        let written = consumer.writer.into_inner();
        let text = String::from_utf8(written).unwrap();
        assert_eq!(text.lines().count(), 2);
        for line in text.lines() {
            let parsed: serde_json::Value = serde_json::from_str(line).unwrap();
            assert!(parsed.get("spans").is_some());
        }
    }
}
