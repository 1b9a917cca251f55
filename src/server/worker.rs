//! The per-connection worker: read loop, event dispatch, finalization,
//! and hand-off to the downstream consumer.
//!
//! A worker represents the server side of a connection from a single Git
//! client; every event it reads belongs to the same process and SID, so
//! no SID-to-dataset mapping is needed. Finalization on EOF is the only
//! path that emits spans: Trace2 has no explicit flush event.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::Utc;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

use crate::config::Config;
use crate::dataset::{ApplyError, Dataset};
use crate::events::parse_line;
use crate::export::{to_span_batch, SpanConsumer};
use crate::filter::{compute_detail_level, DetailLevel, FilterKeyNames};

/// Outcome of one worker's read loop.
enum ReadOutcome {
    /// Clean EOF from the client; finalize and export.
    Eof,
    /// Transport closed under us (peer reset or host cancellation);
    /// stop silently.
    Closed,
    /// Parse error, unexpected I/O error, or client rejection; stop
    /// without exporting.
    Abandon,
}

/// Drive one accepted connection to completion.
///
/// `pii` was gathered by the listener before the read loop starts (it
/// needs the raw connection for peer credentials).
pub(crate) async fn run_worker<R>(
    reader: R,
    worker_id: u64,
    pii: BTreeMap<String, String>,
    config: Arc<Config>,
    consumer: Arc<dyn SpanConsumer>,
    cancel: CancellationToken,
) where
    R: AsyncRead + Unpin,
{
    let mut ds = Dataset::new(config.summary.clone());
    ds.pii = pii;

    let dsid = ds.dataset_id();
    debug!(target: "gitpulse::server", worker_id, dsid, "worker started");

    let outcome = read_loop(reader, &mut ds, &config, &cancel).await;

    match outcome {
        ReadOutcome::Eof => {
            export_dataset(ds, &config, consumer.as_ref()).await;
        }
        ReadOutcome::Closed | ReadOutcome::Abandon => {}
    }

    debug!(target: "gitpulse::server", worker_id, dsid, "worker finished");
}

async fn read_loop<R>(
    reader: R,
    ds: &mut Dataset,
    config: &Config,
    cancel: &CancellationToken,
) -> ReadOutcome
where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(reader);
    let mut line: Vec<u8> = Vec::new();
    let dsid = ds.dataset_id();

    loop {
        line.clear();

        // Watching for host cancellation here is what bounds worker
        // lifetime on shutdown: the pending read is abandoned and the
        // connection drops when the worker returns, giving the client a
        // clean write error instead of an ever-full buffer.
        let read = tokio::select! {
            _ = cancel.cancelled() => {
                debug!(target: "gitpulse::server", dsid, "cancelled, dropping connection");
                return ReadOutcome::Closed;
            }
            read = reader.read_until(b'\n', &mut line) => read,
        };

        match read {
            Ok(0) => return ReadOutcome::Eof,
            Ok(_) => {}
            Err(e) if is_transport_closed(&e) => return ReadOutcome::Closed,
            Err(e) => {
                error!(target: "gitpulse::server", dsid, "read failed: {e}");
                return ReadOutcome::Abandon;
            }
        }

        debug!(
            target: "gitpulse::server",
            dsid,
            "saw: {}",
            String::from_utf8_lossy(&line).trim_end()
        );

        let evt = match parse_line(&line, config.enable_commands) {
            Ok(Some(evt)) => evt,
            Ok(None) => continue,
            Err(e) => {
                error!(target: "gitpulse::server", dsid, "bad Trace2 line: {e}");
                return ReadOutcome::Abandon;
            }
        };

        ds.mark_saw_data();

        if let Err(ApplyError::RejectClient { verb }) = ds.apply(&evt) {
            // Silently reject the client without logging an error;
            // dropping the connection makes it stop sending.
            debug!(target: "gitpulse::server", dsid, verb = %verb, "rejecting client");
            return ReadOutcome::Abandon;
        }
    }
}

/// Finalize the dataset, run the filter decision, and hand the span tree
/// to the consumer.
pub(crate) async fn export_dataset(mut ds: Dataset, config: &Config, consumer: &dyn SpanConsumer) {
    let dsid = ds.dataset_id();

    if !ds.saw_data() {
        debug!(target: "gitpulse::server", dsid, "EOF without data");
        return;
    }

    if !ds.finalize(Utc::now()) {
        debug!(target: "gitpulse::server", dsid, "insufficient data, dropping");
        return;
    }

    let filter = config.filter.as_deref();
    let (dl, dl_debug) = compute_detail_level(
        filter,
        &ds.process.param_set_values,
        &ds.process.qualified_names,
    );
    debug!(target: "gitpulse::server", dsid, "{dl_debug}");

    if dl == DetailLevel::Drop {
        return;
    }

    let default_keynames = FilterKeyNames::default();
    let keynames = filter.map_or(&default_keynames, |f| &f.keynames);

    let batch = to_span_batch(&ds, dl, keynames);
    if let Err(e) = consumer.consume(batch).await {
        error!(target: "gitpulse::server", dsid, "consumer failed: {e}");
    }
}

/// Errors that mean the peer (or our cancellation watcher) closed the
/// transport: the normal silent-stop path, not worth an error log.
fn is_transport_closed(e: &std::io::Error) -> bool {
    matches!(
        e.kind(),
        std::io::ErrorKind::ConnectionReset
            | std::io::ErrorKind::ConnectionAborted
            | std::io::ErrorKind::BrokenPipe
            | std::io::ErrorKind::NotConnected
    )
}
