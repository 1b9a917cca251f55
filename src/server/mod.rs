//! The stream server: transport listeners and per-connection workers.
//!
//! One worker per client connection; each worker owns one in-flight
//! dataset. Host shutdown propagates through a cancellation token that
//! every acceptor and worker watches; closing the transport is the
//! mechanism that unblocks pending reads within a bounded number of
//! syscalls.

pub(crate) mod platform;
pub mod worker;

#[cfg(unix)]
pub mod unix;
#[cfg(windows)]
pub mod windows;

use std::sync::Arc;

use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::export::SpanConsumer;

/// Fatal server conditions, escalated to the host exactly once.
#[derive(Error, Debug)]
pub enum ServerError {
    #[error("could not create listening endpoint '{path}': {source}")]
    Bind {
        path: String,
        source: std::io::Error,
    },

    /// Another process unlinked our socket pathname and bound its own.
    /// Our socket still works but no client will ever reach it again, so
    /// the only sane move is to shut down (without touching the path,
    /// which now belongs to someone else).
    #[error("socket pathname stolen: '{path}': {detail}")]
    SocketStolen { path: String, detail: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Handle for requesting shutdown from another task. `shutdown()` is
/// idempotent; later calls are no-ops.
#[derive(Clone)]
pub struct ReceiverHandle {
    cancel: CancellationToken,
}

impl ReceiverHandle {
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }
}

/// The telemetry receiver: owns the platform listener and spawns one
/// worker per accepted connection.
pub struct Receiver {
    config: Arc<Config>,
    consumer: Arc<dyn SpanConsumer>,
    cancel: CancellationToken,
}

impl Receiver {
    pub fn new(config: Arc<Config>, consumer: Arc<dyn SpanConsumer>) -> Self {
        Receiver {
            config,
            consumer,
            cancel: CancellationToken::new(),
        }
    }

    pub fn handle(&self) -> ReceiverHandle {
        ReceiverHandle {
            cancel: self.cancel.clone(),
        }
    }

    /// Listen for Trace2 clients until shutdown or a fatal transport
    /// condition. Returns `Ok(())` on a clean shutdown.
    pub async fn run(&self) -> Result<(), ServerError> {
        #[cfg(unix)]
        {
            unix::listen_unix_socket(
                &self.config.socket,
                self.config.clone(),
                self.consumer.clone(),
                self.cancel.clone(),
            )
            .await
        }

        #[cfg(windows)]
        {
            windows::listen_named_pipe(
                &self.config.pipe,
                self.config.clone(),
                self.consumer.clone(),
                self.cancel.clone(),
            )
            .await
        }
    }
}
