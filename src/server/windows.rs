//! Windows transport: a local named pipe.
//!
//! Named pipes have no accept queue in the Unix sense; instead the server
//! keeps a number of pipe instances outstanding and each `connect()`
//! claims one. We run a pool of acceptor tasks (twice the configured
//! queue depth) so that a burst of short-lived Git clients never finds
//! the listen backlog empty.

use std::collections::BTreeMap;
use std::sync::Arc;

use tokio::net::windows::named_pipe::{NamedPipeServer, ServerOptions};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::config::Config;
use crate::export::semconv;
use crate::export::SpanConsumer;
use crate::pii::PiiSettings;

use super::platform;
use super::worker::run_worker;
use super::ServerError;

const PIPE_BUFFER_SIZE: u32 = 65536;

/// Accept Trace2 client connections on a named pipe until shutdown or a
/// fatal condition.
pub async fn listen_named_pipe(
    pipe_path: &str,
    config: Arc<Config>,
    consumer: Arc<dyn SpanConsumer>,
    cancel: CancellationToken,
) -> Result<(), ServerError> {
    // Creating the first instance claims the pipe name; failure here is
    // fatal (the name may be owned by another server).
    let first = ServerOptions::new()
        .first_pipe_instance(true)
        .in_buffer_size(PIPE_BUFFER_SIZE)
        .out_buffer_size(PIPE_BUFFER_SIZE)
        .create(pipe_path)
        .map_err(|source| {
            error!(target: "gitpulse::server", pipe = pipe_path, "could not create named pipe: {source}");
            ServerError::Bind {
                path: pipe_path.to_string(),
                source,
            }
        })?;

    info!(target: "gitpulse::server", pipe = pipe_path, "listening");

    let pool_size = config.pipe_queue_depth.max(1) * 2;
    let mut acceptors = tokio::task::JoinSet::new();
    let mut first = Some(first);

    for acceptor_id in 0..pool_size as u64 {
        acceptors.spawn(accept_task(
            acceptor_id,
            first.take(),
            pipe_path.to_string(),
            config.clone(),
            consumer.clone(),
            cancel.clone(),
        ));
    }

    while acceptors.join_next().await.is_some() {}

    Ok(())
}

/// One acceptor: block on connect, hand the connected instance to a
/// worker, create a replacement instance, repeat. The first acceptor
/// starts from the instance that claimed the pipe name.
async fn accept_task(
    acceptor_id: u64,
    initial: Option<NamedPipeServer>,
    pipe_path: String,
    config: Arc<Config>,
    consumer: Arc<dyn SpanConsumer>,
    cancel: CancellationToken,
) {
    let mut worker_seq: u64 = 0;
    let mut next = initial;

    loop {
        let server = match next.take() {
            Some(server) => server,
            None => match ServerOptions::new()
                .in_buffer_size(PIPE_BUFFER_SIZE)
                .out_buffer_size(PIPE_BUFFER_SIZE)
                .create(&pipe_path)
            {
                Ok(server) => server,
                Err(e) => {
                    error!(
                        target: "gitpulse::server",
                        acceptor_id,
                        "could not create pipe instance: {e}"
                    );
                    return;
                }
            },
        };

        let connected = tokio::select! {
            _ = cancel.cancelled() => {
                debug!(target: "gitpulse::server", acceptor_id, "shutdown requested");
                return;
            }
            result = server.connect() => result,
        };

        match connected {
            Ok(()) => {
                worker_seq += 1;
                let worker_id = acceptor_id * 1_000_000 + worker_seq;
                spawn_worker(server, worker_id, &config, &consumer, &cancel);
            }
            Err(e) => {
                // Perhaps the client hung up before we could service the
                // connection.
                error!(target: "gitpulse::server", acceptor_id, "connect failed: {e}");
            }
        }
    }
}

fn spawn_worker(
    pipe: NamedPipeServer,
    worker_id: u64,
    config: &Arc<Config>,
    consumer: &Arc<dyn SpanConsumer>,
    cancel: &CancellationToken,
) {
    let pii = gather_pii(config.pii.as_deref());

    let config = config.clone();
    let consumer = consumer.clone();
    let cancel = cancel.clone();

    tokio::spawn(async move {
        run_worker(pipe, worker_id, pii, config, consumer, cancel).await;
    });
}

/// On Windows the pipe peer is always local; the hostname comes from the
/// system and the username is inferred from the session.
fn gather_pii(settings: Option<&PiiSettings>) -> BTreeMap<String, String> {
    let mut pii = BTreeMap::new();
    let Some(settings) = settings else {
        return pii;
    };

    if settings.include.hostname {
        if let Some(hostname) = platform::hostname() {
            pii.insert(semconv::TRACE2_PII_HOSTNAME.to_string(), hostname);
        }
    }

    if settings.include.username {
        if let Some(username) = platform::local_username() {
            pii.insert(semconv::TRACE2_PII_USERNAME.to_string(), username);
        }
    }

    pii
}
