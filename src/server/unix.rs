//! POSIX transport: a stream Unix domain socket.
//!
//! Binding creates the socket inode in the filesystem, which exposes a
//! Unix-level race we cannot prevent: another process can unlink our
//! pathname and bind its own socket there, silently orphaning us (our fd
//! keeps working but no client will ever connect). We record the inode at
//! bind time and re-stat the path every 30 seconds; if it disappears or
//! changes, we report a fatal stolen-socket condition and shut down
//! without touching the path, since someone else owns it now.

use std::collections::BTreeMap;
use std::fs;
use std::os::unix::fs::{MetadataExt, PermissionsExt};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::{UnixListener, UnixStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::config::Config;
use crate::export::SpanConsumer;
use crate::export::semconv;
use crate::pii::PiiSettings;

use super::platform;
use super::worker::run_worker;
use super::ServerError;

/// How often the inode sentinel re-stats the socket path.
const SENTINEL_PERIOD: Duration = Duration::from_secs(30);

/// Accept Trace2 client connections on a Unix domain socket until
/// shutdown or a fatal condition.
pub async fn listen_unix_socket(
    socket_path: &str,
    config: Arc<Config>,
    consumer: Arc<dyn SpanConsumer>,
    cancel: CancellationToken,
) -> Result<(), ServerError> {
    let (listener, inode) = open_socket(socket_path)?;
    info!(
        target: "gitpulse::server",
        socket = socket_path,
        inode,
        "listening"
    );

    let result = accept_loop(&listener, socket_path, inode, &config, &consumer, &cancel).await;

    match &result {
        Ok(()) => {
            // Clean shutdown: we still own the inode, so remove the
            // socket file behind us.
            let _ = fs::remove_file(socket_path);
        }
        Err(_) => {
            // The pathname belongs to someone else; leave it alone. Make
            // sure every worker unwinds too.
            cancel.cancel();
        }
    }

    result
}

/// Unlink-then-bind, then open up the socket mode.
fn open_socket(socket_path: &str) -> Result<(UnixListener, u64), ServerError> {
    // If the pathname already exists the bind will fail. We cannot tell a
    // dead socket from one another process is servicing, so force-delete
    // under the assumption that it is dead; the inode sentinel catches the
    // case where we guessed wrong and someone re-binds it later.
    let _ = fs::remove_file(socket_path);

    // Trace2 supports stream and datagram sockets; we only service
    // streams (`af_unix:` / `af_unix:stream:` event targets).
    let listener = UnixListener::bind(socket_path).map_err(|source| {
        error!(target: "gitpulse::server", socket = socket_path, "could not create socket: {source}");
        ServerError::Bind {
            path: socket_path.to_string(),
            source,
        }
    })?;

    // The service may run as a privileged user; ordinary Git commands
    // must still be able to connect. Git silently disables telemetry on a
    // permission error, so a wrong mode here fails invisibly.
    if let Err(e) = fs::set_permissions(socket_path, fs::Permissions::from_mode(0o666)) {
        error!(target: "gitpulse::server", socket = socket_path, "could not chmod socket: {e}");
    }

    let inode = socket_inode(socket_path).map_err(|source| ServerError::Bind {
        path: socket_path.to_string(),
        source,
    })?;

    Ok((listener, inode))
}

fn socket_inode(path: &str) -> std::io::Result<u64> {
    fs::symlink_metadata(Path::new(path)).map(|m| m.ino())
}

async fn accept_loop(
    listener: &UnixListener,
    socket_path: &str,
    inode: u64,
    config: &Arc<Config>,
    consumer: &Arc<dyn SpanConsumer>,
    cancel: &CancellationToken,
) -> Result<(), ServerError> {
    let mut worker_id: u64 = 0;
    let mut sentinel = tokio::time::interval(SENTINEL_PERIOD);
    // The first tick completes immediately; consume it so the sentinel
    // fires on the period boundaries.
    sentinel.tick().await;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                info!(target: "gitpulse::server", "shutdown requested");
                return Ok(());
            }

            accepted = listener.accept() => {
                match accepted {
                    Ok((stream, _addr)) => {
                        worker_id += 1;
                        spawn_worker(stream, worker_id, config, consumer, cancel);
                    }
                    Err(e) => {
                        // Accept errors do happen; perhaps the client hung
                        // up before we could service the connection.
                        error!(target: "gitpulse::server", "accept failed: {e}");
                    }
                }
            }

            _ = sentinel.tick() => {
                if let Err(err) = check_inode(socket_path, inode) {
                    error!(target: "gitpulse::server", "{err}");
                    return Err(err);
                }
            }
        }
    }
}

/// Verify that the socket path still exists and still carries our inode.
fn check_inode(socket_path: &str, expected: u64) -> Result<(), ServerError> {
    match socket_inode(socket_path) {
        Err(e) => {
            // Could not lstat our socket; assume it was deleted or stolen
            // and give up.
            Err(ServerError::SocketStolen {
                path: socket_path.to_string(),
                detail: e.to_string(),
            })
        }
        Ok(observed) if observed != expected => Err(ServerError::SocketStolen {
            path: socket_path.to_string(),
            detail: format!("inode changed: expected {expected} observed {observed}"),
        }),
        Ok(_) => Ok(()),
    }
}

fn spawn_worker(
    stream: UnixStream,
    worker_id: u64,
    config: &Arc<Config>,
    consumer: &Arc<dyn SpanConsumer>,
    cancel: &CancellationToken,
) {
    let pii = gather_pii(config.pii.as_deref(), &stream);

    let config = config.clone();
    let consumer = consumer.clone();
    let cancel = cancel.clone();

    tokio::spawn(async move {
        run_worker(stream, worker_id, pii, config, consumer, cancel).await;
    });
}

/// Gather any enabled PII before the read loop starts: the hostname from
/// the system, and the username from the peer credential of the connected
/// socket.
fn gather_pii(settings: Option<&PiiSettings>, stream: &UnixStream) -> BTreeMap<String, String> {
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
        if let Ok(cred) = stream.peer_cred() {
            if let Some(username) = platform::username_for_uid(cred.uid()) {
                pii.insert(semconv::TRACE2_PII_USERNAME.to_string(), username);
            }
        }
    }

    debug!(target: "gitpulse::server", fields = pii.len(), "gathered pii");
    pii
}
