//! Decoding one raw line from a Trace2 client into a typed event.
//!
//! A line is either empty/whitespace (ignored), a `#` comment (ignored),
//! a JSON event object, a `cc: ` command/control verb from the helper tool,
//! or unrecognized noise that we ignore with a debug log.

use chrono::{DateTime, Utc};
use serde_json::Value;
use thiserror::Error;
use tracing::debug;

use super::jmap::{ExtractError, JsonMap};

/// Prefix that marks an out-of-band command/control verb line.
pub const COMMAND_CONTROL_PREFIX: &[u8] = b"cc: ";

/// Errors from decoding a single line of Trace2 data.
#[derive(Error, Debug)]
pub enum ParseError {
    #[error("invalid JSON in Trace2 event: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Extract(#[from] ExtractError),
}

/// One decoded Trace2 event: the common header fields plus the
/// event-specific payload.
#[derive(Debug, Clone)]
pub struct Event {
    /// The `event` field (event kind name).
    pub name: String,
    /// The Trace2 session id of the emitting process.
    pub sid: String,
    /// Name of the thread that emitted the event.
    pub thread: String,
    /// Event timestamp.
    pub time: DateTime<Utc>,
    /// Optional repo-id; required only for `def_repo`.
    pub repo: Option<i64>,
    pub payload: EventPayload,
}

/// Event-specific fields, keyed by the `event` value.
///
/// `exit` and `atexit` share a variant (they are treated identically), as do
/// `data`/`data_json`, `timer`/`th_timer`, and `counter`/`th_counter`; the
/// state machine distinguishes the thread-scoped flavors via [`Event::name`].
#[derive(Debug, Clone)]
pub enum EventPayload {
    Version {
        evt: String,
        exe: String,
    },
    Start {
        argv: Vec<Value>,
    },
    AtExit {
        code: i64,
    },
    Signal {
        signo: i64,
    },
    Error {
        msg: String,
        fmt: String,
    },
    Printf {
        msg: String,
    },
    CmdPath {
        path: String,
    },
    CmdAncestry {
        ancestry: Vec<Value>,
    },
    CmdName {
        name: String,
        hierarchy: String,
    },
    CmdMode {
        name: String,
    },
    Alias {
        alias: String,
        argv: Vec<Value>,
    },
    ChildStart {
        child_id: i64,
        child_class: String,
        use_shell: bool,
        argv: Vec<Value>,
        hook_name: Option<String>,
        cd: Option<String>,
    },
    ChildExit {
        child_id: i64,
        pid: i64,
        code: i64,
    },
    ChildReady {
        child_id: i64,
        pid: i64,
        ready: String,
    },
    ThreadStart,
    ThreadExit,
    Exec {
        exec_id: i64,
        argv: Vec<Value>,
        exe: Option<String>,
    },
    ExecResult {
        exec_id: i64,
        code: i64,
    },
    DefParam {
        param: String,
        value: String,
        scope: Option<String>,
    },
    DefRepo {
        worktree: String,
    },
    RegionEnter {
        nesting: i64,
        category: Option<String>,
        label: Option<String>,
        msg: Option<String>,
    },
    RegionLeave {
        nesting: i64,
        category: Option<String>,
        label: Option<String>,
        msg: Option<String>,
    },
    /// `data` (string-or-int value) and `data_json` (any JSON value).
    Data {
        nesting: i64,
        category: String,
        key: String,
        value: Value,
    },
    /// `timer` and `th_timer`.
    Timer {
        category: String,
        name: String,
        intervals: i64,
        t_total: f64,
        t_min: f64,
        t_max: f64,
    },
    /// `counter` and `th_counter`.
    Counter {
        category: String,
        name: String,
        count: i64,
    },
    /// Any event name we do not know. The Trace2 format is allowed to add
    /// new event kinds, so these parse the common header and are dropped.
    Unrecognized,
}

/// Classify and decode one raw line from the client.
///
/// Returns `Ok(Some(event))` for a JSON event, `Ok(None)` for blank lines,
/// comments, command verbs, and unrecognized stream verbs, and `Err` for a
/// malformed event.
pub fn parse_line(raw: &[u8], allow_commands: bool) -> Result<Option<Event>, ParseError> {
    let trimmed = trim_ascii(raw);

    if trimmed.is_empty() || trimmed[0] == b'#' {
        return Ok(None);
    }

    if trimmed[0] == b'{' {
        return parse_json(trimmed).map(Some);
    }

    if let Some(verb) = trimmed.strip_prefix(COMMAND_CONTROL_PREFIX) {
        if allow_commands {
            do_command_verb(verb);
        } else {
            debug!(
                target: "gitpulse::events",
                "command verbs are disabled: '{}'",
                String::from_utf8_lossy(trimmed)
            );
        }
        return Ok(None);
    }

    debug!(
        target: "gitpulse::events",
        "unrecognized data stream verb: '{}'",
        String::from_utf8_lossy(trimmed)
    );
    Ok(None)
}

/// Process a command/control verb from the helper tool.
///
/// No verbs are currently defined, so everything is logged and dropped.
fn do_command_verb(verb: &[u8]) {
    debug!(
        target: "gitpulse::events",
        "invalid command verb: '{}'",
        String::from_utf8_lossy(verb)
    );
}

fn trim_ascii(raw: &[u8]) -> &[u8] {
    let start = raw
        .iter()
        .position(|b| !b.is_ascii_whitespace())
        .unwrap_or(raw.len());
    let end = raw
        .iter()
        .rposition(|b| !b.is_ascii_whitespace())
        .map_or(start, |p| p + 1);
    &raw[start..end]
}

fn parse_json(line: &[u8]) -> Result<Event, ParseError> {
    let jm = JsonMap::from_slice(line)?;

    let name = jm.required_str("event")?;
    let sid = jm.required_str("sid")?;
    let thread = jm.required_str("thread")?;
    // "time" is required on every event so that we can bracket spans.
    // Git omits it in "brief" mode; clients in brief mode are not supported.
    let time = jm.required_time("time")?;
    let repo = jm.optional_i64("repo")?;

    let payload = extract_payload(&name, repo, &jm)?;

    Ok(Event {
        name,
        sid,
        thread,
        time,
        repo,
        payload,
    })
}

fn extract_payload(
    name: &str,
    repo: Option<i64>,
    jm: &JsonMap,
) -> Result<EventPayload, ExtractError> {
    let payload = match name {
        "version" => EventPayload::Version {
            evt: jm.required_str("evt")?,
            exe: jm.required_str("exe")?,
        },
        "start" => EventPayload::Start {
            argv: jm.required_array("argv")?,
        },
        "exit" | "atexit" => EventPayload::AtExit {
            code: jm.required_i64("code")?,
        },
        "signal" => EventPayload::Signal {
            signo: jm.required_i64("signo")?,
        },
        "error" => EventPayload::Error {
            msg: jm.required_str("msg")?,
            fmt: jm.required_str("fmt")?,
        },
        "printf" => EventPayload::Printf {
            msg: jm.required_str("msg")?,
        },
        "cmd_path" => EventPayload::CmdPath {
            path: jm.required_str("path")?,
        },
        "cmd_ancestry" => EventPayload::CmdAncestry {
            ancestry: jm.required_array("ancestry")?,
        },
        "cmd_name" => EventPayload::CmdName {
            name: jm.required_str("name")?,
            hierarchy: jm.required_str("hierarchy")?,
        },
        "cmd_mode" => EventPayload::CmdMode {
            name: jm.required_str("name")?,
        },
        "alias" => EventPayload::Alias {
            alias: jm.required_str("alias")?,
            argv: jm.required_array("argv")?,
        },
        "child_start" => {
            let child_class = jm.required_str("child_class")?;
            // Only hook children carry a hook name, and for them it is
            // required.
            let hook_name = if child_class == "hook" {
                Some(jm.required_str("hook_name")?)
            } else {
                None
            };
            EventPayload::ChildStart {
                child_id: jm.required_i64("child_id")?,
                child_class,
                use_shell: jm.required_bool("use_shell")?,
                argv: jm.required_array("argv")?,
                hook_name,
                cd: jm.optional_str("cd")?,
            }
        }
        "child_exit" => EventPayload::ChildExit {
            child_id: jm.required_i64("child_id")?,
            pid: jm.required_i64("pid")?,
            code: jm.required_i64("code")?,
        },
        "child_ready" => EventPayload::ChildReady {
            child_id: jm.required_i64("child_id")?,
            pid: jm.required_i64("pid")?,
            ready: jm.required_str("ready")?,
        },
        "thread_start" => EventPayload::ThreadStart,
        "thread_exit" => EventPayload::ThreadExit,
        "exec" => EventPayload::Exec {
            exec_id: jm.required_i64("exec_id")?,
            argv: jm.required_array("argv")?,
            exe: jm.optional_str("exe")?,
        },
        "exec_result" => EventPayload::ExecResult {
            exec_id: jm.required_i64("exec_id")?,
            code: jm.required_i64("code")?,
        },
        "def_param" => EventPayload::DefParam {
            param: jm.required_str("param")?,
            value: jm.required_str("value")?,
            scope: jm.optional_str("scope")?,
        },
        "def_repo" => {
            // The common "repo" field is optional elsewhere; for def_repo
            // it is the key being defined, so force it.
            if repo.is_none() {
                return Err(ExtractError::KeyNotPresent("repo".to_string()));
            }
            EventPayload::DefRepo {
                worktree: jm.required_str("worktree")?,
            }
        }
        "region_enter" => EventPayload::RegionEnter {
            nesting: jm.required_i64("nesting")?,
            category: jm.optional_str("category")?,
            label: jm.optional_str("label")?,
            msg: jm.optional_str("msg")?,
        },
        "region_leave" => EventPayload::RegionLeave {
            nesting: jm.required_i64("nesting")?,
            category: jm.optional_str("category")?,
            label: jm.optional_str("label")?,
            msg: jm.optional_str("msg")?,
        },
        "data" => EventPayload::Data {
            nesting: jm.required_i64("nesting")?,
            category: jm.required_str("category")?,
            key: jm.required_str("key")?,
            value: jm.required_str_or_i64("value")?,
        },
        "data_json" => EventPayload::Data {
            nesting: jm.required_i64("nesting")?,
            category: jm.required_str("category")?,
            key: jm.required_str("key")?,
            value: jm.required_value("value")?,
        },
        "timer" | "th_timer" => EventPayload::Timer {
            category: jm.required_str("category")?,
            name: jm.required_str("name")?,
            intervals: jm.required_i64("intervals")?,
            t_total: jm.required_f64("t_total")?,
            t_min: jm.required_f64("t_min")?,
            t_max: jm.required_f64("t_max")?,
        },
        "counter" | "th_counter" => EventPayload::Counter {
            category: jm.required_str("category")?,
            name: jm.required_str("name")?,
            count: jm.required_i64("count")?,
        },
        _ => EventPayload::Unrecognized,
    };

    Ok(payload)
}
