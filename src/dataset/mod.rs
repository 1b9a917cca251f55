//! Per-process telemetry model.
//!
//! A [`Dataset`] captures all of the Trace2 event data from a single Git
//! process. All events on one connection are from the same process (and
//! therefore share one Trace2 SID); multi-process trace files are not
//! supported at this layer.
//!
//! We do not know when the command has finished from the events alone. It
//! is usually the `atexit` event, but the process may be killed or crash
//! first. The connection worker sees the EOF from the client and tells us
//! when the process is really done (see [`Dataset::finalize`]).

pub mod apply;
pub mod ids;
pub mod summary;

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use rand::rngs::StdRng;
use rand::{RngCore, SeedableRng};
use serde::Serialize;
use serde_json::Value;

pub use apply::ApplyError;
pub use ids::{extract_ids_from_sid, SpanId, TraceId};
pub use summary::{SummaryAccumulator, SummarySettings};

/// Process-wide dataset id counter, serialized by a mutex.
static DATASET_ID: Mutex<u64> = Mutex::new(0);

fn next_dataset_id() -> u64 {
    let mut guard = DATASET_ID.lock().expect("dataset id mutex poisoned");
    let id = *guard;
    *guard += 1;
    id
}

/// The lifetime of one unit of work: the whole process, a thread, a region,
/// a child process, or an exec replacement.
#[derive(Debug, Clone)]
pub struct SpanEssentials {
    pub self_span_id: SpanId,
    pub parent_span_id: SpanId,
    pub start_time: DateTime<Utc>,
    /// `None` while the unit is still open.
    pub end_time: Option<DateTime<Utc>>,
    pub display_name: String,
}

impl SpanEssentials {
    fn unstarted() -> Self {
        SpanEssentials {
            self_span_id: SpanId::ZERO,
            parent_span_id: SpanId::ZERO,
            start_time: DateTime::UNIX_EPOCH,
            end_time: None,
            display_name: String::new(),
        }
    }

    /// An unclosed unit of work. Possible when the process dies or crashes
    /// and the stream is prematurely terminated.
    pub fn is_incomplete(&self) -> bool {
        self.end_time.is_none()
    }
}

/// The normalized `<exe>`, `<exe>[:<verb>]`, and `<exe>[:<verb>][#<mode>]`
/// spellings computed at finalization.
#[derive(Debug, Clone, Default)]
pub struct QualifiedNames {
    pub exe: String,
    pub exe_verb: String,
    pub exe_verb_mode: String,
}

/// Stopwatch timer totals from a `timer`/`th_timer` event.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct StopwatchTimer {
    pub intervals: i64,
    pub total_sec: f64,
    pub min_sec: f64,
    pub max_sec: f64,
}

/// `data[<category>][<key>] = <value>` tables. Git does not repeat
/// (category, key) pairs; if it does, the last value wins.
pub type DataValues = BTreeMap<String, BTreeMap<String, Value>>;
pub type TimerTable = BTreeMap<String, BTreeMap<String, StopwatchTimer>>;
pub type CounterTable = BTreeMap<String, BTreeMap<String, i64>>;

/// The first `error` event seen from the process. Later errors are dropped
/// because logging an array of messages is problematic downstream.
#[derive(Debug, Clone)]
pub struct FirstError {
    pub msg: String,
    pub fmt: String,
}

/// The alias key/expansion from an `alias` event.
#[derive(Debug, Clone)]
pub struct AliasExpansion {
    pub key: String,
    pub value: Vec<Value>,
}

/// Data associated with the entire process, including the main thread.
/// Span data for the main thread is not present in [`Dataset::threads`].
#[derive(Debug)]
pub struct Process {
    pub main_thread: Thread,

    /// Version string of the Git executable.
    pub exe_version: String,
    /// Trace2 event-format version.
    pub evt_version: String,

    /// Argv passed to the command from the system.
    pub cmd_argv: Vec<Value>,

    /// The command name (aka verb), such as `checkout` or `fetch`.
    pub cmd_verb: String,
    /// The concise verb hierarchy (e.g. `fetch/index-pack`).
    pub cmd_hierarchy: String,
    /// The command mode, for verbs like `checkout` with multiple uses.
    pub cmd_mode: String,

    pub cmd_alias: Option<AliasExpansion>,

    /// Parent-process chain extracted from /proc, when available.
    pub cmd_ancestry: Option<Vec<Value>>,

    pub exe_exit_code: i64,
    pub first_error: Option<FirstError>,

    /// Map repo-ids to worktrees from `def_repo` events. A map rather than
    /// an array because event order is not guaranteed.
    pub repo_set: BTreeMap<i64, String>,

    /// Collapsed set of advertised parameters from `def_param` events,
    /// with the priority of the scope each value arrived in.
    pub param_set_values: BTreeMap<String, String>,
    pub param_set_priorities: BTreeMap<String, i32>,

    /// Process-level `data`/`data_json` values.
    pub data_values: DataValues,
    /// Process-level stopwatch timers.
    pub timers: TimerTable,
    /// Process-level global counters.
    pub counters: CounterTable,

    pub qualified_names: QualifiedNames,
}

/// One thread's lifetime plus its stack of open regions.
///
/// Each thread (including "main") needs its own region stack because
/// Trace2 regions are per-thread. A region-enter pushes a frame; the
/// corresponding region-leave completes it, pops it, and moves it to the
/// dataset's completed list for later reporting.
#[derive(Debug)]
pub struct Thread {
    pub lifetime: SpanEssentials,
    pub region_stack: Vec<Region>,
    pub timers: TimerTable,
    pub counters: CounterTable,
}

impl Thread {
    fn new(lifetime: SpanEssentials) -> Self {
        Thread {
            lifetime,
            region_stack: Vec::new(),
            timers: TimerTable::new(),
            counters: CounterTable::new(),
        }
    }

    /// SpanID of the top of the region stack, or of the thread itself when
    /// the stack is empty.
    pub fn top_parent_span_id(&self) -> SpanId {
        match self.region_stack.last() {
            Some(r) => r.lifetime.self_span_id,
            None => self.lifetime.self_span_id,
        }
    }
}

/// A Trace2-demarcated interval within a thread.
#[derive(Debug)]
pub struct Region {
    pub lifetime: SpanEssentials,

    pub repo_id: i64,
    /// 1-based nesting depth; equals the stack length right after the push.
    pub nesting_level: i64,
    pub message: Option<String>,
    pub category: String,
    pub label: String,

    /// Region-level `data`/`data_json` values.
    pub data_values: DataValues,
}

/// The lifetime of a child process spawned by the current Git process:
/// the "outer" time from spawn to wait as observed by the parent. This is
/// independent of any telemetry the child itself emits.
#[derive(Debug)]
pub struct Child {
    pub lifetime: SpanEssentials,

    pub argv: Vec<Value>,
    pub pid: i64,
    pub exitcode: i64,
    pub readystate: Option<String>,
    pub class: String,
    pub hookname: Option<String>,
}

/// An `exec()`-style replacement process.
#[derive(Debug)]
pub struct Exec {
    pub lifetime: SpanEssentials,

    pub argv: Vec<Value>,
    pub exe: String,
    pub exitcode: i64,
}

/// The in-memory model for one Git process' telemetry from one connection.
pub struct Dataset {
    /// Unique id used in debug logging to associate messages back to the
    /// owning worker.
    dataset_id: u64,

    /// Did we see at least one Trace2 event from the client?
    saw_data: bool,

    rng: StdRng,

    pub trace_id: TraceId,

    /// The Trace2 SID for the command. A process-level concept, but useful
    /// on every span we generate for database queries. Slightly different
    /// scope than the trace id when we are not the top-level command.
    pub sid: String,

    pub process: Process,

    /// Non-main threads, keyed by thread name. "main" is never inserted
    /// here; it lives in [`Process::main_thread`].
    pub threads: BTreeMap<String, Thread>,

    /// Child processes spawned by the current process.
    pub children: BTreeMap<i64, Child>,

    /// Exec replacement processes.
    pub execs: BTreeMap<i64, Exec>,

    /// Completed regions across all threads, in completion order.
    pub completed_regions: Vec<Region>,

    /// Custom summary rollups, present only when summary settings are
    /// configured.
    pub summary: Option<SummaryAccumulator>,

    /// Optional GDPR-sensitive attributes keyed by their wire spelling.
    /// Only populated for fields enabled in the PII settings.
    pub pii: BTreeMap<String, String>,
}

impl Dataset {
    /// Create an empty dataset. The RNG is seeded once from OS entropy and
    /// then owns every random span id we mint for this dataset.
    pub fn new(summary_settings: Option<Arc<SummarySettings>>) -> Self {
        Dataset {
            dataset_id: next_dataset_id(),
            saw_data: false,
            rng: StdRng::from_entropy(),
            trace_id: TraceId::default(),
            sid: String::new(),
            process: Process {
                main_thread: Thread::new(SpanEssentials::unstarted()),
                exe_version: String::new(),
                evt_version: String::new(),
                cmd_argv: Vec::new(),
                cmd_verb: String::new(),
                cmd_hierarchy: String::new(),
                cmd_mode: String::new(),
                cmd_alias: None,
                cmd_ancestry: None,
                exe_exit_code: 0,
                first_error: None,
                repo_set: BTreeMap::new(),
                param_set_values: BTreeMap::new(),
                param_set_priorities: BTreeMap::new(),
                data_values: DataValues::new(),
                timers: TimerTable::new(),
                counters: CounterTable::new(),
                qualified_names: QualifiedNames::default(),
            },
            threads: BTreeMap::new(),
            children: BTreeMap::new(),
            execs: BTreeMap::new(),
            completed_regions: Vec::new(),
            summary: summary_settings.map(SummaryAccumulator::new),
            pii: BTreeMap::new(),
        }
    }

    pub fn dataset_id(&self) -> u64 {
        self.dataset_id
    }

    pub fn saw_data(&self) -> bool {
        self.saw_data
    }

    pub fn mark_saw_data(&mut self) {
        self.saw_data = true;
    }

    /// Mint a random span id from the dataset RNG.
    pub fn new_span_id(&mut self) -> SpanId {
        let mut id = [0u8; 8];
        self.rng.fill_bytes(&mut id);
        SpanId(id)
    }

    /// Fix up incomplete work units and compute the qualified names.
    ///
    /// We only have incomplete units if Git died, crashed, or was signalled
    /// and never popped its region stacks before `atexit`. Closing them here
    /// gets closure on in-progress work and avoids emitting ill-formed
    /// spans with negative durations.
    ///
    /// Returns `false` if the client never sent enough information to emit
    /// telemetry for this dataset.
    pub fn finalize(&mut self, now: DateTime<Utc>) -> bool {
        // No "start" event means no command line, which means we know
        // nothing useful about this process.
        if self.process.cmd_argv.is_empty() {
            return false;
        }

        for child in self.children.values_mut() {
            if child.lifetime.is_incomplete() {
                child.lifetime.end_time = Some(now);
                child.pid = -1;
                child.exitcode = -1;
            }
        }

        for th in self.threads.values_mut() {
            if th.lifetime.is_incomplete() {
                while let Some(mut r) = th.region_stack.pop() {
                    r.lifetime.end_time = Some(now);
                    self.completed_regions.push(r);
                }
                th.lifetime.end_time = Some(now);
            }
        }

        // The main thread is special: it is not in the thread map, and we
        // deferred its region-stack cleanup past the exit/atexit events.
        let main = &mut self.process.main_thread;
        while let Some(mut r) = main.region_stack.pop() {
            r.lifetime.end_time = Some(now);
            self.completed_regions.push(r);
        }
        if main.lifetime.is_incomplete() {
            main.lifetime.end_time = Some(now);
            self.process.exe_exit_code = -1;
        }

        self.set_qualified_names();

        // Promote the process-level span name from "main" to the qualified
        // command spelling so the span is useful downstream.
        self.process.main_thread.lifetime.display_name =
            self.process.qualified_names.exe_verb_mode.clone();

        true
    }

    fn set_qualified_names(&mut self) {
        let exe = qualified_exe_name(&self.process.cmd_argv);
        let exe_verb = qualified_exe_verb_name(&exe, &self.process.cmd_verb, &self.process.cmd_argv);
        let exe_verb_mode = qualified_exe_verb_mode_name(&exe_verb, &self.process.cmd_mode);

        self.process.qualified_names = QualifiedNames {
            exe,
            exe_verb,
            exe_verb_mode,
        };
    }
}

/// Render an argv element for display. The wire allows non-string elements;
/// render those through JSON rather than failing.
pub(crate) fn value_display(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Basename of a command path with platform quirks removed: directories
/// (both slash styles) and a case-insensitive `.exe` suffix. The expected
/// result is `git` or `git-remote-https`.
pub(crate) fn exe_basename(path: &str) -> String {
    let base = path
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or(path);

    if base.len() > 4 && base[base.len() - 4..].eq_ignore_ascii_case(".exe") {
        base[..base.len() - 4].to_string()
    } else {
        base.to_string()
    }
}

fn qualified_exe_name(argv: &[Value]) -> String {
    match argv.first() {
        Some(v) => exe_basename(&value_display(v)),
        None => String::new(),
    }
}

/// `<exe>[:<verb>]`.
///
/// The `git` executable takes a top-level verb (`git checkout`, `git
/// fetch`), unlike specialized executables such as `git-remote-https`.
/// Pseudo-verbs need care: for `_run_dashed_` Git repacks the command line
/// and the real command is in argv[1]; the other pseudo-verbs cannot be
/// resolved further and keep their marker.
fn qualified_exe_verb_name(exe: &str, verb: &str, argv: &[Value]) -> String {
    if verb.is_empty() {
        return exe.to_string();
    }

    let verb_part = match verb {
        "_run_dashed_" => match argv.get(1) {
            Some(v) => value_display(v),
            // Argv should always be long enough in real life; keep the
            // marker if it is not.
            None => verb.to_string(),
        },
        _ => verb.to_string(),
    };

    format!("{exe}:{verb_part}")
}

/// `<exe>[:<verb>][#<mode>]`.
///
/// Some verbs have multiple meanings (`git checkout <branch>` vs
/// `git checkout <pathname>`); comparing perf times across modes is not
/// meaningful, so the mode disambiguates.
fn qualified_exe_verb_mode_name(exe_verb: &str, mode: &str) -> String {
    if mode.is_empty() {
        exe_verb.to_string()
    } else {
        format!("{exe_verb}#{mode}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_dataset_ids_are_unique() {
        let a = Dataset::new(None);
        let b = Dataset::new(None);
        assert_ne!(a.dataset_id(), b.dataset_id());
    }

    #[test]
    fn test_new_span_ids_are_distinct() {
        let mut ds = Dataset::new(None);
        let a = ds.new_span_id();
        let b = ds.new_span_id();
        assert_ne!(a, b);
    }

    #[test]
    fn test_exe_basename() {
        assert_eq!(exe_basename("git"), "git");
        assert_eq!(exe_basename("/usr/bin/git"), "git");
        assert_eq!(exe_basename(r"C:\Program Files\Git\git.EXE"), "git");
        assert_eq!(exe_basename("git-remote-https"), "git-remote-https");
        // Unknown suffixes are not stripped.
        assert_eq!(exe_basename("git.sh"), "git.sh");
    }

    #[test]
    fn test_qualified_names_plain_verb() {
        let mut ds = Dataset::new(None);
        ds.process.cmd_argv = vec![json!("/usr/bin/git"), json!("checkout")];
        ds.process.cmd_verb = "checkout".to_string();
        ds.process.cmd_mode = "branch".to_string();
        ds.set_qualified_names();

        assert_eq!(ds.process.qualified_names.exe, "git");
        assert_eq!(ds.process.qualified_names.exe_verb, "git:checkout");
        assert_eq!(ds.process.qualified_names.exe_verb_mode, "git:checkout#branch");
    }

    #[test]
    fn test_qualified_names_no_verb_no_mode() {
        let mut ds = Dataset::new(None);
        ds.process.cmd_argv = vec![json!("git-remote-https")];
        ds.set_qualified_names();

        assert_eq!(ds.process.qualified_names.exe, "git-remote-https");
        assert_eq!(ds.process.qualified_names.exe_verb, "git-remote-https");
        assert_eq!(ds.process.qualified_names.exe_verb_mode, "git-remote-https");
    }

    #[test]
    fn test_qualified_names_run_dashed_substitutes_argv1() {
        let mut ds = Dataset::new(None);
        ds.process.cmd_argv = vec![json!("git"), json!("remote-https"), json!("origin")];
        ds.process.cmd_verb = "_run_dashed_".to_string();
        ds.set_qualified_names();

        assert_eq!(ds.process.qualified_names.exe_verb, "git:remote-https");
    }

    #[test]
    fn test_qualified_names_run_dashed_short_argv_keeps_marker() {
        let mut ds = Dataset::new(None);
        ds.process.cmd_argv = vec![json!("git")];
        ds.process.cmd_verb = "_run_dashed_".to_string();
        ds.set_qualified_names();

        assert_eq!(ds.process.qualified_names.exe_verb, "git:_run_dashed_");
    }

    #[test]
    fn test_qualified_names_other_pseudo_verbs_kept() {
        for verb in ["_run_git_alias_", "_run_shell_alias_", "_query_"] {
            let mut ds = Dataset::new(None);
            ds.process.cmd_argv = vec![json!("git"), json!("xyz")];
            ds.process.cmd_verb = verb.to_string();
            ds.set_qualified_names();

            assert_eq!(ds.process.qualified_names.exe_verb, format!("git:{verb}"));
        }
    }

    #[test]
    fn test_finalize_without_start_event_is_insufficient() {
        let mut ds = Dataset::new(None);
        assert!(!ds.finalize(Utc::now()));
    }
}
