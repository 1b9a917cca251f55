//! Folding parsed Trace2 events into a [`Dataset`].
//!
//! Every handler runs on the owning worker's task; a dataset has exactly
//! one writer, so no locking is involved. Most malformed sequences
//! (duplicate child ids, mismatched region nesting, unknown threads) are
//! ignored with a debug log and processing continues; only the daemon
//! rejection surfaces as an error.

use std::collections::BTreeMap;

use serde_json::Value;
use thiserror::Error;
use tracing::debug;

use crate::events::{Event, EventPayload};

use super::{
    exe_basename, value_display, Child, Dataset, Exec, Process, Region, SpanEssentials,
    StopwatchTimer, Thread,
};

/// Verbs of long-running Git daemons whose telemetry we refuse to collect.
///
/// We cannot emit the process span until the client disconnects, so a
/// daemon that runs for days would accumulate unbounded region/thread
/// state. Dropping the connection makes the daemon silently stop sending.
/// FSMonitor only sends `cmd_name` events (no `cmd_mode`), so `start` and
/// `stop` invocations are rejected along with `run`.
const REJECTED_VERBS: &[&str] = &["fsmonitor--daemon"];

/// Error applying one event to a dataset.
#[derive(Error, Debug)]
pub enum ApplyError {
    /// The client identified itself as a long-running daemon; the worker
    /// abandons the dataset silently, without logging an error.
    #[error("rejecting telemetry from {verb}")]
    RejectClient { verb: String },
}

impl Dataset {
    /// Apply one parsed event. Events with unrecognized names are dropped
    /// since the Trace2 format is allowed to add new event kinds.
    pub fn apply(&mut self, evt: &Event) -> Result<(), ApplyError> {
        match &evt.payload {
            EventPayload::Version { evt: evt_version, exe } => {
                self.apply_version(evt, evt_version, exe);
            }
            EventPayload::Start { argv } => {
                self.process.cmd_argv = argv.clone();
            }
            EventPayload::AtExit { code } => {
                // Shared by "exit" and "atexit"; the last one wins. Popping
                // the region stack is deferred until EOF.
                self.process.main_thread.lifetime.end_time = Some(evt.time);
                self.process.exe_exit_code = *code;
            }
            EventPayload::Signal { signo } => {
                // If the process is signalled we get no exit/atexit event,
                // so synthesize the exit data. 128+signo matches the shell.
                self.process.main_thread.lifetime.end_time = Some(evt.time);
                self.process.exe_exit_code = 128 + signo;
            }
            EventPayload::Error { msg, fmt } => {
                // Remember only the first error; the "fmt" string groups
                // similar errors and is less likely to carry user data.
                if self.process.first_error.is_none() {
                    self.process.first_error = Some(super::FirstError {
                        msg: msg.clone(),
                        fmt: fmt.clone(),
                    });
                }
                if let Some(summary) = self.summary.as_mut() {
                    summary.apply_message(msg);
                }
            }
            EventPayload::Printf { msg } => {
                if let Some(summary) = self.summary.as_mut() {
                    summary.apply_message(msg);
                }
            }
            EventPayload::CmdPath { .. } => {
                // Informational only; not always present and we don't need it.
            }
            EventPayload::CmdAncestry { ancestry } => {
                self.process.cmd_ancestry = Some(ancestry.clone());
            }
            EventPayload::CmdName { name, hierarchy } => {
                if REJECTED_VERBS.contains(&name.as_str()) {
                    return Err(ApplyError::RejectClient { verb: name.clone() });
                }
                self.process.cmd_verb = name.clone();
                self.process.cmd_hierarchy = hierarchy.clone();
            }
            EventPayload::CmdMode { name } => {
                self.process.cmd_mode = name.clone();
            }
            EventPayload::Alias { alias, argv } => {
                self.process.cmd_alias = Some(super::AliasExpansion {
                    key: alias.clone(),
                    value: argv.clone(),
                });
            }
            EventPayload::ChildStart {
                child_id,
                child_class,
                argv,
                hook_name,
                ..
            } => {
                self.apply_child_start(evt, *child_id, child_class, argv, hook_name.as_deref());
            }
            EventPayload::ChildExit { child_id, pid, code } => {
                match self.children.get_mut(child_id) {
                    Some(child) => {
                        child.lifetime.end_time = Some(evt.time);
                        child.pid = *pid;
                        child.exitcode = *code;
                    }
                    None => {
                        debug!(
                            target: "gitpulse::dataset",
                            dsid = self.dataset_id,
                            child_id,
                            "child_exit without child_start, ignoring"
                        );
                    }
                }
            }
            EventPayload::ChildReady { child_id, pid, ready } => {
                match self.children.get_mut(child_id) {
                    Some(child) => {
                        // The child was pushed into the background; the
                        // parent never waits, so the exit code is unknown.
                        child.lifetime.end_time = Some(evt.time);
                        child.pid = *pid;
                        child.exitcode = -1;
                        child.readystate = Some(ready.clone());
                    }
                    None => {
                        debug!(
                            target: "gitpulse::dataset",
                            dsid = self.dataset_id,
                            child_id,
                            "child_ready without child_start, ignoring"
                        );
                    }
                }
            }
            EventPayload::ThreadStart => self.apply_thread_start(evt),
            EventPayload::ThreadExit => self.apply_thread_exit(evt),
            EventPayload::Exec { exec_id, argv, exe } => {
                self.apply_exec(evt, *exec_id, argv, exe.as_deref());
            }
            EventPayload::ExecResult { exec_id, code } => {
                // Only emitted when the exec() failed; success means the
                // process was replaced and the stream just ends.
                match self.execs.get_mut(exec_id) {
                    Some(exec) => {
                        exec.lifetime.end_time = Some(evt.time);
                        exec.exitcode = *code;
                    }
                    None => {
                        debug!(
                            target: "gitpulse::dataset",
                            dsid = self.dataset_id,
                            exec_id,
                            "exec_result without exec, ignoring"
                        );
                    }
                }
            }
            EventPayload::DefParam { param, value, scope } => {
                self.apply_def_param(param, value, scope.as_deref());
            }
            EventPayload::DefRepo { worktree } => {
                // The parser guarantees a repo id for def_repo.
                if let Some(repo_id) = evt.repo {
                    self.process.repo_set.insert(repo_id, worktree.clone());
                }
            }
            EventPayload::RegionEnter {
                nesting,
                category,
                label,
                msg,
            } => {
                self.apply_region_enter(
                    evt,
                    *nesting,
                    category.as_deref(),
                    label.as_deref(),
                    msg.as_deref(),
                );
            }
            EventPayload::RegionLeave { nesting, .. } => {
                self.apply_region_leave(evt, *nesting);
            }
            EventPayload::Data {
                nesting,
                category,
                key,
                value,
            } => {
                self.apply_data(evt, *nesting, category, key, value);
            }
            EventPayload::Timer {
                category,
                name,
                intervals,
                t_total,
                t_min,
                t_max,
            } => {
                let timer = StopwatchTimer {
                    intervals: *intervals,
                    total_sec: *t_total,
                    min_sec: *t_min,
                    max_sec: *t_max,
                };
                if evt.name == "th_timer" {
                    let Some(th) =
                        thread_mut(&mut self.process, &mut self.threads, &evt.thread)
                    else {
                        debug!(
                            target: "gitpulse::dataset",
                            dsid = self.dataset_id,
                            thread = %evt.thread,
                            "th_timer for unknown thread, ignoring"
                        );
                        return Ok(());
                    };
                    upsert_timer(&mut th.timers, category, name, timer);
                } else {
                    upsert_timer(&mut self.process.timers, category, name, timer);
                }
            }
            EventPayload::Counter { category, name, count } => {
                if evt.name == "th_counter" {
                    let Some(th) =
                        thread_mut(&mut self.process, &mut self.threads, &evt.thread)
                    else {
                        debug!(
                            target: "gitpulse::dataset",
                            dsid = self.dataset_id,
                            thread = %evt.thread,
                            "th_counter for unknown thread, ignoring"
                        );
                        return Ok(());
                    };
                    upsert_counter(&mut th.counters, category, name, *count);
                } else {
                    upsert_counter(&mut self.process.counters, category, name, *count);
                }
            }
            EventPayload::Unrecognized => {}
        }

        Ok(())
    }

    fn apply_version(&mut self, evt: &Event, evt_version: &str, exe: &str) {
        self.sid = evt.sid.clone();
        self.process.exe_version = exe.to_string();
        self.process.evt_version = evt_version.to_string();

        // Name the process-level span after the main thread for now; it is
        // overwritten with the qualified command name at finalization once
        // the verb and mode have arrived.
        self.process.main_thread.lifetime.display_name = evt.thread.clone();
        self.process.main_thread.lifetime.start_time = evt.time;

        let (trace_id, self_id, parent_id) = super::extract_ids_from_sid(&self.sid);
        self.trace_id = trace_id;
        self.process.main_thread.lifetime.self_span_id = self_id;
        self.process.main_thread.lifetime.parent_span_id = parent_id;
    }

    /// Capture the lifetime of a child process: the span from spawn to
    /// wait as seen by the invoking process. This is probably the only
    /// data we get for non-Git children (hook scripts, pagers).
    ///
    /// The child is parented to the main thread rather than the emitting
    /// thread's region stack: we do not know whether the child is
    /// synchronous or a mini-service that outlives the region, and a child
    /// Git process inherits the SID, so its own process span appears as a
    /// sibling under the same parent.
    fn apply_child_start(
        &mut self,
        evt: &Event,
        child_id: i64,
        class: &str,
        argv: &[Value],
        hook_name: Option<&str>,
    ) {
        if self.children.contains_key(&child_id) {
            // Git uses a unique child-id per child, so this should not
            // happen; we may already have open data under this id.
            debug!(
                target: "gitpulse::dataset",
                dsid = self.dataset_id,
                child_id,
                "duplicate child_start, ignoring"
            );
            return;
        }

        let self_span_id = self.new_span_id();
        let child = Child {
            lifetime: SpanEssentials {
                self_span_id,
                parent_span_id: self.process.main_thread.lifetime.self_span_id,
                start_time: evt.time,
                end_time: None,
                display_name: child_display_name(class, argv, hook_name),
            },
            argv: argv.to_vec(),
            pid: -1,
            exitcode: -1,
            readystate: None,
            class: class.to_string(),
            hookname: if class == "hook" {
                Some(hook_name.unwrap_or("??").to_string())
            } else {
                None
            },
        };

        self.children.insert(child_id, child);
    }

    /// Register a non-main thread so that region events can be mapped back
    /// to it. Thread-start events are logged from inside the new thread,
    /// so we do not know which running thread actually spawned it; parent
    /// it to the main thread's span and ignore main's open region stack.
    fn apply_thread_start(&mut self, evt: &Event) {
        if self.threads.contains_key(&evt.thread) {
            // Git puts a unique thread-id in the thread name, so this
            // should not happen; we may already have an open stack here.
            debug!(
                target: "gitpulse::dataset",
                dsid = self.dataset_id,
                thread = %evt.thread,
                "duplicate thread_start, ignoring"
            );
            return;
        }

        let self_span_id = self.new_span_id();
        let th = Thread::new(SpanEssentials {
            self_span_id,
            parent_span_id: self.process.main_thread.lifetime.self_span_id,
            start_time: evt.time,
            end_time: None,
            display_name: evt.thread.clone(),
        });

        self.threads.insert(evt.thread.clone(), th);
    }

    fn apply_thread_exit(&mut self, evt: &Event) {
        let Some(th) = self.threads.get_mut(&evt.thread) else {
            debug!(
                target: "gitpulse::dataset",
                dsid = self.dataset_id,
                thread = %evt.thread,
                "thread_exit without thread_start, ignoring"
            );
            return;
        };

        // Git should have closed all open regions on this thread; force
        // close any leftovers at the thread's end time.
        while let Some(mut r) = th.region_stack.pop() {
            r.lifetime.end_time = Some(evt.time);
            self.completed_regions.push(r);
        }

        th.lifetime.end_time = Some(evt.time);
    }

    /// The process called an `exec()` variant to replace itself. On Unix we
    /// will not see exit/atexit for the current process on success; the
    /// stream just drops and EOF handling takes over. Same span-parenting
    /// rules as child_start.
    fn apply_exec(&mut self, evt: &Event, exec_id: i64, argv: &[Value], exe: Option<&str>) {
        if self.execs.contains_key(&exec_id) {
            debug!(
                target: "gitpulse::dataset",
                dsid = self.dataset_id,
                exec_id,
                "duplicate exec, ignoring"
            );
            return;
        }

        let self_span_id = self.new_span_id();
        let exec = Exec {
            lifetime: SpanEssentials {
                self_span_id,
                parent_span_id: self.process.main_thread.lifetime.self_span_id,
                start_time: evt.time,
                end_time: None,
                display_name: exec_display_name(argv, exe),
            },
            argv: argv.to_vec(),
            exe: exe.unwrap_or_default().to_string(),
            exitcode: -1,
        };

        self.execs.insert(exec_id, exec);
    }

    /// Collapse `def_param` events by scope priority.
    ///
    /// Git enumerates all scopes for each matching config setting, so we
    /// decode the scope and keep the highest-priority value; when
    /// priorities are equal the new value wins, matching Git's
    /// last-one-wins behavior.
    fn apply_def_param(&mut self, key: &str, value: &str, scope: Option<&str>) {
        let pri_new = scope_priority(scope);

        if let Some(&pri_cur) = self.process.param_set_priorities.get(key) {
            if pri_new < pri_cur {
                return;
            }
        }

        self.process
            .param_set_values
            .insert(key.to_string(), value.to_string());
        self.process
            .param_set_priorities
            .insert(key.to_string(), pri_new);

        // We cannot short-circuit filter lookups here because a later
        // event may still carry a higher-priority value for this key.
    }

    /// Open a region and push it onto the emitting thread's stack.
    ///
    /// Category and label are optional and are not required to match the
    /// corresponding region_leave; the format only gives the illusion of
    /// balanced named events. Nesting levels are 1-based, so a region at
    /// level k sits at stack position k-1.
    fn apply_region_enter(
        &mut self,
        evt: &Event,
        nesting: i64,
        category: Option<&str>,
        label: Option<&str>,
        msg: Option<&str>,
    ) {
        let dsid = self.dataset_id;
        let self_span_id = self.new_span_id();
        // Regions without an explicit repo-id belong to the primary
        // repository; Git does not support multiple in-proc repositories.
        let repo_id = evt.repo.unwrap_or(1);

        let Some(th) = thread_mut(&mut self.process, &mut self.threads, &evt.thread) else {
            // No thread-start for this thread means no region stack to
            // push onto; skip this region (and its region_leave).
            debug!(
                target: "gitpulse::dataset",
                dsid,
                thread = %evt.thread,
                "region_enter for unknown thread, ignoring"
            );
            return;
        };

        if th.region_stack.len() as i64 != nesting - 1 {
            debug!(
                target: "gitpulse::dataset",
                dsid,
                thread = %evt.thread,
                nesting,
                depth = th.region_stack.len(),
                "region_enter nesting mismatch, ignoring"
            );
            return;
        }

        let region = Region {
            lifetime: SpanEssentials {
                self_span_id,
                parent_span_id: th.top_parent_span_id(),
                start_time: evt.time,
                end_time: None,
                display_name: region_display_name(category, label),
            },
            repo_id,
            nesting_level: nesting,
            message: msg.map(str::to_string),
            category: category.unwrap_or_default().to_string(),
            label: label.unwrap_or_default().to_string(),
            data_values: BTreeMap::new(),
        };

        th.region_stack.push(region);
    }

    /// Close the top open region on the emitting thread and move it to the
    /// completed list.
    ///
    /// Category/label on the leave event need not match the enter, so the
    /// only sanity check available is the nesting level of the region we
    /// are about to pop.
    fn apply_region_leave(&mut self, evt: &Event, nesting: i64) {
        let dsid = self.dataset_id;

        let Some(th) = thread_mut(&mut self.process, &mut self.threads, &evt.thread) else {
            debug!(
                target: "gitpulse::dataset",
                dsid,
                thread = %evt.thread,
                "region_leave for unknown thread, ignoring"
            );
            return;
        };

        match th.region_stack.last() {
            None => {
                // Either we missed a region_enter or got too many leaves.
                debug!(
                    target: "gitpulse::dataset",
                    dsid,
                    thread = %evt.thread,
                    "region_leave with empty region stack, ignoring"
                );
                return;
            }
            Some(top) if top.nesting_level != nesting => {
                debug!(
                    target: "gitpulse::dataset",
                    dsid,
                    thread = %evt.thread,
                    nesting,
                    open = top.nesting_level,
                    "region_leave nesting mismatch, ignoring"
                );
                return;
            }
            Some(_) => {}
        }

        let Some(mut region) = th.region_stack.pop() else {
            return;
        };
        region.lifetime.end_time = Some(evt.time);

        if let Some(summary) = self.summary.as_mut() {
            summary.apply_region(&region);
        }

        self.completed_regions.push(region);
    }

    /// Store a generic data value on the process or the owning region.
    ///
    /// Nesting level 1 refers to the process; level n belongs to the
    /// region at level n-1 on the emitting thread (stack index n-2).
    fn apply_data(&mut self, evt: &Event, nesting: i64, category: &str, key: &str, value: &Value) {
        if nesting <= 1 {
            set_data_value(&mut self.process.data_values, category, key, value.clone());
            return;
        }

        let dsid = self.dataset_id;
        let Some(th) = thread_mut(&mut self.process, &mut self.threads, &evt.thread) else {
            debug!(
                target: "gitpulse::dataset",
                dsid,
                thread = %evt.thread,
                "data event for unknown thread, ignoring"
            );
            return;
        };

        let want = (nesting - 2) as usize;
        let Some(region) = th.region_stack.get_mut(want) else {
            debug!(
                target: "gitpulse::dataset",
                dsid,
                thread = %evt.thread,
                nesting,
                "data event without owning region, ignoring"
            );
            return;
        };
        if region.nesting_level != nesting - 1 {
            debug!(
                target: "gitpulse::dataset",
                dsid,
                thread = %evt.thread,
                nesting,
                "data event nesting mismatch, ignoring"
            );
            return;
        }

        set_data_value(&mut region.data_values, category, key, value.clone());
    }
}

/// Resolve a thread name to its entry: "main" is the embedded main thread,
/// everything else comes from the thread map.
fn thread_mut<'a>(
    process: &'a mut Process,
    threads: &'a mut BTreeMap<String, Thread>,
    name: &str,
) -> Option<&'a mut Thread> {
    if name == "main" {
        Some(&mut process.main_thread)
    } else {
        threads.get_mut(name)
    }
}

/// Scope priorities for `def_param` collapsing. EnvVars arrive without a
/// scope and always win ties.
fn scope_priority(scope: Option<&str>) -> i32 {
    match scope {
        None => 100,
        Some("system") => 1,
        Some("global") => 2,
        Some("local") => 3,
        Some("worktree") => 4,
        Some("command") => 5,
        Some("submodule") => 6,
        Some("unknown") => 7,
        Some(_) => 99,
    }
}

fn set_data_value(values: &mut super::DataValues, category: &str, key: &str, value: Value) {
    values
        .entry(category.to_string())
        .or_default()
        .insert(key.to_string(), value);
}

fn upsert_timer(table: &mut super::TimerTable, category: &str, name: &str, timer: StopwatchTimer) {
    table
        .entry(category.to_string())
        .or_default()
        .insert(name.to_string(), timer);
}

fn upsert_counter(table: &mut super::CounterTable, category: &str, name: &str, count: i64) {
    table
        .entry(category.to_string())
        .or_default()
        .insert(name.to_string(), count);
}

/// Pretty name for a child span, derived from the child classification.
fn child_display_name(class: &str, argv: &[Value], hook_name: Option<&str>) -> String {
    match class {
        // We don't care which editor/pager, only that the command was
        // interactive and its wall time reflects that.
        "editor" | "pager" => format!("child(class:{class})"),
        // An external hook can do anything and its cost is billed to the
        // invoking command (a slow `pre-commit` makes `git commit` slow).
        "hook" => format!("child(hook:{})", hook_name.unwrap_or("??")),
        // Alias expansion re-invokes the substituted command line as a
        // child and waits for it.
        "git_alias" => "child(alias:git)".to_string(),
        "shell_alias" => "child(alias:shell)".to_string(),
        // "Space form" commands repack into the dashed form, e.g.
        // `git remote-https` invokes `git-remote-https`.
        "dashed" => match argv.first() {
            Some(v) => format!("child(dashed:{})", value_display(v)),
            None => "child(dashed:?)".to_string(),
        },
        // The credential-manager child line is a single string rather than
        // a true argv, so the operation has to be dug out.
        "cred" => {
            if argv.len() > 1 {
                return format!("child(cred:{})", value_display(&argv[1]));
            }
            let argv0 = argv.first().map(value_display).unwrap_or_default();
            for op in ["get", "store", "erase"] {
                if argv0.ends_with(op) {
                    return format!("child(cred:{op})");
                }
            }
            "child(cred:unknown)".to_string()
        }
        // Children not yet classified in the Git source.
        "?" => "child(class:unknown)".to_string(),
        // "transport/ssh", "remote-https", "background", "subprocess", ...
        other => format!("child(class:{other})"),
    }
}

/// Pretty name for an exec span: the basename of the replacement exe, or
/// of argv[0] when the exe field is absent.
fn exec_display_name(argv: &[Value], exe: Option<&str>) -> String {
    if let Some(exe) = exe {
        return format!("exec({})", exe_basename(exe));
    }
    if let Some(first) = argv.first() {
        return format!("exec({})", exe_basename(&value_display(first)));
    }
    "exec(?)".to_string()
}

/// `region(<category>,<label>)` with both parts scrubbed for easy
/// searching. Category and label are technically optional but rarely
/// omitted.
fn region_display_name(category: Option<&str>, label: Option<&str>) -> String {
    let c = match category {
        Some(c) => normalize_region_name(c),
        None => "C".to_string(),
    };
    let l = match label {
        Some(l) => normalize_region_name(l),
        None => "L".to_string(),
    };
    format!("region({c},{l})")
}

/// Category and label are free form in practice; fold the characters that
/// hurt database searches into underscores and lowercase the rest.
fn normalize_region_name(value: &str) -> String {
    value
        .chars()
        .map(|c| match c {
            ' ' | '-' | '.' | ',' | ':' | '(' | ')' => '_',
            c => c.to_ascii_lowercase(),
        })
        .collect()
}

#[cfg(test)]
fn test_time(secs: i64) -> chrono::DateTime<chrono::Utc> {
    chrono::DateTime::from_timestamp(1_715_700_000 + secs, 0).expect("valid test timestamp")
}
