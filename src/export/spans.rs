//! Building the span tree from a finalized dataset.
//!
//! One span per process, plus (detail level permitting) one per child,
//! exec, non-main thread, and completed region. Span names are the display
//! names set by the state machine; attribute spellings come from
//! [`super::semconv`].

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;

use crate::dataset::{Child, Dataset, Exec, Region, SpanId, Thread, TraceId};
use crate::filter::{DetailLevel, FilterKeyNames};

use super::semconv;

/// One emitted span.
#[derive(Debug, Clone, Serialize)]
pub struct SpanRecord {
    pub trace_id: TraceId,
    pub span_id: SpanId,
    pub parent_span_id: SpanId,
    pub name: String,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub attributes: BTreeMap<String, Value>,
}

/// One resource scope worth of spans, handed to the downstream consumer.
#[derive(Debug, Clone, Serialize)]
pub struct SpanBatch {
    pub resource: BTreeMap<String, Value>,
    pub spans: Vec<SpanRecord>,
}

impl SpanBatch {
    fn new() -> Self {
        let mut resource = BTreeMap::new();
        resource.insert(
            "service.namespace".to_string(),
            Value::from(semconv::TRACE2_SERVICE_NAMESPACE),
        );
        resource.insert(
            "instrumentation.name".to_string(),
            Value::from(semconv::TRACE2_INSTRUMENTATION_NAME),
        );
        SpanBatch {
            resource,
            spans: Vec::new(),
        }
    }
}

/// Convert a finalized dataset into a span batch, honoring the detail
/// level. `DetailLevel::Drop` produces an empty batch (callers normally
/// short-circuit before getting here).
pub fn to_span_batch(ds: &Dataset, dl: DetailLevel, keynames: &FilterKeyNames) -> SpanBatch {
    let mut batch = SpanBatch::new();

    if dl == DetailLevel::Drop {
        return batch;
    }

    batch.spans.push(process_span(ds, dl, keynames));

    if dl >= DetailLevel::Process {
        for child in ds.children.values() {
            batch.spans.push(child_span(ds, child));
        }
        for exec in ds.execs.values() {
            batch.spans.push(exec_span(ds, exec));
        }
    }

    if dl >= DetailLevel::Verbose {
        for th in ds.threads.values() {
            batch.spans.push(thread_span(ds, th));
        }
        for region in &ds.completed_regions {
            batch.spans.push(region_span(ds, region));
        }
    }

    batch
}

fn span_record(
    ds: &Dataset,
    lifetime: &crate::dataset::SpanEssentials,
    attributes: BTreeMap<String, Value>,
) -> SpanRecord {
    SpanRecord {
        trace_id: ds.trace_id,
        span_id: lifetime.self_span_id,
        parent_span_id: lifetime.parent_span_id,
        name: lifetime.display_name.clone(),
        start_time: lifetime.start_time,
        // Finalization closed every unit; fall back to a zero-duration
        // span rather than inventing an end time here.
        end_time: lifetime.end_time.unwrap_or(lifetime.start_time),
        attributes,
    }
}

fn process_span(ds: &Dataset, dl: DetailLevel, keynames: &FilterKeyNames) -> SpanRecord {
    let mut attrs = BTreeMap::new();
    let process = &ds.process;

    attrs.insert(semconv::TRACE2_SPAN_TYPE.to_string(), Value::from("process"));
    attrs.insert(semconv::TRACE2_CMD_SID.to_string(), Value::from(ds.sid.clone()));
    attrs.insert(
        semconv::TRACE2_CMD_ARGV.to_string(),
        Value::Array(process.cmd_argv.clone()),
    );
    attrs.insert(
        semconv::TRACE2_CMD_VERSION.to_string(),
        Value::from(process.exe_version.clone()),
    );
    attrs.insert(
        semconv::TRACE2_CMD_EXIT_CODE.to_string(),
        Value::from(process.exe_exit_code),
    );
    attrs.insert(
        semconv::TRACE2_CMD_NAME.to_string(),
        Value::from(process.qualified_names.exe.clone()),
    );
    attrs.insert(
        semconv::TRACE2_CMD_NAME_VERB.to_string(),
        Value::from(process.qualified_names.exe_verb.clone()),
    );
    attrs.insert(
        semconv::TRACE2_CMD_NAME_VERB_MODE.to_string(),
        Value::from(process.qualified_names.exe_verb_mode.clone()),
    );

    if !process.cmd_hierarchy.is_empty() {
        attrs.insert(
            semconv::TRACE2_CMD_HIERARCHY.to_string(),
            Value::from(process.cmd_hierarchy.clone()),
        );
    }

    if let Some(err) = &process.first_error {
        attrs.insert(
            semconv::TRACE2_CMD_ERR_FMT.to_string(),
            Value::from(err.fmt.clone()),
        );
        attrs.insert(
            semconv::TRACE2_CMD_ERR_MSG.to_string(),
            Value::from(err.msg.clone()),
        );
    }

    if let Some(alias) = &process.cmd_alias {
        attrs.insert(
            semconv::TRACE2_CMD_ALIAS_KEY.to_string(),
            Value::from(alias.key.clone()),
        );
        attrs.insert(
            semconv::TRACE2_CMD_ALIAS_VALUE.to_string(),
            Value::Array(alias.value.clone()),
        );
    }

    if let Some(ancestry) = &process.cmd_ancestry {
        attrs.insert(
            semconv::TRACE2_CMD_ANCESTRY.to_string(),
            Value::Array(ancestry.clone()),
        );
    }

    if !process.repo_set.is_empty() {
        // JSON object keys are strings, so render the repo ids.
        let repos: serde_json::Map<String, Value> = process
            .repo_set
            .iter()
            .map(|(id, worktree)| (id.to_string(), Value::from(worktree.clone())))
            .collect();
        attrs.insert(semconv::TRACE2_REPO_SET.to_string(), Value::Object(repos));
    }

    if !process.param_set_values.is_empty() {
        let params: serde_json::Map<String, Value> = process
            .param_set_values
            .iter()
            .map(|(k, v)| (k.clone(), Value::from(v.clone())))
            .collect();
        attrs.insert(semconv::TRACE2_PARAM_SET.to_string(), Value::Object(params));
    }

    if !keynames.nickname_key.is_empty() {
        if let Some(nickname) = process.param_set_values.get(&keynames.nickname_key) {
            attrs.insert(
                semconv::TRACE2_REPO_NICKNAME.to_string(),
                Value::from(nickname.clone()),
            );
        }
    }

    attrs.insert(
        semconv::TRACE2_MACHINE_ARCH.to_string(),
        Value::from(std::env::consts::ARCH),
    );
    attrs.insert(
        semconv::TRACE2_MACHINE_OS.to_string(),
        Value::from(std::env::consts::OS),
    );

    for (key, value) in &ds.pii {
        attrs.insert(key.clone(), Value::from(value.clone()));
    }

    if dl >= DetailLevel::Process {
        if !process.data_values.is_empty() {
            attrs.insert(
                semconv::TRACE2_PROCESS_DATA.to_string(),
                data_values_json(&process.data_values),
            );
        }
        if !process.timers.is_empty() {
            attrs.insert(
                semconv::TRACE2_PROCESS_TIMERS.to_string(),
                serde_json::to_value(&process.timers).unwrap_or(Value::Null),
            );
        }
        if !process.counters.is_empty() {
            attrs.insert(
                semconv::TRACE2_PROCESS_COUNTERS.to_string(),
                serde_json::to_value(&process.counters).unwrap_or(Value::Null),
            );
        }
        if let Some(summary) = &ds.summary {
            let map = summary.to_map();
            if !map.is_empty() {
                attrs.insert(
                    semconv::TRACE2_PROCESS_SUMMARY.to_string(),
                    Value::Object(map),
                );
            }
        }
    }

    span_record(ds, &process.main_thread.lifetime, attrs)
}

fn child_span(ds: &Dataset, child: &Child) -> SpanRecord {
    let mut attrs = BTreeMap::new();

    attrs.insert(semconv::TRACE2_SPAN_TYPE.to_string(), Value::from("child"));
    attrs.insert(semconv::TRACE2_CMD_SID.to_string(), Value::from(ds.sid.clone()));
    attrs.insert(semconv::TRACE2_CHILD_PID.to_string(), Value::from(child.pid));
    attrs.insert(
        semconv::TRACE2_CHILD_EXIT_CODE.to_string(),
        Value::from(child.exitcode),
    );
    attrs.insert(
        semconv::TRACE2_CHILD_ARGV.to_string(),
        Value::Array(child.argv.clone()),
    );
    attrs.insert(
        semconv::TRACE2_CHILD_CLASS.to_string(),
        Value::from(child.class.clone()),
    );
    if let Some(hook) = &child.hookname {
        attrs.insert(
            semconv::TRACE2_CHILD_HOOK_NAME.to_string(),
            Value::from(hook.clone()),
        );
    }
    if let Some(ready) = &child.readystate {
        attrs.insert(
            semconv::TRACE2_CHILD_READY_STATE.to_string(),
            Value::from(ready.clone()),
        );
    }

    span_record(ds, &child.lifetime, attrs)
}

fn exec_span(ds: &Dataset, exec: &Exec) -> SpanRecord {
    let mut attrs = BTreeMap::new();

    // Exec replacements are child-like for classification purposes; the
    // trace2.exec.* attributes identify them precisely.
    attrs.insert(semconv::TRACE2_SPAN_TYPE.to_string(), Value::from("child"));
    attrs.insert(semconv::TRACE2_CMD_SID.to_string(), Value::from(ds.sid.clone()));
    attrs.insert(
        semconv::TRACE2_EXEC_EXE.to_string(),
        Value::from(exec.exe.clone()),
    );
    attrs.insert(
        semconv::TRACE2_EXEC_ARGV.to_string(),
        Value::Array(exec.argv.clone()),
    );
    attrs.insert(
        semconv::TRACE2_EXEC_EXIT_CODE.to_string(),
        Value::from(exec.exitcode),
    );

    span_record(ds, &exec.lifetime, attrs)
}

fn thread_span(ds: &Dataset, th: &Thread) -> SpanRecord {
    let mut attrs = BTreeMap::new();

    attrs.insert(semconv::TRACE2_SPAN_TYPE.to_string(), Value::from("thread"));
    attrs.insert(semconv::TRACE2_CMD_SID.to_string(), Value::from(ds.sid.clone()));

    if !th.timers.is_empty() {
        attrs.insert(
            semconv::TRACE2_THREAD_TIMERS.to_string(),
            serde_json::to_value(&th.timers).unwrap_or(Value::Null),
        );
    }
    if !th.counters.is_empty() {
        attrs.insert(
            semconv::TRACE2_THREAD_COUNTERS.to_string(),
            serde_json::to_value(&th.counters).unwrap_or(Value::Null),
        );
    }

    span_record(ds, &th.lifetime, attrs)
}

fn region_span(ds: &Dataset, region: &Region) -> SpanRecord {
    let mut attrs = BTreeMap::new();

    attrs.insert(semconv::TRACE2_SPAN_TYPE.to_string(), Value::from("region"));
    attrs.insert(semconv::TRACE2_CMD_SID.to_string(), Value::from(ds.sid.clone()));
    attrs.insert(
        semconv::TRACE2_REGION_NESTING.to_string(),
        Value::from(region.nesting_level),
    );
    attrs.insert(
        semconv::TRACE2_REGION_REPO_ID.to_string(),
        Value::from(region.repo_id),
    );
    if let Some(msg) = &region.message {
        attrs.insert(
            semconv::TRACE2_REGION_MESSAGE.to_string(),
            Value::from(msg.clone()),
        );
    }
    if !region.data_values.is_empty() {
        attrs.insert(
            semconv::TRACE2_REGION_DATA.to_string(),
            data_values_json(&region.data_values),
        );
    }

    span_record(ds, &region.lifetime, attrs)
}

fn data_values_json(values: &crate::dataset::DataValues) -> Value {
    serde_json::to_value(values).unwrap_or(Value::Null)
}
