//! Test fixtures: a scripted Trace2 client and a capturing consumer.

#![allow(dead_code)]

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use gitpulse::export::{ConsumerError, SpanBatch, SpanConsumer};

/// A consumer that stores every batch for later assertions.
pub struct CapturingConsumer {
    batches: Mutex<Vec<SpanBatch>>,
}

impl CapturingConsumer {
    pub fn new() -> Arc<Self> {
        Arc::new(CapturingConsumer {
            batches: Mutex::new(Vec::new()),
        })
    }

    pub fn batches(&self) -> Vec<SpanBatch> {
        self.batches.lock().unwrap().clone()
    }

    pub fn len(&self) -> usize {
        self.batches.lock().unwrap().len()
    }

    /// Poll until at least `count` batches have arrived or the timeout
    /// elapses.
    pub async fn wait_for(&self, count: usize, timeout: std::time::Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        while tokio::time::Instant::now() < deadline {
            if self.len() >= count {
                return true;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        self.len() >= count
    }
}

#[async_trait]
impl SpanConsumer for CapturingConsumer {
    async fn consume(&self, batch: SpanBatch) -> Result<(), ConsumerError> {
        self.batches.lock().unwrap().push(batch);
        Ok(())
    }
}

/// Builds the line script a well-behaved Trace2 client would send.
pub struct Trace2Script {
    sid: String,
    seq: i64,
    pub lines: Vec<String>,
}

impl Trace2Script {
    pub fn new(sid: &str) -> Self {
        Trace2Script {
            sid: sid.to_string(),
            seq: 0,
            lines: Vec::new(),
        }
    }

    fn time(&mut self) -> String {
        self.seq += 1;
        let t = chrono::DateTime::from_timestamp(1_715_700_000, 0).unwrap()
            + chrono::Duration::milliseconds(self.seq);
        t.format("%Y-%m-%dT%H:%M:%S%.6fZ").to_string()
    }

    pub fn raw(&mut self, line: &str) -> &mut Self {
        self.lines.push(line.to_string());
        self
    }

    pub fn event(&mut self, name: &str, thread: &str, extra: &str) -> &mut Self {
        let time = self.time();
        let sid = &self.sid;
        let mut line =
            format!(r#"{{"event":"{name}","sid":"{sid}","thread":"{thread}","time":"{time}""#);
        if !extra.is_empty() {
            line.push(',');
            line.push_str(extra);
        }
        line.push('}');
        self.lines.push(line);
        self
    }

    pub fn version(&mut self) -> &mut Self {
        self.event("version", "main", r#""evt":"3","exe":"2.45.0""#)
    }

    pub fn start(&mut self, argv: &[&str]) -> &mut Self {
        let argv = serde_json::to_string(argv).unwrap();
        self.event("start", "main", &format!(r#""argv":{argv}"#))
    }

    pub fn cmd_name(&mut self, name: &str) -> &mut Self {
        self.event(
            "cmd_name",
            "main",
            &format!(r#""name":"{name}","hierarchy":"{name}""#),
        )
    }

    pub fn cmd_mode(&mut self, mode: &str) -> &mut Self {
        self.event("cmd_mode", "main", &format!(r#""name":"{mode}""#))
    }

    pub fn def_param(&mut self, key: &str, value: &str, scope: Option<&str>) -> &mut Self {
        let extra = match scope {
            Some(scope) => format!(r#""param":"{key}","value":"{value}","scope":"{scope}""#),
            None => format!(r#""param":"{key}","value":"{value}""#),
        };
        self.event("def_param", "main", &extra)
    }

    pub fn region_enter(&mut self, thread: &str, nesting: i64, category: &str, label: &str) -> &mut Self {
        self.event(
            "region_enter",
            thread,
            &format!(r#""nesting":{nesting},"category":"{category}","label":"{label}""#),
        )
    }

    pub fn region_leave(&mut self, thread: &str, nesting: i64) -> &mut Self {
        self.event("region_leave", thread, &format!(r#""nesting":{nesting}"#))
    }

    pub fn child_start(&mut self, id: i64, class: &str, argv: &[&str]) -> &mut Self {
        let argv = serde_json::to_string(argv).unwrap();
        self.event(
            "child_start",
            "main",
            &format!(r#""child_id":{id},"child_class":"{class}","use_shell":false,"argv":{argv}"#),
        )
    }

    pub fn child_start_hook(&mut self, id: i64, hook_name: &str, argv: &[&str]) -> &mut Self {
        let argv = serde_json::to_string(argv).unwrap();
        self.event(
            "child_start",
            "main",
            &format!(
                r#""child_id":{id},"child_class":"hook","use_shell":true,"argv":{argv},"hook_name":"{hook_name}""#
            ),
        )
    }

    pub fn child_exit(&mut self, id: i64, pid: i64, code: i64) -> &mut Self {
        self.event(
            "child_exit",
            "main",
            &format!(r#""child_id":{id},"pid":{pid},"code":{code}"#),
        )
    }

    pub fn atexit(&mut self, code: i64) -> &mut Self {
        self.event("atexit", "main", &format!(r#""code":{code}"#))
    }

    /// The whole script as one newline-terminated byte stream.
    pub fn bytes(&self) -> Vec<u8> {
        let mut out = Vec::new();
        for line in &self.lines {
            out.extend_from_slice(line.as_bytes());
            out.push(b'\n');
        }
        out
    }
}

/// Find the span with the given `trace2.span.type` attribute value.
pub fn spans_of_type<'a>(
    batch: &'a SpanBatch,
    span_type: &str,
) -> Vec<&'a gitpulse::export::SpanRecord> {
    batch
        .spans
        .iter()
        .filter(|s| {
            s.attributes.get("trace2.span.type") == Some(&serde_json::Value::from(span_type))
        })
        .collect()
}

/// Shorthand for building a params map.
pub fn params(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}
