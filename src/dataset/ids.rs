//! Synthesis of trace and span identities from a Trace2 SID.
//!
//! A Trace2 SID looks like `<sid_0>/<sid_1>/.../<sid_n>`: a top-level Git
//! command has SID `<sid_0>` and each nested child process appends one more
//! component. Parent and child processes report over independent
//! connections, often with the child finishing first, so the ids that tie
//! them into one trace must be computable from the SID alone with no shared
//! state. We hash SID components with SHA-256 (each bit of the digest is
//! uniformly distributed) and slice the digests in fixed ways so that every
//! worker derives identical values.

use serde::{Serialize, Serializer};
use sha2::{Digest, Sha256};
use std::fmt;

/// A 16-byte trace identity shared by every process in one SID lineage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TraceId(pub [u8; 16]);

/// An 8-byte span identity. The all-zero id marks "no parent".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash)]
pub struct SpanId(pub [u8; 8]);

impl SpanId {
    pub const ZERO: SpanId = SpanId([0u8; 8]);

    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; 8]
    }
}

impl fmt::Display for TraceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for b in self.0 {
            write!(f, "{b:02x}")?;
        }
        Ok(())
    }
}

impl fmt::Display for SpanId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for b in self.0 {
            write!(f, "{b:02x}")?;
        }
        Ok(())
    }
}

impl Serialize for TraceId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl Serialize for SpanId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Derive `(trace_id, self_span_id, parent_span_id)` from a raw SID.
///
/// The trace id is the first 16 bytes of `SHA-256(sid_0)`, so every process
/// in the lineage computes the same value. Span ids are bytes 16..24 of the
/// digest of the last (self) and next-to-last (parent) components; a
/// top-level command has the zero parent span id.
pub fn extract_ids_from_sid(raw_sid: &str) -> (TraceId, SpanId, SpanId) {
    let components: Vec<&str> = raw_sid.split('/').collect();

    let hash_0 = Sha256::digest(components[0].as_bytes());

    let mut trace_id = TraceId::default();
    trace_id.0.copy_from_slice(&hash_0[0..16]);

    let mut self_id = SpanId::default();
    let mut parent_id = SpanId::ZERO;

    if components.len() == 1 {
        self_id.0.copy_from_slice(&hash_0[16..24]);
    } else {
        let n = components.len() - 1;

        let hash_parent = Sha256::digest(components[n - 1].as_bytes());
        parent_id.0.copy_from_slice(&hash_parent[16..24]);

        let hash_self = Sha256::digest(components[n].as_bytes());
        self_id.0.copy_from_slice(&hash_self[16..24]);
    }

    (trace_id, self_id, parent_id)
}
