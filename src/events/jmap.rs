//! Typed accessors over a generic decoded JSON object.
//!
//! Trace2 events arrive as one JSON object per line. We decode each line
//! into a generic map first and then pull typed fields out of it, so that
//! a malformed event produces an error naming the offending key instead of
//! a serde path string.

use chrono::{DateTime, Utc};
use serde_json::Value;
use thiserror::Error;

/// Errors produced when extracting a field from a decoded event object.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum ExtractError {
    #[error("key '{0}' not present in Trace2 event")]
    KeyNotPresent(String),

    #[error("key '{key}' does not have {expected} value")]
    WrongType { key: String, expected: &'static str },
}

impl ExtractError {
    fn wrong_type(key: &str, expected: &'static str) -> Self {
        ExtractError::WrongType {
            key: key.to_string(),
            expected,
        }
    }
}

/// A decoded JSON object holding one Trace2 event.
///
/// Required getters fail when the key is absent or the value has the wrong
/// type. Optional getters return `None` for an absent key but still fail on
/// a type mismatch, since we are validating a known document format.
pub struct JsonMap(serde_json::Map<String, Value>);

impl JsonMap {
    pub fn new(map: serde_json::Map<String, Value>) -> Self {
        JsonMap(map)
    }

    /// Decode a raw JSON object from a byte slice.
    pub fn from_slice(data: &[u8]) -> Result<Self, serde_json::Error> {
        let map: serde_json::Map<String, Value> = serde_json::from_slice(data)?;
        Ok(JsonMap(map))
    }

    pub fn required(&self, key: &str) -> Result<&Value, ExtractError> {
        self.0
            .get(key)
            .ok_or_else(|| ExtractError::KeyNotPresent(key.to_string()))
    }

    pub fn required_str(&self, key: &str) -> Result<String, ExtractError> {
        match self.required(key)? {
            Value::String(s) => Ok(s.clone()),
            _ => Err(ExtractError::wrong_type(key, "string")),
        }
    }

    pub fn optional_str(&self, key: &str) -> Result<Option<String>, ExtractError> {
        match self.0.get(key) {
            None => Ok(None),
            Some(Value::String(s)) => Ok(Some(s.clone())),
            Some(_) => Err(ExtractError::wrong_type(key, "string")),
        }
    }

    pub fn required_bool(&self, key: &str) -> Result<bool, ExtractError> {
        match self.required(key)? {
            Value::Bool(b) => Ok(*b),
            _ => Err(ExtractError::wrong_type(key, "bool")),
        }
    }

    /// Extract a required integer.
    ///
    /// JSON has no integer type, so a decoded whole number may surface as a
    /// float; narrow it back rather than failing.
    pub fn required_i64(&self, key: &str) -> Result<i64, ExtractError> {
        match self.required(key)? {
            Value::Number(n) => number_as_i64(n)
                .ok_or_else(|| ExtractError::wrong_type(key, "integer")),
            _ => Err(ExtractError::wrong_type(key, "integer")),
        }
    }

    pub fn optional_i64(&self, key: &str) -> Result<Option<i64>, ExtractError> {
        match self.0.get(key) {
            None => Ok(None),
            Some(Value::Number(n)) => number_as_i64(n)
                .map(Some)
                .ok_or_else(|| ExtractError::wrong_type(key, "integer")),
            Some(_) => Err(ExtractError::wrong_type(key, "integer")),
        }
    }

    /// Extract a required float. Whole numbers without a trailing `.0`
    /// are accepted and widened.
    pub fn required_f64(&self, key: &str) -> Result<f64, ExtractError> {
        match self.required(key)? {
            Value::Number(n) => n
                .as_f64()
                .ok_or_else(|| ExtractError::wrong_type(key, "float")),
            _ => Err(ExtractError::wrong_type(key, "float")),
        }
    }

    /// Extract a required RFC3339 timestamp with microsecond precision.
    ///
    /// Git emits `Z`-suffixed times; some credential-manager builds send a
    /// `+00:00` style offset instead. Both are accepted.
    pub fn required_time(&self, key: &str) -> Result<DateTime<Utc>, ExtractError> {
        match self.required(key)? {
            Value::String(s) => DateTime::parse_from_rfc3339(s)
                .map(|t| t.with_timezone(&Utc))
                .map_err(|_| ExtractError::wrong_type(key, "RFC3339 timestamp")),
            _ => Err(ExtractError::wrong_type(key, "RFC3339 timestamp")),
        }
    }

    /// Extract a required heterogeneous array (usually `argv`). Elements are
    /// left as generic values because the wire does not promise strings.
    pub fn required_array(&self, key: &str) -> Result<Vec<Value>, ExtractError> {
        match self.required(key)? {
            Value::Array(a) => Ok(a.clone()),
            _ => Err(ExtractError::wrong_type(key, "array")),
        }
    }

    /// Extract a required value that must be a string or an integer.
    /// Used for `data` events where the value type is a union.
    pub fn required_str_or_i64(&self, key: &str) -> Result<Value, ExtractError> {
        match self.required(key)? {
            Value::String(s) => Ok(Value::String(s.clone())),
            Value::Number(n) => number_as_i64(n)
                .map(Value::from)
                .ok_or_else(|| ExtractError::wrong_type(key, "integer or string")),
            _ => Err(ExtractError::wrong_type(key, "integer or string")),
        }
    }

    /// Extract a required value of any JSON type, verbatim.
    /// Used for `data_json` events.
    pub fn required_value(&self, key: &str) -> Result<Value, ExtractError> {
        self.required(key).cloned()
    }
}

fn number_as_i64(n: &serde_json::Number) -> Option<i64> {
    if let Some(i) = n.as_i64() {
        return Some(i);
    }
    n.as_f64().map(|f| f as i64)
}
