//! Trace2 wire format: line classification and event decoding.

pub mod jmap;
pub mod parse;

pub use jmap::{ExtractError, JsonMap};
pub use parse::{parse_line, Event, EventPayload, ParseError};
