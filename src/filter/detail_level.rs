//! Detail levels: the coarse verbosity tiers for emitted telemetry.

use serde::Deserialize;

/// How much of a dataset the exporter reports.
///
/// All names carry a `dl:` prefix to keep them disjoint from custom
/// ruleset names (which use `rs:`), so resolving one can never cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Deserialize)]
#[serde(try_from = "String")]
pub enum DetailLevel {
    /// Emit nothing for this command.
    Drop,
    /// Process span only.
    Summary,
    /// Process, child, and exec spans with process-level rollups.
    Process,
    /// Everything, including thread and region spans.
    Verbose,
}

pub const DETAIL_LEVEL_DROP_NAME: &str = "dl:drop";
pub const DETAIL_LEVEL_SUMMARY_NAME: &str = "dl:summary";
pub const DETAIL_LEVEL_PROCESS_NAME: &str = "dl:process";
pub const DETAIL_LEVEL_VERBOSE_NAME: &str = "dl:verbose";

/// The hard default when nothing else resolves.
pub const DETAIL_LEVEL_DEFAULT_NAME: &str = DETAIL_LEVEL_SUMMARY_NAME;

impl DetailLevel {
    pub const DEFAULT: DetailLevel = DetailLevel::Summary;

    /// Resolve a detail-level name. Returns `None` for anything else
    /// (such as a ruleset name).
    pub fn from_name(name: &str) -> Option<DetailLevel> {
        match name {
            DETAIL_LEVEL_DROP_NAME => Some(DetailLevel::Drop),
            DETAIL_LEVEL_SUMMARY_NAME => Some(DetailLevel::Summary),
            DETAIL_LEVEL_PROCESS_NAME => Some(DetailLevel::Process),
            DETAIL_LEVEL_VERBOSE_NAME => Some(DetailLevel::Verbose),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            DetailLevel::Drop => DETAIL_LEVEL_DROP_NAME,
            DetailLevel::Summary => DETAIL_LEVEL_SUMMARY_NAME,
            DetailLevel::Process => DETAIL_LEVEL_PROCESS_NAME,
            DetailLevel::Verbose => DETAIL_LEVEL_VERBOSE_NAME,
        }
    }
}

impl TryFrom<String> for DetailLevel {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        DetailLevel::from_name(&value).ok_or_else(|| format!("invalid detail level '{value}'"))
    }
}

impl std::fmt::Display for DetailLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}
