//! Smart filtering: how much OTLP detail to emit for a given Git command.
//!
//! A layered lookup resolves a detail level from the filter settings, the
//! repo nickname or explicit ruleset named in the command's `def_param`
//! stream, and per-command overrides inside a ruleset.

pub mod decide;
pub mod detail_level;
pub mod ruleset;
pub mod settings;

pub use decide::compute_detail_level;
pub use detail_level::DetailLevel;
pub use ruleset::{RulesetDefinition, RulesetError};
pub use settings::{FilterDefaults, FilterKeyNames, FilterSettings};
