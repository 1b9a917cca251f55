//! Custom ruleset definitions.
//!
//! A ruleset maps qualified command names to detail levels, with its own
//! default for commands that match nothing. Command values must be detail
//! levels and never another ruleset, so lookups cannot cycle.

use std::collections::BTreeMap;

use serde::Deserialize;
use thiserror::Error;

use super::detail_level::{DetailLevel, DETAIL_LEVEL_DEFAULT_NAME};

/// Errors loading or validating a ruleset document.
#[derive(Error, Debug)]
pub enum RulesetError {
    #[error("could not parse ruleset '{path}': {source}")]
    Parse {
        path: String,
        source: serde_yaml::Error,
    },

    #[error("ruleset '{path}' has invalid command '{command}':'{value}'")]
    InvalidCommand {
        path: String,
        command: String,
        value: String,
    },

    #[error("ruleset '{path}' has invalid default detail level '{value}'")]
    InvalidDefault { path: String, value: String },
}

/// Default values for one ruleset.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RulesetDefaults {
    /// Detail level used when the exe+verb+mode lookup fails. The loader
    /// pre-populates this with the builtin default if omitted.
    #[serde(default)]
    pub detail: String,
}

/// The content of one ruleset document.
///
/// Command keys follow the `<exe>[:<verb>][#<mode>]` grammar; values name
/// one of the four detail levels.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RulesetDefinition {
    #[serde(default)]
    pub commands: BTreeMap<String, String>,
    #[serde(default)]
    pub defaults: RulesetDefaults,
}

impl RulesetDefinition {
    /// Parse a YAML ruleset document and validate it. `path` is used only
    /// for error reporting.
    pub fn parse(content: &str, path: &str) -> Result<Self, RulesetError> {
        let mut rsdef: RulesetDefinition =
            serde_yaml::from_str(content).map_err(|source| RulesetError::Parse {
                path: path.to_string(),
                source,
            })?;
        rsdef.validate(path)?;
        Ok(rsdef)
    }

    /// Validate command values and the default, defaulting the latter to
    /// the builtin default detail level when absent.
    pub fn validate(&mut self, path: &str) -> Result<(), RulesetError> {
        for (command, value) in &self.commands {
            // Command values must be detail levels and not another ruleset,
            // to avoid lookup loops.
            if command.is_empty() || DetailLevel::from_name(value).is_none() {
                return Err(RulesetError::InvalidCommand {
                    path: path.to_string(),
                    command: command.clone(),
                    value: value.clone(),
                });
            }
        }

        if self.defaults.detail.is_empty() {
            self.defaults.detail = DETAIL_LEVEL_DEFAULT_NAME.to_string();
        } else if DetailLevel::from_name(&self.defaults.detail).is_none() {
            return Err(RulesetError::InvalidDefault {
                path: path.to_string(),
                value: self.defaults.detail.clone(),
            });
        }

        Ok(())
    }

    /// Look up the detail level name for a command, trying
    /// `<exe>:<verb>#<mode>`, `<exe>:<verb>`, then `<exe>`.
    /// Returns the matched key and the detail level name.
    pub fn lookup_command<'a>(
        &'a self,
        qn: &'a crate::dataset::QualifiedNames,
    ) -> Option<(&'a str, &'a str)> {
        for key in [&qn.exe_verb_mode, &qn.exe_verb, &qn.exe] {
            if let Some(value) = self.commands.get(key.as_str()) {
                return Some((key.as_str(), value.as_str()));
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::QualifiedNames;

    fn qnames(exe: &str, verb: &str, mode: &str) -> QualifiedNames {
        QualifiedNames {
            exe: exe.to_string(),
            exe_verb: verb.to_string(),
            exe_verb_mode: mode.to_string(),
        }
    }

    #[test]
    fn test_parse_and_defaults() {
        let rs = RulesetDefinition::parse(
            r#"
commands:
  "git:status": "dl:verbose"
  "git:config": "dl:drop"
"#,
            "rs-status.yml",
        )
        .unwrap();

        assert_eq!(rs.commands.len(), 2);
        // Omitted default is pre-populated with the builtin default.
        assert_eq!(rs.defaults.detail, "dl:summary");
    }

    #[test]
    fn test_explicit_default_kept() {
        let rs = RulesetDefinition::parse(
            r#"
defaults:
  detail: "dl:drop"
"#,
            "rs.yml",
        )
        .unwrap();
        assert_eq!(rs.defaults.detail, "dl:drop");
    }

    #[test]
    fn test_command_value_must_be_detail_level() {
        let err = RulesetDefinition::parse(
            r#"
commands:
  "git": "rs:other"
"#,
            "rs.yml",
        )
        .unwrap_err();
        assert!(matches!(err, RulesetError::InvalidCommand { .. }));
    }

    #[test]
    fn test_invalid_default_rejected() {
        let err = RulesetDefinition::parse(
            r#"
defaults:
  detail: "rs:other"
"#,
            "rs.yml",
        )
        .unwrap_err();
        assert!(matches!(err, RulesetError::InvalidDefault { .. }));
    }

    #[test]
    fn test_lookup_prefers_longest_form() {
        let rs = RulesetDefinition::parse(
            r#"
commands:
  "c:v#m": "dl:drop"
  "c:v": "dl:summary"
  "c": "dl:process"
"#,
            "rs.yml",
        )
        .unwrap();

        let names1 = qnames("c", "c:v", "c:v#m");
        let hit = rs.lookup_command(&names1).unwrap();
        assert_eq!(hit, ("c:v#m", "dl:drop"));

        let names2 = qnames("c", "c:v", "c:v#ZZ");
        let hit = rs.lookup_command(&names2).unwrap();
        assert_eq!(hit, ("c:v", "dl:summary"));

        let names3 = qnames("c", "c:YY", "c:YY#ZZ");
        let hit = rs.lookup_command(&names3).unwrap();
        assert_eq!(hit, ("c", "dl:process"));

        assert!(rs.lookup_command(&qnames("XX", "XX:v", "XX:v#m")).is_none());
    }
}
