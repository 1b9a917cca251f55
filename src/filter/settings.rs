//! Filter settings: the document that names the special `def_param` keys
//! and wires nicknames and rulesets together.

use std::collections::BTreeMap;

use serde::Deserialize;

use super::ruleset::RulesetDefinition;

/// Names of the Git config settings used in `def_param` events to send
/// repository/worktree identity to us. Sites choose their own namespace
/// for these keys.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct FilterKeyNames {
    /// Git config setting carrying an operator-chosen nickname for a repo
    /// or worktree. The nickname picks the filtering and identifies the
    /// repo downstream without exposing its URL or worktree path.
    #[serde(default)]
    pub nickname_key: String,

    /// Git config setting carrying the name of the desired ruleset
    /// directly. Overrides any nickname mapping.
    #[serde(default)]
    pub ruleset_key: String,
}

/// Global filtering defaults.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct FilterDefaults {
    /// Default ruleset or detail level for commands that do not name one.
    /// When empty, the builtin default applies.
    #[serde(default)]
    pub ruleset: String,
}

/// The filter settings document.
///
/// ```yaml
/// keynames:
///   nickname_key: "otel.trace2.nickname"
///   ruleset_key: "otel.trace2.ruleset"
/// nicknames:
///   "monorepo": "dl:verbose"
///   "private":  "dl:drop"
/// rulesets:
///   "rs:status": "./rulesets/rs-status.yml"
/// defaults:
///   ruleset: "dl:summary"
/// ```
#[derive(Debug, Clone, Default, Deserialize)]
pub struct FilterSettings {
    #[serde(default)]
    pub keynames: FilterKeyNames,

    /// Repo nickname -> ruleset or detail-level name.
    #[serde(default)]
    pub nicknames: BTreeMap<String, String>,

    /// Ruleset name -> pathname of its YAML document. Used while loading;
    /// the parsed definitions land in `ruleset_defs`.
    #[serde(default)]
    pub rulesets: BTreeMap<String, String>,

    #[serde(default)]
    pub defaults: FilterDefaults,

    /// Parsed ruleset definitions, keyed by ruleset name. Populated by the
    /// config loader from the `rulesets` path map.
    #[serde(skip)]
    pub ruleset_defs: BTreeMap<String, RulesetDefinition>,
}

impl FilterSettings {
    /// Parse the filter settings document (without loading ruleset files;
    /// that requires file access and lives in the config loader).
    pub fn parse(content: &str) -> Result<Self, serde_yaml::Error> {
        serde_yaml::from_str(content)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full_document() {
        let fs = FilterSettings::parse(
            r#"
keynames:
  nickname_key: "otel.trace2.nickname"
  ruleset_key: "otel.trace2.ruleset"
nicknames:
  "monorepo": "rs:mono"
  "private": "dl:drop"
rulesets:
  "rs:mono": "./rs-mono.yml"
defaults:
  ruleset: "dl:summary"
"#,
        )
        .unwrap();

        assert_eq!(fs.keynames.nickname_key, "otel.trace2.nickname");
        assert_eq!(fs.nicknames.get("private").unwrap(), "dl:drop");
        assert_eq!(fs.rulesets.get("rs:mono").unwrap(), "./rs-mono.yml");
        assert_eq!(fs.defaults.ruleset, "dl:summary");
        assert!(fs.ruleset_defs.is_empty());
    }

    #[test]
    fn test_parse_empty_document() {
        let fs = FilterSettings::parse("{}").unwrap();
        assert!(fs.keynames.nickname_key.is_empty());
        assert!(fs.nicknames.is_empty());
        assert!(fs.defaults.ruleset.is_empty());
    }
}
