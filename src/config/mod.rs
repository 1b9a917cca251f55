//! Receiver configuration.
//!
//! One YAML document names the transport endpoint and the pathnames of the
//! optional filter / PII / summary settings documents. We allow both
//! transport fields in a single file so that it can be shared between
//! platforms; only the one matching the build target is used.

use std::path::Path;
use std::sync::Arc;

use serde::Deserialize;
use thiserror::Error;

use crate::dataset::summary::{SummarySettings, SummarySettingsError};
use crate::filter::{FilterSettings, RulesetDefinition, RulesetError};
use crate::pii::PiiSettings;

/// Errors loading or validating the receiver configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("could not read '{path}': {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },

    #[error("could not parse '{path}': {source}")]
    Parse {
        path: String,
        source: serde_yaml::Error,
    },

    #[error("{0}")]
    Validation(String),

    #[error(transparent)]
    Ruleset(#[from] RulesetError),

    #[error(transparent)]
    Summary(#[from] SummarySettingsError),
}

/// The receiver configuration document.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Windows: the named pipe to listen on. The canonical form is the
    /// backslash spelling of `//./pipe/<pipename>`; a bare `<pipename>` is
    /// accepted as shorthand. Ignored on other platforms.
    #[serde(default)]
    pub pipe: String,

    /// POSIX: the Unix domain socket pathname. `af_unix:` and
    /// `af_unix:stream:` prefixes are accepted (matching the
    /// `GIT_TRACE2_EVENT` spelling) and stripped. Ignored on Windows.
    #[serde(default)]
    pub socket: String,

    /// Number of concurrently outstanding named-pipe server instances on
    /// Windows. Ignored on other platforms.
    #[serde(default = "default_pipe_queue_depth")]
    pub pipe_queue_depth: usize,

    /// Allow `cc: ` command/control verbs embedded in the data stream
    /// (test and debug tooling only).
    #[serde(default)]
    pub enable_commands: bool,

    /// Pathname of the PII settings document.
    #[serde(default)]
    pub pii_settings: String,

    /// Pathname of the filter settings document.
    #[serde(default)]
    pub filter_settings: String,

    /// Pathname of the custom summary settings document.
    #[serde(default)]
    pub summary_settings: String,

    /// Loaded settings documents, populated by [`Config::validate`].
    #[serde(skip)]
    pub pii: Option<Arc<PiiSettings>>,
    #[serde(skip)]
    pub filter: Option<Arc<FilterSettings>>,
    #[serde(skip)]
    pub summary: Option<Arc<SummarySettings>>,
}

fn default_pipe_queue_depth() -> usize {
    4
}

impl Default for Config {
    fn default() -> Self {
        Config {
            pipe: String::new(),
            socket: String::new(),
            pipe_queue_depth: default_pipe_queue_depth(),
            enable_commands: false,
            pii_settings: String::new(),
            filter_settings: String::new(),
            summary_settings: String::new(),
            pii: None,
            filter: None,
            summary: None,
        }
    }
}

impl Config {
    /// Read and fully validate a receiver configuration file, loading the
    /// referenced settings documents.
    pub fn load(path: &Path) -> Result<Config, ConfigError> {
        let content = read_file(path)?;
        let mut config: Config =
            serde_yaml::from_str(&content).map_err(|source| ConfigError::Parse {
                path: path.display().to_string(),
                source,
            })?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the transport endpoint for this platform and load the
    /// referenced settings documents.
    pub fn validate(&mut self) -> Result<(), ConfigError> {
        if cfg!(windows) {
            if self.pipe.is_empty() {
                return Err(ConfigError::Validation("pipe not defined".to_string()));
            }
            self.pipe = normalize_named_pipe_path(&self.pipe)?;
            if self.pipe_queue_depth < 1 {
                return Err(ConfigError::Validation(
                    "pipe_queue_depth must be at least 1".to_string(),
                ));
            }
        } else {
            if self.socket.is_empty() {
                return Err(ConfigError::Validation("socket not defined".to_string()));
            }
            self.socket = normalize_uds_path(&self.socket)?;
        }

        if !self.pii_settings.is_empty() {
            let path = Path::new(&self.pii_settings);
            let content = read_file(path)?;
            let pii = PiiSettings::parse(&content).map_err(|source| ConfigError::Parse {
                path: self.pii_settings.clone(),
                source,
            })?;
            self.pii = Some(Arc::new(pii));
        }

        if !self.summary_settings.is_empty() {
            let path = Path::new(&self.summary_settings);
            let content = read_file(path)?;
            self.summary = Some(Arc::new(SummarySettings::parse(&content)?));
        }

        if !self.filter_settings.is_empty() {
            let path = Path::new(&self.filter_settings);
            let content = read_file(path)?;
            let mut filter =
                FilterSettings::parse(&content).map_err(|source| ConfigError::Parse {
                    path: self.filter_settings.clone(),
                    source,
                })?;
            load_ruleset_definitions(&mut filter)?;
            self.filter = Some(Arc::new(filter));
        }

        Ok(())
    }
}

/// Load and validate every ruleset named in the filter settings.
///
/// Ruleset names must carry the `rs:` prefix (so they can never collide
/// with a `dl:` detail-level name) and be at least four characters.
fn load_ruleset_definitions(filter: &mut FilterSettings) -> Result<(), ConfigError> {
    for (name, path) in &filter.rulesets {
        if name.len() < 4 || !name.starts_with("rs:") || path.is_empty() {
            return Err(ConfigError::Validation(format!(
                "ruleset has invalid name or pathname '{name}':'{path}'"
            )));
        }

        let content = read_file(Path::new(path))?;
        let rsdef = RulesetDefinition::parse(&content, path)?;
        filter.ruleset_defs.insert(name.clone(), rsdef);
    }

    Ok(())
}

fn read_file(path: &Path) -> Result<String, ConfigError> {
    std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.display().to_string(),
        source,
    })
}

/// Strip the optional `af_unix:` / `af_unix:stream:` prefixes from a Unix
/// domain socket pathname. Datagram sockets are not supported: Trace2 can
/// emit to them, but a stream of related events needs a connection.
pub fn normalize_uds_path(input: &str) -> Result<String, ConfigError> {
    if let Some(path) = input.strip_prefix("af_unix:stream:") {
        return Ok(path.to_string());
    }

    if input.strip_prefix("af_unix:dgram:").is_some() {
        return Err(ConfigError::Validation(
            "SOCK_DGRAM sockets are not supported".to_string(),
        ));
    }

    if let Some(path) = input.strip_prefix("af_unix:") {
        return Ok(path.to_string());
    }

    Ok(input.to_string())
}

/// Require the backslash spelling of `//./pipe/<pipename>`, allowing a
/// bare `<pipename>` as an alias. General UNC paths and drive letters are
/// rejected: named pipes can only be created on the local NPFS.
pub fn normalize_named_pipe_path(input: &str) -> Result<String, ConfigError> {
    let normalized = input.to_ascii_lowercase().replace('/', "\\");

    if normalized.starts_with(r"\\.\pipe\") {
        // A full NPFS path; use the original spelling as is.
        return Ok(input.to_string());
    }

    if normalized.starts_with(r"\\") {
        return Err(ConfigError::Validation(
            r"expect '[\\.\pipe\]<pipename>'".to_string(),
        ));
    }

    if input.len() > 2 && input.as_bytes()[1] == b':' {
        return Err(ConfigError::Validation(
            r"expect '[\\.\pipe\]<pipename>'".to_string(),
        ));
    }

    // A relative name is a shortcut; join it with the required prefix.
    // (Path joining would resolve against the CWD, which is not on the
    // NPFS, so plain string assembly is deliberate.)
    Ok(format!(r"\\.\pipe\{input}"))
}
