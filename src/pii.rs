//! Settings for possibly GDPR-sensitive fields in the telemetry output.
//!
//! Both fields default to off; sites opt in explicitly. The lookups
//! themselves happen in the server module, where the peer connection is
//! available.

use serde::Deserialize;

/// Which PII fields to attach to the process span.
#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct PiiInclude {
    /// Look up the system hostname and add it to the process span.
    #[serde(default)]
    pub hostname: bool,

    /// Look up the client username and add it to the process span.
    #[serde(default)]
    pub username: bool,
}

/// The PII settings document.
#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct PiiSettings {
    #[serde(default)]
    pub include: PiiInclude,
}

impl PiiSettings {
    pub fn parse(content: &str) -> Result<Self, serde_yaml::Error> {
        serde_yaml::from_str(content)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_enables_fields() {
        let pii = PiiSettings::parse("include:\n  hostname: true\n  username: true\n").unwrap();
        assert!(pii.include.hostname);
        assert!(pii.include.username);
    }

    #[test]
    fn test_defaults_are_off() {
        let pii = PiiSettings::parse("{}").unwrap();
        assert!(!pii.include.hostname);
        assert!(!pii.include.username);
    }
}
