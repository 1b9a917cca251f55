//! Custom summary rollups.
//!
//! Operators can configure message-prefix counters and region timers that
//! are aggregated while events arrive and emitted as a single JSON object
//! on the process span. This gives cheap per-command rollups without
//! shipping the verbose region detail.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;

use super::Region;

/// Counts messages (from `error` and `printf` events) that start with a
/// configured prefix.
#[derive(Debug, Clone, Deserialize)]
pub struct MessagePatternRule {
    /// Prefix matched against the beginning of each message.
    pub prefix: String,
    /// Field in the emitted summary object holding the count.
    pub field_name: String,
}

/// Aggregates count and/or total time for completed regions matching a
/// `(category, label)` pair exactly.
#[derive(Debug, Clone, Deserialize)]
pub struct RegionTimerRule {
    pub category: String,
    pub label: String,
    /// Field holding the match count; omit to not track counts.
    #[serde(default)]
    pub count_field: Option<String>,
    /// Field holding total seconds; omit to not track time.
    #[serde(default)]
    pub time_field: Option<String>,
}

/// Summary configuration document.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SummarySettings {
    #[serde(default)]
    pub message_patterns: Vec<MessagePatternRule>,
    #[serde(default)]
    pub region_timers: Vec<RegionTimerRule>,
}

#[derive(Error, Debug)]
#[error("{0}")]
pub struct SummarySettingsError(String);

impl SummarySettings {
    /// Parse a YAML summary settings document and validate it.
    pub fn parse(content: &str) -> Result<Self, SummarySettingsError> {
        let settings: SummarySettings = serde_yaml::from_str(content)
            .map_err(|e| SummarySettingsError(format!("could not parse summary settings: {e}")))?;
        settings.validate()?;
        Ok(settings)
    }

    /// Enforce the configuration invariants: non-empty prefixes, field
    /// names, categories, and labels; at least one output field per region
    /// timer; field names unique across both rule kinds.
    pub fn validate(&self) -> Result<(), SummarySettingsError> {
        let mut seen: Vec<String> = Vec::new();
        let mut claim_field = |field: &str, what: &str| -> Result<(), SummarySettingsError> {
            if seen.iter().any(|f| f == field) {
                return Err(SummarySettingsError(format!(
                    "{what}: duplicate field_name '{field}'"
                )));
            }
            seen.push(field.to_string());
            Ok(())
        };

        for (i, rule) in self.message_patterns.iter().enumerate() {
            if rule.prefix.is_empty() {
                return Err(SummarySettingsError(format!(
                    "message_patterns[{i}]: prefix cannot be empty"
                )));
            }
            if rule.field_name.is_empty() {
                return Err(SummarySettingsError(format!(
                    "message_patterns[{i}]: field_name cannot be empty"
                )));
            }
            claim_field(&rule.field_name, &format!("message_patterns[{i}]"))?;
        }

        for (i, rule) in self.region_timers.iter().enumerate() {
            if rule.category.is_empty() {
                return Err(SummarySettingsError(format!(
                    "region_timers[{i}]: category cannot be empty"
                )));
            }
            if rule.label.is_empty() {
                return Err(SummarySettingsError(format!(
                    "region_timers[{i}]: label cannot be empty"
                )));
            }

            let count_field = rule.count_field.as_deref().unwrap_or_default();
            let time_field = rule.time_field.as_deref().unwrap_or_default();
            if count_field.is_empty() && time_field.is_empty() {
                return Err(SummarySettingsError(format!(
                    "region_timers[{i}]: at least one of count_field or time_field must be specified"
                )));
            }

            if !count_field.is_empty() {
                claim_field(count_field, &format!("region_timers[{i}]"))?;
            }
            if !time_field.is_empty() {
                claim_field(time_field, &format!("region_timers[{i}]"))?;
            }
        }

        Ok(())
    }
}

/// Aggregated summary values for one dataset. Fields are pre-populated to
/// zero from the settings so that every configured field has a slot.
pub struct SummaryAccumulator {
    settings: Arc<SummarySettings>,

    /// field name -> message count
    message_counts: BTreeMap<String, i64>,
    /// field name -> region occurrence count
    region_counts: BTreeMap<String, i64>,
    /// field name -> total time in seconds
    region_times: BTreeMap<String, f64>,
}

impl SummaryAccumulator {
    pub fn new(settings: Arc<SummarySettings>) -> Self {
        let mut acc = SummaryAccumulator {
            settings: settings.clone(),
            message_counts: BTreeMap::new(),
            region_counts: BTreeMap::new(),
            region_times: BTreeMap::new(),
        };

        for rule in &settings.message_patterns {
            acc.message_counts.insert(rule.field_name.clone(), 0);
        }
        for rule in &settings.region_timers {
            if let Some(field) = &rule.count_field {
                acc.region_counts.insert(field.clone(), 0);
            }
            if let Some(field) = &rule.time_field {
                acc.region_times.insert(field.clone(), 0.0);
            }
        }

        acc
    }

    /// Count the message against every matching prefix rule.
    pub fn apply_message(&mut self, message: &str) {
        for rule in &self.settings.message_patterns {
            if message.starts_with(&rule.prefix) {
                if let Some(count) = self.message_counts.get_mut(&rule.field_name) {
                    *count += 1;
                }
            }
        }
    }

    /// Aggregate a completed region against every matching timer rule.
    pub fn apply_region(&mut self, region: &Region) {
        let Some(end) = region.lifetime.end_time else {
            return;
        };
        let duration = (end - region.lifetime.start_time)
            .num_microseconds()
            .map(|us| us as f64 / 1_000_000.0)
            .unwrap_or(0.0);

        for rule in &self.settings.region_timers {
            if region.category == rule.category && region.label == rule.label {
                if let Some(field) = &rule.count_field {
                    if let Some(count) = self.region_counts.get_mut(field) {
                        *count += 1;
                    }
                }
                if let Some(field) = &rule.time_field {
                    if let Some(total) = self.region_times.get_mut(field) {
                        *total += duration;
                    }
                }
            }
        }
    }

    /// Collapse the accumulated values into one JSON object holding only
    /// the non-zero fields, for attachment to the process span.
    pub fn to_map(&self) -> serde_json::Map<String, Value> {
        let mut result = serde_json::Map::new();

        for (field, count) in &self.message_counts {
            if *count > 0 {
                result.insert(field.clone(), Value::from(*count));
            }
        }
        for (field, count) in &self.region_counts {
            if *count > 0 {
                result.insert(field.clone(), Value::from(*count));
            }
        }
        for (field, total) in &self.region_times {
            if *total > 0.0 {
                result.insert(field.clone(), Value::from(*total));
            }
        }

        result
    }
}
