//! Pipeline configuration.
//!
//! Defaults are usable as-is; [`PipelineConfig::from_env`] overlays
//! `SEOFIX_*` environment variables (the bare `MAX_LOCATIONS_PER_ISSUE` and
//! `SAFE_CSS_TOGGLE` names are honoured too).

use serde::{Deserialize, Serialize};

/// Knobs that bound and gate one pipeline invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct PipelineConfig {
    /// Located operations (those carrying a NodeRef) allowed per audit id.
    pub max_locations_per_issue: usize,
    /// Enables `insertStyleScoped`.
    pub safe_css: bool,
    /// Minimum anchor confidence for an operation to be applied.
    pub confidence_threshold: f32,
    pub max_document_bytes: usize,
    pub max_operations: usize,
    /// Longest structural path the resolver will walk.
    pub max_path_depth: usize,
    /// Elements examined per snippet scan.
    pub max_snippet_candidates: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_locations_per_issue: 10,
            safe_css: true,
            confidence_threshold: 0.5,
            max_document_bytes: 5 * 1024 * 1024,
            max_operations: 500,
            max_path_depth: 256,
            max_snippet_candidates: 10_000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid value for {var}: {value:?}")]
    InvalidValue { var: &'static str, value: String },
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

impl PipelineConfig {
    /// Load defaults, then apply any environment overrides.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::default().with_env_overrides(|name| std::env::var(name).ok())
    }

    /// Apply overrides from an arbitrary lookup (the environment in
    /// production, a map in tests).
    pub fn with_env_overrides<F>(mut self, lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let first = |names: &[&str]| names.iter().find_map(|n| lookup(n));

        if let Some(v) = first(&["SEOFIX_MAX_LOCATIONS_PER_ISSUE", "MAX_LOCATIONS_PER_ISSUE"]) {
            self.max_locations_per_issue = parse_usize("MAX_LOCATIONS_PER_ISSUE", &v)?;
        }
        if let Some(v) = first(&["SEOFIX_SAFE_CSS_TOGGLE", "SAFE_CSS_TOGGLE"]) {
            self.safe_css = parse_toggle("SAFE_CSS_TOGGLE", &v)?;
        }
        if let Some(v) = first(&["SEOFIX_CONFIDENCE_THRESHOLD"]) {
            self.confidence_threshold =
                v.trim()
                    .parse::<f32>()
                    .map_err(|_| ConfigError::InvalidValue {
                        var: "SEOFIX_CONFIDENCE_THRESHOLD",
                        value: v.clone(),
                    })?;
        }
        if let Some(v) = first(&["SEOFIX_MAX_DOCUMENT_BYTES"]) {
            self.max_document_bytes = parse_usize("SEOFIX_MAX_DOCUMENT_BYTES", &v)?;
        }
        if let Some(v) = first(&["SEOFIX_MAX_OPERATIONS"]) {
            self.max_operations = parse_usize("SEOFIX_MAX_OPERATIONS", &v)?;
        }

        self.validate()?;
        Ok(self)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..=1.0).contains(&self.confidence_threshold) {
            return Err(ConfigError::Invalid(format!(
                "confidence threshold {} is outside [0, 1]",
                self.confidence_threshold
            )));
        }
        if self.max_locations_per_issue == 0 {
            return Err(ConfigError::Invalid(
                "max_locations_per_issue must be > 0".to_string(),
            ));
        }
        if self.max_document_bytes == 0 || self.max_operations == 0 {
            return Err(ConfigError::Invalid(
                "document and operation limits must be > 0".to_string(),
            ));
        }
        if self.max_path_depth == 0 || self.max_snippet_candidates == 0 {
            return Err(ConfigError::Invalid(
                "resolver limits must be > 0".to_string(),
            ));
        }
        Ok(())
    }
}

fn parse_usize(var: &'static str, value: &str) -> Result<usize, ConfigError> {
    value
        .trim()
        .parse::<usize>()
        .map_err(|_| ConfigError::InvalidValue {
            var,
            value: value.to_string(),
        })
}

fn parse_toggle(var: &'static str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidValue {
            var,
            value: value.to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn defaults_are_valid() {
        assert!(PipelineConfig::default().validate().is_ok());
    }

    #[test]
    fn env_overrides_apply() {
        let cfg = PipelineConfig::default()
            .with_env_overrides(lookup(&[
                ("MAX_LOCATIONS_PER_ISSUE", "3"),
                ("SAFE_CSS_TOGGLE", "off"),
                ("SEOFIX_CONFIDENCE_THRESHOLD", "0.7"),
            ]))
            .expect("config");
        assert_eq!(cfg.max_locations_per_issue, 3);
        assert!(!cfg.safe_css);
        assert!((cfg.confidence_threshold - 0.7).abs() < 1e-6);
    }

    #[test]
    fn prefixed_name_wins_over_bare_name() {
        let cfg = PipelineConfig::default()
            .with_env_overrides(lookup(&[
                ("SEOFIX_MAX_LOCATIONS_PER_ISSUE", "2"),
                ("MAX_LOCATIONS_PER_ISSUE", "9"),
            ]))
            .expect("config");
        assert_eq!(cfg.max_locations_per_issue, 2);
    }

    #[test]
    fn rejects_bad_values() {
        let err = PipelineConfig::default()
            .with_env_overrides(lookup(&[("SAFE_CSS_TOGGLE", "maybe")]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { .. }));

        let err = PipelineConfig::default()
            .with_env_overrides(lookup(&[("SEOFIX_CONFIDENCE_THRESHOLD", "1.5")]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }
}
