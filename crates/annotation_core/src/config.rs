use serde::Deserialize;
use std::fs;
use std::path::Path;

use crate::error::{EngineError, Result};

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub consensus: ConsensusRule,
    pub spans: SpanPolicy,
    pub suggestions: SuggestionDefaults,
    pub store: StoreSettings,
}

/// Thresholds for turning a vote tally into an annotation status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ConsensusRule {
    /// Votes one side needs before a non-pending status can be assigned.
    pub quorum: u32,
    /// `true`: the winning side needs more votes than the other.
    /// `false`: equal is enough, and approval is checked first.
    pub strict_majority: bool,
}

impl Default for ConsensusRule {
    fn default() -> Self {
        Self {
            quorum: 2,
            strict_majority: true,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Deserialize)]
#[serde(default)]
pub struct SpanPolicy {
    /// Accept `start == end`. Off by default; such spans fail with `InvalidSpan`.
    pub allow_empty: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SuggestionDefaults {
    pub default_confidence: f64,
    pub notes: String,
}

impl Default for SuggestionDefaults {
    fn default() -> Self {
        Self {
            default_confidence: 0.8,
            notes: "auto-suggested".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct StoreSettings {
    pub busy_timeout_ms: u64,
    pub max_vote_attempts: u32,
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            busy_timeout_ms: 5_000,
            max_vote_attempts: 3,
        }
    }
}

impl EngineConfig {
    /// Load from a `.toml`, `.yaml` or `.yml` file. Missing keys keep their defaults.
    pub fn load_from_path(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .map_err(|err| EngineError::Config(format!("{}: {err}", path.display())))?;
        let ext = path.extension().and_then(|ext| ext.to_str()).unwrap_or("");
        let config = match ext {
            "toml" => Self::from_toml_str(&raw)?,
            "yaml" | "yml" => Self::from_yaml_str(&raw)?,
            other => {
                return Err(EngineError::Config(format!(
                    "unsupported config extension: {other:?}"
                )));
            }
        };
        Ok(config)
    }

    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let config: EngineConfig =
            toml::from_str(raw).map_err(|err| EngineError::Config(err.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_yaml_str(raw: &str) -> Result<Self> {
        let config: EngineConfig =
            serde_yaml::from_str(raw).map_err(|err| EngineError::Config(err.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.consensus.quorum == 0 {
            return Err(EngineError::Config("consensus.quorum must be at least 1".into()));
        }
        if self.store.max_vote_attempts == 0 {
            return Err(EngineError::Config(
                "store.max_vote_attempts must be at least 1".into(),
            ));
        }
        let confidence = self.suggestions.default_confidence;
        if !(0.0..=1.0).contains(&confidence) {
            return Err(EngineError::Config(format!(
                "suggestions.default_confidence {confidence} outside [0.0, 1.0]"
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.consensus.quorum, 2);
        assert!(config.consensus.strict_majority);
        assert!(!config.spans.allow_empty);
        assert_eq!(config.suggestions.default_confidence, 0.8);
        assert_eq!(config.store.max_vote_attempts, 3);
    }

    #[test]
    fn partial_toml_keeps_defaults() {
        let config = EngineConfig::from_toml_str(
            r#"
            [consensus]
            quorum = 3

            [spans]
            allow_empty = true
            "#,
        )
        .unwrap();
        assert_eq!(config.consensus.quorum, 3);
        assert!(config.consensus.strict_majority);
        assert!(config.spans.allow_empty);
        assert_eq!(config.suggestions.notes, "auto-suggested");
    }

    #[test]
    fn yaml_is_accepted() {
        let config = EngineConfig::from_yaml_str(
            "consensus:\n  strict_majority: false\nstore:\n  busy_timeout_ms: 250\n",
        )
        .unwrap();
        assert!(!config.consensus.strict_majority);
        assert_eq!(config.store.busy_timeout_ms, 250);
    }

    #[test]
    fn zero_quorum_is_rejected() {
        let err = EngineConfig::from_toml_str("[consensus]\nquorum = 0\n").unwrap_err();
        assert!(matches!(err, EngineError::Config(_)));
    }

    #[test]
    fn load_from_path_dispatches_on_extension() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("engine.toml");
        fs::write(&path, "[suggestions]\ndefault_confidence = 0.5\n").unwrap();
        let config = EngineConfig::load_from_path(&path).unwrap();
        assert_eq!(config.suggestions.default_confidence, 0.5);

        let bad = dir.path().join("engine.ini");
        fs::write(&bad, "").unwrap();
        assert!(EngineConfig::load_from_path(&bad).is_err());
    }
}
