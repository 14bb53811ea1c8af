use serde::Deserialize;
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::warn;

use crate::error::{EtlError, Result};
use crate::pipeline::processing::territory::FuzzyConfig;

pub const DEFAULT_CONFIG_PATH: &str = "config/pipeline.toml";

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub thresholds: Thresholds,
    #[serde(default)]
    pub territory: TerritoryConfig,
    #[serde(default)]
    pub sources: SourcesConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub raw: RawConfig,
}

/// Run-level quality gates. A missing value disables that gate.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Thresholds {
    /// Fraction of rows reaching territory resolution that may stay unresolved
    pub max_unresolved_rate: Option<f64>,
    /// Fraction of a fact table's merged rows that may fail referential integrity
    pub max_rejected_rate: Option<f64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TerritoryConfig {
    pub aliases_path: Option<PathBuf>,
    #[serde(default = "default_fuzzy_threshold")]
    pub fuzzy_threshold: f64,
    #[serde(default = "default_fuzzy_margin")]
    pub fuzzy_margin: f64,
}

impl Default for TerritoryConfig {
    fn default() -> Self {
        Self {
            aliases_path: None,
            fuzzy_threshold: default_fuzzy_threshold(),
            fuzzy_margin: default_fuzzy_margin(),
        }
    }
}

impl TerritoryConfig {
    pub fn fuzzy(&self) -> FuzzyConfig {
        FuzzyConfig {
            threshold: self.fuzzy_threshold,
            margin: self.fuzzy_margin,
        }
    }
}

fn default_fuzzy_threshold() -> f64 {
    0.90
}

fn default_fuzzy_margin() -> f64 {
    0.03
}

#[derive(Debug, Clone, Deserialize)]
pub struct SourcesConfig {
    #[serde(default = "default_registry_dir")]
    pub registry_dir: PathBuf,
    /// Ordered source labels; earlier wins on a reconciliation-key collision
    #[serde(default)]
    pub priority: Vec<String>,
}

impl Default for SourcesConfig {
    fn default() -> Self {
        Self {
            registry_dir: default_registry_dir(),
            priority: Vec::new(),
        }
    }
}

fn default_registry_dir() -> PathBuf {
    PathBuf::from("registry/sources")
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_dir")]
    pub dir: PathBuf,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            dir: default_log_dir(),
        }
    }
}

fn default_log_dir() -> PathBuf {
    PathBuf::from("logs")
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawConfig {
    /// Ordered decoding fallback list
    #[serde(default = "default_encodings")]
    pub encodings: Vec<String>,
}

impl Default for RawConfig {
    fn default() -> Self {
        Self {
            encodings: default_encodings(),
        }
    }
}

fn default_encodings() -> Vec<String> {
    vec!["utf-8".into(), "utf-16".into(), "latin-1".into()]
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| {
            EtlError::Config(format!(
                "Failed to read config file '{}': {}",
                path.display(),
                e
            ))
        })?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        for (name, value) in [
            ("max_unresolved_rate", self.thresholds.max_unresolved_rate),
            ("max_rejected_rate", self.thresholds.max_rejected_rate),
        ] {
            if let Some(v) = value {
                if !(0.0..=1.0).contains(&v) {
                    return Err(EtlError::Config(format!(
                        "thresholds.{} must be within [0, 1], got {}",
                        name, v
                    )));
                }
            }
        }

        let t = &self.territory;
        if !(t.fuzzy_threshold > 0.0 && t.fuzzy_threshold <= 1.0) {
            return Err(EtlError::Config(format!(
                "territory.fuzzy_threshold must be within (0, 1], got {}",
                t.fuzzy_threshold
            )));
        }
        if t.fuzzy_margin < 0.0 {
            return Err(EtlError::Config(format!(
                "territory.fuzzy_margin must not be negative, got {}",
                t.fuzzy_margin
            )));
        }

        let mut seen = HashSet::new();
        for source in &self.sources.priority {
            if !seen.insert(source.as_str()) {
                return Err(EtlError::Config(format!(
                    "sources.priority lists '{}' more than once",
                    source
                )));
            }
        }

        if self.raw.encodings.is_empty() {
            return Err(EtlError::Config(
                "raw.encodings must list at least one encoding".to_string(),
            ));
        }

        Ok(())
    }

    /// Log each disabled quality gate; called once at run start
    pub fn warn_disabled_gates(&self) {
        if self.thresholds.max_unresolved_rate.is_none() {
            warn!("thresholds.max_unresolved_rate not configured; unresolved-territory gate disabled");
        }
        if self.thresholds.max_rejected_rate.is_none() {
            warn!("thresholds.max_rejected_rate not configured; referential-integrity gate disabled");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full_config() {
        let config = Config::from_toml_str(
            r#"
            [thresholds]
            max_unresolved_rate = 0.05
            max_rejected_rate = 0.02

            [territory]
            aliases_path = "config/territory_aliases.toml"
            fuzzy_threshold = 0.93

            [sources]
            registry_dir = "registry/sources"
            priority = ["opendata_bcn", "idescat"]

            [raw]
            encodings = ["utf-8", "latin-1"]
            "#,
        )
        .unwrap();

        assert_eq!(config.thresholds.max_unresolved_rate, Some(0.05));
        assert_eq!(config.territory.fuzzy_threshold, 0.93);
        assert_eq!(config.territory.fuzzy_margin, 0.03);
        assert_eq!(config.sources.priority, vec!["opendata_bcn", "idescat"]);
        assert_eq!(config.raw.encodings, vec!["utf-8", "latin-1"]);
        assert_eq!(config.logging.dir, PathBuf::from("logs"));
    }

    #[test]
    fn test_thresholds_have_no_numeric_default() {
        let config = Config::from_toml_str("").unwrap();
        assert_eq!(config.thresholds.max_unresolved_rate, None);
        assert_eq!(config.thresholds.max_rejected_rate, None);
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        for bad in [
            "[thresholds]\nmax_rejected_rate = 1.5",
            "[territory]\nfuzzy_threshold = 0.0",
            "[territory]\nfuzzy_margin = -0.1",
            "[sources]\npriority = [\"a\", \"b\", \"a\"]",
            "[raw]\nencodings = []",
        ] {
            let err = Config::from_toml_str(bad).unwrap_err();
            assert!(matches!(err, EtlError::Config(_)), "{}: {:?}", bad, err);
        }
    }
}
