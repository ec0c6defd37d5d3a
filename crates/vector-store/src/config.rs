use crate::error::{Result, VectorStoreError};
use crate::forest::ForestParams;
use crate::metric::Metric;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_CONFIG_FILE_NAME: &str = "similar.toml";

/// Settings shared by the builder, the search engine and the rebuild driver.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SimilarConfig {
    #[serde(default)]
    pub index: IndexSettings,
    #[serde(default)]
    pub search: SearchSettings,
    #[serde(default)]
    pub rebuild: RebuildSettings,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexSettings {
    #[serde(default = "default_index_dir")]
    pub dir: PathBuf,
    #[serde(default = "default_dimension")]
    pub dimension: usize,
    #[serde(default)]
    pub metric: Metric,
    #[serde(default = "default_trees")]
    pub trees: usize,
    #[serde(default = "default_leaf_size")]
    pub leaf_size: usize,
    #[serde(default = "default_seed")]
    pub seed: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchSettings {
    #[serde(default = "default_k")]
    pub k: usize,
    #[serde(default = "default_threshold")]
    pub threshold: f32,
    #[serde(default = "default_min_results")]
    pub min_results: usize,
    #[serde(default = "default_overfetch_factor")]
    pub overfetch_factor: usize,
    #[serde(default = "default_exhaustive")]
    pub exhaustive: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RebuildSettings {
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
    #[serde(default = "default_catalog_path")]
    pub catalog_path: PathBuf,
    #[serde(default = "default_watch_catalog")]
    pub watch_catalog: bool,
}

fn default_index_dir() -> PathBuf {
    PathBuf::from(".similar")
}

fn default_dimension() -> usize {
    512
}

fn default_trees() -> usize {
    10
}

fn default_leaf_size() -> usize {
    16
}

fn default_seed() -> u64 {
    42
}

fn default_k() -> usize {
    10
}

fn default_threshold() -> f32 {
    0.9
}

fn default_min_results() -> usize {
    3
}

fn default_overfetch_factor() -> usize {
    5
}

fn default_exhaustive() -> bool {
    true
}

fn default_interval_secs() -> u64 {
    300
}

fn default_catalog_path() -> PathBuf {
    PathBuf::from("catalog.json")
}

fn default_watch_catalog() -> bool {
    true
}

impl Default for IndexSettings {
    fn default() -> Self {
        Self {
            dir: default_index_dir(),
            dimension: default_dimension(),
            metric: Metric::default(),
            trees: default_trees(),
            leaf_size: default_leaf_size(),
            seed: default_seed(),
        }
    }
}

impl Default for SearchSettings {
    fn default() -> Self {
        Self {
            k: default_k(),
            threshold: default_threshold(),
            min_results: default_min_results(),
            overfetch_factor: default_overfetch_factor(),
            exhaustive: default_exhaustive(),
        }
    }
}

impl Default for RebuildSettings {
    fn default() -> Self {
        Self {
            interval_secs: default_interval_secs(),
            catalog_path: default_catalog_path(),
            watch_catalog: default_watch_catalog(),
        }
    }
}

impl IndexSettings {
    #[must_use]
    pub const fn forest_params(&self) -> ForestParams {
        ForestParams {
            trees: self.trees,
            leaf_size: self.leaf_size,
            seed: self.seed,
        }
    }
}

impl RebuildSettings {
    #[must_use]
    pub const fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}

impl SimilarConfig {
    /// Reads `path` if given, else `similar.toml` in the working directory when
    /// present, else defaults. Environment overrides are applied afterwards.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => {
                let fallback = Path::new(DEFAULT_CONFIG_FILE_NAME);
                if fallback.exists() {
                    Self::from_file(fallback)?
                } else {
                    Self::default()
                }
            }
        };
        config.apply_overrides(std::env::vars())?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            VectorStoreError::ConfigError(format!("failed to read {}: {e}", path.display()))
        })?;
        Self::from_toml_str(&raw)
    }

    pub fn from_toml_str(raw: &str) -> Result<Self> {
        Ok(toml::from_str(raw)?)
    }

    /// Applies `SIMILAR_*` variables; unrelated keys are ignored.
    pub fn apply_overrides(
        &mut self,
        vars: impl IntoIterator<Item = (String, String)>,
    ) -> Result<()> {
        for (key, value) in vars {
            match key.as_str() {
                "SIMILAR_INDEX_DIR" => self.index.dir = PathBuf::from(value),
                "SIMILAR_DIMENSION" => self.index.dimension = parse_override(&key, &value)?,
                "SIMILAR_TREES" => self.index.trees = parse_override(&key, &value)?,
                "SIMILAR_METRIC" => {
                    self.index.metric = value
                        .parse()
                        .map_err(|e: String| VectorStoreError::ConfigError(format!("{key}: {e}")))?;
                }
                _ => {}
            }
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.index.dimension == 0 {
            return Err(VectorStoreError::ConfigError(
                "index.dimension must be positive".into(),
            ));
        }
        if self.index.trees == 0 {
            return Err(VectorStoreError::ConfigError(
                "index.trees must be positive".into(),
            ));
        }
        if self.index.leaf_size < 2 {
            return Err(VectorStoreError::ConfigError(format!(
                "index.leaf_size must be at least 2 (got {})",
                self.index.leaf_size
            )));
        }
        if self.search.overfetch_factor == 0 {
            return Err(VectorStoreError::ConfigError(
                "search.overfetch_factor must be positive".into(),
            ));
        }
        if !self.search.threshold.is_finite() || self.search.threshold < 0.0 {
            return Err(VectorStoreError::ConfigError(format!(
                "search.threshold must be a non-negative number (got {})",
                self.search.threshold
            )));
        }
        if self.rebuild.interval_secs == 0 {
            return Err(VectorStoreError::ConfigError(
                "rebuild.interval_secs must be positive".into(),
            ));
        }
        Ok(())
    }
}

fn parse_override<T: std::str::FromStr>(key: &str, value: &str) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    value
        .trim()
        .parse()
        .map_err(|e| VectorStoreError::ConfigError(format!("{key}={value:?}: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn empty_toml_yields_defaults() {
        let config = SimilarConfig::from_toml_str("").unwrap();
        assert_eq!(config, SimilarConfig::default());
        assert_eq!(config.index.dimension, 512);
        assert_eq!(config.rebuild.interval(), Duration::from_secs(300));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn partial_sections_keep_other_defaults() {
        let config = SimilarConfig::from_toml_str(
            r#"
            [index]
            dimension = 3
            metric = "euclidean"

            [search]
            threshold = 0.25
            "#,
        )
        .unwrap();
        assert_eq!(config.index.dimension, 3);
        assert_eq!(config.index.metric, Metric::Euclidean);
        assert_eq!(config.index.trees, 10);
        assert_eq!(config.search.threshold, 0.25);
        assert_eq!(config.search.k, 10);
    }

    #[test]
    fn env_overrides_apply_and_validate() {
        let mut config = SimilarConfig::default();
        config
            .apply_overrides([
                ("SIMILAR_DIMENSION".to_string(), "64".to_string()),
                ("SIMILAR_METRIC".to_string(), "dot".to_string()),
                ("SIMILAR_INDEX_DIR".to_string(), "/tmp/idx".to_string()),
                ("PATH".to_string(), "/usr/bin".to_string()),
            ])
            .unwrap();
        assert_eq!(config.index.dimension, 64);
        assert_eq!(config.index.metric, Metric::Dot);
        assert_eq!(config.index.dir, PathBuf::from("/tmp/idx"));

        assert!(config
            .apply_overrides([("SIMILAR_TREES".to_string(), "many".to_string())])
            .is_err());
    }

    #[test]
    fn validation_rejects_degenerate_settings() {
        let mut config = SimilarConfig::default();
        config.index.dimension = 0;
        assert!(config.validate().is_err());

        let mut config = SimilarConfig::default();
        config.search.threshold = f32::NAN;
        assert!(config.validate().is_err());

        let mut config = SimilarConfig::default();
        config.index.leaf_size = 1;
        assert!(config.validate().is_err());
    }

    #[test]
    fn zero_threshold_is_accepted_like_a_query_threshold() {
        let mut config = SimilarConfig::default();
        config.search.threshold = 0.0;
        assert!(config.validate().is_ok());

        config.search.threshold = -0.1;
        assert!(config.validate().is_err());
    }
}
