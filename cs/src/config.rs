//! Configuration for contextstore

use eyre::Result;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Path to the taskstore-backed archival store directory.
    pub store_path: PathBuf,

    /// Minimum cosine similarity (or lexical rank) for a search hit to
    /// survive.
    pub similarity_threshold: f64,

    /// Confidence a pattern needs before it's eligible for global
    /// promotion.
    pub min_pattern_confidence: f64,

    /// Importance score an archival row needs before it's eligible for
    /// global promotion. Tracked independently of pattern confidence —
    /// the two promotion paths never gate each other.
    pub min_importance: f64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            store_path: default_store_path(),
            similarity_threshold: crate::archival::DEFAULT_SIMILARITY_THRESHOLD,
            min_pattern_confidence: crate::pattern::DEFAULT_MIN_CONFIDENCE,
            min_importance: 0.7,
        }
    }
}

fn default_store_path() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("contextstore")
}

impl Config {
    /// Load config from file, or use defaults.
    pub fn load(path: Option<&PathBuf>) -> Result<Self> {
        if let Some(config_path) = path {
            let content = std::fs::read_to_string(config_path)?;
            let config: Config = serde_yaml::from_str(&content)?;
            return Ok(config);
        }

        let default_paths = [
            dirs::config_dir().map(|p| p.join("contextstore").join("config.yml")),
            Some(PathBuf::from("contextstore.yml")),
        ];

        for path in default_paths.iter().flatten() {
            if path.exists() {
                let content = std::fs::read_to_string(path)?;
                let config: Config = serde_yaml::from_str(&content)?;
                return Ok(config);
            }
        }

        Ok(Config::default())
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let content = serde_yaml::to_string(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_thresholds_match_spec() {
        let c = Config::default();
        assert_eq!(c.similarity_threshold, 0.7);
        assert_eq!(c.min_pattern_confidence, 0.7);
    }
}
