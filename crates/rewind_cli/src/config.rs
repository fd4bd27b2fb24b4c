//! Rewind configuration file handling

use anyhow::{Context, Result};
use rewind_replay::ReplayConfig;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Default config file name, looked up in the working directory.
pub const CONFIG_FILE: &str = "rewind.toml";

/// Top-level CLI configuration (rewind.toml)
///
/// The `[playback]`, `[correlation]` and `[offload]` tables map onto
/// [`ReplayConfig`]; `[output]` only affects how results are printed.
#[derive(Debug, Default, Deserialize, Serialize)]
pub struct RewindConfig {
    #[serde(flatten)]
    pub replay: ReplayConfig,
    #[serde(default)]
    pub output: OutputConfig,
}

/// Output formatting
#[derive(Debug, Deserialize, Serialize)]
pub struct OutputConfig {
    /// Pretty-print JSON output
    #[serde(default = "default_true")]
    pub pretty: bool,
}

fn default_true() -> bool {
    true
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self { pretty: true }
    }
}

impl RewindConfig {
    /// Load configuration.
    ///
    /// An explicit path must exist. Without one, `rewind.toml` in the working
    /// directory is used when present and defaults otherwise.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        match explicit {
            Some(path) => {
                if !path.exists() {
                    anyhow::bail!("Config file {} does not exist", path.display());
                }
                Self::load_file(path)
            }
            None => {
                let path = Path::new(CONFIG_FILE);
                if path.exists() {
                    Self::load_file(path)
                } else {
                    tracing::debug!("no {CONFIG_FILE} found, using defaults");
                    Ok(Self::default())
                }
            }
        }
    }

    fn load_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let config = Self::from_toml(&content)
            .with_context(|| format!("Failed to parse {}", path.display()))?;
        tracing::debug!(path = %path.display(), "loaded config");
        Ok(config)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Serialize to TOML string
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("Failed to serialize config")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn partial_file_keeps_defaults() {
        let config = RewindConfig::from_toml(
            r#"
            [playback]
            initial_speed = 2.0

            [correlation]
            lookback_ms = 3000.0

            [output]
            pretty = false
            "#,
        )
        .unwrap();

        assert_eq!(config.replay.playback.initial_speed, 2.0);
        assert_eq!(config.replay.playback.tick_interval_ms, 16.0);
        assert_eq!(config.replay.correlation.lookback_ms, 3_000.0);
        assert_eq!(config.replay.correlation.max_path_len, 10);
        assert!(config.replay.offload.use_worker);
        assert!(!config.output.pretty);
    }

    #[test]
    fn empty_file_is_default() {
        let config = RewindConfig::from_toml("").unwrap();
        assert_eq!(config.replay, ReplayConfig::default());
        assert!(config.output.pretty);
    }

    #[test]
    fn serialized_config_reloads() {
        let mut config = RewindConfig::default();
        config.replay.offload.node_threshold = 50;
        let reloaded = RewindConfig::from_toml(&config.to_toml().unwrap()).unwrap();
        assert_eq!(reloaded.replay, config.replay);
    }

    #[test]
    fn missing_explicit_path_fails() {
        let err = RewindConfig::load(Some(Path::new("/nonexistent/rewind.toml"))).unwrap_err();
        assert!(err.to_string().contains("does not exist"));
    }
}
