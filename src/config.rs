//! Optional TOML configuration
//!
//! Provides defaults that CLI flags override. Looked up at
//! `~/.config/lapse/config.toml` unless a path is given (`--config` or
//! `$LAPSE_CONFIG`); a missing default file simply yields the built-in
//! defaults, but an explicitly named file must exist and parse.

use std::path::{Path, PathBuf};

use serde::Deserialize;
use tracing::debug;

use crate::domain::model::{QualityTier, ResolutionPreset};
use crate::domain::rules::StrategyPolicy;
use crate::error::{LapseError, LapseResult};

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LapseConfig {
    /// Default quality tier for exports
    pub quality: Option<QualityTier>,
    /// Default resolution preset
    pub resolution: Option<ResolutionPreset>,
    /// Default audio inclusion
    pub include_audio: Option<bool>,
    /// Which fast path the selector prefers
    pub strategy_policy: Option<StrategyPolicy>,
    /// Directory for derived output paths
    pub output_dir: Option<PathBuf>,
    /// Replace existing output files without requiring --overwrite
    pub overwrite: Option<bool>,
}

impl LapseConfig {
    /// Load configuration, preferring an explicitly named file.
    pub fn load(explicit: Option<&Path>) -> LapseResult<Self> {
        if let Some(path) = explicit {
            if !path.exists() {
                return Err(LapseError::Config {
                    message: format!("config file not found: {}", path.display()),
                });
            }
            return Self::parse_file(path);
        }

        if let Some(path) = Self::default_path() {
            if path.exists() {
                debug!(path = %path.display(), "loading configuration");
                return Self::parse_file(&path);
            }
        }

        Ok(Self::default())
    }

    fn parse_file(path: &Path) -> LapseResult<Self> {
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content).map_err(|e| LapseError::Config {
            message: format!("{}: {e}", path.display()),
        })
    }

    fn default_path() -> Option<PathBuf> {
        std::env::var_os("HOME")
            .map(|home| PathBuf::from(home).join(".config").join("lapse").join("config.toml"))
    }
}
