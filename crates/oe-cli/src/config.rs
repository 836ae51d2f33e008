//! Configuration loading and management.

use std::path::{Path, PathBuf};

use figment::Figment;
use figment::providers::{Env, Format, Serialized, Toml};
use serde::{Deserialize, Serialize};

/// Application configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Streams dropped when merging manifests, matched against `folder_name`.
    pub exclude_streams: Vec<String>,

    /// Recording roots smaller than this are not listed.
    pub min_size_gb: Option<f64>,

    /// Only validate the largest recording below each root.
    pub ignore_small_folders: bool,

    /// Keep validating other recordings after one fails.
    pub keep_going: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            exclude_streams: Vec::new(),
            min_size_gb: None,
            ignore_small_folders: true,
            keep_going: false,
        }
    }
}

impl Config {
    /// Loads configuration, optionally from a specific file.
    #[expect(
        clippy::result_large_err,
        reason = "figment::Error is large but only returned at startup"
    )]
    pub fn load_from(config_path: Option<&Path>) -> Result<Self, figment::Error> {
        let mut figment = Figment::from(Serialized::defaults(Self::default()));

        if let Some(config_dir) = dirs_config_path() {
            figment = figment.merge(Toml::file(config_dir.join("config.toml")));
        }

        if let Some(path) = config_path {
            figment = figment.merge(Toml::file(path));
        }

        // OE_MIN_SIZE_GB, OE_KEEP_GOING, ...
        figment = figment.merge(Env::prefixed("OE_"));

        figment.extract()
    }
}

/// Returns the platform-specific config directory for oe.
///
/// On Linux: `~/.config/oe`
pub fn dirs_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|p| p.join("oe"))
}
