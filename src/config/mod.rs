//! Configuration file management
//!
//! Loads the device-capability TOML file (resolution window, logical
//! plane names, hotplug polling).
//! Default config path: ~/.config/kmsres/config.toml

use anyhow::{Context, Result};
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::constants::HOTPLUG_POLL_INTERVAL_MS;
use crate::geometry::Resolution;

/// Application settings
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Display capability settings
    pub display: DisplayConfig,
    /// Hotplug settings
    pub hotplug: HotplugConfig,
}

/// Display capability settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DisplayConfig {
    /// Smallest resolution handed to the video layer
    pub min_resolution: Resolution,
    /// Largest resolution handed to the video layer.
    /// Also the initial target resolution of every CRTC.
    pub max_resolution: Resolution,
    /// Logical plane names exposed by the video layer
    pub plane_names: Vec<String>,
}

impl DisplayConfig {
    /// Logical name of the plane at `index` in discovery order
    pub fn plane_name(&self, index: usize) -> Option<&str> {
        self.plane_names.get(index).map(String::as_str)
    }
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self {
            min_resolution: Resolution::new(640, 480),
            max_resolution: Resolution::new(1920, 1080),
            plane_names: vec!["MAIN".to_string(), "SUB".to_string()],
        }
    }
}

/// Hotplug settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HotplugConfig {
    /// Watch udev for card and monitor changes
    pub enabled: bool,
    /// Poll interval of the watch loop in milliseconds
    pub poll_interval_ms: u64,
}

impl Default for HotplugConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            poll_interval_ms: HOTPLUG_POLL_INTERVAL_MS,
        }
    }
}

impl HotplugConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }
}

impl Config {
    /// System-wide config path
    const SYSTEM_CONFIG_PATH: &'static str = "/etc/kmsres/config.toml";

    /// Get the path that would be used for loading config
    ///
    /// Returns None if using built-in defaults
    pub fn config_path() -> Option<PathBuf> {
        // 1. KMSRES_CONFIG environment variable
        if let Ok(path) = std::env::var("KMSRES_CONFIG") {
            let p = Path::new(&path);
            if p.exists() {
                return Some(p.to_path_buf());
            }
        }

        // 2. User config: ~/.config/kmsres/config.toml
        if let Some(config_dir) = dirs::config_dir() {
            let config_path = config_dir.join("kmsres").join("config.toml");
            if config_path.exists() {
                return Some(config_path);
            }
        }

        // 3. System config: /etc/kmsres/config.toml
        let system_config = Path::new(Self::SYSTEM_CONFIG_PATH);
        if system_config.exists() {
            return Some(system_config.to_path_buf());
        }

        None
    }

    /// Load configuration with priority:
    /// 1. KMSRES_CONFIG environment variable
    /// 2. ~/.config/kmsres/config.toml (user config)
    /// 3. /etc/kmsres/config.toml (system config)
    /// 4. Built-in defaults
    pub fn load() -> Self {
        if let Some(path) = Self::config_path() {
            match Self::load_from_file(&path) {
                Ok(config) => {
                    info!("Loaded config: {}", path.display());
                    return config;
                }
                Err(e) => {
                    warn!("Failed to load config {}: {:#}", path.display(), e);
                }
            }
        }
        info!("Using built-in default config");
        Self::default()
    }

    /// Load settings from specified path
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        Self::parse(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    fn parse(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content)?;
        if config.display.min_resolution.width > config.display.max_resolution.width
            || config.display.min_resolution.height > config.display.max_resolution.height
        {
            warn!(
                "min_resolution {} exceeds max_resolution {}",
                config.display.min_resolution, config.display.max_resolution
            );
        }
        Ok(config)
    }

    /// Check a resolution against the configured window (inclusive)
    pub fn is_valid_mode(&self, size: Resolution) -> bool {
        let min = self.display.min_resolution;
        let max = self.display.max_resolution;
        size.width <= max.width
            && size.height <= max.height
            && size.width >= min.width
            && size.height >= min.height
    }
}
