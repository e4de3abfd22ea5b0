use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{Level as TraceLevel, info, warn};

use crate::constants::config::{APP_DIR, DISPLAY_ENV, FILENAME, LOG_LEVEL_ENV, LOG_LEVELS};
use crate::layout::Zone;
use crate::topology::ControllerReuse;

/// Map a log level name to a tracing level; anything unknown is info
pub fn level_from_name(name: &str) -> TraceLevel {
    match name.trim().to_lowercase().as_str() {
        "trace" => TraceLevel::TRACE,
        "debug" => TraceLevel::DEBUG,
        "warn" => TraceLevel::WARN,
        "error" => TraceLevel::ERROR,
        _ => TraceLevel::INFO,
    }
}

/// Level to log at before config.toml has been read, from $LOG_LEVEL only
pub fn bootstrap_level() -> TraceLevel {
    env::var(LOG_LEVEL_ENV)
        .map(|name| level_from_name(&name))
        .unwrap_or(TraceLevel::INFO)
}

/// User settings from config.toml. Describes how the tool behaves, never the
/// display layout itself.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub log_level: String,

    /// X display to connect to; unset means $DISPLAY
    pub display: Option<String>,

    /// Let an output take over the first controller when none is idle
    pub allow_controller_reuse: bool,

    /// Zone for outputs switched on from the command line without a position
    pub default_zone: Zone,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            display: None,
            allow_controller_reuse: true,
            default_zone: Zone::Center,
        }
    }
}

impl Settings {
    pub fn config_path() -> PathBuf {
        let mut path = dirs::config_dir().unwrap_or_else(|| PathBuf::from("."));
        path.push(APP_DIR);
        path.push(FILENAME);
        path
    }

    /// Load from the default location with env overrides applied
    pub fn load() -> Result<Self> {
        let mut settings = Self::load_from(&Self::config_path())?;
        settings.apply_env_overrides();
        settings.validate_and_clamp();
        Ok(settings)
    }

    /// Read `path`; a missing file yields defaults
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            info!(path = %path.display(), "no config file, using defaults");
            return Ok(Self::default());
        }
        let contents = fs::read_to_string(path)
            .context(format!("Failed to read config file {}", path.display()))?;
        let mut settings: Settings = toml::from_str(&contents)
            .context(format!("Failed to parse config file {}", path.display()))?;
        settings.validate_and_clamp();
        Ok(settings)
    }

    fn apply_env_overrides(&mut self) {
        self.apply_overrides(|var| env::var(var).ok());
    }

    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(level) = lookup(LOG_LEVEL_ENV) {
            self.log_level = level;
        }
        if let Some(display) = lookup(DISPLAY_ENV) {
            self.display = Some(display);
        }
    }

    /// Normalise values read from TOML or the environment
    fn validate_and_clamp(&mut self) {
        let level = self.log_level.trim().to_lowercase();
        if LOG_LEVELS.contains(&level.as_str()) {
            self.log_level = level;
        } else {
            warn!(log_level = %self.log_level, using = "info", "unknown log level");
            self.log_level = "info".to_string();
        }

        if self.display.as_deref().is_some_and(|d| d.trim().is_empty()) {
            self.display = None;
        }
    }

    pub fn trace_level(&self) -> TraceLevel {
        level_from_name(&self.log_level)
    }

    pub fn controller_reuse(&self) -> ControllerReuse {
        if self.allow_controller_reuse {
            ControllerReuse::Allow
        } else {
            ControllerReuse::Deny
        }
    }
}
