//! User-configurable settings for tafil.
//!
//! Settings are resolved in order of precedence:
//! 1. Environment variables (`TAFIL_NPM`, `TAFIL_DETECT_TIMEOUT`)
//! 2. User-level `~/.config/tafil/config.toml`
//! 3. Built-in defaults
//!
//! Example config.toml:
//! ```toml
//! [detect]
//! timeout = "5s"
//! buffer_bytes = 16384
//!
//! [stop]
//! grace = "3s"
//!
//! [launch]
//! npm = "/opt/homebrew/bin/npm"
//!
//! [ports.defaults]
//! vite = 5200
//! ```

use crate::error::{ConfigParseError, FileError};
use crate::project_type::Framework;
use crate::{Result, env};
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::ops::RangeInclusive;
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Settings {
    pub ports: PortSettings,
    pub detect: DetectSettings,
    pub stop: StopSettings,
    pub launch: LaunchSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PortSettings {
    /// Delay after releasing a probe socket before reporting the port free
    pub settle: String,
    /// How many ports above the default to try when the default is lost to a race
    pub fallback_attempts: u16,
    /// Upper bound for any single external process lookup
    pub probe_timeout: String,
    /// Port band scanned for external dev servers
    pub external_range_start: u16,
    pub external_range_end: u16,
    /// Per-framework replacements for the built-in default ports, keyed by
    /// framework name (`vite = 5200`)
    pub defaults: BTreeMap<Framework, u16>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DetectSettings {
    pub timeout: String,
    /// Used for frameworks known to boot slowly (create-react-app)
    pub slow_timeout: String,
    /// Size of the rolling output window used for multi-line prompt detection
    pub buffer_bytes: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct StopSettings {
    /// Time between the graceful signal and the forceful kill
    pub grace: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LaunchSettings {
    pub npm: Option<String>,
    /// Source ~/.bashrc or ~/.zshrc before running the start script
    pub source_shell_profile: bool,
}

impl Default for PortSettings {
    fn default() -> Self {
        Self {
            settle: "50ms".to_string(),
            fallback_attempts: 100,
            probe_timeout: "2s".to_string(),
            external_range_start: 3000,
            external_range_end: 9000,
            defaults: BTreeMap::new(),
        }
    }
}

impl Default for DetectSettings {
    fn default() -> Self {
        Self {
            timeout: "3s".to_string(),
            slow_timeout: "10s".to_string(),
            buffer_bytes: 8 * 1024,
        }
    }
}

impl Default for StopSettings {
    fn default() -> Self {
        Self {
            grace: "5s".to_string(),
        }
    }
}

impl Default for LaunchSettings {
    fn default() -> Self {
        Self {
            npm: None,
            source_shell_profile: true,
        }
    }
}

static SETTINGS: Lazy<Settings> = Lazy::new(|| {
    Settings::load().unwrap_or_else(|e| {
        warn!("Could not load settings: {e}, using defaults");
        Settings::default().with_env_overrides()
    })
});

impl Settings {
    pub fn get() -> &'static Self {
        &SETTINGS
    }

    /// Read the user config file (if any) and apply environment overrides.
    pub fn load() -> Result<Self> {
        let settings = Self::read(&env::TAFIL_CONFIG_FILE)?;
        Ok(settings.with_env_overrides())
    }

    pub fn read(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let raw = std::fs::read_to_string(path).map_err(|source| FileError::ReadError {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(path, raw)
    }

    pub fn from_toml(path: &Path, raw: String) -> Result<Self> {
        match toml::from_str(&raw) {
            Ok(settings) => Ok(settings),
            Err(err) => Err(ConfigParseError::from_toml_error(path, raw, err).into()),
        }
    }

    pub fn with_env_overrides(mut self) -> Self {
        if let Some(npm) = env::TAFIL_NPM.as_ref() {
            self.launch.npm = Some(npm.clone());
        }
        if let Some(timeout) = env::TAFIL_DETECT_TIMEOUT.as_ref() {
            self.detect.timeout = timeout.clone();
        }
        self
    }

    /// Parse a humantime duration string such as `"500ms"` or `"3s"`.
    pub fn parse_duration(s: &str) -> Option<Duration> {
        humantime::parse_duration(s.trim()).ok()
    }

    fn duration_or(s: &str, default: Duration, name: &str) -> Duration {
        Self::parse_duration(s).unwrap_or_else(|| {
            warn!("invalid duration for {name}: {s:?}, using {default:?}");
            default
        })
    }

    pub fn port_settle(&self) -> Duration {
        Self::duration_or(&self.ports.settle, Duration::from_millis(50), "ports.settle")
    }

    pub fn probe_timeout(&self) -> Duration {
        Self::duration_or(
            &self.ports.probe_timeout,
            Duration::from_secs(2),
            "ports.probe_timeout",
        )
    }

    pub fn external_port_range(&self) -> RangeInclusive<u16> {
        self.ports.external_range_start..=self.ports.external_range_end
    }

    /// Port a project is started on when the caller does not pick one.
    pub fn default_port(&self, framework: Framework) -> u16 {
        self.ports
            .defaults
            .get(&framework)
            .copied()
            .unwrap_or_else(|| framework.default_port())
    }

    pub fn detect_timeout(&self, slow: bool) -> Duration {
        if slow {
            Self::duration_or(
                &self.detect.slow_timeout,
                Duration::from_secs(10),
                "detect.slow_timeout",
            )
        } else {
            Self::duration_or(&self.detect.timeout, Duration::from_secs(3), "detect.timeout")
        }
    }

    pub fn stop_grace(&self) -> Duration {
        Self::duration_or(&self.stop.grace, Duration::from_secs(5), "stop.grace")
    }
}
