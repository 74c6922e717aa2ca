// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Application configuration.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{Result, ScanwerkError};
use crate::types::DestinationSettings;

/// Persistent application settings.
///
/// The two controller timeouts default to the values the device family is
/// known to behave well with (30 min destination refresh, 2 min event poll)
/// but both are tunable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Device base URL (e.g. `http://192.168.1.50:8080`); located via mDNS
    /// when absent.
    #[serde(default)]
    pub device_url: Option<String>,
    /// Hostname shown on the device front panel; the local hostname when
    /// absent.
    #[serde(default)]
    pub hostname: Option<String>,
    /// Directory that document batches are written into.
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
    /// Destinations to register on the device.
    #[serde(default)]
    pub destinations: Vec<DestinationSettings>,
    /// Seconds between destination re-registration cycles.
    #[serde(default = "default_registration_interval_secs")]
    pub registration_interval_secs: u64,
    /// Seconds the device is asked to hold an event long poll open
    /// (the wire timeout is ten times this value).
    #[serde(default = "default_event_poll_timeout_secs")]
    pub event_poll_timeout_secs: u64,
    /// Seconds allowed for establishing a TCP connection to the device.
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("scans")
}

fn default_registration_interval_secs() -> u64 {
    30 * 60
}

fn default_event_poll_timeout_secs() -> u64 {
    2 * 60
}

fn default_connect_timeout_secs() -> u64 {
    2
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            device_url: None,
            hostname: None,
            output_dir: default_output_dir(),
            destinations: Vec::new(),
            registration_interval_secs: default_registration_interval_secs(),
            event_poll_timeout_secs: default_event_poll_timeout_secs(),
            connect_timeout_secs: default_connect_timeout_secs(),
        }
    }
}

impl AppConfig {
    /// Load configuration from a JSON file.
    pub fn load(path: &Path) -> Result<Self> {
        let data = std::fs::read_to_string(path)?;
        serde_json::from_str(&data).map_err(|e| {
            ScanwerkError::parse("config.load", format!("{}", path.display()), e)
        })
    }

    /// Persist configuration as pretty-printed JSON.
    pub fn save(&self, path: &Path) -> Result<()> {
        let data = serde_json::to_string_pretty(self)
            .map_err(|e| ScanwerkError::parse("config.save", "serialize", e))?;
        std::fs::write(path, data)?;
        Ok(())
    }

    pub fn registration_interval(&self) -> Duration {
        Duration::from_secs(self.registration_interval_secs)
    }

    pub fn event_poll_timeout(&self) -> Duration {
        Duration::from_secs(self.event_poll_timeout_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}
