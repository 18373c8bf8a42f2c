// Copyright 2025 Chris Custine
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Application configuration management.
//!
//! Configuration is stored as TOML through confy, in the platform config
//! directory unless a path is given on the command line. Every field has a
//! serde default so older or hand-written files keep loading.

use std::path::{Path, PathBuf};
use std::time::Duration;

use flood_client::source::{DEFAULT_BACKEND_URL, DEFAULT_NLWKN_URL, DEFAULT_WSV_URL};
use flood_client::{ControllerConfig, HttpSourceConfig, RuntimeConfig};
use log::info;
use serde::{Deserialize, Serialize};

const APP_NAME: &str = "floodmap";
const CONFIG_NAME: &str = "config";

/// Environment variable that overrides the configured NLWKN API key.
pub const NLWKN_API_KEY_ENV: &str = "NLWKN_API_KEY";

/// Application configuration stored in TOML format
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct AppConfig {
    /// Configuration schema version
    #[serde(default = "default_config_version")]
    pub config_version: u32,

    /// Backend serving the elevation tile API
    #[serde(default = "default_backend_url")]
    pub backend_url: String,

    /// PEGELONLINE REST base URL
    #[serde(default = "default_wsv_url")]
    pub wsv_url: String,

    /// NLWKN REST base URL
    #[serde(default = "default_nlwkn_url")]
    pub nlwkn_url: String,

    /// NLWKN API key (optional, env var takes precedence)
    #[serde(default)]
    pub nlwkn_api_key: Option<String>,

    /// HTTP request timeout in seconds
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    /// Minimum zoom for the terrain and custom layers
    #[serde(default = "default_raster_min_zoom")]
    pub raster_min_zoom: u8,

    /// Minimum zoom for gauge stations
    #[serde(default = "default_stations_min_zoom")]
    pub stations_min_zoom: u8,

    /// Initial water level of the custom layer in metres
    #[serde(default = "default_threshold")]
    pub default_threshold: f64,

    /// Re-check a layer after a fetch if the map moved meanwhile
    #[serde(default)]
    pub catch_up_after_fetch: bool,

    /// Base map used by the `basemaps` command when none is named
    #[serde(default = "default_basemap")]
    pub default_basemap: String,
}

// Default value functions for serde
fn default_config_version() -> u32 {
    1
}

fn default_backend_url() -> String {
    DEFAULT_BACKEND_URL.to_string()
}

fn default_wsv_url() -> String {
    DEFAULT_WSV_URL.to_string()
}

fn default_nlwkn_url() -> String {
    DEFAULT_NLWKN_URL.to_string()
}

fn default_request_timeout_secs() -> u64 {
    30
}

fn default_raster_min_zoom() -> u8 {
    ControllerConfig::default().raster_min_zoom
}

fn default_stations_min_zoom() -> u8 {
    ControllerConfig::default().stations_min_zoom
}

fn default_threshold() -> f64 {
    ControllerConfig::default().default_threshold
}

fn default_basemap() -> String {
    "TopPlusOpen".to_string()
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            config_version: default_config_version(),
            backend_url: default_backend_url(),
            wsv_url: default_wsv_url(),
            nlwkn_url: default_nlwkn_url(),
            nlwkn_api_key: None,
            request_timeout_secs: default_request_timeout_secs(),
            raster_min_zoom: default_raster_min_zoom(),
            stations_min_zoom: default_stations_min_zoom(),
            default_threshold: default_threshold(),
            catch_up_after_fetch: false,
            default_basemap: default_basemap(),
        }
    }
}

impl AppConfig {
    /// Load configuration from the platform config directory
    pub fn load() -> Result<Self, confy::ConfyError> {
        confy::load(APP_NAME, CONFIG_NAME)
    }

    /// Load configuration from an explicit file, creating it if missing
    pub fn load_from(path: &Path) -> Result<Self, confy::ConfyError> {
        info!("Loading configuration from {}", path.display());
        confy::load_path(path)
    }

    /// Save configuration to disk, to `path` or the platform location
    pub fn save(&self, path: Option<&Path>) -> Result<(), confy::ConfyError> {
        match path {
            Some(path) => confy::store_path(path, self),
            None => confy::store(APP_NAME, CONFIG_NAME, self),
        }
    }

    /// Get the config file path for display to user
    pub fn get_config_path() -> Result<PathBuf, confy::ConfyError> {
        confy::get_configuration_file_path(APP_NAME, CONFIG_NAME)
    }

    /// NLWKN key from the environment, falling back to the config file
    #[must_use]
    pub fn resolve_nlwkn_api_key(&self) -> Option<String> {
        resolve_api_key(
            std::env::var(NLWKN_API_KEY_ENV).ok().as_deref(),
            self.nlwkn_api_key.as_deref(),
        )
    }

    #[must_use]
    pub fn http_source_config(&self) -> HttpSourceConfig {
        HttpSourceConfig {
            backend_url: self.backend_url.clone(),
            wsv_url: self.wsv_url.clone(),
            nlwkn_url: self.nlwkn_url.clone(),
            nlwkn_api_key: self.resolve_nlwkn_api_key(),
            timeout: Duration::from_secs(self.request_timeout_secs.max(1)),
        }
    }

    #[must_use]
    pub fn runtime_config(&self) -> RuntimeConfig {
        RuntimeConfig {
            controller: ControllerConfig {
                raster_min_zoom: self.raster_min_zoom,
                stations_min_zoom: self.stations_min_zoom,
                default_threshold: self.default_threshold,
                catch_up_after_fetch: self.catch_up_after_fetch,
            },
            ..RuntimeConfig::default()
        }
    }
}

/// Prefer a non-empty environment value over a non-empty config value.
fn resolve_api_key(env_key: Option<&str>, config_key: Option<&str>) -> Option<String> {
    env_key
        .filter(|key| !key.is_empty())
        .or_else(|| config_key.filter(|key| !key.is_empty()))
        .map(str::to_string)
}
