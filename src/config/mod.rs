//! Configuration for fleetshare.
//!
//! Loaded from `~/.fleetshare/config.json`; every field has a default so an
//! absent file or a partial one is fine. `FLEETSHARE_*` environment variables
//! override file values (see [`Config::apply_env_overrides`]).

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{FleetError, Result};

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub allocator: AllocatorConfig,
    pub persistence: PersistenceConfig,
    pub weather: WeatherConfig,
    pub rates: RatesConfig,
    pub registrar: RegistrarConfig,
}

/// Device allocation cache tuning.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AllocatorConfig {
    /// Registrar type id used for simulated vehicles.
    pub simulator_type_id: String,
    /// Archetype guid keying the simulator free pool.
    pub simulator_type_guid: String,
    /// Upper bound on devices requested from the registrar per call.
    pub max_create_per_call: usize,
    /// Delay after forcing a disconnect on reused devices.
    pub reuse_settle_ms: u64,
    /// Spread of the within-batch ordering offset.
    pub history_window_ms: i64,
    /// Reuse candidates considered per requested device.
    pub reuse_candidate_factor: usize,
}

impl Default for AllocatorConfig {
    fn default() -> Self {
        Self {
            simulator_type_id: "CarSimulator".into(),
            simulator_type_guid: "car-simulator-archetype".into(),
            max_create_per_call: 30,
            reuse_settle_ms: 1000,
            history_window_ms: 10 * 60 * 1000,
            reuse_candidate_factor: 3,
        }
    }
}

/// Roster persistence settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PersistenceConfig {
    /// Directory for the JSON document store. `None` means `~/.fleetshare/db`.
    pub data_dir: Option<PathBuf>,
    /// Document id the roster is written under.
    pub roster_doc_id: String,
    /// Total write attempts per save request.
    pub max_attempts: u32,
    /// Fixed delay between attempts.
    pub backoff_secs: u64,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            data_dir: None,
            roster_doc_id: "simulated_devices".into(),
            max_attempts: 3,
            backoff_secs: 120,
        }
    }
}

impl PersistenceConfig {
    /// Resolved data directory.
    pub fn data_dir(&self) -> PathBuf {
        self.data_dir
            .clone()
            .unwrap_or_else(|| Config::dir().join("db"))
    }
}

/// Weather provider and cache settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WeatherConfig {
    pub base_url: String,
    pub api_key: Option<String>,
    pub units: Option<String>,
    pub language: Option<String>,
    pub cache_capacity: usize,
    pub timeout_secs: u64,
}

impl Default for WeatherConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.weather.com".into(),
            api_key: None,
            units: Some("m".into()),
            language: Some("en-US".into()),
            cache_capacity: 100,
            timeout_secs: 30,
        }
    }
}

/// Dynamic rate rules.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RatesConfig {
    /// Hourly base rate in the fleet's currency.
    pub base_hourly: f64,
    /// Precipitation chance (percent) at which the rain surcharge applies.
    pub rain_threshold_pct: u32,
    pub rain_surcharge: f64,
    pub snow_surcharge: f64,
    pub temperature_surcharge: f64,
    /// Comfort band in degrees Celsius; outside it the temperature surcharge applies.
    pub comfort_min_c: f64,
    pub comfort_max_c: f64,
    pub fair_weather_discount: f64,
}

impl Default for RatesConfig {
    fn default() -> Self {
        Self {
            base_hourly: 12.0,
            rain_threshold_pct: 50,
            rain_surcharge: 0.20,
            snow_surcharge: 0.30,
            temperature_surcharge: 0.10,
            comfort_min_c: 5.0,
            comfort_max_c: 30.0,
            fair_weather_discount: 0.10,
        }
    }
}

/// Simulated registrar settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistrarConfig {
    /// Organization id stamped into device credentials.
    pub org: String,
    /// Total devices the simulated registrar will provision before refusing.
    pub device_quota: usize,
}

impl Default for RegistrarConfig {
    fn default() -> Self {
        Self {
            org: "demo-org".into(),
            device_quota: 50,
        }
    }
}

impl Config {
    /// Base directory: `~/.fleetshare`.
    pub fn dir() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".fleetshare")
    }

    /// Default config file path.
    pub fn path() -> PathBuf {
        Self::dir().join("config.json")
    }

    /// Load from the default path, then apply environment overrides.
    pub fn load() -> Result<Self> {
        let mut config = Self::load_from_path(&Self::path())?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Load from `path`. A missing file yields the defaults.
    pub fn load_from_path(path: &Path) -> Result<Self> {
        let data = match std::fs::read_to_string(path) {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "No config file, using defaults");
                return Ok(Self::default());
            }
            Err(e) => return Err(e.into()),
        };
        let config: Self = serde_json::from_str(&data)
            .map_err(|e| FleetError::Config(format!("{}: {}", path.display(), e)))?;
        Ok(config)
    }

    /// Apply `FLEETSHARE_*` environment overrides.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(v) = lookup("FLEETSHARE_WEATHER_URL") {
            self.weather.base_url = v;
        }
        if let Some(v) = lookup("FLEETSHARE_WEATHER_API_KEY") {
            self.weather.api_key = Some(v);
        }
        if let Some(v) = lookup("FLEETSHARE_DATA_DIR") {
            self.persistence.data_dir = Some(PathBuf::from(v));
        }
        if let Some(v) = lookup("FLEETSHARE_DEVICE_QUOTA").and_then(|v| v.parse().ok()) {
            self.registrar.device_quota = v;
        }
        if let Some(v) = lookup("FLEETSHARE_BASE_RATE").and_then(|v| v.parse().ok()) {
            self.rates.base_hourly = v;
        }
    }

    /// Reject values that would make the caches or retry loop misbehave.
    pub fn validate(&self) -> Result<()> {
        if self.weather.cache_capacity == 0 {
            return Err(FleetError::Config(
                "weather.cache_capacity must be at least 1".into(),
            ));
        }
        if self.persistence.max_attempts == 0 {
            return Err(FleetError::Config(
                "persistence.max_attempts must be at least 1".into(),
            ));
        }
        if self.allocator.max_create_per_call == 0 {
            return Err(FleetError::Config(
                "allocator.max_create_per_call must be at least 1".into(),
            ));
        }
        if self.rates.comfort_min_c > self.rates.comfort_max_c {
            return Err(FleetError::Config(
                "rates.comfort_min_c exceeds rates.comfort_max_c".into(),
            ));
        }
        Ok(())
    }
}
