//! Weather lookups with TTL caching and rate recommendations.

pub mod cache;
pub mod http;

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;

use crate::config::WeatherConfig;
use crate::error::Result;
use crate::rates::{RateCalculator, RateRecommendation, WeatherConditions};

pub use cache::{Expiring, TtlCache};
pub use http::HttpWeatherProvider;

/// API path for the daily forecast.
pub const DAILY_FORECAST_API: &str = "forecast/daily/10day";
/// API path for current observations.
pub const OBSERVATIONS_API: &str = "observations";

/// One weather lookup: which API, where, and in which units / language.
#[derive(Debug, Clone, PartialEq)]
pub struct WeatherQuery {
    pub api: String,
    pub latitude: f64,
    pub longitude: f64,
    pub units: Option<String>,
    pub language: Option<String>,
}

impl WeatherQuery {
    pub fn new(api: impl Into<String>, latitude: f64, longitude: f64) -> Self {
        Self {
            api: api.into(),
            latitude,
            longitude,
            units: None,
            language: None,
        }
    }

    pub fn with_units(mut self, units: Option<String>) -> Self {
        self.units = units;
        self
    }

    pub fn with_language(mut self, language: Option<String>) -> Self {
        self.language = language;
        self
    }

    /// Cache slot: plain concatenation of the present fields, no rounding.
    pub fn cache_key(&self) -> String {
        let mut key = format!("{}{}{}", self.api, self.latitude, self.longitude);
        if let Some(units) = &self.units {
            key.push_str(units);
        }
        if let Some(language) = &self.language {
            key.push_str(language);
        }
        key
    }
}

/// Source of weather payloads.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait WeatherProvider: Send + Sync {
    /// Fetch the payload for `query`. It should carry `expire_time_gmt`.
    async fn fetch(&self, query: &WeatherQuery) -> Result<Value>;
}

/// Cache-through weather access plus rate recommendations.
pub struct WeatherService {
    provider: Arc<dyn WeatherProvider>,
    cache: Mutex<TtlCache<Value>>,
    calculator: RateCalculator,
    units: Option<String>,
    language: Option<String>,
}

impl WeatherService {
    pub fn new(config: &WeatherConfig, provider: Arc<dyn WeatherProvider>, calculator: RateCalculator) -> Self {
        Self {
            provider,
            cache: Mutex::new(TtlCache::new(config.cache_capacity)),
            calculator,
            units: config.units.clone(),
            language: config.language.clone(),
        }
    }

    /// Query for `api` at a location using the configured units and language.
    pub fn query(&self, api: &str, latitude: f64, longitude: f64) -> WeatherQuery {
        WeatherQuery::new(api, latitude, longitude)
            .with_units(self.units.clone())
            .with_language(self.language.clone())
    }

    /// Cached payload if fresh, otherwise fetch and cache. Provider errors
    /// propagate unchanged.
    pub async fn get(&self, query: &WeatherQuery) -> Result<Value> {
        let cached = self.lock().get(query);
        if let Some(hit) = cached {
            debug!(api = %query.api, "Weather cache hit");
            return Ok(hit);
        }
        let payload = self.provider.fetch(query).await?;
        self.lock().put(query, payload.clone());
        Ok(payload)
    }

    pub async fn daily_forecast(&self, latitude: f64, longitude: f64) -> Result<Value> {
        self.get(&self.query(DAILY_FORECAST_API, latitude, longitude))
            .await
    }

    pub async fn observations(&self, latitude: f64, longitude: f64) -> Result<Value> {
        self.get(&self.query(OBSERVATIONS_API, latitude, longitude))
            .await
    }

    /// Recommend today's hourly rate at a location.
    pub async fn recommend_rate(&self, latitude: f64, longitude: f64) -> Result<RateRecommendation> {
        let forecast = self.daily_forecast(latitude, longitude).await?;
        let conditions = WeatherConditions::from_forecast(&forecast, 0)?;
        Ok(self.calculator.recommend(&conditions))
    }

    pub fn clear_cache(&self) {
        self.lock().clear();
    }

    pub fn cached_entries(&self) -> usize {
        self.lock().len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, TtlCache<Value>> {
        self.cache.lock().expect("weather cache lock poisoned")
    }
}
