//! REST client for a Weather Company style geocode API.
//!
//! Requests look like
//! `{base}/v1/geocode/{lat}/{lng}/{api}.json?units=m&language=en-US&apiKey=...`
//! and responses carry `metadata.expire_time_gmt`.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;
use tracing::debug;

use crate::config::WeatherConfig;
use crate::error::{FleetError, Result};

use super::{WeatherProvider, WeatherQuery};

/// HTTP-backed [`WeatherProvider`].
pub struct HttpWeatherProvider {
    client: Client,
    base_url: String,
    api_key: Option<String>,
}

impl std::fmt::Debug for HttpWeatherProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpWeatherProvider")
            .field("base_url", &self.base_url)
            .field("api_key", &self.api_key.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}

impl HttpWeatherProvider {
    pub fn new(config: &WeatherConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| FleetError::Config(format!("cannot build HTTP client: {}", e)))?;
        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone().filter(|k| !k.is_empty()),
        })
    }

    fn url(&self, query: &WeatherQuery) -> String {
        format!(
            "{}/v1/geocode/{}/{}/{}.json",
            self.base_url, query.latitude, query.longitude, query.api
        )
    }

    fn params(&self, query: &WeatherQuery) -> Vec<(&'static str, String)> {
        let mut params = Vec::new();
        if let Some(units) = &query.units {
            params.push(("units", units.clone()));
        }
        if let Some(language) = &query.language {
            params.push(("language", language.clone()));
        }
        if let Some(key) = &self.api_key {
            params.push(("apiKey", key.clone()));
        }
        params
    }
}

#[async_trait]
impl WeatherProvider for HttpWeatherProvider {
    async fn fetch(&self, query: &WeatherQuery) -> Result<Value> {
        let url = self.url(query);
        debug!(url = %url, "Weather request");

        let response = self
            .client
            .get(&url)
            .query(&self.params(query))
            .send()
            .await
            .map_err(|e| FleetError::Weather(format!("request failed: {}", e)))?;

        let status = response.status();
        if status.is_success() {
            return response
                .json()
                .await
                .map_err(|e| FleetError::Weather(format!("invalid response: {}", e)));
        }

        let body = response.text().await.unwrap_or_default();
        Err(FleetError::Weather(error_message(status.as_u16(), &body)))
    }
}

/// Pull a readable message out of an error body.
fn error_message(status: u16, body: &str) -> String {
    let detail = serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| {
            v.pointer("/errors/0/error/message")
                .or_else(|| v.pointer("/metadata/message"))
                .and_then(Value::as_str)
                .map(String::from)
        })
        .unwrap_or_else(|| body.trim().to_string());
    format!("HTTP {}: {}", status, detail)
}
