//! Weather and rate command handlers.

use std::sync::Arc;

use anyhow::{Context, Result};

use fleetshare::config::Config;
use fleetshare::rates::RateCalculator;
use fleetshare::weather::{HttpWeatherProvider, WeatherService};

fn service(config: &Config) -> Result<WeatherService> {
    let provider = HttpWeatherProvider::new(&config.weather)?;
    Ok(WeatherService::new(
        &config.weather,
        Arc::new(provider),
        RateCalculator::new(config.rates.clone()),
    ))
}

/// Handle `fleetshare weather`.
pub(crate) async fn cmd_weather(config: &Config, api: &str, lat: f64, lng: f64) -> Result<()> {
    let svc = service(config)?;
    let payload = svc
        .get(&svc.query(api, lat, lng))
        .await
        .with_context(|| format!("weather lookup failed for {},{}", lat, lng))?;
    println!("{}", serde_json::to_string_pretty(&payload)?);
    Ok(())
}

/// Handle `fleetshare rate`.
pub(crate) async fn cmd_rate(config: &Config, lat: f64, lng: f64) -> Result<()> {
    let svc = service(config)?;
    let rec = svc
        .recommend_rate(lat, lng)
        .await
        .with_context(|| format!("rate recommendation failed for {},{}", lat, lng))?;

    println!("Base rate:        {:.2}/h", rec.base_hourly);
    println!("Recommended rate: {:.2}/h", rec.hourly);
    for adj in &rec.adjustments {
        println!("  {:+.0}%  {}", adj.factor * 100.0, adj.reason);
    }
    Ok(())
}
