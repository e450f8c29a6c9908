//! Weather-driven rental rate recommendations.
//!
//! Bad weather pushes demand for cars up, so rain, snow and uncomfortable
//! temperatures each add a surcharge to the base hourly rate. A day with
//! none of those gets the fair-weather discount instead.
//!
//! # Example
//!
//! ```rust
//! use fleetshare::config::RatesConfig;
//! use fleetshare::rates::{RateCalculator, WeatherConditions};
//!
//! let calc = RateCalculator::new(RatesConfig::default());
//! let rainy = WeatherConditions {
//!     precip_chance_pct: 90,
//!     snow_amount: 0.0,
//!     temperature_c: Some(15.0),
//!     narrative: None,
//! };
//! let rec = calc.recommend(&rainy);
//! assert!(rec.hourly > rec.base_hourly);
//! ```

use serde::Serialize;
use serde_json::Value;

use crate::config::RatesConfig;
use crate::error::{FleetError, Result};

/// The parts of a forecast the rate rules look at.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WeatherConditions {
    /// Chance of precipitation, 0–100.
    pub precip_chance_pct: u32,
    /// Forecast snow accumulation; any positive value counts.
    pub snow_amount: f64,
    /// Temperature in degrees Celsius, if the forecast has one.
    pub temperature_c: Option<f64>,
    pub narrative: Option<String>,
}

impl WeatherConditions {
    /// Read conditions for `day` (0 = today) from a daily forecast payload.
    ///
    /// Uses the daytime part when present and the night part otherwise,
    /// since forecasts issued late in the day drop the daytime block.
    /// Imperial payloads (`metadata.units == "e"`) are converted to Celsius.
    pub fn from_forecast(payload: &Value, day: usize) -> Result<Self> {
        let forecast = payload
            .get("forecasts")
            .and_then(Value::as_array)
            .and_then(|days| days.get(day))
            .ok_or_else(|| FleetError::Weather(format!("forecast has no day {}", day)))?;

        let part = ["day", "night"]
            .iter()
            .map(|p| &forecast[*p])
            .find(|p| p.is_object())
            .unwrap_or(&Value::Null);

        let imperial = payload.pointer("/metadata/units").and_then(Value::as_str) == Some("e");
        let temperature_c = part
            .get("temp")
            .and_then(Value::as_f64)
            .or_else(|| forecast.get("max_temp").and_then(Value::as_f64))
            .map(|t| if imperial { (t - 32.0) * 5.0 / 9.0 } else { t });

        Ok(Self {
            precip_chance_pct: part
                .get("pop")
                .and_then(Value::as_u64)
                .map(|p| p.min(100) as u32)
                .unwrap_or(0),
            snow_amount: forecast
                .get("snow_qpf")
                .and_then(Value::as_f64)
                .unwrap_or(0.0),
            temperature_c,
            narrative: forecast
                .get("narrative")
                .and_then(Value::as_str)
                .map(String::from),
        })
    }
}

/// One rule that fired.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RateAdjustment {
    pub reason: String,
    /// Fraction of the base rate; negative for discounts.
    pub factor: f64,
}

/// Recommended hourly rate and the rules behind it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RateRecommendation {
    pub base_hourly: f64,
    pub hourly: f64,
    pub adjustments: Vec<RateAdjustment>,
}

/// Applies [`RatesConfig`] rules to forecast conditions.
#[derive(Debug, Clone)]
pub struct RateCalculator {
    config: RatesConfig,
}

impl RateCalculator {
    pub fn new(config: RatesConfig) -> Self {
        Self { config }
    }

    pub fn recommend(&self, conditions: &WeatherConditions) -> RateRecommendation {
        let cfg = &self.config;
        let mut adjustments = Vec::new();

        if conditions.precip_chance_pct >= cfg.rain_threshold_pct {
            adjustments.push(RateAdjustment {
                reason: format!("{}% chance of precipitation", conditions.precip_chance_pct),
                factor: cfg.rain_surcharge,
            });
        }
        if conditions.snow_amount > 0.0 {
            adjustments.push(RateAdjustment {
                reason: format!("snow expected ({})", conditions.snow_amount),
                factor: cfg.snow_surcharge,
            });
        }
        if let Some(t) = conditions.temperature_c {
            if t < cfg.comfort_min_c || t > cfg.comfort_max_c {
                adjustments.push(RateAdjustment {
                    reason: format!("temperature {:.0}°C", t),
                    factor: cfg.temperature_surcharge,
                });
            }
        }
        if adjustments.is_empty() && cfg.fair_weather_discount > 0.0 {
            adjustments.push(RateAdjustment {
                reason: "fair weather".into(),
                factor: -cfg.fair_weather_discount,
            });
        }

        let factor: f64 = 1.0 + adjustments.iter().map(|a| a.factor).sum::<f64>();
        RateRecommendation {
            base_hourly: cfg.base_hourly,
            hourly: round_cents(cfg.base_hourly * factor.max(0.0)),
            adjustments,
        }
    }
}

fn round_cents(amount: f64) -> f64 {
    (amount * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn calc() -> RateCalculator {
        RateCalculator::new(RatesConfig::default())
    }

    fn conditions(pop: u32, snow: f64, temp: Option<f64>) -> WeatherConditions {
        WeatherConditions {
            precip_chance_pct: pop,
            snow_amount: snow,
            temperature_c: temp,
            narrative: None,
        }
    }

    #[test]
    fn test_fair_weather_discount() {
        let rec = calc().recommend(&conditions(10, 0.0, Some(20.0)));
        assert_eq!(rec.hourly, 10.8);
        assert_eq!(rec.adjustments.len(), 1);
        assert!(rec.adjustments[0].factor < 0.0);
    }

    #[test]
    fn test_rain_and_cold_stack() {
        let rec = calc().recommend(&conditions(60, 0.0, Some(-3.0)));
        // 12 * (1 + 0.2 + 0.1)
        assert_eq!(rec.hourly, 15.6);
        assert_eq!(rec.adjustments.len(), 2);
    }

    #[test]
    fn test_snow_surcharge() {
        let rec = calc().recommend(&conditions(0, 2.5, None));
        assert_eq!(rec.hourly, 15.6);
        assert!(rec.adjustments[0].reason.contains("snow"));
    }

    #[test]
    fn test_parse_day_part() {
        let payload = json!({
            "metadata": {"units": "m"},
            "forecasts": [{
                "narrative": "Showers.",
                "snow_qpf": 0,
                "max_temp": 25,
                "day": {"pop": 70, "temp": 22},
                "night": {"pop": 20, "temp": 12}
            }]
        });
        let c = WeatherConditions::from_forecast(&payload, 0).unwrap();
        assert_eq!(c.precip_chance_pct, 70);
        assert_eq!(c.temperature_c, Some(22.0));
        assert_eq!(c.narrative.as_deref(), Some("Showers."));
    }

    #[test]
    fn test_parse_falls_back_to_night_and_converts_fahrenheit() {
        let payload = json!({
            "metadata": {"units": "e"},
            "forecasts": [{"day": null, "night": {"pop": 5, "temp": 50}}]
        });
        let c = WeatherConditions::from_forecast(&payload, 0).unwrap();
        assert_eq!(c.precip_chance_pct, 5);
        assert_eq!(c.temperature_c, Some(10.0));
    }

    #[test]
    fn test_parse_missing_day_is_error() {
        let payload = json!({"forecasts": []});
        assert!(WeatherConditions::from_forecast(&payload, 0).is_err());
        assert!(WeatherConditions::from_forecast(&json!({}), 0).is_err());
    }
}
