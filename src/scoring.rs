//! Driving behavior scoring.
//!
//! A trip starts at 100 points. Each detected behavior costs a weighted
//! penalty per occurrence, scaled to occurrences per 10 km so long trips are
//! not punished for their length. Trips shorter than 1 km are scaled as 1 km.

use serde::{Deserialize, Serialize};

/// Driving events detected from vehicle telemetry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Behavior {
    HarshAcceleration,
    HarshBraking,
    Speeding,
    SharpTurn,
    FrequentStops,
    NightDriving,
}

impl Behavior {
    /// Points deducted per occurrence per 10 km.
    pub fn weight(self) -> f64 {
        match self {
            Self::HarshAcceleration => 3.0,
            Self::HarshBraking => 4.0,
            Self::Speeding => 5.0,
            Self::SharpTurn => 2.0,
            Self::FrequentStops => 1.0,
            Self::NightDriving => 0.5,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::HarshAcceleration => "harsh_acceleration",
            Self::HarshBraking => "harsh_braking",
            Self::Speeding => "speeding",
            Self::SharpTurn => "sharp_turn",
            Self::FrequentStops => "frequent_stops",
            Self::NightDriving => "night_driving",
        }
    }
}

impl std::fmt::Display for Behavior {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.pad(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BehaviorCount {
    pub behavior: Behavior,
    pub count: u32,
}

/// Aggregated behavior counts for one trip.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TripSummary {
    pub trip_id: String,
    #[serde(default)]
    pub device_id: Option<String>,
    pub distance_km: f64,
    #[serde(default)]
    pub behaviors: Vec<BehaviorCount>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BehaviorPenalty {
    pub behavior: Behavior,
    pub count: u32,
    pub penalty: f64,
}

/// Score for one trip with its per-behavior breakdown.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DrivingScore {
    pub trip_id: String,
    pub score: f64,
    pub breakdown: Vec<BehaviorPenalty>,
}

/// Score a trip on a 0–100 scale.
pub fn score_trip(trip: &TripSummary) -> DrivingScore {
    let per_10km = 10.0 / trip.distance_km.max(1.0);
    let breakdown: Vec<BehaviorPenalty> = trip
        .behaviors
        .iter()
        .filter(|b| b.count > 0)
        .map(|b| BehaviorPenalty {
            behavior: b.behavior,
            count: b.count,
            penalty: f64::from(b.count) * b.behavior.weight() * per_10km,
        })
        .collect();
    let total: f64 = breakdown.iter().map(|p| p.penalty).sum();
    DrivingScore {
        trip_id: trip.trip_id.clone(),
        score: (100.0 - total).clamp(0.0, 100.0),
        breakdown,
    }
}

/// Distance-weighted mean score across trips, `None` for no trips.
pub fn fleet_average(trips: &[TripSummary]) -> Option<f64> {
    let total_km: f64 = trips.iter().map(|t| t.distance_km.max(1.0)).sum();
    if trips.is_empty() || total_km <= 0.0 {
        return None;
    }
    let weighted: f64 = trips
        .iter()
        .map(|t| score_trip(t).score * t.distance_km.max(1.0))
        .sum();
    Some(weighted / total_km)
}
