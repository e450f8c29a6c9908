//! Trip scoring command handler.

use std::path::Path;

use anyhow::{Context, Result};
use serde_json::Value;

use fleetshare::scoring::{fleet_average, score_trip, TripSummary};

/// Parse one trip or an array of trips.
fn parse_trips(data: &str) -> Result<Vec<TripSummary>> {
    let value: Value = serde_json::from_str(data).context("trip file is not valid JSON")?;
    let trips = if value.is_array() {
        serde_json::from_value(value)?
    } else {
        vec![serde_json::from_value(value)?]
    };
    Ok(trips)
}

/// Handle `fleetshare score <file>`.
pub(crate) fn cmd_score(path: &Path) -> Result<()> {
    let data = std::fs::read_to_string(path)
        .with_context(|| format!("cannot read {}", path.display()))?;
    let trips = parse_trips(&data)?;

    for trip in &trips {
        let score = score_trip(trip);
        println!("{:<20} {:>6.1}", score.trip_id, score.score);
        for p in &score.breakdown {
            println!("    {:<20} x{:<3} -{:.1}", p.behavior, p.count, p.penalty);
        }
    }
    if let Some(avg) = fleet_average(&trips) {
        println!("Fleet average: {:.1}", avg);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_single_and_array() {
        let one = r#"{"trip_id":"a","distance_km":5}"#;
        assert_eq!(parse_trips(one).unwrap().len(), 1);
        let many = r#"[{"trip_id":"a","distance_km":5},{"trip_id":"b","distance_km":7}]"#;
        assert_eq!(parse_trips(many).unwrap().len(), 2);
        assert!(parse_trips("nope").is_err());
    }
}
