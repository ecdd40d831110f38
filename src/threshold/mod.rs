//! ThresholdEvaluator - Sensor Limit Check
//!
//! ## Responsibilities
//!
//! - Compare one reading against the configured limits
//! - Report which metrics crossed and why
//!
//! Pure function, no side effects, no failure mode.

use crate::models::{SensorReading, Thresholds};
use serde::Serialize;

/// Outcome of a threshold check
#[derive(Debug, Clone, Serialize)]
pub struct ThresholdCheck {
    pub exceeded: bool,
    pub reasons: Vec<String>,
}

/// Exceeded iff temperature > limit, OR light > limit, OR smoke > limit,
/// OR (humidity present AND humidity < limit).
pub fn evaluate(reading: &SensorReading, thresholds: &Thresholds) -> ThresholdCheck {
    let mut reasons = Vec::new();

    if reading.temperature > thresholds.temperature {
        reasons.push(format!(
            "Temperatura alta ({}°C > {}°C)",
            reading.temperature, thresholds.temperature
        ));
    }

    if reading.light > thresholds.light {
        reasons.push(format!(
            "Luminosidad alta ({} > {})",
            reading.light, thresholds.light
        ));
    }

    if reading.smoke > thresholds.smoke {
        reasons.push(format!(
            "Humo detectado ({} > {})",
            reading.smoke, thresholds.smoke
        ));
    }

    if let Some(humidity) = reading.humidity {
        if humidity < thresholds.humidity {
            reasons.push(format!(
                "Humedad baja ({}% < {}%)",
                humidity, thresholds.humidity
            ));
        }
    }

    ThresholdCheck {
        exceeded: !reasons.is_empty(),
        reasons,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn reading(temperature: f64, light: f64, smoke: f64, humidity: Option<f64>) -> SensorReading {
        SensorReading {
            temperature,
            light,
            smoke,
            humidity,
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn test_all_metrics_within_limits() {
        let check = evaluate(&reading(20.0, 100.0, 50.0, Some(40.0)), &Thresholds::default());
        assert!(!check.exceeded);
        assert!(check.reasons.is_empty());
    }

    #[test]
    fn test_every_metric_crossed() {
        let check = evaluate(&reading(60.0, 1600.0, 1200.0, Some(5.0)), &Thresholds::default());
        assert!(check.exceeded);
        assert_eq!(check.reasons.len(), 4);
    }

    #[test]
    fn test_missing_humidity_never_triggers() {
        let check = evaluate(&reading(20.0, 100.0, 50.0, None), &Thresholds::default());
        assert!(!check.exceeded);
    }

    #[test]
    fn test_boundary_is_strict() {
        // Equality does not cross: temp > limit, humidity < limit
        let limits = Thresholds::default();
        let check = evaluate(&reading(34.0, 1500.0, 1000.0, Some(15.0)), &limits);
        assert!(!check.exceeded);
    }

    /// Property over generated reading/threshold pairs: exceeded is true iff
    /// at least one per-metric rule fires. Cases come from a small LCG so the
    /// test stays deterministic.
    #[test]
    fn test_exceeded_matches_per_metric_rules() {
        let mut seed: u64 = 0x5eed_cafe;
        let mut next = move || {
            seed = seed.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
            ((seed >> 33) % 2000) as f64
        };

        for _ in 0..500 {
            let limits = Thresholds {
                temperature: next(),
                light: next(),
                smoke: next(),
                humidity: next(),
            };
            let humidity = if next() > 1000.0 { Some(next()) } else { None };
            let r = reading(next(), next(), next(), humidity);

            let expected = r.temperature > limits.temperature
                || r.light > limits.light
                || r.smoke > limits.smoke
                || r.humidity.map(|h| h < limits.humidity).unwrap_or(false);

            let check = evaluate(&r, &limits);
            assert_eq!(check.exceeded, expected, "reading {:?} limits {:?}", r, limits);
            assert_eq!(check.exceeded, !check.reasons.is_empty());
        }
    }
}
