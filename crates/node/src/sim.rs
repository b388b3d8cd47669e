//! Stateful room climate simulator for local development.
//!
//! Each zone carries its own temperature and humidity that evolve as a
//! mean-reverting random walk, so consecutive readings stay close together
//! while zones drift apart from each other. An optional dropout rate skips
//! samples to exercise the hub's staleness alarm.

// ---------------------------------------------------------------------------
// Gaussian approximation (no extra dependency)
// ---------------------------------------------------------------------------

/// Approximate a sample from N(0,1) using the Irwin-Hall method:
/// sum of 12 uniform [0,1) values minus 6.
fn approx_std_normal() -> f64 {
    let mut sum: f64 = 0.0;
    for _ in 0..12 {
        sum += fastrand::f64();
    }
    sum - 6.0
}

/// Sample from N(mean, sigma).
fn gaussian(mean: f64, sigma: f64) -> f64 {
    mean + sigma * approx_std_normal()
}

const TEMP_RANGE: (f64, f64) = (10.0, 35.0);
const HUMIDITY_RANGE: (f64, f64) = (20.0, 90.0);

// ---------------------------------------------------------------------------
// Per-zone state
// ---------------------------------------------------------------------------

struct ZoneClimate {
    zone_id: String,
    temperature: f64,
    humidity: f64,
    /// Value each walk is pulled back toward.
    temp_center: f64,
    humidity_center: f64,
}

// ---------------------------------------------------------------------------
// Main simulator
// ---------------------------------------------------------------------------

pub struct ClimateSim {
    zones: Vec<ZoneClimate>,
    temp_sigma: f64,
    humidity_sigma: f64,
    mean_reversion: f64,
    dropout: f32,
}

impl ClimateSim {
    /// `dropout` is the probability (0..=1) that a zone skips a sample.
    pub fn new<S: AsRef<str>>(zone_ids: &[S], dropout: f32) -> Self {
        let zones = zone_ids
            .iter()
            .map(|id| {
                let temp_center = gaussian(21.0, 1.5).clamp(TEMP_RANGE.0, TEMP_RANGE.1);
                let humidity_center = gaussian(50.0, 5.0).clamp(HUMIDITY_RANGE.0, HUMIDITY_RANGE.1);
                ZoneClimate {
                    zone_id: id.as_ref().to_string(),
                    temperature: temp_center,
                    humidity: humidity_center,
                    temp_center,
                    humidity_center,
                }
            })
            .collect();

        Self {
            zones,
            temp_sigma: 0.2,
            humidity_sigma: 0.8,
            mean_reversion: 0.05,
            dropout: dropout.clamp(0.0, 1.0),
        }
    }

    /// Advance every zone by one step and return the payloads to publish
    /// this round, one `zone,temperature,humidity` line per zone that did not
    /// drop out.
    pub fn sample(&mut self) -> Vec<String> {
        let mut out = Vec::with_capacity(self.zones.len());
        for zone in &mut self.zones {
            let pull_t = self.mean_reversion * (zone.temp_center - zone.temperature);
            let pull_h = self.mean_reversion * (zone.humidity_center - zone.humidity);

            zone.temperature = (zone.temperature + pull_t + gaussian(0.0, self.temp_sigma))
                .clamp(TEMP_RANGE.0, TEMP_RANGE.1);
            zone.humidity = (zone.humidity + pull_h + gaussian(0.0, self.humidity_sigma))
                .clamp(HUMIDITY_RANGE.0, HUMIDITY_RANGE.1);

            if self.dropout > 0.0 && fastrand::f32() < self.dropout {
                continue;
            }
            out.push(format_reading(&zone.zone_id, zone.temperature, zone.humidity));
        }
        out
    }

    pub fn zone_count(&self) -> usize {
        self.zones.len()
    }
}

/// Wire format the hub expects on the sensor topic.
pub fn format_reading(zone_id: &str, temperature: f64, humidity: f64) -> String {
    format!("{zone_id},{temperature:.1},{humidity:.1}")
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(line: &str) -> (String, f64, f64) {
        let parts: Vec<&str> = line.split(',').collect();
        assert_eq!(parts.len(), 3, "bad line {line}");
        (
            parts[0].to_string(),
            parts[1].parse().unwrap(),
            parts[2].parse().unwrap(),
        )
    }

    #[test]
    fn format_reading_one_decimal() {
        assert_eq!(format_reading("bedroom", 21.04, 48.0), "bedroom,21.0,48.0");
        assert_eq!(format_reading("living_room", -2.26, 55.51), "living_room,-2.3,55.5");
    }

    #[test]
    fn one_line_per_zone_without_dropout() {
        let mut sim = ClimateSim::new(&["living_room", "bedroom"], 0.0);
        assert_eq!(sim.zone_count(), 2);
        let lines = sim.sample();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with("living_room,"));
        assert!(lines[1].starts_with("bedroom,"));
    }

    #[test]
    fn readings_stay_in_range() {
        let mut sim = ClimateSim::new(&["a", "b", "c"], 0.0);
        for _ in 0..1000 {
            for line in sim.sample() {
                let (_, t, h) = parse(&line);
                assert!((TEMP_RANGE.0..=TEMP_RANGE.1).contains(&t), "temp {t}");
                assert!((HUMIDITY_RANGE.0..=HUMIDITY_RANGE.1).contains(&h), "hum {h}");
            }
        }
    }

    #[test]
    fn temporal_coherence() {
        let mut sim = ClimateSim::new(&["a"], 0.0);
        let temps: Vec<f64> = (0..200).map(|_| parse(&sim.sample()[0]).1).collect();
        let max_jump = temps
            .windows(2)
            .map(|w| (w[1] - w[0]).abs())
            .fold(0.0_f64, f64::max);
        // sigma 0.2 per step; 6 sigma plus rounding.
        assert!(max_jump < 1.5, "max consecutive jump too large: {max_jump}");
    }

    #[test]
    fn full_dropout_publishes_nothing() {
        let mut sim = ClimateSim::new(&["a", "b"], 1.0);
        for _ in 0..20 {
            assert!(sim.sample().is_empty());
        }
    }

    #[test]
    fn partial_dropout_skips_some() {
        let mut sim = ClimateSim::new(&["a"], 0.5);
        let published: usize = (0..400).map(|_| sim.sample().len()).sum();
        assert!(published > 0 && published < 400, "published {published}");
    }

    #[test]
    fn approx_std_normal_has_zero_mean() {
        let n = 5000;
        let sum: f64 = (0..n).map(|_| approx_std_normal()).sum();
        let mean = sum / n as f64;
        assert!(
            mean.abs() < 0.15,
            "approx_std_normal mean should be near zero: {mean}"
        );
    }
}
