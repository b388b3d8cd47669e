//! TOML config file loading and validation: broker connection, topics,
//! monitor timing, and the zone registry.

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::collections::HashSet;
use std::time::Duration;

use crate::registry::ZoneRegistry;

/// rumqttc refuses keep-alives shorter than this.
const MIN_KEEP_ALIVE_SECS: u64 = 5;

// ---------------------------------------------------------------------------
// Config file structures
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub mqtt: MqttSection,
    #[serde(default)]
    pub topics: TopicSection,
    #[serde(default)]
    pub monitor: MonitorSection,
    #[serde(default)]
    pub web: WebSection,
    #[serde(default = "default_zones")]
    pub zones: Vec<ZoneEntry>,
}

/// Registry used when the file has no `[[zones]]` table.
fn default_zones() -> Vec<ZoneEntry> {
    vec![
        ZoneEntry {
            zone_id: "living_room".into(),
            name: "Living room".into(),
            position: Some([200, 300]),
        },
        ZoneEntry {
            zone_id: "bedroom".into(),
            name: "Bedroom".into(),
            position: Some([500, 300]),
        },
    ]
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MqttSection {
    pub host: String,
    pub port: u16,
    pub keep_alive_secs: u64,
    pub client_id: String,
}

impl Default for MqttSection {
    fn default() -> Self {
        Self {
            host: "192.168.12.1".into(),
            port: 1883,
            keep_alive_secs: 60,
            client_id: "casa-hub".into(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TopicSection {
    /// Inbound `zone,temperature,humidity` telemetry.
    pub sensor: String,
    /// Outbound actuator commands.
    pub relay: String,
    /// Device configuration goes to `<config_prefix><device_id>`.
    pub config_prefix: String,
}

impl Default for TopicSection {
    fn default() -> Self {
        Self {
            sensor: "SENSOR_DATA".into(),
            relay: "RELAY".into(),
            config_prefix: "CONFIG/".into(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MonitorSection {
    pub stale_threshold_secs: u64,
    pub tick_interval_secs: u64,
}

impl Default for MonitorSection {
    fn default() -> Self {
        Self {
            stale_threshold_secs: 600,
            tick_interval_secs: 1,
        }
    }
}

impl MonitorSection {
    pub fn stale_threshold(&self) -> Duration {
        Duration::from_secs(self.stale_threshold_secs)
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_secs(self.tick_interval_secs)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WebSection {
    pub port: u16,
}

impl Default for WebSection {
    fn default() -> Self {
        Self { port: 8080 }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ZoneEntry {
    pub zone_id: String,
    pub name: String,
    #[serde(default)]
    pub position: Option<[u32; 2]>,
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

impl Config {
    /// Validate all config entries. Returns `Ok(())` or an error describing
    /// every violation found (not just the first one).
    pub fn validate(&self) -> Result<()> {
        let mut errors: Vec<String> = Vec::new();

        self.validate_mqtt(&mut errors);
        self.validate_topics(&mut errors);
        self.validate_monitor(&mut errors);
        self.validate_zones(&mut errors);

        if errors.is_empty() {
            Ok(())
        } else {
            bail!(
                "config validation failed ({} error{}):\n  - {}",
                errors.len(),
                if errors.len() == 1 { "" } else { "s" },
                errors.join("\n  - ")
            );
        }
    }

    fn validate_mqtt(&self, errors: &mut Vec<String>) {
        let m = &self.mqtt;
        if m.host.trim().is_empty() {
            errors.push("mqtt.host is empty".into());
        }
        if m.port == 0 {
            errors.push("mqtt.port must be non-zero".into());
        }
        if m.keep_alive_secs < MIN_KEEP_ALIVE_SECS {
            errors.push(format!(
                "mqtt.keep_alive_secs must be at least {MIN_KEEP_ALIVE_SECS}, got {}",
                m.keep_alive_secs
            ));
        }
        if m.client_id.trim().is_empty() {
            errors.push("mqtt.client_id is empty".into());
        }
    }

    fn validate_topics(&self, errors: &mut Vec<String>) {
        let t = &self.topics;
        for (key, value) in [
            ("sensor", &t.sensor),
            ("relay", &t.relay),
            ("config_prefix", &t.config_prefix),
        ] {
            if value.trim().is_empty() {
                errors.push(format!("topics.{key} is empty"));
            } else if value.contains(['+', '#']) {
                errors.push(format!(
                    "topics.{key} '{value}' must not contain MQTT wildcards"
                ));
            }
        }
    }

    fn validate_monitor(&self, errors: &mut Vec<String>) {
        if self.monitor.stale_threshold_secs == 0 {
            errors.push("monitor.stale_threshold_secs must be positive".into());
        }
        if self.monitor.tick_interval_secs == 0 {
            errors.push("monitor.tick_interval_secs must be positive".into());
        }
    }

    fn validate_zones(&self, errors: &mut Vec<String>) {
        if self.zones.is_empty() {
            errors.push("no zones configured".into());
        }

        let mut seen_ids: HashSet<&str> = HashSet::new();

        for (i, z) in self.zones.iter().enumerate() {
            let ctx = || {
                if z.zone_id.is_empty() {
                    format!("zones[{i}]")
                } else {
                    format!("zone '{}'", z.zone_id)
                }
            };

            // ── Identity ────────────────────────────────────────
            if z.zone_id.trim().is_empty() {
                errors.push(format!("{}: zone_id is empty", ctx()));
            } else if !seen_ids.insert(&z.zone_id) {
                errors.push(format!("{}: duplicate zone_id", ctx()));
            }

            // Zone ids travel as the first field of a CSV payload.
            if z.zone_id.contains(',') || z.zone_id.chars().any(char::is_whitespace) {
                errors.push(format!(
                    "{}: zone_id must not contain commas or whitespace",
                    ctx()
                ));
            }

            if z.name.trim().is_empty() {
                errors.push(format!("{}: name is empty", ctx()));
            }
        }
    }

    /// The zone registry described by `[[zones]]`.
    pub fn registry(&self) -> ZoneRegistry {
        ZoneRegistry::new(
            self.zones
                .iter()
                .map(|z| (z.zone_id.as_str(), z.name.clone(), z.position)),
        )
    }

    /// Apply `MQTT_HOST`, `MQTT_PORT` and `WEB_PORT` overrides from `lookup`.
    pub fn apply_env_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(host) = lookup("MQTT_HOST") {
            self.mqtt.host = host;
        }
        if let Some(port) = lookup("MQTT_PORT") {
            self.mqtt.port = port
                .parse()
                .with_context(|| format!("MQTT_PORT '{port}' is not a port number"))?;
        }
        if let Some(port) = lookup("WEB_PORT") {
            self.web.port = port
                .parse()
                .with_context(|| format!("WEB_PORT '{port}' is not a port number"))?;
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Load
// ---------------------------------------------------------------------------

/// Read, parse, apply environment overrides, and validate a TOML config file.
pub fn load(path: &str) -> Result<Config> {
    let contents =
        std::fs::read_to_string(path).with_context(|| format!("failed to read config: {path}"))?;
    let mut config: Config =
        toml::from_str(&contents).with_context(|| format!("failed to parse config: {path}"))?;
    config.apply_env_overrides(|key| std::env::var(key).ok())?;
    config
        .validate()
        .with_context(|| format!("invalid config: {path}"))?;
    Ok(config)
}

// ===========================================================================
// Tests
// ===========================================================================
