//! Decoding of inbound `zone,temperature,humidity` telemetry and its
//! application to the zone store.

use std::sync::Arc;
use thiserror::Error;
use time::OffsetDateTime;
use tokio::sync::Notify;
use tracing::{debug, info, warn};

use crate::events::{self, EventSender, ZoneEvent};
use crate::registry::{ZoneId, ZoneRegistry};
use crate::state::{ZoneState, ZoneStateStore};

// ---------------------------------------------------------------------------
// Decoding
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct Telemetry {
    pub zone: ZoneId,
    pub temperature: f64,
    pub humidity: f64,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("payload is not valid UTF-8")]
    NotUtf8,
    #[error("expected 3 comma-separated fields, found {found}")]
    FieldCount { found: usize },
    #[error("{field} '{value}' is not a finite number")]
    InvalidNumber { field: &'static str, value: String },
    #[error("unknown zone '{0}'")]
    UnknownZone(String),
}

/// Parse one telemetry payload. Fields are trimmed; the zone must be
/// registered and both readings must be finite decimals.
pub fn decode(payload: &[u8], registry: &ZoneRegistry) -> Result<Telemetry, DecodeError> {
    let text = std::str::from_utf8(payload).map_err(|_| DecodeError::NotUtf8)?;

    let fields: Vec<&str> = text.split(',').map(str::trim).collect();
    let [zone, temperature, humidity] = fields[..] else {
        return Err(DecodeError::FieldCount {
            found: fields.len(),
        });
    };

    let temperature = parse_reading("temperature", temperature)?;
    let humidity = parse_reading("humidity", humidity)?;
    let zone = registry
        .resolve(zone)
        .ok_or_else(|| DecodeError::UnknownZone(zone.to_string()))?
        .clone();

    Ok(Telemetry {
        zone,
        temperature,
        humidity,
    })
}

fn parse_reading(field: &'static str, raw: &str) -> Result<f64, DecodeError> {
    match raw.parse::<f64>() {
        Ok(v) if v.is_finite() => Ok(v),
        _ => Err(DecodeError::InvalidNumber {
            field,
            value: raw.to_string(),
        }),
    }
}

// ---------------------------------------------------------------------------
// Ingestor
// ---------------------------------------------------------------------------

/// Runs on the broker task. Applies good readings, drops bad ones with a
/// log line, and pokes the monitor so freshness catches up immediately.
#[derive(Clone)]
pub struct TelemetryIngestor {
    store: ZoneStateStore,
    events: EventSender,
    reevaluate: Arc<Notify>,
}

impl TelemetryIngestor {
    pub fn new(store: ZoneStateStore, events: EventSender, reevaluate: Arc<Notify>) -> Self {
        Self {
            store,
            events,
            reevaluate,
        }
    }

    /// Handle one message stamped with the current wall-clock time. Decode
    /// failures end here.
    pub async fn on_message(&self, payload: &[u8]) {
        if let Err(e) = self.ingest_at(payload, OffsetDateTime::now_utc()).await {
            warn!(
                error = %e,
                payload = %String::from_utf8_lossy(payload),
                "dropping telemetry"
            );
        }
    }

    /// Decode and apply `payload` as received at `at`.
    pub async fn ingest_at(
        &self,
        payload: &[u8],
        at: OffsetDateTime,
    ) -> Result<ZoneState, DecodeError> {
        let reading = decode(payload, self.store.registry())?;

        let applied = self
            .store
            .apply(reading.zone.as_str(), reading.temperature, reading.humidity, at)
            .await
            .ok_or_else(|| DecodeError::UnknownZone(reading.zone.to_string()))?;
        let state = applied.state;

        debug!(
            zone = %reading.zone,
            temperature = reading.temperature,
            humidity = reading.humidity,
            "telemetry applied"
        );

        let freshness = state.freshness;
        events::publish(
            &self.events,
            ZoneEvent::ZoneUpdated {
                zone: reading.zone.clone(),
                state: state.clone(),
            },
        );
        if freshness != applied.previous {
            info!(zone = %reading.zone, %freshness, alarm = freshness.is_alarm(), "zone freshness changed");
            events::publish(
                &self.events,
                ZoneEvent::FreshnessChanged {
                    zone: reading.zone,
                    freshness,
                },
            );
        }
        self.reevaluate.notify_one();

        Ok(state)
    }
}

// ===========================================================================
// Tests
// ===========================================================================
