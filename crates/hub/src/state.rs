use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;
use time::{Duration, OffsetDateTime};
use tokio::sync::RwLock;

use crate::registry::{ZoneId, ZoneRegistry};

// ---------------------------------------------------------------------------
// Core types
// ---------------------------------------------------------------------------

/// Whether a zone's telemetry is recent enough to be trusted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Freshness {
    /// No telemetry accepted since startup.
    Never,
    Fresh,
    Stale,
}

impl Freshness {
    /// NEVER without a reading, STALE once `now - last_update` exceeds
    /// `threshold`, FRESH otherwise. Exactly `threshold` old is still fresh.
    pub fn evaluate(
        last_update: Option<OffsetDateTime>,
        now: OffsetDateTime,
        threshold: Duration,
    ) -> Self {
        match last_update {
            None => Freshness::Never,
            Some(ts) if now - ts > threshold => Freshness::Stale,
            Some(_) => Freshness::Fresh,
        }
    }

    /// Dashboards show both NEVER and STALE as an alarm.
    pub fn is_alarm(self) -> bool {
        !matches!(self, Freshness::Fresh)
    }
}

impl fmt::Display for Freshness {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Freshness::Never => "NEVER",
            Freshness::Fresh => "FRESH",
            Freshness::Stale => "STALE",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ZoneState {
    /// Celsius.
    pub temperature: Option<f64>,
    /// Percent relative humidity.
    pub humidity: Option<f64>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub last_update: Option<OffsetDateTime>,
    pub freshness: Freshness,
}

impl ZoneState {
    fn empty() -> Self {
        Self {
            temperature: None,
            humidity: None,
            last_update: None,
            freshness: Freshness::Never,
        }
    }
}

/// A reading written by [`ZoneStateStore::apply`].
#[derive(Debug, Clone, PartialEq)]
pub struct Applied {
    pub state: ZoneState,
    /// Freshness held before this reading; differs from `state.freshness`
    /// when the reading moved the zone out of NEVER or STALE.
    pub previous: Freshness,
}

/// Outcome of one freshness pass over every zone.
#[derive(Debug, Clone, PartialEq)]
pub struct Evaluation {
    pub statuses: BTreeMap<ZoneId, Freshness>,
    /// Zones whose stored freshness differed from the recomputed one.
    pub changed: Vec<(ZoneId, Freshness)>,
}

// ---------------------------------------------------------------------------
// Store
// ---------------------------------------------------------------------------

/// Authoritative per-zone state, shared between the ingestion task and the
/// monitor. Every method takes the lock once and returns owned copies; no
/// lock is held across an `.await` outside this type.
#[derive(Clone)]
pub struct ZoneStateStore {
    registry: ZoneRegistry,
    threshold: Duration,
    zones: Arc<RwLock<HashMap<ZoneId, ZoneState>>>,
}

impl ZoneStateStore {
    /// One empty record per registered zone, freshness NEVER. Zones turn
    /// STALE once their last reading is older than `stale_threshold`.
    pub fn new(registry: &ZoneRegistry, stale_threshold: std::time::Duration) -> Self {
        let zones = registry
            .ids()
            .map(|id| (id.clone(), ZoneState::empty()))
            .collect();

        Self {
            registry: registry.clone(),
            threshold: Duration::try_from(stale_threshold).unwrap_or(Duration::MAX),
            zones: Arc::new(RwLock::new(zones)),
        }
    }

    pub fn registry(&self) -> &ZoneRegistry {
        &self.registry
    }

    pub fn threshold(&self) -> Duration {
        self.threshold
    }

    /// Overwrite a zone's reading and re-derive its freshness as of `at`.
    /// Older timestamps are applied too (last write wins). Unregistered
    /// zones are ignored and yield `None`.
    pub async fn apply(
        &self,
        zone: &str,
        temperature: f64,
        humidity: f64,
        at: OffsetDateTime,
    ) -> Option<Applied> {
        let mut zones = self.zones.write().await;
        let record = zones.get_mut(zone)?;
        let previous = record.freshness;
        record.temperature = Some(temperature);
        record.humidity = Some(humidity);
        record.last_update = Some(at);
        record.freshness = Freshness::evaluate(record.last_update, at, self.threshold);
        Some(Applied {
            state: record.clone(),
            previous,
        })
    }

    pub async fn snapshot(&self, zone: &str) -> Option<ZoneState> {
        self.zones.read().await.get(zone).cloned()
    }

    pub async fn snapshot_all(&self) -> BTreeMap<ZoneId, ZoneState> {
        self.zones
            .read()
            .await
            .iter()
            .map(|(id, st)| (id.clone(), st.clone()))
            .collect()
    }

    /// Recompute and store freshness for every zone in one critical section,
    /// so a concurrent `apply` is either fully seen or not seen at all.
    pub async fn evaluate(&self, now: OffsetDateTime) -> Evaluation {
        let mut zones = self.zones.write().await;
        let mut statuses = BTreeMap::new();
        let mut changed = Vec::new();

        for (id, record) in zones.iter_mut() {
            let freshness = Freshness::evaluate(record.last_update, now, self.threshold);
            if record.freshness != freshness {
                record.freshness = freshness;
                changed.push((id.clone(), freshness));
            }
            statuses.insert(id.clone(), freshness);
        }
        changed.sort_by(|a, b| a.0.cmp(&b.0));

        Evaluation { statuses, changed }
    }
}

// ===========================================================================
// Tests
// ===========================================================================
