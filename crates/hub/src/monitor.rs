//! Staleness monitor: periodically recomputes every zone's freshness from its
//! last accepted reading and announces transitions.
//!
//! ## Per-zone states
//!
//! ```text
//! Never ──[reading accepted]──▶ Fresh ──[age > threshold]──▶ Stale
//!                                 ▲                            │
//!                                 └─────[reading accepted]─────┘
//! ```
//!
//! The monitor keeps no state of its own; every pass derives the status from
//! the store's `last_update` alone.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use time::OffsetDateTime;
use tokio::sync::{watch, Notify};
use tokio::time::MissedTickBehavior;
use tracing::info;

use crate::events::{self, EventSender, ZoneEvent};
use crate::registry::ZoneId;
use crate::state::{Freshness, ZoneStateStore};

/// Ages readings against the store's stale threshold.
#[derive(Clone)]
pub struct StalenessMonitor {
    store: ZoneStateStore,
    events: EventSender,
}

impl StalenessMonitor {
    pub fn new(store: ZoneStateStore, events: EventSender) -> Self {
        Self { store, events }
    }

    /// One evaluation pass at `now`. Writes the recomputed freshness back to
    /// the store, emits `FreshnessChanged` for zones that moved, and returns
    /// the status of every zone. Calling it again with the same `now` and no
    /// new readings returns the same mapping.
    pub async fn tick(&self, now: OffsetDateTime) -> BTreeMap<ZoneId, Freshness> {
        let evaluation = self.store.evaluate(now).await;

        for (zone, freshness) in evaluation.changed {
            info!(zone = %zone, %freshness, alarm = freshness.is_alarm(), "zone freshness changed");
            events::publish(&self.events, ZoneEvent::FreshnessChanged { zone, freshness });
        }

        evaluation.statuses
    }

    /// Tick every `period`, and immediately whenever `reevaluate` is
    /// notified, until `shutdown` flips to `true` or its sender is dropped.
    /// A tick already in progress is allowed to finish.
    pub async fn run(
        self,
        period: Duration,
        reevaluate: Arc<Notify>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        info!(
            period_ms = period.as_millis() as u64,
            threshold_sec = self.store.threshold().whole_seconds(),
            "staleness monitor started"
        );

        loop {
            if *shutdown.borrow() {
                break;
            }

            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                    continue;
                }
                _ = ticker.tick() => {}
                _ = reevaluate.notified() => {}
            }

            self.tick(OffsetDateTime::now_utc()).await;
        }

        info!("staleness monitor stopped");
    }
}

// ===========================================================================
// Tests
// ===========================================================================
