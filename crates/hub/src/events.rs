//! Notifications pushed from the core to presentation consumers.

use serde::Serialize;
use tokio::sync::broadcast;

use crate::registry::ZoneId;
use crate::state::{Freshness, ZoneState};

/// Buffered notifications per subscriber before it starts lagging.
const EVENT_CAPACITY: usize = 256;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ZoneEvent {
    /// A telemetry reading was accepted for `zone`.
    ZoneUpdated { zone: ZoneId, state: ZoneState },
    /// The monitor moved `zone` to a different freshness status.
    FreshnessChanged { zone: ZoneId, freshness: Freshness },
}

pub type EventSender = broadcast::Sender<ZoneEvent>;

pub fn channel() -> EventSender {
    let (tx, _) = broadcast::channel(EVENT_CAPACITY);
    tx
}

/// Send without caring whether anyone is listening.
pub(crate) fn publish(tx: &EventSender, event: ZoneEvent) {
    // Err only means there are no subscribers right now.
    let _ = tx.send(event);
}
