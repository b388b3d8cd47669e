//! Broker connection: polls the rumqttc event loop on its own task, subscribes
//! to telemetry on every connect, and feeds sensor publishes to the ingestor.

use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Packet, Publish, QoS};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, error, info};

use crate::config::MqttSection;
use crate::ingest::TelemetryIngestor;

/// Pause before polling again after a connection error; the next poll
/// re-dials the broker.
const RETRY_DELAY: Duration = Duration::from_secs(2);

/// Outgoing request queue depth between client handles and the event loop.
const REQUEST_CAPACITY: usize = 20;

// ---------------------------------------------------------------------------
// Connection status
// ---------------------------------------------------------------------------

/// Whether the broker link is currently up. Shared with the web UI.
#[derive(Clone, Default)]
pub struct LinkStatus(Arc<AtomicBool>);

impl LinkStatus {
    pub fn is_connected(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }

    fn set(&self, connected: bool) {
        self.0.store(connected, Ordering::Relaxed);
    }
}

// ---------------------------------------------------------------------------
// Client construction
// ---------------------------------------------------------------------------

pub fn client(cfg: &MqttSection) -> (AsyncClient, EventLoop) {
    let mut opts = MqttOptions::new(cfg.client_id.clone(), cfg.host.clone(), cfg.port);
    opts.set_keep_alive(Duration::from_secs(cfg.keep_alive_secs));
    AsyncClient::new(opts, REQUEST_CAPACITY)
}

// ---------------------------------------------------------------------------
// Event loop
// ---------------------------------------------------------------------------

pub struct BrokerLink {
    client: AsyncClient,
    sensor_topic: String,
    ingestor: TelemetryIngestor,
    status: LinkStatus,
}

impl BrokerLink {
    pub fn new(
        client: AsyncClient,
        sensor_topic: impl Into<String>,
        ingestor: TelemetryIngestor,
        status: LinkStatus,
    ) -> Self {
        Self {
            client,
            sensor_topic: sensor_topic.into(),
            ingestor,
            status,
        }
    }

    /// Poll forever. Intended to be `tokio::spawn`-ed from main; this is the
    /// ingestion context.
    pub async fn run(self, mut eventloop: EventLoop) {
        loop {
            match eventloop.poll().await {
                Ok(event) => self.on_event(event).await,
                Err(e) => {
                    error!("mqtt error: {e}. reconnecting...");
                    self.status.set(false);
                    sleep(RETRY_DELAY).await;
                }
            }
        }
    }

    async fn on_event(&self, event: Event) {
        match event {
            Event::Incoming(Packet::Publish(p)) => self.on_publish(&p).await,
            Event::Incoming(Packet::ConnAck(ack)) => {
                info!(code = ?ack.code, "mqtt connected");
                self.status.set(true);
                // Sessions are clean, so every (re)connect needs a fresh
                // subscription.
                match self.client.try_subscribe(&self.sensor_topic, QoS::AtLeastOnce) {
                    Ok(()) => info!(topic = %self.sensor_topic, "subscribed to telemetry"),
                    Err(e) => error!(topic = %self.sensor_topic, "subscribe failed: {e}"),
                }
            }
            Event::Incoming(Packet::Disconnect) => {
                info!("mqtt disconnected");
                self.status.set(false);
            }
            _ => {}
        }
    }

    async fn on_publish(&self, p: &Publish) {
        if p.topic == self.sensor_topic {
            self.ingestor.on_message(&p.payload).await;
        } else {
            debug!(topic = %p.topic, "unhandled topic");
        }
    }
}

// ===========================================================================
// Tests
// ===========================================================================
