//! Outbound actuator and device-configuration messages.

use anyhow::{Context, Result};
use rumqttc::{AsyncClient, QoS};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use tracing::info;

use crate::registry::ZoneId;

// ---------------------------------------------------------------------------
// Transport seam
// ---------------------------------------------------------------------------

/// Fire-and-forget publish onto the broker.
pub trait Publisher: Clone + Send + Sync + 'static {
    fn publish(&self, topic: String, payload: Vec<u8>) -> impl Future<Output = Result<()>> + Send;
}

impl Publisher for AsyncClient {
    fn publish(&self, topic: String, payload: Vec<u8>) -> impl Future<Output = Result<()>> + Send {
        let client = self.clone();
        async move {
            client
                .publish(topic.clone(), QoS::AtLeastOnce, false, payload)
                .await
                .with_context(|| format!("publish to '{topic}' failed"))
        }
    }
}

// ---------------------------------------------------------------------------
// Message types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SwitchState {
    On,
    Off,
}

impl fmt::Display for SwitchState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SwitchState::On => "ON",
            SwitchState::Off => "OFF",
        })
    }
}

#[derive(Serialize)]
struct ActuatorCommand<'a> {
    zone: &'a str,
    state: SwitchState,
}

#[derive(Serialize)]
struct DeviceConfig<'a> {
    zone: &'a str,
    #[serde(rename = "type")]
    device_type: &'a str,
}

// ---------------------------------------------------------------------------
// Dispatcher
// ---------------------------------------------------------------------------

/// Builds and publishes operator commands. Arguments are assumed valid; the
/// only failure is the transport's.
#[derive(Clone)]
pub struct CommandDispatcher<P> {
    publisher: P,
    relay_topic: String,
    config_prefix: String,
}

impl<P: Publisher> CommandDispatcher<P> {
    pub fn new(publisher: P, relay_topic: impl Into<String>, config_prefix: impl Into<String>) -> Self {
        Self {
            publisher,
            relay_topic: relay_topic.into(),
            config_prefix: config_prefix.into(),
        }
    }

    /// Publish `{"zone":..,"state":"ON"|"OFF"}` to the relay topic.
    pub async fn send_actuator_command(&self, zone: &ZoneId, state: SwitchState) -> Result<()> {
        let payload = serde_json::to_vec(&ActuatorCommand {
            zone: zone.as_str(),
            state,
        })?;
        self.publisher
            .publish(self.relay_topic.clone(), payload)
            .await?;
        info!(zone = %zone, %state, "actuator command sent");
        Ok(())
    }

    /// Publish `{"zone":..,"type":..}` to `<config_prefix><device_id>`.
    pub async fn send_device_config(
        &self,
        device_id: &str,
        zone: &str,
        device_type: &str,
    ) -> Result<()> {
        let topic = format!("{}{device_id}", self.config_prefix);
        let payload = serde_json::to_vec(&DeviceConfig { zone, device_type })?;
        self.publisher.publish(topic, payload).await?;
        info!(device = %device_id, zone = %zone, device_type = %device_type, "device configuration sent");
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Test publisher
// ---------------------------------------------------------------------------


// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::testing::RecordingPublisher;
    use super::*;
    use crate::registry::ZoneRegistry;

    fn dispatcher() -> (CommandDispatcher<RecordingPublisher>, RecordingPublisher) {
        let publisher = RecordingPublisher::default();
        (
            CommandDispatcher::new(publisher.clone(), "RELAY", "CONFIG/"),
            publisher,
        )
    }

    fn zone(id: &str) -> ZoneId {
        ZoneRegistry::new([(id, id.to_string(), None)])
            .resolve(id)
            .unwrap()
            .clone()
    }

    #[tokio::test]
    async fn actuator_on_publishes_exact_payload() {
        let (d, publisher) = dispatcher();
        d.send_actuator_command(&zone("living_room"), SwitchState::On)
            .await
            .unwrap();

        assert_eq!(
            publisher.sent(),
            vec![(
                "RELAY".to_string(),
                r#"{"zone":"living_room","state":"ON"}"#.to_string()
            )]
        );
    }

    #[tokio::test]
    async fn actuator_off_publishes_off() {
        let (d, publisher) = dispatcher();
        d.send_actuator_command(&zone("bedroom"), SwitchState::Off)
            .await
            .unwrap();
        assert_eq!(publisher.sent()[0].1, r#"{"zone":"bedroom","state":"OFF"}"#);
    }

    #[tokio::test]
    async fn device_config_goes_to_suffixed_topic() {
        let (d, publisher) = dispatcher();
        d.send_device_config("dev1", "bedroom", "thermostat")
            .await
            .unwrap();

        assert_eq!(
            publisher.sent(),
            vec![(
                "CONFIG/dev1".to_string(),
                r#"{"zone":"bedroom","type":"thermostat"}"#.to_string()
            )]
        );
    }

    #[tokio::test]
    async fn device_config_escapes_json() {
        let (d, publisher) = dispatcher();
        d.send_device_config("dev2", "kid\"s room", "lamp")
            .await
            .unwrap();
        let (_, payload) = &publisher.sent()[0];
        let v: serde_json::Value = serde_json::from_str(payload).unwrap();
        assert_eq!(v["zone"], "kid\"s room");
    }

    #[tokio::test]
    async fn transport_failure_is_returned() {
        let publisher = RecordingPublisher::failing();
        let d = CommandDispatcher::new(publisher.clone(), "RELAY", "CONFIG/");
        let err = d
            .send_actuator_command(&zone("bedroom"), SwitchState::On)
            .await
            .unwrap_err();
        assert!(format!("{err:#}").contains("broker unavailable"));
        assert!(publisher.sent().is_empty());
    }

    #[tokio::test]
    async fn async_client_queues_publish_without_broker() {
        // The event loop is never polled; the request just sits in its queue.
        let opts = rumqttc::MqttOptions::new("test-dispatch", "127.0.0.1", 1883);
        let (client, _eventloop) = AsyncClient::new(opts, 10);
        let d = CommandDispatcher::new(client, "RELAY", "CONFIG/");
        d.send_actuator_command(&zone("bedroom"), SwitchState::On)
            .await
            .unwrap();
    }

    #[test]
    fn switch_state_parses_from_json() {
        let s: SwitchState = serde_json::from_str(r#""ON""#).unwrap();
        assert_eq!(s, SwitchState::On);
        assert!(serde_json::from_str::<SwitchState>(r#""on""#).is_err());
        assert_eq!(SwitchState::Off.to_string(), "OFF");
    }
}
