mod sim;

use anyhow::Result;
use rumqttc::{AsyncClient, Event, MqttOptions, Packet, QoS};
use std::{env, time::Duration};
use tokio::time::sleep;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use sim::ClimateSim;

fn env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

/// Split a comma-separated zone list, dropping blanks.
fn parse_zones(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|z| !z.is_empty())
        .map(str::to_string)
        .collect()
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // Env config
    let broker = env_or("MQTT_HOST", "127.0.0.1");
    let port: u16 = env_parse("MQTT_PORT", 1883);
    let sensor_topic = env_or("SENSOR_TOPIC", "SENSOR_DATA");
    let relay_topic = env_or("RELAY_TOPIC", "RELAY");
    let zones = parse_zones(&env_or("SIM_ZONES", "living_room,bedroom"));
    let sample_every_s: u64 = env_parse("SAMPLE_EVERY_S", 60);
    let dropout: f32 = env_parse("SIM_DROPOUT", 0.0);

    if zones.is_empty() {
        anyhow::bail!("SIM_ZONES lists no zones");
    }

    let mut mqttoptions = MqttOptions::new("casa-sensor-sim", broker, port);
    mqttoptions.set_keep_alive(Duration::from_secs(30));

    let (client, mut eventloop) = AsyncClient::new(mqttoptions, 10);

    // Keep the connection alive and play the actuator: log relay commands.
    let sub_client = client.clone();
    let relay = relay_topic.clone();
    tokio::spawn(async move {
        loop {
            match eventloop.poll().await {
                Ok(Event::Incoming(Packet::ConnAck(_))) => {
                    info!("sim connected to mqtt");
                    if let Err(e) = sub_client.try_subscribe(&relay, QoS::AtLeastOnce) {
                        error!("subscribe to {relay} failed: {e}");
                    }
                }
                Ok(Event::Incoming(Packet::Publish(p))) if p.topic == relay => {
                    info!(
                        command = %String::from_utf8_lossy(&p.payload),
                        "actuator command received"
                    );
                }
                Ok(_) => {}
                Err(e) => {
                    error!("mqtt error: {e}. retrying...");
                    sleep(Duration::from_secs(2)).await;
                }
            }
        }
    });

    let mut sim = ClimateSim::new(&zones, dropout);
    info!(
        zones = sim.zone_count(),
        topic = %sensor_topic,
        sample_every_s,
        dropout,
        "simulating telemetry"
    );

    let mut ticker = tokio::time::interval(Duration::from_secs(sample_every_s.max(1)));
    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = tokio::signal::ctrl_c() => break,
        }

        for line in sim.sample() {
            match client
                .publish(&sensor_topic, QoS::AtLeastOnce, false, line.clone())
                .await
            {
                Ok(()) => info!(payload = %line, "published reading"),
                Err(e) => error!("publish error: {e}"),
            }
        }
    }

    info!("simulator stopped");
    Ok(())
}

// ===========================================================================
// Tests
// ===========================================================================
