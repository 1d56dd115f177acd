//! MQTT location source for OwnTracks-style position reports
//!
//! Phones running OwnTracks (or anything speaking its JSON) publish
//! `{"_type":"location","lat":..,"lon":..,"acc":..,"tst":..}` messages.
//! Non-location payloads (`lwt`, `transition`, ...) are ignored.

use crate::domain::types::{epoch_ms, Coordinates, LocationSnapshot};
use crate::infra::config::Config;
use crate::io::location::{LocationError, LocationSource};
use async_trait::async_trait;
use rumqttc::{
    AsyncClient, ConnectReturnCode, ConnectionError, Event, EventLoop, MqttOptions, Packet, QoS,
};
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, error, info, warn};

#[derive(Debug, Deserialize)]
struct OwnTracksMessage {
    #[serde(rename = "_type")]
    kind: String,
    lat: Option<f64>,
    lon: Option<f64>,
    /// Horizontal accuracy (m)
    acc: Option<f64>,
    /// Altitude (m)
    alt: Option<f64>,
    /// Vertical accuracy (m)
    vac: Option<f64>,
    /// Course over ground (degrees)
    cog: Option<f64>,
    /// Velocity (km/h)
    vel: Option<f64>,
    /// Fix time (epoch seconds)
    tst: Option<u64>,
}

/// Parse an OwnTracks payload into a snapshot, None for anything else
pub fn parse_owntracks(payload: &[u8]) -> Option<LocationSnapshot> {
    let message: OwnTracksMessage = match serde_json::from_slice(payload) {
        Ok(m) => m,
        Err(e) => {
            debug!(error = %e, "owntracks_parse_failed");
            return None;
        }
    };

    if message.kind != "location" {
        debug!(kind = %message.kind, "owntracks_message_ignored");
        return None;
    }

    let coords = Coordinates {
        latitude: message.lat?,
        longitude: message.lon?,
        accuracy: message.acc,
        altitude: message.alt,
        altitude_accuracy: message.vac,
        heading: message.cog,
        speed: message.vel.map(|kmh| kmh / 3.6),
    };
    let timestamp_ms = message.tst.and_then(|s| s.checked_mul(1000)).unwrap_or_else(epoch_ms);

    Some(LocationSnapshot::new(coords, timestamp_ms))
}

pub struct MqttSource {
    client: AsyncClient,
    eventloop: EventLoop,
    topic: String,
}

impl MqttSource {
    pub fn new(config: &Config) -> Self {
        let mut mqttoptions = MqttOptions::new("audio-tour", config.mqtt_host(), config.mqtt_port());
        mqttoptions.set_keep_alive(Duration::from_secs(30));

        // Set credentials if configured
        if let (Some(username), Some(password)) = (config.mqtt_username(), config.mqtt_password()) {
            mqttoptions.set_credentials(username, password);
        }

        let (client, eventloop) = AsyncClient::new(mqttoptions, 10);
        info!(
            topic = %config.mqtt_topic(),
            host = %config.mqtt_host(),
            port = %config.mqtt_port(),
            "mqtt_location_source_configured"
        );
        Self { client, eventloop, topic: config.mqtt_topic().to_string() }
    }
}

#[async_trait]
impl LocationSource for MqttSource {
    fn name(&self) -> &'static str {
        "mqtt"
    }

    async fn next_fix(&mut self) -> Result<LocationSnapshot, LocationError> {
        loop {
            match self.eventloop.poll().await {
                Ok(Event::Incoming(Packet::Publish(publish))) => {
                    if let Some(fix) = parse_owntracks(&publish.payload) {
                        debug!(topic = %publish.topic, "owntracks_location");
                        return Ok(fix);
                    }
                }
                Ok(Event::Incoming(Packet::ConnAck(_))) => {
                    info!("mqtt_connected");
                    // Subscriptions do not survive a clean-session reconnect
                    if let Err(e) = self.client.try_subscribe(self.topic.as_str(), QoS::AtMostOnce) {
                        error!(error = %e, "mqtt_subscribe_failed");
                    }
                }
                Ok(_) => {}
                Err(ConnectionError::ConnectionRefused(
                    ConnectReturnCode::NotAuthorized | ConnectReturnCode::BadUserNamePassword,
                )) => {
                    return Err(LocationError::PermissionDenied);
                }
                Err(e) => {
                    warn!(error = %e, "mqtt_error");
                    tokio::time::sleep(Duration::from_secs(1)).await;
                }
            }
        }
    }
}
