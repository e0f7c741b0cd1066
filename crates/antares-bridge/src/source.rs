// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! MQTT message source.
//!
//! Subscribes to every registered topic and feeds publishes into a running
//! bridge. Subscriptions are re-issued on every (re)connect. Connection errors
//! are logged and retried after [`RECONNECT_DELAY`].

use crate::dispatch::{BridgeError, BridgeHandle};
use crate::pipeline::InboundMessage;
use rumqttc::{AsyncClient, Event, MqttOptions, Packet, QoS};
use std::time::Duration;

/// Default MQTT port.
pub const DEFAULT_PORT: u16 = 1883;

/// Delay between reconnect attempts.
pub const RECONNECT_DELAY: Duration = Duration::from_secs(1);

/// Lowest keep-alive interval the client accepts.
const MIN_KEEP_ALIVE: Duration = Duration::from_secs(5);

/// Broker connection settings.
#[derive(Debug, Clone)]
pub struct MqttConfig {
    /// Broker URL (e.g., "mqtt://localhost:1883").
    pub url: String,
    /// Client identifier.
    pub client_id: String,
    pub username: Option<String>,
    pub password: Option<String>,
    /// Keep-alive interval.
    pub keep_alive: Duration,
}

/// Split a broker URL into host and port.
///
/// Accepts `mqtt://host[:port]`, `tcp://host[:port]` or a bare `host[:port]`.
pub fn parse_broker_url(url: &str) -> Result<(String, u16), BridgeError> {
    let rest = match url.split_once("://") {
        Some(("mqtt" | "tcp", rest)) => rest,
        Some((scheme, _)) => {
            return Err(BridgeError::Bus(format!(
                "unsupported broker scheme '{}' in '{}'",
                scheme, url
            )))
        }
        None => url,
    };
    let rest = rest.trim_end_matches('/');

    let (host, port) = match rest.rsplit_once(':') {
        Some((host, port)) => {
            let port = port
                .parse::<u16>()
                .map_err(|_| BridgeError::Bus(format!("invalid broker port in '{}'", url)))?;
            (host, port)
        }
        None => (rest, DEFAULT_PORT),
    };

    if host.is_empty() {
        return Err(BridgeError::Bus(format!("missing broker host in '{}'", url)));
    }
    Ok((host.to_string(), port))
}

/// MQTT subscriber feeding a bridge.
pub struct MqttSource {
    options: MqttOptions,
    topics: Vec<String>,
}

impl MqttSource {
    /// Build a source subscribing to `topics`.
    pub fn new(config: &MqttConfig, topics: Vec<String>) -> Result<Self, BridgeError> {
        let (host, port) = parse_broker_url(&config.url)?;

        let mut options = MqttOptions::new(config.client_id.clone(), host, port);
        options.set_keep_alive(config.keep_alive.max(MIN_KEEP_ALIVE));
        if let Some(ref username) = config.username {
            options.set_credentials(
                username.clone(),
                config.password.clone().unwrap_or_default(),
            );
        }

        Ok(Self { options, topics })
    }

    /// Topics subscribed on connect.
    pub fn topics(&self) -> &[String] {
        &self.topics
    }

    /// Run until the bridge stops.
    pub async fn run(self, bridge: BridgeHandle) -> Result<(), BridgeError> {
        let (host, port) = self.options.broker_address();
        tracing::info!("Connecting to MQTT broker {}:{}", host, port);

        let capacity = self.topics.len().max(64);
        let (client, mut eventloop) = AsyncClient::new(self.options, capacity);

        loop {
            let event = tokio::select! {
                _ = bridge.stopped() => break,
                event = eventloop.poll() => event,
            };

            match event {
                Ok(Event::Incoming(Packet::ConnAck(_))) => {
                    tracing::info!("Connected to MQTT broker {}:{}", host, port);
                    subscribe_all(&client, &self.topics);
                }
                Ok(Event::Incoming(Packet::Publish(publish))) => {
                    let msg = InboundMessage::new(publish.topic, publish.payload.to_vec());
                    if bridge.submit(msg).await.is_err() {
                        break;
                    }
                }
                Ok(_) => {}
                Err(e) => {
                    tracing::warn!("MQTT connection error: {}; retrying", e);
                    tokio::time::sleep(RECONNECT_DELAY).await;
                }
            }
        }

        if let Err(e) = client.try_disconnect() {
            tracing::debug!("MQTT disconnect failed: {}", e);
        }
        tracing::info!("MQTT source stopped");
        Ok(())
    }
}

/// Request a subscription for every topic. Failures are logged and retried
/// on the next connect. Returns the number of requests queued.
fn subscribe_all(client: &AsyncClient, topics: &[String]) -> usize {
    let mut queued = 0;
    for topic in topics {
        match client.try_subscribe(topic.as_str(), QoS::AtMostOnce) {
            Ok(()) => {
                queued += 1;
                tracing::debug!(topic = %topic, "Subscribed");
            }
            Err(e) => tracing::error!(topic = %topic, error = %e, "Subscribe request failed"),
        }
    }
    if queued < topics.len() {
        tracing::warn!(
            "{} of {} subscriptions not requested; retrying on reconnect",
            topics.len() - queued,
            topics.len()
        );
    }
    queued
}
