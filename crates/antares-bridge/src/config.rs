// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! YAML configuration for the bridge.
//!
//! The file carries two things: runtime settings under `bridge:` and the
//! topic hierarchy (environment -> location -> sensor) under `environments:`.
//! Credentials are not part of the file; they are injected by the CLI.

use crate::schema::DecodeMode;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML parse error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Top-level bridge configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BridgeConfig {
    /// Runtime settings.
    #[serde(default)]
    pub bridge: BridgeSettings,

    /// Topic hierarchy, keyed by environment name.
    #[serde(default)]
    pub environments: BTreeMap<String, EnvironmentConfig>,
}

/// Runtime settings for the dispatch loop and the sink.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BridgeSettings {
    /// Bridge name, used as the MQTT client id.
    #[serde(default = "default_name")]
    pub name: String,

    /// Maximum number of pipeline passes running at once.
    #[serde(default = "default_max_in_flight")]
    pub max_in_flight: usize,

    /// Capacity of the inbound message queue.
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,

    /// Upper bound for a single point write (milliseconds).
    #[serde(default = "default_write_timeout_ms")]
    pub write_timeout_ms: u64,

    /// Number of payload bytes quoted in drop/failure log lines.
    #[serde(default = "default_payload_preview_bytes")]
    pub payload_preview_bytes: usize,

    /// Unknown-key policy for object schemas that do not set `mode`.
    #[serde(default)]
    pub default_mode: DecodeMode,

    /// MQTT keep-alive interval (seconds).
    #[serde(default = "default_keep_alive_secs")]
    pub keep_alive_secs: u64,
}

fn default_name() -> String {
    "antares-bridge".to_string()
}

fn default_max_in_flight() -> usize {
    8
}

fn default_queue_capacity() -> usize {
    1024
}

fn default_write_timeout_ms() -> u64 {
    5000
}

fn default_payload_preview_bytes() -> usize {
    64
}

fn default_keep_alive_secs() -> u64 {
    30
}

impl Default for BridgeSettings {
    fn default() -> Self {
        Self {
            name: default_name(),
            max_in_flight: default_max_in_flight(),
            queue_capacity: default_queue_capacity(),
            write_timeout_ms: default_write_timeout_ms(),
            payload_preview_bytes: default_payload_preview_bytes(),
            default_mode: DecodeMode::default(),
            keep_alive_secs: default_keep_alive_secs(),
        }
    }
}

impl BridgeSettings {
    /// Write timeout as a [`Duration`].
    pub fn write_timeout(&self) -> Duration {
        Duration::from_millis(self.write_timeout_ms)
    }
}

/// One environment: a set of locations.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EnvironmentConfig {
    #[serde(default)]
    pub locations: BTreeMap<String, LocationConfig>,
}

/// One location: a set of sensors keyed by their exact bus topic.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LocationConfig {
    #[serde(default)]
    pub sensors: BTreeMap<String, SensorConfig>,
}

/// A single sensor entry.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SensorConfig {
    /// Declared base measurement name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub measurement: Option<String>,

    /// Externally visible measurement name, overrides `measurement`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alias: Option<String>,

    /// Extra static tags for this sensor.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub tags: BTreeMap<String, String>,

    /// Payload shape. Absent means a scalar payload.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema: Option<SchemaConfig>,
}

/// Payload schema as written in the configuration file.
///
/// `kind` is kept as free text so that an unknown type is reported by the
/// registry loader with the offending topic, not as a bare YAML error.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchemaConfig {
    #[serde(rename = "type")]
    pub kind: String,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub properties: BTreeMap<String, PropertyConfig>,

    /// Name of the array holding the samples, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub array_field: Option<String>,

    /// Key of the embedded sample timestamp (default `timestamp`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp_field: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mode: Option<DecodeMode>,
}

/// Per-key options of an object schema.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PropertyConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alias: Option<String>,

    /// Whether every payload (or sample) must carry this key. Defaults to
    /// `true` under `mode: strict` and `false` otherwise.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub required: Option<bool>,
}

impl BridgeConfig {
    /// Parse configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigError> {
        let config: BridgeConfig = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Parse configuration from a YAML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    /// Validate the runtime settings.
    ///
    /// The topic hierarchy is validated by [`crate::Registry::load`].
    pub fn validate(&self) -> Result<(), ConfigError> {
        let settings = &self.bridge;
        if settings.name.is_empty() {
            return Err(ConfigError::Invalid("bridge.name is empty".into()));
        }
        if settings.max_in_flight == 0 {
            return Err(ConfigError::Invalid(
                "bridge.max_in_flight must be at least 1".into(),
            ));
        }
        if settings.queue_capacity == 0 {
            return Err(ConfigError::Invalid(
                "bridge.queue_capacity must be at least 1".into(),
            ));
        }
        if settings.write_timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "bridge.write_timeout_ms must be greater than 0".into(),
            ));
        }
        Ok(())
    }

    /// Example configuration mirroring a small boat deployment: two
    /// temperature sensors and an accelerometer streaming sample packets.
    pub fn example() -> Self {
        let temperature = || SensorConfig {
            measurement: Some("temperature".into()),
            ..Default::default()
        };

        let mut salon = LocationConfig::default();
        salon.sensors.insert(
            "antares/3960722352/28ee2d1d01160126".into(),
            temperature(),
        );

        let mut motor = LocationConfig::default();
        motor.sensors.insert(
            "antares/3960722352/28ee28d500160298".into(),
            temperature(),
        );

        let mut board = LocationConfig::default();
        board.sensors.insert(
            "antares/3960722352/accel".into(),
            SensorConfig {
                measurement: Some("acceleration".into()),
                schema: Some(SchemaConfig {
                    kind: "object".into(),
                    properties: ["x", "y", "z"]
                        .iter()
                        .map(|k| (k.to_string(), PropertyConfig::default()))
                        .collect(),
                    array_field: Some("data".into()),
                    timestamp_field: Some("timestamp".into()),
                    mode: None,
                }),
                ..Default::default()
            },
        );

        let mut antares = EnvironmentConfig::default();
        antares.locations.insert("Salon".into(), salon);
        antares.locations.insert("Motor".into(), motor);
        antares.locations.insert("Board".into(), board);

        let mut config = BridgeConfig::default();
        config.environments.insert("antares".into(), antares);
        config
    }
}
