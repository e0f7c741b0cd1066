// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Antares MQTT to InfluxDB Bridge
//!
//! Turns sensor messages published on an MQTT bus into InfluxDB points,
//! driven by a declarative YAML schema.
//!
//! This crate provides:
//! - A schema registry mapping exact topics to measurements, tags and decoders
//! - Scalar, object and array-of-samples payload decoding
//! - Timestamp normalization against the bus arrival time
//! - InfluxDB v2 Line Protocol writers (HTTP, stdout, in-memory)
//! - A bounded concurrent dispatcher fed by an MQTT subscriber
//!
//! # Overview
//!
//! ```text
//! MQTT publish --> Bridge queue --> resolve --> decode --> normalize --> PointWriter
//! ```
//!
//! # Configuration File
//!
//! ```yaml
//! bridge:
//!   max_in_flight: 8
//! environments:
//!   antares:
//!     locations:
//!       Salon:
//!         sensors:
//!           "antares/3960722352/28ee2d1d01160126":
//!             measurement: temperature
//!       Board:
//!         sensors:
//!           "antares/3960722352/accel":
//!             measurement: acceleration
//!             schema:
//!               type: object
//!               array_field: data
//!               properties:
//!                 x: {}
//!                 y: {}
//!                 z: {}
//! ```

pub mod config;
pub mod decode;
pub mod dispatch;
pub mod line_protocol;
pub mod matcher;
pub mod pipeline;
pub mod schema;
pub mod source;
pub mod timestamp;
pub mod writer;

pub use config::{BridgeConfig, BridgeSettings, ConfigError};
pub use decode::{decode, DecodeError, FieldSet};
pub use dispatch::{Bridge, BridgeError, BridgeHandle};
pub use line_protocol::Point;
pub use pipeline::{InboundMessage, PassOutcome, Pipeline, PipelineStats, PipelineStatsSnapshot};
pub use schema::{DecodeMode, Registry, Schema, SchemaError, SchemaNode};
pub use source::{MqttConfig, MqttSource};
pub use timestamp::normalize;
pub use writer::{InfluxConfig, InfluxWriter, MemoryWriter, PointWriter, StdoutWriter, WriteError};
