// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Schema registry.
//!
//! Flattens the environment -> location -> sensor hierarchy of the
//! configuration into one immutable `topic -> SchemaNode` table. The whole
//! hierarchy is validated when the registry is built; a registry that exists
//! is a registry that is valid.

use crate::config::{BridgeConfig, SchemaConfig, SensorConfig};
use crate::matcher;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use thiserror::Error;

/// Tag key carrying the environment a sensor belongs to.
pub const ENVIRONMENT_TAG: &str = "environment";
/// Tag key carrying the location a sensor belongs to.
pub const LOCATION_TAG: &str = "location";
/// Default key of the embedded per-sample timestamp.
pub const DEFAULT_TIMESTAMP_FIELD: &str = "timestamp";

/// Registry load errors. All of them are fatal at startup.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SchemaError {
    #[error("topic '{topic}' is defined under both {first} and {second}")]
    DuplicateTopic {
        topic: String,
        first: String,
        second: String,
    },

    #[error("sensor '{topic}' declares neither a measurement nor an alias")]
    MissingMeasurement { topic: String },

    #[error("sensor '{topic}' has unknown schema type '{found}' (expected scalar, number_value or object)")]
    UnknownSchemaType { topic: String, found: String },

    #[error("invalid topic '{topic}': {reason}")]
    InvalidTopic { topic: String, reason: &'static str },

    #[error("sensor '{topic}' sets object options on a '{kind}' schema")]
    UnexpectedObjectOptions { topic: String, kind: String },

    #[error("sensor '{topic}' maps more than one property to field '{field}'")]
    AliasCollision { topic: String, field: String },

    #[error("sensor '{topic}' overrides reserved tag '{tag}'")]
    ReservedTag { topic: String, tag: String },

    #[error("sensor '{topic}' has an empty key or value for tag '{tag}'")]
    EmptyTag { topic: String, tag: String },

    #[error("configuration declares no topics")]
    Empty,
}

/// What to do with payload keys an object schema does not declare.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecodeMode {
    /// Emit undeclared keys under their raw name.
    #[default]
    Permissive,
    /// Reject the whole message.
    Strict,
}

/// Payload shape of a topic.
#[derive(Debug, Clone, PartialEq)]
pub enum Schema {
    /// A bare numeric literal.
    Scalar,
    /// A bare numeric literal (declared as `number_value`).
    NumberValue,
    /// A JSON object, optionally wrapping an array of samples.
    Object(ObjectSchema),
}

impl Schema {
    /// Configuration name of this variant.
    pub fn kind(&self) -> &'static str {
        match self {
            Schema::Scalar => "scalar",
            Schema::NumberValue => "number_value",
            Schema::Object(_) => "object",
        }
    }
}

/// Object payload description.
#[derive(Debug, Clone, PartialEq)]
pub struct ObjectSchema {
    /// Declared keys and their optional aliases.
    pub properties: BTreeMap<String, Property>,
    /// Key of the sample array, for array-of-samples payloads.
    pub array_field: Option<String>,
    /// Key of the embedded timestamp inside each sample.
    pub timestamp_field: String,
    /// Unknown-key policy.
    pub mode: DecodeMode,
}

impl ObjectSchema {
    /// Output field name for a payload key: the alias if one is declared,
    /// the raw key otherwise.
    pub fn field_name<'a>(&'a self, key: &'a str) -> &'a str {
        self.properties
            .get(key)
            .and_then(|p| p.alias.as_deref())
            .unwrap_or(key)
    }

    /// Whether `key` is declared in `properties`.
    pub fn is_declared(&self, key: &str) -> bool {
        self.properties.contains_key(key)
    }

    /// Declared keys every payload must carry.
    pub fn required_keys(&self) -> impl Iterator<Item = &str> {
        self.properties
            .iter()
            .filter(|(_, p)| p.required)
            .map(|(k, _)| k.as_str())
    }
}

/// Options of one declared key.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Property {
    pub alias: Option<String>,
    /// A payload without this key fails to decode.
    pub required: bool,
}

/// Everything the pipeline needs to turn one topic's payload into points.
#[derive(Debug, Clone, PartialEq)]
pub struct SchemaNode {
    /// Exact bus topic.
    pub topic: String,
    /// Externally visible measurement name.
    pub measurement: String,
    /// Declared measurement name, kept for diagnostics.
    pub base_name: String,
    /// Static tags inherited from the hierarchy plus per-sensor tags.
    pub tags: BTreeMap<String, String>,
    /// Payload shape.
    pub schema: Schema,
}

/// Immutable `topic -> SchemaNode` table.
#[derive(Debug, Clone, Default)]
pub struct Registry {
    nodes: BTreeMap<String, SchemaNode>,
}

impl Registry {
    /// Build and validate the registry from the configuration hierarchy.
    pub fn load(config: &BridgeConfig) -> Result<Self, SchemaError> {
        let default_mode = config.bridge.default_mode;
        let mut nodes = BTreeMap::new();
        let mut origins: BTreeMap<String, String> = BTreeMap::new();

        for (env_name, env) in &config.environments {
            for (loc_name, location) in &env.locations {
                let origin = format!("{}/{}", env_name, loc_name);

                for (topic, sensor) in &location.sensors {
                    if let Some(first) = origins.get(topic) {
                        return Err(SchemaError::DuplicateTopic {
                            topic: topic.clone(),
                            first: first.clone(),
                            second: origin,
                        });
                    }

                    let node = build_node(topic, env_name, loc_name, sensor, default_mode)?;
                    origins.insert(topic.clone(), origin.clone());
                    nodes.insert(topic.clone(), node);
                }
            }
        }

        if nodes.is_empty() {
            return Err(SchemaError::Empty);
        }

        tracing::debug!("Schema registry loaded with {} topics", nodes.len());
        Ok(Self { nodes })
    }

    /// Exact lookup of a topic.
    pub fn get(&self, topic: &str) -> Option<&SchemaNode> {
        self.nodes.get(topic)
    }

    /// All registered topics, sorted.
    pub fn topics(&self) -> impl Iterator<Item = &str> {
        self.nodes.keys().map(String::as_str)
    }

    /// All registered nodes, sorted by topic.
    pub fn nodes(&self) -> impl Iterator<Item = &SchemaNode> {
        self.nodes.values()
    }

    /// Number of registered topics.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// True when no topic is registered.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

fn build_node(
    topic: &str,
    env_name: &str,
    loc_name: &str,
    sensor: &SensorConfig,
    default_mode: DecodeMode,
) -> Result<SchemaNode, SchemaError> {
    matcher::validate_topic(topic).map_err(|reason| SchemaError::InvalidTopic {
        topic: topic.to_string(),
        reason,
    })?;

    let base_name = non_empty(&sensor.measurement);
    let alias = non_empty(&sensor.alias);
    let (measurement, base_name) = match (alias, base_name) {
        (Some(alias), Some(base)) => (alias.to_string(), base.to_string()),
        (Some(alias), None) => (alias.to_string(), alias.to_string()),
        (None, Some(base)) => (base.to_string(), base.to_string()),
        (None, None) => {
            return Err(SchemaError::MissingMeasurement {
                topic: topic.to_string(),
            })
        }
    };

    let mut tags = BTreeMap::new();
    tags.insert(ENVIRONMENT_TAG.to_string(), env_name.to_string());
    tags.insert(LOCATION_TAG.to_string(), loc_name.to_string());
    for (key, value) in &sensor.tags {
        if key == ENVIRONMENT_TAG || key == LOCATION_TAG {
            return Err(SchemaError::ReservedTag {
                topic: topic.to_string(),
                tag: key.clone(),
            });
        }
        tags.insert(key.clone(), value.clone());
    }

    // Line Protocol has no encoding for an empty tag key or value.
    if let Some((key, _)) = tags.iter().find(|(k, v)| k.is_empty() || v.is_empty()) {
        return Err(SchemaError::EmptyTag {
            topic: topic.to_string(),
            tag: key.clone(),
        });
    }

    let schema = match &sensor.schema {
        None => Schema::Scalar,
        Some(cfg) => build_schema(topic, cfg, default_mode)?,
    };

    Ok(SchemaNode {
        topic: topic.to_string(),
        measurement,
        base_name,
        tags,
        schema,
    })
}

fn build_schema(
    topic: &str,
    cfg: &SchemaConfig,
    default_mode: DecodeMode,
) -> Result<Schema, SchemaError> {
    let has_object_options = !cfg.properties.is_empty()
        || cfg.array_field.is_some()
        || cfg.timestamp_field.is_some()
        || cfg.mode.is_some();

    let scalar = match cfg.kind.as_str() {
        "scalar" => Some(Schema::Scalar),
        "number_value" => Some(Schema::NumberValue),
        "object" => None,
        other => {
            return Err(SchemaError::UnknownSchemaType {
                topic: topic.to_string(),
                found: other.to_string(),
            })
        }
    };

    if let Some(schema) = scalar {
        if has_object_options {
            return Err(SchemaError::UnexpectedObjectOptions {
                topic: topic.to_string(),
                kind: cfg.kind.clone(),
            });
        }
        return Ok(schema);
    }

    let mode = cfg.mode.unwrap_or(default_mode);
    let properties: BTreeMap<String, Property> = cfg
        .properties
        .iter()
        .map(|(key, prop)| {
            (
                key.clone(),
                Property {
                    alias: non_empty(&prop.alias).map(str::to_string),
                    required: prop.required.unwrap_or(mode == DecodeMode::Strict),
                },
            )
        })
        .collect();

    let mut outputs = BTreeSet::new();
    for (key, prop) in &properties {
        let name = prop.alias.as_deref().unwrap_or(key);
        if !outputs.insert(name) {
            return Err(SchemaError::AliasCollision {
                topic: topic.to_string(),
                field: name.to_string(),
            });
        }
    }

    Ok(Schema::Object(ObjectSchema {
        properties,
        array_field: non_empty(&cfg.array_field).map(str::to_string),
        timestamp_field: non_empty(&cfg.timestamp_field)
            .unwrap_or(DEFAULT_TIMESTAMP_FIELD)
            .to_string(),
        mode,
    }))
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|s| !s.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn load(yaml: &str) -> Result<Registry, SchemaError> {
        let config = BridgeConfig::from_yaml(yaml).expect("parse yaml");
        Registry::load(&config)
    }

    const BOAT_YAML: &str = r#"
environments:
  antares:
    locations:
      Salon:
        sensors:
          "antares/3960722352/28ee2d1d01160126":
            measurement: temperature
      Board:
        sensors:
          "antares/3960722352/accel":
            measurement: acceleration
            alias: accel
            tags:
              chip: adxl345
            schema:
              type: object
              array_field: data
              properties:
                x: { alias: accel_x }
                y: {}
"#;

    #[test]
    fn test_load_flattens_hierarchy() {
        let registry = load(BOAT_YAML).expect("load");
        assert_eq!(registry.len(), 2);

        let topics: Vec<_> = registry.topics().collect();
        assert_eq!(
            topics,
            vec![
                "antares/3960722352/28ee2d1d01160126",
                "antares/3960722352/accel"
            ]
        );

        let salon = registry
            .get("antares/3960722352/28ee2d1d01160126")
            .expect("salon");
        assert_eq!(salon.measurement, "temperature");
        assert_eq!(salon.schema, Schema::Scalar);
        assert_eq!(salon.tags[ENVIRONMENT_TAG], "antares");
        assert_eq!(salon.tags[LOCATION_TAG], "Salon");
    }

    #[test]
    fn test_alias_overrides_measurement() {
        let registry = load(BOAT_YAML).expect("load");
        let accel = registry.get("antares/3960722352/accel").expect("accel");

        assert_eq!(accel.measurement, "accel");
        assert_eq!(accel.base_name, "acceleration");
        assert_eq!(accel.tags["chip"], "adxl345");
        assert_eq!(accel.tags[LOCATION_TAG], "Board");

        match &accel.schema {
            Schema::Object(obj) => {
                assert_eq!(obj.array_field.as_deref(), Some("data"));
                assert_eq!(obj.timestamp_field, DEFAULT_TIMESTAMP_FIELD);
                assert_eq!(obj.mode, DecodeMode::Permissive);
                assert_eq!(obj.field_name("x"), "accel_x");
                assert_eq!(obj.field_name("y"), "y");
                assert_eq!(obj.field_name("undeclared"), "undeclared");
            }
            other => panic!("expected object schema, got {:?}", other),
        }
    }

    #[test]
    fn test_alias_without_measurement() {
        let registry = load(
            r#"
environments:
  e:
    locations:
      l:
        sensors:
          "t/1":
            alias: humidity
"#,
        )
        .expect("load");
        let node = registry.get("t/1").expect("node");
        assert_eq!(node.measurement, "humidity");
        assert_eq!(node.base_name, "humidity");
    }

    #[test]
    fn test_duplicate_topic_across_locations_rejected() {
        let err = load(
            r#"
environments:
  antares:
    locations:
      Motor:
        sensors:
          "antares/salon": { measurement: temperature }
      Salon:
        sensors:
          "antares/salon": { measurement: temperature }
"#,
        )
        .expect_err("duplicate must fail");

        assert_eq!(
            err,
            SchemaError::DuplicateTopic {
                topic: "antares/salon".into(),
                first: "antares/Motor".into(),
                second: "antares/Salon".into(),
            }
        );
    }

    #[test]
    fn test_duplicate_topic_across_environments_rejected() {
        let err = load(
            r#"
environments:
  dock:
    locations:
      a:
        sensors:
          "shared": { measurement: m }
  sea:
    locations:
      a:
        sensors:
          "shared": { measurement: m }
"#,
        )
        .expect_err("duplicate must fail");
        assert!(matches!(err, SchemaError::DuplicateTopic { .. }));
    }

    #[test]
    fn test_missing_measurement_rejected() {
        let err = load(
            r#"
environments:
  e:
    locations:
      l:
        sensors:
          "t/1":
            tags: { a: b }
"#,
        )
        .expect_err("must fail");
        assert_eq!(
            err,
            SchemaError::MissingMeasurement {
                topic: "t/1".into()
            }
        );
    }

    #[test]
    fn test_unknown_schema_type_rejected() {
        let err = load(
            r#"
environments:
  e:
    locations:
      l:
        sensors:
          "t/1":
            measurement: m
            schema: { type: protobuf }
"#,
        )
        .expect_err("must fail");
        assert_eq!(
            err,
            SchemaError::UnknownSchemaType {
                topic: "t/1".into(),
                found: "protobuf".into()
            }
        );
    }

    #[test]
    fn test_number_value_schema() {
        let registry = load(
            r#"
environments:
  e:
    locations:
      l:
        sensors:
          "t/count":
            measurement: sensor_count
            schema: { type: number_value }
"#,
        )
        .expect("load");
        assert_eq!(registry.get("t/count").expect("node").schema, Schema::NumberValue);
    }

    #[test]
    fn test_object_options_on_scalar_rejected() {
        let err = load(
            r#"
environments:
  e:
    locations:
      l:
        sensors:
          "t/1":
            measurement: m
            schema: { type: scalar, array_field: data }
"#,
        )
        .expect_err("must fail");
        assert!(matches!(err, SchemaError::UnexpectedObjectOptions { .. }));
    }

    #[test]
    fn test_alias_collision_rejected() {
        let err = load(
            r#"
environments:
  e:
    locations:
      l:
        sensors:
          "t/1":
            measurement: m
            schema:
              type: object
              properties:
                a: { alias: b }
                b: {}
"#,
        )
        .expect_err("must fail");
        assert_eq!(
            err,
            SchemaError::AliasCollision {
                topic: "t/1".into(),
                field: "b".into()
            }
        );
    }

    #[test]
    fn test_wildcard_topic_rejected() {
        let err = load(
            r#"
environments:
  e:
    locations:
      l:
        sensors:
          "antares/+/accel": { measurement: m }
"#,
        )
        .expect_err("must fail");
        assert!(matches!(err, SchemaError::InvalidTopic { .. }));
    }

    #[test]
    fn test_reserved_tag_rejected() {
        let err = load(
            r#"
environments:
  e:
    locations:
      l:
        sensors:
          "t/1":
            measurement: m
            tags: { location: elsewhere }
"#,
        )
        .expect_err("must fail");
        assert!(matches!(err, SchemaError::ReservedTag { .. }));
    }

    #[test]
    fn test_empty_tag_rejected() {
        let err = load(
            r#"
environments:
  antares:
    locations:
      Salon:
        sensors:
          "antares/3960722352/28ee2d1d01160126":
            measurement: temperature
            tags: { chip: "" }
"#,
        )
        .expect_err("must fail");
        assert_eq!(
            err,
            SchemaError::EmptyTag {
                topic: "antares/3960722352/28ee2d1d01160126".into(),
                tag: "chip".into(),
            }
        );

        let err = load(
            r#"
environments:
  e:
    locations:
      "":
        sensors:
          "t/1": { measurement: m }
"#,
        )
        .expect_err("must fail");
        assert_eq!(
            err,
            SchemaError::EmptyTag {
                topic: "t/1".into(),
                tag: LOCATION_TAG.into(),
            }
        );
    }

    #[test]
    fn test_required_defaults_follow_mode() {
        let registry = load(
            r#"
environments:
  e:
    locations:
      l:
        sensors:
          "t/strict":
            measurement: m
            schema:
              type: object
              mode: strict
              properties:
                x: {}
                y: { required: false }
          "t/loose":
            measurement: m
            schema:
              type: object
              properties:
                x: {}
                y: { required: true }
"#,
        )
        .expect("load");

        let required = |topic: &str| match &registry.get(topic).expect("node").schema {
            Schema::Object(obj) => obj.required_keys().map(str::to_string).collect::<Vec<_>>(),
            other => panic!("expected object, got {:?}", other),
        };
        assert_eq!(required("t/strict"), vec!["x".to_string()]);
        assert_eq!(required("t/loose"), vec!["y".to_string()]);
    }

    #[test]
    fn test_default_mode_applies_to_object_schemas() {
        let registry = load(
            r#"
bridge:
  default_mode: strict
environments:
  e:
    locations:
      l:
        sensors:
          "t/1":
            measurement: m
            schema: { type: object }
          "t/2":
            measurement: m
            schema: { type: object, mode: permissive }
"#,
        )
        .expect("load");

        let mode = |topic: &str| match &registry.get(topic).expect("node").schema {
            Schema::Object(obj) => obj.mode,
            other => panic!("expected object, got {:?}", other),
        };
        assert_eq!(mode("t/1"), DecodeMode::Strict);
        assert_eq!(mode("t/2"), DecodeMode::Permissive);
    }

    #[test]
    fn test_empty_config_rejected() {
        assert_eq!(load("environments: {}\n").expect_err("must fail"), SchemaError::Empty);
    }
}
