// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Payload decoding.
//!
//! Turns raw payload bytes into one or more field sets according to the
//! topic's schema. Decoding is all-or-nothing: any malformed sample fails the
//! whole message and nothing is emitted for it.

use crate::schema::{DecodeMode, ObjectSchema, Schema, SchemaNode};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use thiserror::Error;

/// Name of the single field produced by scalar payloads.
pub const SCALAR_FIELD: &str = "value";

/// Per-message decode failure.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum DecodeError {
    #[error("malformed payload: {0}")]
    Malformed(String),

    #[error("key '{0}' is not declared by the strict schema")]
    UnknownField(String),
}

impl DecodeError {
    /// Short failure kind for structured logs.
    pub fn kind(&self) -> &'static str {
        match self {
            DecodeError::Malformed(_) => "malformed",
            DecodeError::UnknownField(_) => "unknown_field",
        }
    }
}

/// Numeric fields of one sample, plus its embedded timestamp if it had one.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldSet {
    /// Output field name -> value.
    pub fields: BTreeMap<String, f64>,
    /// Embedded device timestamp in seconds.
    pub timestamp: Option<f64>,
}

/// Decode a payload for the given node.
pub fn decode(payload: &[u8], node: &SchemaNode) -> Result<Vec<FieldSet>, DecodeError> {
    match &node.schema {
        Schema::Scalar | Schema::NumberValue => Ok(vec![decode_scalar(payload)?]),
        Schema::Object(obj) => match obj.array_field.as_deref() {
            None => Ok(vec![decode_object(payload, obj)?]),
            Some(array_field) => decode_samples(payload, obj, array_field),
        },
    }
}

fn decode_scalar(payload: &[u8]) -> Result<FieldSet, DecodeError> {
    let text = std::str::from_utf8(payload)
        .map_err(|_| DecodeError::Malformed("payload is not valid UTF-8".into()))?;
    let value = parse_number(text)
        .ok_or_else(|| DecodeError::Malformed(format!("'{}' is not a numeric literal", text.trim())))?;

    let mut fields = BTreeMap::new();
    fields.insert(SCALAR_FIELD.to_string(), value);
    Ok(FieldSet {
        fields,
        timestamp: None,
    })
}

fn decode_object(payload: &[u8], schema: &ObjectSchema) -> Result<FieldSet, DecodeError> {
    let root = parse_object(payload)?;
    Ok(FieldSet {
        fields: map_fields(&root, schema, None)?,
        timestamp: None,
    })
}

fn decode_samples(
    payload: &[u8],
    schema: &ObjectSchema,
    array_field: &str,
) -> Result<Vec<FieldSet>, DecodeError> {
    let root = parse_object(payload)?;
    let samples = match root.get(array_field) {
        None => {
            return Err(DecodeError::Malformed(format!(
                "missing '{}' array",
                array_field
            )))
        }
        Some(Value::Array(samples)) => samples,
        Some(_) => {
            return Err(DecodeError::Malformed(format!(
                "'{}' is not an array",
                array_field
            )))
        }
    };
    if samples.is_empty() {
        return Err(DecodeError::Malformed(format!(
            "'{}' array is empty",
            array_field
        )));
    }

    let ts_key = schema.timestamp_field.as_str();
    samples
        .iter()
        .enumerate()
        .map(|(i, sample)| -> Result<FieldSet, DecodeError> {
            let sample = sample
                .as_object()
                .ok_or_else(|| DecodeError::Malformed(format!("sample {} is not an object", i)))?;
            let timestamp = sample
                .get(ts_key)
                .map(|v| coerce_timestamp(ts_key, v))
                .transpose()
                .map_err(|e| in_sample(i, e))?;
            let fields = map_fields(sample, schema, Some(ts_key)).map_err(|e| in_sample(i, e))?;
            Ok(FieldSet { fields, timestamp })
        })
        .collect()
}

/// Resolve every key of `object` through the alias table and coerce its value.
fn map_fields(
    object: &Map<String, Value>,
    schema: &ObjectSchema,
    skip: Option<&str>,
) -> Result<BTreeMap<String, f64>, DecodeError> {
    let mut fields = BTreeMap::new();

    for (key, value) in object {
        if Some(key.as_str()) == skip {
            continue;
        }
        if schema.mode == DecodeMode::Strict && !schema.is_declared(key) {
            return Err(DecodeError::UnknownField(key.clone()));
        }

        let name = schema.field_name(key);
        let number = coerce(key, value)?;
        if fields.insert(name.to_string(), number).is_some() {
            return Err(DecodeError::Malformed(format!(
                "more than one key maps to field '{}'",
                name
            )));
        }
    }

    if let Some(missing) = schema.required_keys().find(|key| !object.contains_key(*key)) {
        return Err(DecodeError::Malformed(format!(
            "missing required key '{}'",
            missing
        )));
    }

    if fields.is_empty() {
        return Err(DecodeError::Malformed("no fields".into()));
    }
    Ok(fields)
}

fn parse_object(payload: &[u8]) -> Result<Map<String, Value>, DecodeError> {
    match serde_json::from_slice::<Value>(payload) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(_) => Err(DecodeError::Malformed("expected a JSON object".into())),
        Err(e) => Err(DecodeError::Malformed(format!("invalid JSON: {}", e))),
    }
}

/// Convert a JSON value to a finite number.
///
/// Booleans map to 1/0 and numeric strings are parsed; null, arrays and
/// nested objects are rejected.
fn coerce(key: &str, value: &Value) -> Result<f64, DecodeError> {
    let number = match value {
        Value::Number(n) => n.as_f64(),
        Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
        Value::String(s) => parse_number(s),
        Value::Null | Value::Array(_) | Value::Object(_) => None,
    };
    number
        .filter(|v| v.is_finite())
        .ok_or_else(|| DecodeError::Malformed(format!("field '{}' is not numeric", key)))
}

/// Embedded timestamps must be numbers or numeric strings, never booleans.
fn coerce_timestamp(key: &str, value: &Value) -> Result<f64, DecodeError> {
    match value {
        Value::Number(_) | Value::String(_) => coerce(key, value),
        _ => Err(DecodeError::Malformed(format!(
            "timestamp '{}' is not numeric",
            key
        ))),
    }
}

fn parse_number(text: &str) -> Option<f64> {
    text.trim().parse::<f64>().ok().filter(|v| v.is_finite())
}

fn in_sample(index: usize, err: DecodeError) -> DecodeError {
    match err {
        DecodeError::Malformed(msg) => DecodeError::Malformed(format!("sample {}: {}", index, msg)),
        other => other,
    }
}
