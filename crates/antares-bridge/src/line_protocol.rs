// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Resolved time-series points and their InfluxDB v2 Line Protocol encoding.
//!
//! Line Protocol format:
//! ```text
//! measurement,tag1=val1,tag2=val2 field1=val1,field2=val2 timestamp_ns
//! ```
//!
//! See: <https://docs.influxdata.com/influxdb/v2/reference/syntax/line-protocol/>

use std::collections::BTreeMap;
use std::fmt;

/// One fully resolved record, ready for the sink.
///
/// Tags and fields are kept in ordered maps so the encoded line is canonical
/// (sorted by key) regardless of the order the payload listed them in.
#[derive(Debug, Clone, PartialEq)]
pub struct Point {
    /// Measurement name (already aliased).
    pub measurement: String,
    /// Tag set (indexed string metadata).
    pub tags: BTreeMap<String, String>,
    /// Field set (numeric values). Never empty.
    pub fields: BTreeMap<String, f64>,
    /// Timestamp in nanoseconds since Unix epoch.
    pub timestamp_ns: u64,
}

impl Point {
    /// Encode this point as a single Line Protocol line (no trailing newline).
    pub fn to_line_protocol(&self) -> String {
        let mut line = escape_measurement(&self.measurement);

        for (key, value) in &self.tags {
            line.push(',');
            line.push_str(&escape_key(key));
            line.push('=');
            line.push_str(&escape_key(value));
        }

        line.push(' ');

        for (i, (key, value)) in self.fields.iter().enumerate() {
            if i > 0 {
                line.push(',');
            }
            line.push_str(&escape_key(key));
            line.push('=');
            line.push_str(&format_float(*value));
        }

        line.push(' ');
        line.push_str(&self.timestamp_ns.to_string());
        line
    }
}

impl fmt::Display for Point {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_line_protocol())
    }
}

/// Floats are written in shortest round-trip form (`23.5`, `1`, `-0.25`).
fn format_float(v: f64) -> String {
    format!("{}", v)
}

/// Escape a measurement name for Line Protocol.
/// Spaces and commas must be escaped with backslash.
fn escape_measurement(s: &str) -> String {
    s.replace('\\', "\\\\")
        .replace(',', "\\,")
        .replace(' ', "\\ ")
}

/// Escape tag keys, tag values and field keys.
/// Commas, equals signs, and spaces must be escaped.
fn escape_key(s: &str) -> String {
    s.replace('\\', "\\\\")
        .replace(',', "\\,")
        .replace('=', "\\=")
        .replace(' ', "\\ ")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn point(
        measurement: &str,
        tags: &[(&str, &str)],
        fields: &[(&str, f64)],
        timestamp_ns: u64,
    ) -> Point {
        Point {
            measurement: measurement.to_string(),
            tags: tags
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            fields: fields.iter().map(|(k, v)| (k.to_string(), *v)).collect(),
            timestamp_ns,
        }
    }

    #[test]
    fn test_line_protocol_simple_point() {
        let p = point("temperature", &[], &[("value", 23.5)], 1_000_000_000);
        assert_eq!(p.to_line_protocol(), "temperature value=23.5 1000000000");
    }

    #[test]
    fn test_line_protocol_with_tags() {
        let p = point(
            "temperature",
            &[("sensor", "A1"), ("location", "room1")],
            &[("value", 23.5)],
            1_000_000_000,
        );
        // Tags are sorted alphabetically by key
        assert_eq!(
            p.to_line_protocol(),
            "temperature,location=room1,sensor=A1 value=23.5 1000000000"
        );
    }

    #[test]
    fn test_line_protocol_multiple_fields_sorted() {
        let p = point(
            "acceleration",
            &[("environment", "antares")],
            &[("z", 3.0), ("x", 1.0), ("y", -2.25)],
            2_000_000_000,
        );
        assert_eq!(
            p.to_line_protocol(),
            "acceleration,environment=antares x=1,y=-2.25,z=3 2000000000"
        );
    }

    #[test]
    fn test_line_protocol_escape_special_chars() {
        let p = point(
            "my measurement",
            &[("tag key", "tag,value")],
            &[("field=key", 1.5)],
            3_000_000_000,
        );
        assert_eq!(
            p.to_line_protocol(),
            "my\\ measurement,tag\\ key=tag\\,value field\\=key=1.5 3000000000"
        );
    }

    #[test]
    fn test_display_matches_line_protocol() {
        let p = point("m", &[], &[("f", 1.0)], 1);
        assert_eq!(p.to_string(), "m f=1 1");
    }
}
