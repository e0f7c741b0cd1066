// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Timestamp normalization.
//!
//! Device clocks are not synchronized, so embedded sample timestamps are only
//! trusted relative to each other. The first embedded timestamp of a packet is
//! pinned to the bus arrival time and every other sample keeps its offset
//! from it:
//!
//! ```text
//! point_ts = received_at + trunc((sample_ts - t0) * 1e9)
//! ```

use crate::decode::FieldSet;
use crate::line_protocol::Point;
use crate::schema::SchemaNode;
use std::time::{SystemTime, UNIX_EPOCH};

const NANOS_PER_SEC: f64 = 1e9;

/// Current wall-clock time in nanoseconds since Unix epoch.
pub fn now_ns() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(0)
}

/// Offset between two embedded timestamps (seconds), in nanoseconds.
///
/// Truncates toward zero; `as` saturates on overflow.
pub fn offset_ns(t0: f64, ts: f64) -> i64 {
    ((ts - t0) * NANOS_PER_SEC).trunc() as i64
}

/// Attach timestamps to decoded field sets and build the points.
///
/// Field sets without an embedded timestamp are stamped with `received_at_ns`.
/// `t0` is the first embedded timestamp found in the pass.
pub fn normalize(node: &SchemaNode, field_sets: Vec<FieldSet>, received_at_ns: u64) -> Vec<Point> {
    let t0 = field_sets.iter().find_map(|fs| fs.timestamp);

    field_sets
        .into_iter()
        .map(|fs| {
            let timestamp_ns = match (t0, fs.timestamp) {
                (Some(t0), Some(ts)) => received_at_ns.saturating_add_signed(offset_ns(t0, ts)),
                _ => received_at_ns,
            };
            Point {
                measurement: node.measurement.clone(),
                tags: node.tags.clone(),
                fields: fs.fields,
                timestamp_ns,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::Schema;
    use std::collections::BTreeMap;

    const R: u64 = 1_000_000_000_000_000_000;

    fn node() -> SchemaNode {
        let mut tags = BTreeMap::new();
        tags.insert("location".to_string(), "Board".to_string());
        SchemaNode {
            topic: "antares/accel".into(),
            measurement: "acceleration".into(),
            base_name: "acceleration".into(),
            tags,
            schema: Schema::Scalar,
        }
    }

    fn set(timestamp: Option<f64>) -> FieldSet {
        let mut fields = BTreeMap::new();
        fields.insert("x".to_string(), 1.0);
        FieldSet { fields, timestamp }
    }

    fn stamps(points: &[Point]) -> Vec<u64> {
        points.iter().map(|p| p.timestamp_ns).collect()
    }

    #[test]
    fn test_no_embedded_timestamp_uses_received_at() {
        let points = normalize(&node(), vec![set(None)], R);
        assert_eq!(stamps(&points), vec![R]);
        assert_eq!(points[0].measurement, "acceleration");
        assert_eq!(points[0].tags["location"], "Board");
    }

    #[test]
    fn test_relative_spacing_preserved() {
        let points = normalize(
            &node(),
            vec![set(Some(100.0)), set(Some(100.5)), set(Some(101.25))],
            R,
        );
        assert_eq!(
            stamps(&points),
            vec![R, R + 500_000_000, R + 1_250_000_000]
        );
    }

    #[test]
    fn test_sub_millisecond_spacing() {
        // 2^-10 s and 2^-9 s are exact in binary
        let points = normalize(
            &node(),
            vec![set(Some(8.0)), set(Some(8.0 + 0.0009765625)), set(Some(8.0 + 0.001953125))],
            R,
        );
        assert_eq!(stamps(&points), vec![R, R + 976_562, R + 1_953_125]);
    }

    #[test]
    fn test_out_of_order_sample_goes_backwards() {
        let points = normalize(&node(), vec![set(Some(10.0)), set(Some(9.5))], R);
        assert_eq!(stamps(&points), vec![R, R - 500_000_000]);
    }

    #[test]
    fn test_t0_is_first_embedded_timestamp() {
        let points = normalize(
            &node(),
            vec![set(None), set(Some(3.0)), set(Some(3.5))],
            R,
        );
        assert_eq!(stamps(&points), vec![R, R, R + 500_000_000]);
    }

    #[test]
    fn test_offset_truncates_toward_zero() {
        assert_eq!(offset_ns(0.0, 0.5), 500_000_000);
        assert_eq!(offset_ns(0.0, 1.5e-9), 1);
        assert_eq!(offset_ns(0.0, -1.5e-9), -1);
    }

    #[test]
    fn test_saturates_at_range_limits() {
        let points = normalize(&node(), vec![set(Some(0.0)), set(Some(-1.0))], 10);
        assert_eq!(stamps(&points), vec![10, 0]);

        let points = normalize(&node(), vec![set(Some(0.0)), set(Some(1.0e12))], u64::MAX - 1);
        assert_eq!(stamps(&points), vec![u64::MAX - 1, u64::MAX]);
    }

    #[test]
    fn test_now_is_after_2020() {
        assert!(now_ns() > 1_577_836_800_000_000_000);
    }
}
