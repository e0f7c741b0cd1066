// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! One pipeline pass per inbound message.
//!
//! ```text
//! InboundMessage --> resolve --> decode --> normalize --> write (per point)
//! ```
//!
//! A pass never fails: unknown topics, undecodable payloads and failed writes
//! are logged, counted and dropped at the pass boundary.

use crate::config::BridgeSettings;
use crate::decode::decode;
use crate::line_protocol::Point;
use crate::matcher;
use crate::schema::Registry;
use crate::timestamp::{normalize, now_ns};
use crate::writer::{PointWriter, WriteError};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// A message as delivered by the bus.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    /// Bus topic.
    pub topic: String,
    /// Raw payload bytes.
    pub payload: Vec<u8>,
    /// Arrival time, nanoseconds since Unix epoch.
    pub received_at_ns: u64,
}

impl InboundMessage {
    /// Create a message stamped with the current wall-clock time.
    pub fn new(topic: impl Into<String>, payload: impl Into<Vec<u8>>) -> Self {
        Self::received_at(topic, payload, now_ns())
    }

    /// Create a message with an explicit arrival time.
    pub fn received_at(
        topic: impl Into<String>,
        payload: impl Into<Vec<u8>>,
        received_at_ns: u64,
    ) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
            received_at_ns,
        }
    }
}

/// How a pass ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PassOutcome {
    /// No registry entry for the topic; message dropped.
    UnknownTopic,
    /// Payload did not decode; message dropped.
    DecodeFailed,
    /// Points were produced and each got one write attempt.
    Written { written: usize, failed: usize },
}

/// Pass tuning, taken from [`BridgeSettings`].
#[derive(Debug, Clone)]
pub struct PipelineOptions {
    /// Upper bound for one point write.
    pub write_timeout: Duration,
    /// Payload bytes quoted in drop logs.
    pub payload_preview_bytes: usize,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self::from(&BridgeSettings::default())
    }
}

impl From<&BridgeSettings> for PipelineOptions {
    fn from(settings: &BridgeSettings) -> Self {
        Self {
            write_timeout: settings.write_timeout(),
            payload_preview_bytes: settings.payload_preview_bytes,
        }
    }
}

/// Bridge-wide counters.
#[derive(Debug)]
pub struct PipelineStats {
    /// Messages that entered a pass.
    pub messages_received: AtomicU64,
    /// Messages dropped for an unregistered topic.
    pub unknown_topics: AtomicU64,
    /// Messages dropped because the payload did not decode.
    pub decode_errors: AtomicU64,
    /// Points acknowledged by the writer.
    pub points_written: AtomicU64,
    /// Points dropped after a failed or timed out write.
    pub write_errors: AtomicU64,
    /// Passes that panicked.
    pub panics: AtomicU64,
    /// Creation time.
    pub created: Instant,
}

impl PipelineStats {
    /// Create zeroed stats.
    pub fn new() -> Self {
        Self {
            messages_received: AtomicU64::new(0),
            unknown_topics: AtomicU64::new(0),
            decode_errors: AtomicU64::new(0),
            points_written: AtomicU64::new(0),
            write_errors: AtomicU64::new(0),
            panics: AtomicU64::new(0),
            created: Instant::now(),
        }
    }

    /// Record a panicked pass.
    pub fn record_panic(&self) {
        self.panics.fetch_add(1, Ordering::Relaxed);
    }

    /// Get snapshot of current stats.
    pub fn snapshot(&self) -> PipelineStatsSnapshot {
        PipelineStatsSnapshot {
            messages_received: self.messages_received.load(Ordering::Relaxed),
            unknown_topics: self.unknown_topics.load(Ordering::Relaxed),
            decode_errors: self.decode_errors.load(Ordering::Relaxed),
            points_written: self.points_written.load(Ordering::Relaxed),
            write_errors: self.write_errors.load(Ordering::Relaxed),
            panics: self.panics.load(Ordering::Relaxed),
            uptime_secs: self.created.elapsed().as_secs(),
        }
    }
}

impl Default for PipelineStats {
    fn default() -> Self {
        Self::new()
    }
}

/// Snapshot of pipeline statistics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineStatsSnapshot {
    pub messages_received: u64,
    pub unknown_topics: u64,
    pub decode_errors: u64,
    pub points_written: u64,
    pub write_errors: u64,
    pub panics: u64,
    pub uptime_secs: u64,
}

impl PipelineStatsSnapshot {
    /// Calculate points written per second.
    pub fn points_per_second(&self) -> f64 {
        if self.uptime_secs > 0 {
            self.points_written as f64 / self.uptime_secs as f64
        } else {
            0.0
        }
    }
}

/// The translation pipeline, shared by every concurrent pass.
pub struct Pipeline<W> {
    registry: Arc<Registry>,
    writer: W,
    options: PipelineOptions,
    stats: Arc<PipelineStats>,
}

impl<W: PointWriter> Pipeline<W> {
    /// Create a pipeline over a loaded registry.
    pub fn new(registry: Arc<Registry>, writer: W, options: PipelineOptions) -> Self {
        Self {
            registry,
            writer,
            options,
            stats: Arc::new(PipelineStats::new()),
        }
    }

    /// The registry this pipeline resolves topics against.
    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    /// The sink writer.
    pub fn writer(&self) -> &W {
        &self.writer
    }

    /// Shared statistics.
    pub fn stats(&self) -> &Arc<PipelineStats> {
        &self.stats
    }

    /// Run one pass for `msg`.
    pub async fn process(&self, msg: InboundMessage) -> PassOutcome {
        self.stats.messages_received.fetch_add(1, Ordering::Relaxed);

        let Some(node) = matcher::resolve(&msg.topic, &self.registry) else {
            self.stats.unknown_topics.fetch_add(1, Ordering::Relaxed);
            tracing::info!(
                topic = %msg.topic,
                kind = "not_found",
                payload = %payload_preview(&msg.payload, self.options.payload_preview_bytes),
                "Dropping message for unregistered topic"
            );
            return PassOutcome::UnknownTopic;
        };

        let field_sets = match decode(&msg.payload, node) {
            Ok(sets) => sets,
            Err(err) => {
                self.stats.decode_errors.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(
                    topic = %msg.topic,
                    kind = err.kind(),
                    error = %err,
                    payload = %payload_preview(&msg.payload, self.options.payload_preview_bytes),
                    "Dropping undecodable message"
                );
                return PassOutcome::DecodeFailed;
            }
        };

        let points = normalize(node, field_sets, msg.received_at_ns);
        let mut written = 0;
        let mut failed = 0;

        for point in &points {
            match self.write_point(point).await {
                Ok(()) => {
                    written += 1;
                    self.stats.points_written.fetch_add(1, Ordering::Relaxed);
                }
                Err(err) => {
                    failed += 1;
                    self.stats.write_errors.fetch_add(1, Ordering::Relaxed);
                    tracing::warn!(
                        topic = %msg.topic,
                        measurement = %point.measurement,
                        timestamp_ns = point.timestamp_ns,
                        kind = err.kind(),
                        writer = self.writer.name(),
                        error = %err,
                        "Dropping point after failed write"
                    );
                }
            }
        }

        tracing::debug!(
            topic = %msg.topic,
            measurement = %node.measurement,
            written,
            failed,
            "Pass complete"
        );
        PassOutcome::Written { written, failed }
    }

    async fn write_point(&self, point: &Point) -> Result<(), WriteError> {
        let timeout = self.options.write_timeout;
        match tokio::time::timeout(timeout, self.writer.write(point)).await {
            Ok(result) => result,
            Err(_) => Err(WriteError::Timeout(timeout)),
        }
    }
}

/// Lossy UTF-8 rendering of at most `max` payload bytes, with an ellipsis
/// when the payload was cut.
pub fn payload_preview(payload: &[u8], max: usize) -> String {
    if payload.len() <= max {
        return String::from_utf8_lossy(payload).into_owned();
    }
    let mut preview = String::from_utf8_lossy(&payload[..max]).into_owned();
    preview.push_str("...");
    preview
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BridgeConfig;
    use crate::writer::MemoryWriter;
    use std::sync::atomic::AtomicUsize;

    const YAML: &str = r#"
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
            schema:
              type: object
              array_field: data
"#;

    fn pipeline() -> Pipeline<MemoryWriter> {
        let config = BridgeConfig::from_yaml(YAML).expect("parse");
        let registry = Arc::new(Registry::load(&config).expect("load"));
        Pipeline::new(registry, MemoryWriter::new(), PipelineOptions::default())
    }

    #[tokio::test]
    async fn test_scalar_message_writes_one_point() {
        let pipeline = pipeline();
        let msg = InboundMessage::received_at(
            "antares/3960722352/28ee2d1d01160126",
            "21.75",
            1_000,
        );

        let outcome = pipeline.process(msg).await;
        assert_eq!(outcome, PassOutcome::Written { written: 1, failed: 0 });

        let points = pipeline.writer().points();
        assert_eq!(points.len(), 1);
        assert_eq!(
            points[0].to_line_protocol(),
            "temperature,environment=antares,location=Salon value=21.75 1000"
        );
    }

    #[tokio::test]
    async fn test_unknown_topic_dropped_and_counted() {
        let pipeline = pipeline();
        let outcome = pipeline
            .process(InboundMessage::new("antares/3960722352/unknown", "1"))
            .await;

        assert_eq!(outcome, PassOutcome::UnknownTopic);
        assert!(pipeline.writer().is_empty());

        let stats = pipeline.stats().snapshot();
        assert_eq!(stats.messages_received, 1);
        assert_eq!(stats.unknown_topics, 1);
        assert_eq!(stats.points_written, 0);
    }

    #[tokio::test]
    async fn test_decode_failure_dropped_and_counted() {
        let pipeline = pipeline();
        let outcome = pipeline
            .process(InboundMessage::new("antares/3960722352/accel", "{\"data\": []}"))
            .await;

        assert_eq!(outcome, PassOutcome::DecodeFailed);
        assert!(pipeline.writer().is_empty());
        assert_eq!(pipeline.stats().snapshot().decode_errors, 1);
    }

    /// Accepts the first write, then crashes.
    #[derive(Default)]
    struct CrashOnSecondWrite {
        calls: AtomicUsize,
    }

    impl PointWriter for CrashOnSecondWrite {
        fn name(&self) -> &'static str {
            "crash"
        }

        async fn write(&self, _point: &Point) -> Result<(), WriteError> {
            if self.calls.fetch_add(1, Ordering::SeqCst) == 1 {
                panic!("writer crashed");
            }
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_points_counted_before_a_panicking_write() {
        let config = BridgeConfig::from_yaml(YAML).expect("parse");
        let registry = Arc::new(Registry::load(&config).expect("load"));
        let pipeline = Arc::new(Pipeline::new(
            registry,
            CrashOnSecondWrite::default(),
            PipelineOptions::default(),
        ));

        let pass = {
            let pipeline = pipeline.clone();
            tokio::spawn(async move {
                pipeline
                    .process(InboundMessage::new(
                        "antares/3960722352/accel",
                        r#"{"data":[{"x":1},{"x":2},{"x":3}]}"#,
                    ))
                    .await
            })
        };
        assert!(pass.await.expect_err("pass panics").is_panic());

        let stats = pipeline.stats().snapshot();
        assert_eq!(stats.points_written, 1);
        assert_eq!(stats.write_errors, 0);
    }

    #[test]
    fn test_payload_preview_truncates() {
        assert_eq!(payload_preview(b"12.5", 16), "12.5");
        assert_eq!(payload_preview(b"abcdefgh", 4), "abcd...");
        assert_eq!(payload_preview(&[0xff, b'a'], 8), "\u{fffd}a");
    }

    #[test]
    fn test_points_per_second() {
        let snapshot = PipelineStatsSnapshot {
            messages_received: 10,
            unknown_topics: 0,
            decode_errors: 0,
            points_written: 100,
            write_errors: 0,
            panics: 0,
            uptime_secs: 4,
        };
        assert_eq!(snapshot.points_per_second(), 25.0);
    }
}
