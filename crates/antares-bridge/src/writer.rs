// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Point writers.
//!
//! A [`PointWriter`] makes exactly one durable write attempt per point. It
//! does not batch, deduplicate or retry; callers bound each call with a
//! timeout and drop the point on failure.
//!
//! Writers are shared by every concurrent pipeline pass and must be safe for
//! concurrent use.

use crate::line_protocol::Point;
use std::future::Future;
use std::sync::Mutex;
use std::time::Duration;
use thiserror::Error;

/// Bytes of a rejected response body kept in the error.
const MAX_ERROR_BODY: usize = 256;

/// Per-point write failure.
#[derive(Debug, Error)]
pub enum WriteError {
    #[error("write timed out after {0:?}")]
    Timeout(Duration),

    #[error("sink rejected write with status {status}: {body}")]
    Rejected { status: u16, body: String },

    #[error("transport error: {0}")]
    Transport(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl WriteError {
    /// Short failure kind for structured logs.
    pub fn kind(&self) -> &'static str {
        match self {
            WriteError::Timeout(_) => "timeout",
            WriteError::Rejected { .. } => "rejected",
            WriteError::Transport(_) => "transport",
            WriteError::Io(_) => "io",
        }
    }
}

/// Destination for resolved points.
pub trait PointWriter: Send + Sync + 'static {
    /// Short writer name for logs.
    fn name(&self) -> &'static str;

    /// Write one point. Returns once the sink acknowledged or refused it.
    fn write(&self, point: &Point) -> impl Future<Output = Result<(), WriteError>> + Send;
}

/// InfluxDB v2 connection settings.
#[derive(Debug, Clone)]
pub struct InfluxConfig {
    /// InfluxDB URL (e.g., "http://localhost:8086").
    pub url: String,
    /// InfluxDB organization.
    pub org: String,
    /// InfluxDB bucket.
    pub bucket: String,
    /// Authentication token.
    pub token: String,
}

/// Writes points to the InfluxDB v2 HTTP write API, one line per request.
///
/// The underlying HTTP client is a connection pool and is shared by all
/// passes.
pub struct InfluxWriter {
    client: reqwest::Client,
    endpoint: String,
    org: String,
    bucket: String,
    auth: String,
    timeout: Duration,
}

impl InfluxWriter {
    /// Create a writer. `timeout` bounds every request end to end.
    pub fn new(config: &InfluxConfig, timeout: Duration) -> Result<Self, WriteError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| WriteError::Transport(e.to_string()))?;

        Ok(Self {
            client,
            endpoint: format!("{}/api/v2/write", config.url.trim_end_matches('/')),
            org: config.org.clone(),
            bucket: config.bucket.clone(),
            auth: format!("Token {}", config.token),
            timeout,
        })
    }

    /// Write endpoint, without query parameters.
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

impl PointWriter for InfluxWriter {
    fn name(&self) -> &'static str {
        "influxdb"
    }

    async fn write(&self, point: &Point) -> Result<(), WriteError> {
        let response = self
            .client
            .post(&self.endpoint)
            .query(&[
                ("org", self.org.as_str()),
                ("bucket", self.bucket.as_str()),
                ("precision", "ns"),
            ])
            .header(reqwest::header::AUTHORIZATION, &self.auth)
            .header(reqwest::header::CONTENT_TYPE, "text/plain; charset=utf-8")
            .body(point.to_line_protocol())
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    WriteError::Timeout(self.timeout)
                } else {
                    WriteError::Transport(e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let mut body = response.text().await.unwrap_or_default();
            truncate_at_char_boundary(&mut body, MAX_ERROR_BODY);
            return Err(WriteError::Rejected {
                status: status.as_u16(),
                body,
            });
        }

        tracing::trace!("Wrote point to {}: {}", self.endpoint, point);
        Ok(())
    }
}

/// Prints points as Line Protocol on stdout (dry-run mode).
#[derive(Debug, Default)]
pub struct StdoutWriter;

impl PointWriter for StdoutWriter {
    fn name(&self) -> &'static str {
        "stdout"
    }

    async fn write(&self, point: &Point) -> Result<(), WriteError> {
        use std::io::Write;

        let mut out = std::io::stdout().lock();
        writeln!(out, "{}", point)?;
        Ok(())
    }
}

/// Keeps every written point in memory.
#[derive(Debug, Default)]
pub struct MemoryWriter {
    points: Mutex<Vec<Point>>,
}

impl MemoryWriter {
    /// Create an empty writer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of all points written so far, in write order.
    pub fn points(&self) -> Vec<Point> {
        self.points
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Number of points written so far.
    pub fn len(&self) -> usize {
        self.points.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// True if nothing was written.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl PointWriter for MemoryWriter {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn write(&self, point: &Point) -> Result<(), WriteError> {
        self.points
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(point.clone());
        Ok(())
    }
}

fn truncate_at_char_boundary(s: &mut String, max: usize) {
    if s.len() <= max {
        return;
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    s.truncate(end);
}
