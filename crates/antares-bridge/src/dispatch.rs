// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Bridge runtime.
//!
//! The [`Bridge`] owns the pipeline and a dispatcher task. Inbound messages
//! are queued on a bounded channel; the dispatcher runs one pipeline pass per
//! message with at most `max_in_flight` passes at a time. A full queue pushes
//! back on the submitter.
//!
//! Stopping closes the queue, finishes every queued and in-flight pass, then
//! returns the final statistics.

use crate::config::{BridgeConfig, BridgeSettings, ConfigError};
use crate::pipeline::{
    InboundMessage, PassOutcome, Pipeline, PipelineOptions, PipelineStats, PipelineStatsSnapshot,
};
use crate::schema::{Registry, SchemaError};
use crate::writer::{PointWriter, WriteError};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{mpsc, watch, Semaphore};
use tokio::task::{JoinError, JoinHandle, JoinSet};

/// Bridge errors.
#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Schema error: {0}")]
    Schema(#[from] SchemaError),

    #[error("Writer error: {0}")]
    Writer(#[from] WriteError),

    #[error("Bus error: {0}")]
    Bus(String),

    #[error("Inbound queue is full")]
    QueueFull,

    #[error("Bridge not running")]
    NotRunning,

    #[error("Bridge already running")]
    AlreadyRunning,
}

/// Handle to feed and control a running bridge.
#[derive(Clone)]
pub struct BridgeHandle {
    queue: mpsc::Sender<InboundMessage>,
    stop: Arc<watch::Sender<bool>>,
    stats: Arc<PipelineStats>,
}

impl BridgeHandle {
    /// Queue a message, waiting for room if the queue is full.
    pub async fn submit(&self, msg: InboundMessage) -> Result<(), BridgeError> {
        self.queue
            .send(msg)
            .await
            .map_err(|_| BridgeError::NotRunning)
    }

    /// Queue a message without waiting.
    pub fn try_submit(&self, msg: InboundMessage) -> Result<(), BridgeError> {
        self.queue.try_send(msg).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => BridgeError::QueueFull,
            mpsc::error::TrySendError::Closed(_) => BridgeError::NotRunning,
        })
    }

    /// Check if the bridge still accepts messages.
    pub fn is_running(&self) -> bool {
        !*self.stop.borrow() && !self.queue.is_closed()
    }

    /// Request the bridge to stop. Queued messages are still processed.
    pub fn stop(&self) {
        self.stop.send_replace(true);
    }

    /// Resolves once a stop was requested.
    pub async fn stopped(&self) {
        let mut rx = self.stop.subscribe();
        loop {
            if *rx.borrow_and_update() {
                return;
            }
            if rx.changed().await.is_err() {
                return;
            }
        }
    }

    /// Get current statistics.
    pub fn stats(&self) -> PipelineStatsSnapshot {
        self.stats.snapshot()
    }
}

/// MQTT to InfluxDB bridge.
pub struct Bridge<W> {
    settings: BridgeSettings,
    pipeline: Arc<Pipeline<W>>,
    handle: Option<BridgeHandle>,
    dispatcher: Option<JoinHandle<()>>,
}

impl<W: PointWriter> Bridge<W> {
    /// Create a bridge from configuration. Fails on any schema error.
    pub fn new(config: &BridgeConfig, writer: W) -> Result<Self, BridgeError> {
        config.validate()?;
        let registry = Registry::load(config)?;
        Ok(Self::with_registry(
            Arc::new(registry),
            config.bridge.clone(),
            writer,
        ))
    }

    /// Create a bridge over an already loaded registry.
    pub fn with_registry(registry: Arc<Registry>, settings: BridgeSettings, writer: W) -> Self {
        let options = PipelineOptions::from(&settings);
        Self {
            pipeline: Arc::new(Pipeline::new(registry, writer, options)),
            settings,
            handle: None,
            dispatcher: None,
        }
    }

    /// Get the bridge settings.
    pub fn settings(&self) -> &BridgeSettings {
        &self.settings
    }

    /// Get the loaded registry.
    pub fn registry(&self) -> &Arc<Registry> {
        self.pipeline.registry()
    }

    /// Get the pipeline.
    pub fn pipeline(&self) -> &Arc<Pipeline<W>> {
        &self.pipeline
    }

    /// Spawn the dispatcher. Must be called within a Tokio runtime.
    pub fn start(&mut self) -> Result<BridgeHandle, BridgeError> {
        if self.dispatcher.is_some() {
            return Err(BridgeError::AlreadyRunning);
        }

        let (queue_tx, queue_rx) = mpsc::channel(self.settings.queue_capacity);
        let (stop_tx, stop_rx) = watch::channel(false);

        let handle = BridgeHandle {
            queue: queue_tx,
            stop: Arc::new(stop_tx),
            stats: self.pipeline.stats().clone(),
        };

        tracing::info!(
            "Bridge '{}' started: {} topics, {} passes in flight, queue of {}",
            self.settings.name,
            self.pipeline.registry().len(),
            self.settings.max_in_flight,
            self.settings.queue_capacity
        );

        self.dispatcher = Some(tokio::spawn(dispatch(
            self.pipeline.clone(),
            queue_rx,
            stop_rx,
            self.settings.max_in_flight,
        )));
        self.handle = Some(handle.clone());
        Ok(handle)
    }

    /// Stop the bridge and wait for queued and in-flight passes to finish.
    pub async fn shutdown(&mut self) -> Result<PipelineStatsSnapshot, BridgeError> {
        let dispatcher = self.dispatcher.take().ok_or(BridgeError::NotRunning)?;
        if let Some(handle) = self.handle.take() {
            handle.stop();
        }

        if let Err(e) = dispatcher.await {
            tracing::error!("Dispatcher task failed: {}", e);
        }

        let stats = self.pipeline.stats().snapshot();
        tracing::info!(
            "Bridge '{}' stopped: {} messages, {} points written",
            self.settings.name,
            stats.messages_received,
            stats.points_written
        );
        Ok(stats)
    }
}

async fn dispatch<W: PointWriter>(
    pipeline: Arc<Pipeline<W>>,
    mut queue: mpsc::Receiver<InboundMessage>,
    mut stop: watch::Receiver<bool>,
    max_in_flight: usize,
) {
    let permits = Arc::new(Semaphore::new(max_in_flight.max(1)));
    let mut passes = JoinSet::new();
    let mut stopping = false;

    loop {
        let next = if stopping {
            queue.recv().await
        } else {
            tokio::select! {
                msg = queue.recv() => msg,
                _ = stop.changed() => {
                    tracing::debug!("Stop requested, draining queue");
                    stopping = true;
                    queue.close();
                    continue;
                }
            }
        };

        let Some(msg) = next else {
            break;
        };

        let Ok(permit) = permits.clone().acquire_owned().await else {
            break;
        };

        while let Some(result) = passes.try_join_next() {
            reap(result, pipeline.stats());
        }

        let pipeline = pipeline.clone();
        passes.spawn(async move {
            let _permit = permit;
            pipeline.process(msg).await
        });
    }

    while let Some(result) = passes.join_next().await {
        reap(result, pipeline.stats());
    }
    tracing::debug!("Dispatcher drained");
}

fn reap(result: Result<PassOutcome, JoinError>, stats: &PipelineStats) {
    match result {
        Ok(outcome) => tracing::trace!("Pass finished: {:?}", outcome),
        Err(e) if e.is_panic() => {
            stats.record_panic();
            tracing::error!("Pipeline pass panicked: {}", e);
        }
        Err(e) => tracing::warn!("Pipeline pass cancelled: {}", e),
    }
}
