// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Antares Bridge CLI
//!
//! Subscribes to sensor topics on an MQTT broker and writes them to InfluxDB.
//!
//! # Usage
//!
//! ```bash
//! # Run with credentials from the environment
//! MQTT_URL=mqtt://localhost:1883 INFLUXDB_URL=http://localhost:8086 \
//! INFLUXDB_TOKEN=... INFLUXDB_ORG=boat INFLUXDB_BUCKET=telemetry \
//! antares-bridge --config sensors.yaml
//!
//! # Print points instead of writing them
//! antares-bridge --config sensors.yaml --mqtt-url mqtt://localhost --dry-run
//!
//! # Check a configuration file
//! antares-bridge validate --config sensors.yaml
//! ```

use antares_bridge::{
    matcher, Bridge, BridgeConfig, BridgeError, BridgeSettings, InfluxConfig, InfluxWriter, MqttConfig,
    MqttSource, PipelineStatsSnapshot, PointWriter, Registry, StdoutWriter,
};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::future::Future;
use std::time::Duration;
use tokio::task::{JoinError, JoinHandle};
use tracing_subscriber::EnvFilter;

type SourceExit = Result<Result<(), BridgeError>, JoinError>;

/// Antares MQTT to InfluxDB bridge
#[derive(Parser, Debug)]
#[command(name = "antares-bridge")]
#[command(about = "Antares Bridge - MQTT sensor topics to InfluxDB points")]
#[command(version)]
struct Args {
    /// Configuration file path
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// MQTT broker URL
    #[arg(long, env = "MQTT_URL")]
    mqtt_url: Option<String>,

    /// MQTT username
    #[arg(long, env = "MQTT_USER")]
    mqtt_user: Option<String>,

    /// MQTT password
    #[arg(long, env = "MQTT_PASS", hide_env_values = true)]
    mqtt_pass: Option<String>,

    /// InfluxDB URL
    #[arg(long, env = "INFLUXDB_URL")]
    influxdb_url: Option<String>,

    /// InfluxDB token
    #[arg(long, env = "INFLUXDB_TOKEN", hide_env_values = true)]
    influxdb_token: Option<String>,

    /// InfluxDB organization
    #[arg(long, env = "INFLUXDB_ORG")]
    influxdb_org: Option<String>,

    /// InfluxDB bucket
    #[arg(long, env = "INFLUXDB_BUCKET")]
    influxdb_bucket: Option<String>,

    /// Print points as Line Protocol instead of writing them
    #[arg(long)]
    dry_run: bool,

    /// Statistics reporting interval (seconds, 0 to disable)
    #[arg(long, default_value = "60")]
    stats_interval: u64,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Generate example configuration file
    GenConfig {
        /// Output file path
        #[arg(short, long, default_value = "antares-bridge.yaml")]
        output: PathBuf,
    },

    /// Validate a configuration file
    Validate {
        /// Configuration file path
        #[arg(short, long)]
        config: PathBuf,
    },

    /// List the topics a configuration subscribes to
    Topics {
        /// Configuration file path
        #[arg(short, long)]
        config: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    // Initialize logging
    let filter = EnvFilter::try_new(&args.log_level).unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    if let Some(cmd) = args.command {
        return match cmd {
            Commands::GenConfig { output } => cmd_gen_config(output),
            Commands::Validate { config } => cmd_validate(&config),
            Commands::Topics { config } => cmd_topics(&config),
        };
    }

    let config_path = args.config.as_ref().ok_or("Missing --config")?;
    let (config, registry) = match load(config_path) {
        Ok(loaded) => loaded,
        Err(e) => {
            eprintln!("Configuration invalid: {}", e);
            std::process::exit(1);
        }
    };

    let mqtt = mqtt_config(&args, &config.bridge)?;

    if args.dry_run {
        run(config.bridge, registry, mqtt, StdoutWriter, args.stats_interval).await
    } else {
        let influx = influx_config(&args)?;
        let writer = InfluxWriter::new(&influx, config.bridge.write_timeout())?;
        tracing::info!("Writing to {}", writer.endpoint());
        run(config.bridge, registry, mqtt, writer, args.stats_interval).await
    }
}

async fn run<W: PointWriter>(
    settings: BridgeSettings,
    registry: Arc<Registry>,
    mqtt: MqttConfig,
    writer: W,
    stats_interval: u64,
) -> Result<(), Box<dyn std::error::Error>> {
    println!("Antares Bridge v{}", env!("CARGO_PKG_VERSION"));
    println!("=====================================");
    println!();
    println!("Writer: {}", writer.name());
    println!("Topics: {}", registry.len());
    println!();
    println!("Press Ctrl+C to stop...");
    println!();

    let source = MqttSource::new(&mqtt, matcher::subscriptions(&registry))?;
    let mut bridge = Bridge::with_registry(registry, settings, writer);
    let handle = bridge.start()?;

    let mut source_task = tokio::spawn(source.run(handle.clone()));

    // Stats reporting task
    if stats_interval > 0 {
        let stats_handle = handle.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(stats_interval));
            interval.tick().await;
            loop {
                tokio::select! {
                    _ = stats_handle.stopped() => break,
                    _ = interval.tick() => print_stats(&stats_handle.stats()),
                }
            }
        });
    }

    // Wait for Ctrl+C, or for the source to give up on its own
    let early_exit = wait_for_stop(tokio::signal::ctrl_c(), &mut source_task).await?;
    println!("\nShutting down...");

    let stats = bridge.shutdown().await?;
    let source_ok = match early_exit {
        Some(exit) => {
            report_source_exit(exit);
            tracing::error!("MQTT source exited before shutdown was requested");
            false
        }
        None => report_source_exit(source_task.await),
    };

    println!("\nFinal Statistics:");
    print_stats(&stats);
    if !source_ok {
        std::process::exit(1);
    }
    Ok(())
}

/// Wait for `signal`. Returns the source's result instead if it ends first.
async fn wait_for_stop<S>(
    signal: S,
    source: &mut JoinHandle<Result<(), BridgeError>>,
) -> std::io::Result<Option<SourceExit>>
where
    S: Future<Output = std::io::Result<()>>,
{
    tokio::select! {
        result = signal => result.map(|()| None),
        exit = source => Ok(Some(exit)),
    }
}

/// Log how the source ended. Returns `true` for a clean stop.
fn report_source_exit(exit: SourceExit) -> bool {
    match exit {
        Ok(Ok(())) => {
            tracing::info!("MQTT source finished");
            true
        }
        Ok(Err(e)) => {
            tracing::error!("MQTT source failed: {}", e);
            false
        }
        Err(e) => {
            tracing::error!("MQTT source task failed: {}", e);
            false
        }
    }
}

fn load(path: &Path) -> Result<(BridgeConfig, Arc<Registry>), Box<dyn std::error::Error>> {
    let config = BridgeConfig::from_file(path)?;
    let registry = Registry::load(&config)?;
    Ok((config, Arc::new(registry)))
}

fn mqtt_config(args: &Args, settings: &BridgeSettings) -> Result<MqttConfig, &'static str> {
    Ok(MqttConfig {
        url: args
            .mqtt_url
            .clone()
            .ok_or("Missing --mqtt-url (or MQTT_URL)")?,
        client_id: settings.name.clone(),
        username: args.mqtt_user.clone(),
        password: args.mqtt_pass.clone(),
        keep_alive: Duration::from_secs(settings.keep_alive_secs),
    })
}

fn influx_config(args: &Args) -> Result<InfluxConfig, &'static str> {
    Ok(InfluxConfig {
        url: args
            .influxdb_url
            .clone()
            .ok_or("Missing --influxdb-url (or INFLUXDB_URL)")?,
        org: args
            .influxdb_org
            .clone()
            .ok_or("Missing --influxdb-org (or INFLUXDB_ORG)")?,
        bucket: args
            .influxdb_bucket
            .clone()
            .ok_or("Missing --influxdb-bucket (or INFLUXDB_BUCKET)")?,
        token: args
            .influxdb_token
            .clone()
            .ok_or("Missing --influxdb-token (or INFLUXDB_TOKEN)")?,
    })
}

fn cmd_gen_config(output: PathBuf) -> Result<(), Box<dyn std::error::Error>> {
    let yaml = serde_yaml::to_string(&BridgeConfig::example())?;

    let content = format!(
        r#"# Antares Bridge Configuration
# Generated by antares-bridge gen-config
#
# Credentials are read from MQTT_URL, MQTT_USER, MQTT_PASS, INFLUXDB_URL,
# INFLUXDB_TOKEN, INFLUXDB_ORG and INFLUXDB_BUCKET.

{}"#,
        yaml
    );

    std::fs::write(&output, content)?;
    println!("Generated configuration file: {}", output.display());
    Ok(())
}

fn cmd_validate(config_path: &Path) -> Result<(), Box<dyn std::error::Error>> {
    match load(config_path) {
        Ok((config, registry)) => {
            println!("Configuration valid!");
            println!();
            println!("Bridge: {}", config.bridge.name);
            println!("Topics: {}", registry.len());
            for node in registry.nodes() {
                println!(
                    "  {} -> {} [{}]",
                    node.topic,
                    node.measurement,
                    node.schema.kind()
                );
            }
            Ok(())
        }
        Err(e) => {
            eprintln!("Configuration invalid: {}", e);
            std::process::exit(1);
        }
    }
}

fn cmd_topics(config_path: &Path) -> Result<(), Box<dyn std::error::Error>> {
    match load(config_path) {
        Ok((_, registry)) => {
            for topic in matcher::subscriptions(&registry) {
                println!("{}", topic);
            }
            Ok(())
        }
        Err(e) => {
            eprintln!("Configuration invalid: {}", e);
            std::process::exit(1);
        }
    }
}

fn print_stats(stats: &PipelineStatsSnapshot) {
    println!(
        "  {} msgs received, {} points written ({:.1} pts/s), {} unknown topics, {} decode errors, {} write errors, {} panics, uptime {}s",
        stats.messages_received,
        stats.points_written,
        stats.points_per_second(),
        stats.unknown_topics,
        stats.decode_errors,
        stats.write_errors,
        stats.panics,
        stats.uptime_secs
    );
}
