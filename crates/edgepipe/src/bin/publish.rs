// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! edgepipe-publish - Publish records to a broker topic.
//!
//! # Usage
//!
//! ```bash
//! # Publish JSON lines from stdin
//! cat documents.jsonl | edgepipe-publish --host broker.local -t vehicle/42
//!
//! # Transcode raw telemetry in-process, QoS 1
//! edgepipe-publish -f capture.nmea --format telemetry -q 1
//!
//! # One message at a time, no queue
//! edgepipe-publish -f documents.jsonl --sync
//!
//! # Print what would be published
//! edgepipe-publish -f capture.nmea --format telemetry --dry-run
//!
//! # Using configuration file
//! edgepipe-publish --config edgepipe.toml
//! ```

use anyhow::Context;
use clap::{Parser, Subcommand};
use edgepipe::config::{unescape_delimiter, SourceConfig};
use edgepipe::{
    BridgeConfig, DelimitedIngest, DeliveryEngine, EngineHandle, Ingest, InputFormat, InputSource,
    PipelineStats, PipelineStatsSnapshot, Qos, StreamTransport, SyncPublisher, TcpTransport,
    TelemetryIngest, Transcoder, Transport,
};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Edge telemetry publisher
#[derive(Parser, Debug)]
#[command(name = "edgepipe-publish")]
#[command(about = "Publish delimited records or transcoded telemetry to a broker topic")]
#[command(version)]
struct Args {
    /// Configuration file path (flags below override its values)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Input file (default: stdin)
    #[arg(short, long)]
    file: Option<PathBuf>,

    /// Input format
    #[arg(long, value_enum)]
    format: Option<InputFormat>,

    /// Record delimiter (escapes \n, \r, \t, \0, \\ accepted)
    #[arg(short, long)]
    delimiter: Option<String>,

    /// Maximum record length in bytes
    #[arg(short, long)]
    max_len: Option<usize>,

    /// Broker host
    #[arg(long)]
    host: Option<String>,

    /// Broker port
    #[arg(short, long)]
    port: Option<u16>,

    /// Client identifier (default: hostname plus timestamp)
    #[arg(short, long)]
    client_id: Option<String>,

    /// Username
    #[arg(short, long)]
    username: Option<String>,

    /// Password
    #[arg(short = 'w', long)]
    password: Option<String>,

    /// Topic
    #[arg(short, long)]
    topic: Option<String>,

    /// Quality of service (0, 1 or 2)
    #[arg(short, long, value_parser = clap::value_parser!(u8).range(0..=2))]
    qos: Option<u8>,

    /// Ask the broker to retain published messages
    #[arg(short, long)]
    retain: bool,

    /// Publish attempts per message
    #[arg(long)]
    max_attempts: Option<u32>,

    /// Queue capacity (asynchronous mode)
    #[arg(long)]
    queue_capacity: Option<usize>,

    /// Publish one message at a time and wait for each outcome
    #[arg(long)]
    sync: bool,

    /// Write payloads to stdout instead of the broker
    #[arg(long)]
    dry_run: bool,

    /// Statistics reporting interval (seconds, 0 to disable)
    #[arg(long)]
    stats_interval: Option<u64>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Generate example configuration file
    GenConfig {
        /// Output file path
        #[arg(short, long, default_value = "edgepipe.toml")]
        output: PathBuf,
    },

    /// Validate a configuration file
    Validate {
        /// Configuration file path
        #[arg(short, long)]
        config: PathBuf,
    },
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    if let Some(cmd) = &args.command {
        init_logging(args.log_level.as_deref().unwrap_or("info"));
        return match cmd {
            Commands::GenConfig { output } => cmd_gen_config(output),
            Commands::Validate { config } => cmd_validate(config),
        };
    }

    let config = build_config(&args)?;
    init_logging(&config.log_level);
    config.validate()?;

    info!("edgepipe publisher v{}", env!("CARGO_PKG_VERSION"));

    let stats = Arc::new(PipelineStats::new());
    let mut ingest = open_ingest(&config, stats.clone())?;

    let transport: Box<dyn Transport> = if args.dry_run {
        info!("dry run: payloads go to stdout");
        Box::new(StreamTransport::stdout())
    } else {
        info!(broker = %format!("{}:{}", config.broker.host, config.broker.port), "broker");
        Box::new(TcpTransport::new(config.broker.host.clone(), config.broker.port))
    };

    let delivery = config.delivery_config();
    let report = if args.sync {
        let mut publisher = SyncPublisher::new(transport, delivery, stats);
        install_interrupt(publisher.handle())?;
        spawn_stats_reporter(publisher.handle(), config.stats_interval_secs)?;
        publisher.run(&mut *ingest)?
    } else {
        let mut engine = DeliveryEngine::new(transport, delivery, stats);
        install_interrupt(engine.handle())?;
        spawn_stats_reporter(engine.handle(), config.stats_interval_secs)?;
        engine.run(ingest)?
    };

    info!(interrupted = report.interrupted, "final statistics");
    print_stats(&report.stats);
    Ok(())
}

fn init_logging(level: &str) {
    let filter = EnvFilter::try_new(level).unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(io::stderr)
        .init();
}

fn build_config(args: &Args) -> anyhow::Result<BridgeConfig> {
    let mut config = match &args.config {
        Some(path) => BridgeConfig::from_file(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => BridgeConfig::default(),
    };

    let source = &mut config.source;
    if let Some(file) = &args.file {
        source.path = Some(file.clone());
    }
    if let Some(format) = args.format {
        source.format = format;
    }
    if let Some(delimiter) = &args.delimiter {
        source.delimiter = unescape_delimiter(delimiter);
    }
    if let Some(max_len) = args.max_len {
        source.buffer_capacity = max_len;
    }

    let broker = &mut config.broker;
    if let Some(host) = &args.host {
        broker.host = host.clone();
    }
    if let Some(port) = args.port {
        broker.port = port;
    }
    if args.client_id.is_some() {
        broker.client_id = args.client_id.clone();
    }
    if args.username.is_some() {
        broker.username = args.username.clone();
    }
    if args.password.is_some() {
        broker.password = args.password.clone();
    }

    let publish = &mut config.publish;
    if let Some(topic) = &args.topic {
        publish.topic = topic.clone();
    }
    if let Some(qos) = args.qos {
        publish.qos = Qos::try_from(qos).map_err(anyhow::Error::msg)?;
    }
    if args.retain {
        publish.retain = true;
    }
    if let Some(max_attempts) = args.max_attempts {
        publish.max_attempts = max_attempts;
    }
    if let Some(queue_capacity) = args.queue_capacity {
        publish.queue_capacity = queue_capacity;
    }

    if let Some(interval) = args.stats_interval {
        config.stats_interval_secs = interval;
    }
    if let Some(level) = &args.log_level {
        config.log_level = level.clone();
    }

    Ok(config)
}

fn open_ingest(
    config: &BridgeConfig,
    stats: Arc<PipelineStats>,
) -> anyhow::Result<Box<dyn Ingest + Send>> {
    let SourceConfig {
        path,
        buffer_capacity,
        delimiter,
        format,
    } = &config.source;

    let source = InputSource::open(path.as_deref(), *buffer_capacity)?;
    match path {
        Some(path) => info!(input = %path.display(), format = ?format, "reading"),
        None => info!(format = ?format, "reading stdin"),
    }

    Ok(match format {
        InputFormat::Delimited => Box::new(DelimitedIngest::new(
            source,
            delimiter.as_bytes().to_vec(),
            stats,
        )),
        InputFormat::Telemetry => Box::new(TelemetryIngest::new(
            source,
            Transcoder::new(config.transcoder.clone()),
            stats,
        )),
    })
}

fn install_interrupt(handle: EngineHandle) -> anyhow::Result<()> {
    ctrlc::set_handler(move || {
        info!("interrupted, shutting down");
        handle.stop();
    })?;
    Ok(())
}

fn spawn_stats_reporter(handle: EngineHandle, interval_secs: u64) -> anyhow::Result<()> {
    if interval_secs == 0 {
        return Ok(());
    }

    thread::Builder::new()
        .name("edgepipe-stats".to_string())
        .spawn(move || loop {
            thread::sleep(Duration::from_secs(interval_secs));
            if !handle.is_running() {
                break;
            }
            print_stats(&handle.stats());
        })?;
    Ok(())
}

fn cmd_gen_config(output: &Path) -> anyhow::Result<()> {
    let mut config = BridgeConfig::default();
    config.source.path = Some(PathBuf::from("capture.nmea"));
    config.source.format = InputFormat::Telemetry;
    config.broker.host = "broker.local".into();
    config.broker.client_id = Some("edge-gateway-1".into());
    config.publish.topic = "vehicle/42".into();
    config.publish.qos = Qos::AtLeastOnce;

    let toml_str = toml::to_string_pretty(&config)?;

    let content = format!(
        r#"# edgepipe Configuration
# Generated by edgepipe-publish gen-config

{}
"#,
        toml_str
    );

    std::fs::write(output, content)?;
    println!("Generated configuration file: {}", output.display());
    Ok(())
}

fn cmd_validate(config_path: &Path) -> anyhow::Result<()> {
    let loaded = BridgeConfig::from_file(config_path).and_then(|config| {
        config.validate()?;
        Ok(config)
    });

    match loaded {
        Ok(config) => {
            println!("Configuration valid!");
            println!();
            println!(
                "Input:  {} ({:?}, max {} bytes)",
                config
                    .source
                    .path
                    .as_ref()
                    .map(|p| p.display().to_string())
                    .unwrap_or_else(|| "stdin".into()),
                config.source.format,
                config.source.buffer_capacity
            );
            println!("Broker: {}:{}", config.broker.host, config.broker.port);
            println!(
                "Topic:  {} (qos {}, retain {})",
                config.publish.topic,
                u8::from(config.publish.qos),
                config.publish.retain
            );
            println!("Shapes: {}", config.transcoder.sentences.len());
            Ok(())
        }
        Err(e) => {
            eprintln!("Configuration invalid: {}", e);
            std::process::exit(1);
        }
    }
}

fn print_stats(stats: &PipelineStatsSnapshot) {
    info!(
        "{} published ({:.1} msg/s, {}), {} framed, {} dropped, {} failures, {} expired, {} reconnects, {} discarded",
        stats.published,
        stats.messages_per_second(),
        format_bytes(stats.bytes_published),
        stats.records_framed,
        stats.records_dropped,
        stats.publish_failures,
        stats.expired,
        stats.reconnects,
        stats.discarded
    );
}

fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    }
}
