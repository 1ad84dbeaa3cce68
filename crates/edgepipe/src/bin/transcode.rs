// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! edgepipe-transcode - Convert raw telemetry to JSON lines.
//!
//! Usage:
//!   edgepipe-transcode capture.nmea
//!   cat capture.nmea | edgepipe-transcode
//!   edgepipe-transcode capture.nmea --config edgepipe.toml > capture.jsonl

use anyhow::Context;
use clap::Parser;
use edgepipe::config::check_buffer_capacity;
use edgepipe::{BridgeConfig, Ingest, InputSource, PipelineStats, TelemetryIngest, Transcoder};
use std::io::{self, BufWriter, Write};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "edgepipe-transcode")]
#[command(about = "Convert raw telemetry stanzas to JSON lines")]
#[command(version)]
struct Args {
    /// Input file (default: stdin)
    input: Option<PathBuf>,

    /// Configuration file (only the [transcoder] section is used)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Input buffer size, also the longest accepted line
    #[arg(long, default_value = "2048")]
    buffer_capacity: usize,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "warn")]
    log_level: String,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let filter = EnvFilter::try_new(&args.log_level).unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(io::stderr)
        .init();

    check_buffer_capacity(args.buffer_capacity).context("--buffer-capacity")?;

    let transcoder_config = match &args.config {
        Some(path) => {
            let config = BridgeConfig::from_file(path)
                .with_context(|| format!("loading {}", path.display()))?;
            config.validate()?;
            config.transcoder
        }
        None => Default::default(),
    };

    let source = InputSource::open(args.input.as_deref(), args.buffer_capacity)?;
    let stats = Arc::new(PipelineStats::new());
    let mut ingest = TelemetryIngest::new(source, Transcoder::new(transcoder_config), stats.clone());

    let stdout = io::stdout();
    let mut out = BufWriter::new(stdout.lock());
    let mut documents = 0u64;
    loop {
        match ingest.next_payload()? {
            Some(document) => {
                out.write_all(document.as_bytes())?;
                out.write_all(b"\n")?;
                documents += 1;
            }
            None if ingest.is_exhausted() => break,
            None => {}
        }
    }
    out.flush()?;

    let stats = stats.snapshot();
    info!(
        documents,
        lines = stats.records_framed,
        dropped = stats.records_dropped,
        "transcoding complete"
    );
    Ok(())
}
