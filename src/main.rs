//! CLI Entry Point for pitaya-worker
//!
//! Provides command-line access to:
//! - the stdio worker (`serve`), for hosts that run the worker as a child
//!   process and speak newline-delimited JSON envelopes to it
//! - one-shot commands through an in-process worker (`ping`, `acquire`,
//!   `send`)
//! - the effective configuration (`config`)
//!
//! # Usage
//!
//! ```bash
//! pitaya-worker --mock ping
//! pitaya-worker --host 192.168.1.100 acquire --decimation 64 --input in1
//! pitaya-worker --mock send asg_setup '{"channel": "asg0", "waveform": "square"}'
//! PITAYA_WORKER__MOCK_MODE=true pitaya-worker serve
//! ```

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use daq_driver_red_pitaya::{InputChannel, ScopeAcquireParams, TriggerSource};
use pitaya_daq::config::{PitayaConfig, DEFAULT_CONFIG_PATH};
use pitaya_daq::protocol::Params;
use pitaya_daq::{logging, stdio, WorkerManager};
use serde_json::Value;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Parser)]
#[command(name = "pitaya-worker")]
#[command(about = "Red Pitaya hardware worker with command multiplexing", long_about = None)]
struct Cli {
    /// Configuration file
    #[arg(long, global = true, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Simulate the board
    #[arg(long, global = true)]
    mock: bool,

    /// Board hostname, overriding the configuration
    #[arg(long, global = true)]
    host: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve envelopes on stdin/stdout
    Serve,

    /// Start a worker and round-trip a ping
    Ping,

    /// Acquire one scope trace
    Acquire {
        #[arg(long, default_value_t = 64)]
        decimation: u32,

        #[arg(long, default_value = "immediately")]
        trigger: TriggerSource,

        #[arg(long, default_value = "in1")]
        input: InputChannel,

        /// Trigger timeout in seconds
        #[arg(long, default_value_t = 1.0)]
        timeout: f64,

        /// Print the full trace as JSON instead of a summary
        #[arg(long)]
        json: bool,
    },

    /// Send any command with JSON params
    Send {
        command: String,

        /// Params object, e.g. '{"channel": "pid0"}'
        params: Option<String>,

        /// Caller-side timeout in seconds (default: worker.command_timeout)
        #[arg(long)]
        timeout: Option<f64>,
    },

    /// Print the effective configuration as TOML
    Config,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = load_config(&cli)?;
    logging::init_from_config(&config).map_err(anyhow::Error::msg)?;

    match cli.command {
        Commands::Serve => serve(&config),
        Commands::Ping => ping(&config),
        Commands::Acquire {
            decimation,
            trigger,
            input,
            timeout,
            json,
        } => acquire(
            &config,
            ScopeAcquireParams {
                decimation: Some(decimation),
                trigger_source: Some(trigger),
                input_channel: Some(input),
                timeout,
            },
            json,
        ),
        Commands::Send {
            command,
            params,
            timeout,
        } => send(&config, &command, params.as_deref(), timeout),
        Commands::Config => {
            let text = toml::to_string_pretty(&config).context("serialising configuration")?;
            print!("{text}");
            Ok(())
        }
    }
}

fn load_config(cli: &Cli) -> Result<PitayaConfig> {
    let mut config = PitayaConfig::load_from(&cli.config)
        .with_context(|| format!("loading {}", cli.config.display()))?;
    if cli.mock {
        config.worker.mock_mode = true;
    }
    if let Some(host) = &cli.host {
        config.worker.hostname = host.clone();
    }
    config.validate().map_err(anyhow::Error::msg)?;
    Ok(config)
}

fn serve(config: &PitayaConfig) -> Result<()> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("building runtime")?;
    runtime.block_on(stdio::serve(&config.worker))
}

fn start(config: &PitayaConfig) -> Result<WorkerManager> {
    let manager = WorkerManager::new();
    manager
        .start_worker(&config.worker)
        .with_context(|| format!("starting worker for {}", config.worker.hostname))?;
    Ok(manager)
}

fn ping(config: &PitayaConfig) -> Result<()> {
    let manager = start(config)?;
    let started = std::time::Instant::now();
    manager.ping()?;
    println!("pong in {:?}", started.elapsed());
    manager.shutdown();
    Ok(())
}

fn acquire(config: &PitayaConfig, params: ScopeAcquireParams, json: bool) -> Result<()> {
    let manager = start(config)?;
    let trace = manager.scope_acquire(&params)?;
    if json {
        println!("{}", serde_json::to_string(&trace)?);
    } else {
        let (min, max) = trace
            .voltage
            .iter()
            .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &v| {
                (lo.min(v), hi.max(v))
            });
        let mean = trace.voltage.iter().sum::<f64>() / trace.len() as f64;
        let span = trace.time.last().copied().unwrap_or_default();
        println!(
            "{} samples over {:.6} s: min {:.4} V, max {:.4} V, mean {:.4} V",
            trace.len(),
            span,
            min,
            max,
            mean
        );
    }
    manager.shutdown();
    Ok(())
}

fn send(
    config: &PitayaConfig,
    command: &str,
    params: Option<&str>,
    timeout: Option<f64>,
) -> Result<()> {
    let params = match params {
        None => Params::new(),
        Some(text) => match serde_json::from_str(text).context("parsing params")? {
            Value::Object(map) => map,
            other => anyhow::bail!("params must be a JSON object, got {other}"),
        },
    };
    let timeout = match timeout {
        Some(seconds) => Duration::try_from_secs_f64(seconds).context("invalid --timeout")?,
        None => config.worker.command_timeout,
    };

    let manager = start(config)?;
    let data = manager.send_command(command, params, timeout)?;
    println!("{}", serde_json::to_string_pretty(&data)?);
    manager.shutdown();
    Ok(())
}
