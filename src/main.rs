use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;

use speedprobe::config::{DirectionSelection, SpeedprobeConfig};
use speedprobe::display::{ConsoleSink, DisplaySink, JsonLinesSink};
use speedprobe::session::Session;
use speedprobe::throughput::{Mode, ThroughputError, Unit};

#[derive(Parser)]
#[command(
    name = "speedprobe",
    about = "Multi-endpoint HTTP throughput estimator",
    version,
    long_about = None
)]
struct Cli {
    /// Config file (defaults to $SPEEDPROBE_CONFIG, then /etc/speedprobe/speedprobe.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a throughput test against the configured endpoints
    SpeedTest {
        /// Scheduling mode: parallel or sequential
        #[arg(long)]
        mode: Option<Mode>,

        /// Direction: download, upload or both
        #[arg(long)]
        direction: Option<DirectionSelection>,

        /// Test duration per phase (e.g. "15s" or "15")
        #[arg(long)]
        duration: Option<String>,

        /// Mbps divisor: binary (2^20) or decimal (10^6)
        #[arg(long)]
        unit: Option<Unit>,

        /// Emit JSON lines instead of text
        #[arg(long)]
        json: bool,

        /// With --json, also emit a line per live update
        #[arg(long, requires = "json")]
        live: bool,

        /// Run the whole test this many times
        #[arg(long, default_value = "1")]
        repeat: u32,
    },

    /// Measure HTTP round-trip latency only
    Latency {
        /// Number of requests to average
        #[arg(long)]
        count: Option<u32>,
    },

    /// Look up the public IP address
    PublicIp,

    /// List configured endpoints
    Endpoints,

    /// Print the effective configuration as TOML
    Config,
}

fn parse_duration_secs(s: &str) -> Result<u64> {
    let secs: u64 = s
        .trim()
        .trim_end_matches('s')
        .parse()
        .with_context(|| format!("invalid duration '{}' (expected e.g. 15s)", s))?;
    anyhow::ensure!(secs > 0, "duration must be > 0");
    Ok(secs)
}

fn load_config(path: Option<&PathBuf>) -> Result<SpeedprobeConfig> {
    match path {
        Some(p) => SpeedprobeConfig::load(p),
        None => Ok(SpeedprobeConfig::load_or_default()),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let mut config = load_config(cli.config.as_ref())?;
    speedprobe::init_logging(&config.logging)?;

    match cli.command {
        Commands::SpeedTest {
            mode,
            direction,
            duration,
            unit,
            json,
            live,
            repeat,
        } => {
            if let Some(mode) = mode {
                config.test.mode = mode;
            }
            if let Some(direction) = direction {
                config.test.direction = direction;
            }
            if let Some(unit) = unit {
                config.test.unit = unit;
            }
            if let Some(duration) = duration {
                config.test.duration_secs = parse_duration_secs(&duration)?;
            }

            let mut session = Session::new(config)?;
            let mut sink: Box<dyn DisplaySink> = if json {
                Box::new(JsonLinesSink::stdout(live))
            } else {
                Box::new(ConsoleSink::new())
            };

            let cancel = CancellationToken::new();
            let ctrl_c = cancel.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    tracing::warn!("interrupted, finishing current probes");
                    ctrl_c.cancel();
                }
                // A second interrupt does not wait for anything.
                if tokio::signal::ctrl_c().await.is_ok() {
                    std::process::exit(130);
                }
            });

            for cycle in 1..=repeat.max(1) {
                if cancel.is_cancelled() {
                    break;
                }
                if repeat > 1 {
                    tracing::info!(cycle, repeat, "re-running test");
                }
                match session.run_cycle(&cancel, sink.as_mut()).await {
                    Ok(_) => {}
                    Err(e @ ThroughputError::NoEndpoints { .. }) => {
                        sink.show_error(&format!(
                            "{}; add endpoints to the config and retry",
                            e
                        ));
                        std::process::exit(2);
                    }
                    Err(e) => return Err(e.into()),
                }
            }
        }
        Commands::Latency { count } => {
            if let Some(count) = count {
                config.latency.count = count;
            }
            config.latency.enabled = true;
            let session = Session::new(config)?;
            match session.measure_latency().await {
                Some(ms) => println!("Ping: {} ms", ms),
                None => println!("Ping: {}", speedprobe::probes::UNAVAILABLE),
            }
        }
        Commands::PublicIp => {
            config.lookup.enabled = true;
            let session = Session::new(config)?;
            println!("{}", session.lookup_public_ip().await);
        }
        Commands::Endpoints => {
            println!("{:<8} | {:<60} | Size", "Dir", "URL");
            println!("{:-<8}-|-{:-<60}-|-{:-<12}", "", "", "");
            for ep in config.download_endpoints()? {
                let size = ep
                    .size_bytes()
                    .map(|b| b.to_string())
                    .unwrap_or_else(|| "unknown".to_string());
                println!("{:<8} | {:<60} | {}", "download", ep.url(), size);
            }
            for ep in config.upload_endpoints()? {
                println!("{:<8} | {:<60} | {}", "upload", ep.url(), "-");
            }
        }
        Commands::Config => {
            print!("{}", toml::to_string_pretty(&config)?);
        }
    }

    Ok(())
}
