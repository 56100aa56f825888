//! TOML configuration for speedprobe.
//!
//! Every section has defaults, so an empty file (or no file at all) yields a
//! usable configuration. The path can be overridden with `SPEEDPROBE_CONFIG`.

use std::path::Path;

use anyhow::{Context, Result};
use reqwest::Url;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::throughput::{Endpoint, Mode, Unit};

/// Environment variable naming a config file to load.
pub const CONFIG_ENV: &str = "SPEEDPROBE_CONFIG";

/// System-wide config location.
pub const SYSTEM_CONFIG_PATH: &str = "/etc/speedprobe/speedprobe.toml";

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpeedprobeConfig {
    #[serde(default)]
    pub test: TestConfig,
    #[serde(default = "default_endpoints")]
    pub endpoints: Vec<EndpointConfig>,
    #[serde(default)]
    pub upload: UploadConfig,
    #[serde(default)]
    pub latency: LatencyConfig,
    #[serde(default)]
    pub lookup: LookupConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Default for SpeedprobeConfig {
    fn default() -> Self {
        Self {
            test: TestConfig::default(),
            endpoints: default_endpoints(),
            upload: UploadConfig::default(),
            latency: LatencyConfig::default(),
            lookup: LookupConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl SpeedprobeConfig {
    /// Load configuration from a TOML file at `path`.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file: {}", path.display()))?;
        let config = Self::load_from_str(&content)
            .with_context(|| format!("invalid config file: {}", path.display()))?;
        info!(path = %path.display(), "loaded configuration");
        Ok(config)
    }

    /// Parse and validate config from a string.
    pub fn load_from_str(s: &str) -> Result<Self> {
        let config: Self = toml::from_str(s).context("failed to parse TOML")?;
        config.validate()?;
        Ok(config)
    }

    /// Try to load configuration from, in order:
    /// 1. The path specified by the `SPEEDPROBE_CONFIG` environment variable.
    /// 2. `/etc/speedprobe/speedprobe.toml`.
    /// 3. Fall back to compiled-in defaults.
    pub fn load_or_default() -> Self {
        if let Ok(env_path) = std::env::var(CONFIG_ENV) {
            let path = Path::new(&env_path);
            match Self::load(path) {
                Ok(cfg) => return cfg,
                Err(e) => {
                    warn!(
                        path = %path.display(),
                        error = %e,
                        "SPEEDPROBE_CONFIG set but file could not be loaded, trying fallback"
                    );
                }
            }
        }

        let system_path = Path::new(SYSTEM_CONFIG_PATH);
        if system_path.exists() {
            match Self::load(system_path) {
                Ok(cfg) => return cfg,
                Err(e) => {
                    warn!(
                        path = %system_path.display(),
                        error = %e,
                        "system config file exists but could not be loaded, using defaults"
                    );
                }
            }
        }

        debug!("no config file found, using compiled-in defaults");
        Self::default()
    }

    pub fn validate(&self) -> Result<()> {
        anyhow::ensure!(self.test.duration_secs > 0, "test.duration_secs must be > 0");
        anyhow::ensure!(
            self.upload.chunk_size_bytes > 0,
            "upload.chunk_size_bytes must be > 0"
        );
        anyhow::ensure!(self.latency.count > 0, "latency.count must be > 0");
        self.download_endpoints()?;
        self.upload_endpoints()?;
        Url::parse(&self.latency.url)
            .with_context(|| format!("latency.url is not a valid URL: {}", self.latency.url))?;
        Url::parse(&self.lookup.public_ip_url).with_context(|| {
            format!(
                "lookup.public_ip_url is not a valid URL: {}",
                self.lookup.public_ip_url
            )
        })?;
        Ok(())
    }

    /// Parsed download endpoints, in configured order.
    pub fn download_endpoints(&self) -> Result<Vec<Endpoint>> {
        self.endpoints
            .iter()
            .map(|e| Endpoint::parse(&e.url, e.size_bytes).map_err(anyhow::Error::from))
            .collect()
    }

    /// Parsed upload endpoints, in configured order.
    pub fn upload_endpoints(&self) -> Result<Vec<Endpoint>> {
        self.upload
            .urls
            .iter()
            .map(|u| Endpoint::parse(u, None).map_err(anyhow::Error::from))
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Test
// ---------------------------------------------------------------------------

/// Which directions a test cycle measures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DirectionSelection {
    #[default]
    Download,
    Upload,
    Both,
}

impl std::str::FromStr for DirectionSelection {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "download" => Ok(Self::Download),
            "upload" => Ok(Self::Upload),
            "both" => Ok(Self::Both),
            other => Err(format!(
                "unknown direction '{}' (expected download, upload or both)",
                other
            )),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TestConfig {
    /// Length of each probe phase, in seconds.
    pub duration_secs: u64,
    pub mode: Mode,
    pub direction: DirectionSelection,
    /// Mbps divisor, held for a whole run.
    pub unit: Unit,
    /// Append a `nocache` query pair to every request.
    pub cache_bust: bool,
    /// Connect timeout for transfer requests, in milliseconds.
    pub connect_timeout_ms: u64,
}

impl Default for TestConfig {
    fn default() -> Self {
        Self {
            duration_secs: 15,
            mode: Mode::Parallel,
            direction: DirectionSelection::Download,
            unit: Unit::Binary,
            cache_bust: true,
            connect_timeout_ms: 5000,
        }
    }
}

// ---------------------------------------------------------------------------
// Endpoints
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EndpointConfig {
    pub url: String,
    /// Expected payload size, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size_bytes: Option<u64>,
}

fn default_endpoints() -> Vec<EndpointConfig> {
    [
        "https://speedtest089.s3.eu-north-1.amazonaws.com/20mb.pdf",
        "https://d38z8pnnvn2m2r.cloudfront.net/20MB.test",
        "https://speedtest-nyc1.digitalocean.com/20mb.test",
        "https://speed.hetzner.de/20MB.bin",
        "https://proof.ovh.net/files/20Mb.dat",
        "https://speedtest.tele2.net/20MB.zip",
    ]
    .iter()
    .map(|url| EndpointConfig {
        url: url.to_string(),
        size_bytes: None,
    })
    .collect()
}

// ---------------------------------------------------------------------------
// Upload
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UploadConfig {
    /// Size of each uploaded chunk. Chunks are sent back-to-back until the
    /// deadline.
    pub chunk_size_bytes: usize,
    pub urls: Vec<String>,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            chunk_size_bytes: 1024 * 1024,
            urls: vec!["https://speed.cloudflare.com/__up".to_string()],
        }
    }
}

// ---------------------------------------------------------------------------
// Latency
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LatencyConfig {
    pub enabled: bool,
    pub url: String,
    pub count: u32,
    pub timeout_ms: u64,
    /// Value a failed attempt contributes to the average.
    pub failure_penalty_ms: f64,
}

impl Default for LatencyConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            url: "https://1.1.1.1/cdn-cgi/trace".to_string(),
            count: 5,
            timeout_ms: 5000,
            failure_penalty_ms: 999.0,
        }
    }
}

// ---------------------------------------------------------------------------
// Lookup
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LookupConfig {
    pub enabled: bool,
    pub public_ip_url: String,
    pub timeout_ms: u64,
}

impl Default for LookupConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            public_ip_url: "https://api64.ipify.org?format=json".to_string(),
            timeout_ms: 5000,
        }
    }
}

// ---------------------------------------------------------------------------
// Logging
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Minimum tracing level (`trace`, `debug`, `info`, `warn`, `error`).
    /// `RUST_LOG` takes precedence when set.
    pub level: String,
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Text,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
