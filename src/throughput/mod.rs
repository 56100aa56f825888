//! Throughput testing engine: timed HTTP transfers, orchestration and median
//! aggregation.

pub mod aggregator;
pub mod orchestrator;
pub mod probe;
pub mod report;
pub mod transfer;

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use reqwest::Url;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::time::Instant;

#[derive(Debug, Error)]
pub enum ThroughputError {
    #[error("endpoint {url} unreachable: {reason}")]
    TransferUnreachable { url: String, reason: String },

    #[error("endpoint {url} answered with HTTP {status}")]
    HttpStatus { url: String, status: u16 },

    #[error("no endpoints configured for {direction} test")]
    NoEndpoints { direction: Direction },

    #[error("invalid endpoint URL {url:?}: {reason}")]
    InvalidEndpoint { url: String, reason: String },
}

/// Which way the payload moves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Download,
    Upload,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Download => "download",
            Self::Upload => "upload",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Divisor used to turn bits per second into "Mbps".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Unit {
    /// 10^6 bits.
    Decimal,
    /// 2^20 bits.
    #[default]
    Binary,
}

impl Unit {
    pub fn divisor(&self) -> f64 {
        match self {
            Self::Decimal => 1_000_000.0,
            Self::Binary => 1_048_576.0,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Decimal => "decimal",
            Self::Binary => "binary",
        }
    }
}

impl fmt::Display for Unit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Unit {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "decimal" | "si" => Ok(Self::Decimal),
            "binary" | "iec" => Ok(Self::Binary),
            other => Err(format!("unknown unit '{}' (expected decimal or binary)", other)),
        }
    }
}

/// How the orchestrator schedules probes across endpoints.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    #[default]
    Parallel,
    Sequential,
}

impl Mode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Parallel => "parallel",
            Self::Sequential => "sequential",
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Mode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "parallel" => Ok(Self::Parallel),
            "sequential" => Ok(Self::Sequential),
            other => Err(format!(
                "unknown mode '{}' (expected parallel or sequential)",
                other
            )),
        }
    }
}

/// A payload location. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    url: Url,
    size_bytes: Option<u64>,
}

impl Endpoint {
    /// Parse and validate an endpoint URL. Only `http` and `https` are accepted.
    pub fn parse(url: &str, size_bytes: Option<u64>) -> Result<Self, ThroughputError> {
        let parsed = Url::parse(url).map_err(|e| ThroughputError::InvalidEndpoint {
            url: url.to_string(),
            reason: e.to_string(),
        })?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(ThroughputError::InvalidEndpoint {
                url: url.to_string(),
                reason: format!("unsupported scheme '{}'", parsed.scheme()),
            });
        }
        Ok(Self {
            url: parsed,
            size_bytes,
        })
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    /// Payload size, when known ahead of time.
    pub fn size_bytes(&self) -> Option<u64> {
        self.size_bytes
    }

    /// Host part of the URL, for compact display.
    pub fn host(&self) -> &str {
        self.url.host_str().unwrap_or("unknown")
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.url.as_str())
    }
}

/// One throughput measurement.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sample {
    pub value: f64,
    pub timestamp: Instant,
}

impl Sample {
    pub fn new(value: f64, timestamp: Instant) -> Self {
        Self { value, timestamp }
    }

    pub fn zero(timestamp: Instant) -> Self {
        Self::new(0.0, timestamp)
    }
}

/// Throughput in Mbps for `bytes` moved over `elapsed`.
///
/// Returns `None` when no time has elapsed yet, so callers can skip the sample
/// instead of dividing by zero.
pub fn mbps(bytes: u64, elapsed: Duration, unit: Unit) -> Option<f64> {
    let secs = elapsed.as_secs_f64();
    if secs <= 0.0 {
        return None;
    }
    Some((bytes as f64 * 8.0) / secs / unit.divisor())
}
