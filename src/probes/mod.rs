//! Auxiliary lookups run alongside a throughput test: HTTP round-trip latency
//! and public IP discovery. Failures here never fail the test.

pub mod http;
pub mod public_ip;

use anyhow::Result;
use reqwest::Url;
use std::time::Duration;
use tracing::debug;

/// Placeholder rendered when a lookup could not produce a value.
pub const UNAVAILABLE: &str = "Unavailable";

#[derive(Debug, Clone, PartialEq)]
pub struct Measurement {
    pub target: String,
    pub value: f64, // ms; -1.0 when the probe failed
    pub success: bool,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

/// Trait for latency probes.
#[async_trait::async_trait]
pub trait Probe: Send + Sync {
    /// Run the probe against a target once.
    async fn run(&self, target: &Url, timeout: Duration) -> Result<Measurement>;
}

/// Mean round-trip time over `measurements`, rounded to whole ms.
///
/// Failed attempts count as `failure_penalty_ms`. `None` when there is nothing
/// to average.
pub fn average_latency(measurements: &[Measurement], failure_penalty_ms: f64) -> Option<u64> {
    if measurements.is_empty() {
        return None;
    }
    let total: f64 = measurements
        .iter()
        .map(|m| if m.success { m.value } else { failure_penalty_ms })
        .sum();
    Some((total / measurements.len() as f64).round() as u64)
}

/// Run `count` sequential probes and average them.
pub async fn latency_test(
    probe: &dyn Probe,
    target: &Url,
    count: u32,
    timeout: Duration,
    failure_penalty_ms: f64,
) -> Option<u64> {
    let mut measurements = Vec::with_capacity(count as usize);
    for attempt in 0..count {
        let m = match probe.run(target, timeout).await {
            Ok(m) => m,
            Err(e) => {
                debug!(%target, attempt, error = %e, "latency probe errored");
                Measurement {
                    target: target.to_string(),
                    value: -1.0,
                    success: false,
                    timestamp: chrono::Utc::now(),
                }
            }
        };
        measurements.push(m);
    }
    let avg = average_latency(&measurements, failure_penalty_ms);
    tracing::info!(%target, count, avg_ms = ?avg, "latency test finished");
    avg
}

#[cfg(test)]
mod tests {
    use super::*;

    fn m(value: f64, success: bool) -> Measurement {
        Measurement {
            target: "https://1.1.1.1/cdn-cgi/trace".to_string(),
            value,
            success,
            timestamp: chrono::Utc::now(),
        }
    }

    #[test]
    fn test_average_latency() {
        assert_eq!(average_latency(&[], 999.0), None);
        assert_eq!(average_latency(&[m(10.0, true), m(20.4, true)], 999.0), Some(15));
    }

    #[test]
    fn test_failures_use_penalty() {
        let ms = [m(1.0, true), m(-1.0, false), m(2.0, true), m(-1.0, false)];
        // (1 + 999 + 2 + 999) / 4 = 500.25
        assert_eq!(average_latency(&ms, 999.0), Some(500));
    }

    struct FlakyProbe;

    #[async_trait::async_trait]
    impl Probe for FlakyProbe {
        async fn run(&self, _target: &Url, _timeout: Duration) -> Result<Measurement> {
            anyhow::bail!("connection refused")
        }
    }

    #[tokio::test]
    async fn test_latency_test_all_errors() {
        let url = Url::parse("http://127.0.0.1:9/").unwrap();
        let avg = latency_test(&FlakyProbe, &url, 3, Duration::from_millis(10), 999.0).await;
        assert_eq!(avg, Some(999));
        assert_eq!(latency_test(&FlakyProbe, &url, 0, Duration::from_millis(10), 999.0).await, None);
    }
}
