use super::{Measurement, Probe};
use crate::throughput::transfer::cache_busted;
use anyhow::{Context, Result};
use reqwest::{Client, Url};
use std::time::{Duration, Instant};

/// HTTP round-trip probe: time from request to response headers.
pub struct HttpProbe {
    client: Client,
    cache_bust: bool,
}

impl HttpProbe {
    pub fn new(cache_bust: bool) -> Result<Self> {
        let client = Client::builder()
            .user_agent(concat!("speedprobe/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("failed to build HTTP client")?;
        Ok(Self { client, cache_bust })
    }
}

#[async_trait::async_trait]
impl Probe for HttpProbe {
    async fn run(&self, target: &Url, timeout: Duration) -> Result<Measurement> {
        let url = if self.cache_bust {
            cache_busted(target)
        } else {
            target.clone()
        };

        let start = Instant::now();
        let result = self.client.get(url).timeout(timeout).send().await;
        let duration = start.elapsed();
        let timestamp = chrono::Utc::now();

        // Any answer counts as a round trip, whatever the status code.
        match result {
            Ok(_) => Ok(Measurement {
                target: target.to_string(),
                value: duration.as_secs_f64() * 1000.0,
                success: true,
                timestamp,
            }),
            Err(e) => {
                tracing::debug!(%target, error = %e, "latency probe failed");
                Ok(Measurement {
                    target: target.to_string(),
                    value: -1.0,
                    success: false,
                    timestamp,
                })
            }
        }
    }
}
