//! Session state for one invocation: configuration, transport and the last
//! report. Reset at the start of every test cycle.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use reqwest::{Client, Url};
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::config::{DirectionSelection, SpeedprobeConfig};
use crate::display::DisplaySink;
use crate::probes::http::HttpProbe;
use crate::probes::{self, Probe, UNAVAILABLE};
use crate::throughput::orchestrator::ProbeOrchestrator;
use crate::throughput::probe::{ProbeSettings, TransferProbe};
use crate::throughput::report::{PhaseSummary, SpeedReport};
use crate::throughput::transfer::{HttpTransfer, Transfer};
use crate::throughput::{Direction, Endpoint, ThroughputError};

pub struct Session {
    config: SpeedprobeConfig,
    download_endpoints: Vec<Endpoint>,
    upload_endpoints: Vec<Endpoint>,
    transport: Arc<dyn Transfer>,
    latency_probe: Arc<dyn Probe>,
    client: Client,
    cycles: u32,
    last_report: Option<SpeedReport>,
}

impl Session {
    /// Session backed by real HTTP transfers.
    pub fn new(config: SpeedprobeConfig) -> Result<Self> {
        let transport = HttpTransfer::new(Duration::from_millis(config.test.connect_timeout_ms))?;
        Self::with_transport(config, Arc::new(transport))
    }

    /// Session with a caller-supplied transfer primitive.
    pub fn with_transport(config: SpeedprobeConfig, transport: Arc<dyn Transfer>) -> Result<Self> {
        config.validate()?;
        let latency_probe = Arc::new(HttpProbe::new(config.test.cache_bust)?);
        let client = Client::builder()
            .build()
            .context("failed to build HTTP client")?;
        Ok(Self {
            download_endpoints: config.download_endpoints()?,
            upload_endpoints: config.upload_endpoints()?,
            config,
            transport,
            latency_probe,
            client,
            cycles: 0,
            last_report: None,
        })
    }

    pub fn config(&self) -> &SpeedprobeConfig {
        &self.config
    }

    pub fn cycles(&self) -> u32 {
        self.cycles
    }

    pub fn last_report(&self) -> Option<&SpeedReport> {
        self.last_report.as_ref()
    }

    /// Forget the previous cycle's results.
    pub fn reset(&mut self) {
        self.last_report = None;
    }

    fn directions(&self) -> &'static [Direction] {
        match self.config.test.direction {
            DirectionSelection::Download => &[Direction::Download],
            DirectionSelection::Upload => &[Direction::Upload],
            DirectionSelection::Both => &[Direction::Download, Direction::Upload],
        }
    }

    fn endpoints(&self, direction: Direction) -> &[Endpoint] {
        match direction {
            Direction::Download => &self.download_endpoints,
            Direction::Upload => &self.upload_endpoints,
        }
    }

    /// Run one full test cycle: throughput phases plus the latency and public
    /// IP lookups, all concurrently. The report is also handed to `sink`.
    ///
    /// Only a phase with no endpoints at all is an error.
    pub async fn run_cycle(
        &mut self,
        cancel: &CancellationToken,
        sink: &mut dyn DisplaySink,
    ) -> Result<SpeedReport, ThroughputError> {
        self.reset();
        if let Some(&direction) = self
            .directions()
            .iter()
            .find(|&&d| self.endpoints(d).is_empty())
        {
            return Err(ThroughputError::NoEndpoints { direction });
        }
        self.cycles += 1;

        let run_id = uuid::Uuid::new_v4().to_string();
        let tested_at = chrono::Local::now();
        let test = &self.config.test;
        info!(
            run_id = run_id.as_str(),
            cycle = self.cycles,
            mode = %test.mode,
            unit = %test.unit,
            duration_secs = test.duration_secs,
            "starting test cycle"
        );

        let orchestrator = ProbeOrchestrator::new(TransferProbe::new(
            Arc::clone(&self.transport),
            ProbeSettings {
                unit: test.unit,
                chunk_size_bytes: self.config.upload.chunk_size_bytes,
                cache_bust: test.cache_bust,
            },
        ));
        let duration = Duration::from_secs(test.duration_secs);

        let phases = async {
            let mut summaries = Vec::new();
            for &direction in self.directions() {
                let run = orchestrator
                    .run(
                        self.endpoints(direction),
                        direction,
                        duration,
                        test.mode,
                        cancel,
                        &mut *sink,
                    )
                    .await?;
                if run.all_failed() {
                    sink.show_error(&format!(
                        "all {} {} endpoints were unreachable",
                        run.reports.len(),
                        direction
                    ));
                }
                summaries.push(PhaseSummary::from(&run));
            }
            Ok::<_, ThroughputError>(summaries)
        };

        // Lookups give up as soon as the caller cancels.
        let latency = async {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => None,
                ms = self.measure_latency() => ms,
            }
        };
        let public_ip = async {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => UNAVAILABLE.to_string(),
                ip = self.lookup_public_ip() => ip,
            }
        };

        let (summaries, latency_ms, public_ip) = tokio::join!(phases, latency, public_ip);
        let summaries = summaries?;

        let mut report = SpeedReport {
            run_id,
            tested_at,
            mode: test.mode,
            unit: test.unit,
            download: None,
            upload: None,
            latency_ms,
            public_ip,
        };
        for summary in summaries {
            match summary.direction {
                Direction::Download => report.download = Some(summary),
                Direction::Upload => report.upload = Some(summary),
            }
        }

        info!(
            run_id = report.run_id.as_str(),
            download_mbps = ?report.download.as_ref().map(|p| p.median_mbps),
            upload_mbps = ?report.upload.as_ref().map(|p| p.median_mbps),
            latency_ms = ?report.latency_ms,
            "test cycle finished"
        );

        sink.show_final(&report);
        self.last_report = Some(report.clone());
        Ok(report)
    }

    /// Latency test alone, `None` when disabled.
    pub async fn measure_latency(&self) -> Option<u64> {
        let cfg = &self.config.latency;
        if !cfg.enabled {
            return None;
        }
        let url = Url::parse(&cfg.url).ok()?;
        probes::latency_test(
            self.latency_probe.as_ref(),
            &url,
            cfg.count,
            Duration::from_millis(cfg.timeout_ms),
            cfg.failure_penalty_ms,
        )
        .await
    }

    /// Public IP alone, [`UNAVAILABLE`] when disabled or failing.
    pub async fn lookup_public_ip(&self) -> String {
        let cfg = &self.config.lookup;
        if !cfg.enabled {
            return UNAVAILABLE.to_string();
        }
        match Url::parse(&cfg.public_ip_url) {
            Ok(url) => {
                probes::public_ip::lookup(&self.client, &url, Duration::from_millis(cfg.timeout_ms))
                    .await
            }
            Err(_) => UNAVAILABLE.to_string(),
        }
    }
}
