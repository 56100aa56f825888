//! Runs probes against a list of endpoints, concurrently or one at a time.
//!
//! Probes are never spawned. All of them are polled from the calling task,
//! which is also the only place the live aggregator and the display sink are
//! touched.

use std::future::Future;
use std::time::Duration;

use futures::future::join_all;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::aggregator::{AggregateResult, SpeedAggregator};
use super::probe::{ProbeProgress, ProbeReport, ProbeStatus, TransferProbe};
use super::{mbps, Direction, Endpoint, Mode, Sample, ThroughputError};
use crate::display::{DisplaySink, LiveUpdate};

/// Everything one orchestrated phase produced.
#[derive(Debug, Clone)]
pub struct OrchestrationRun {
    pub direction: Direction,
    pub mode: Mode,
    /// One report per started probe, in endpoint order.
    pub reports: Vec<ProbeReport>,
    /// Median over the live progress figures.
    pub live: AggregateResult,
}

impl OrchestrationRun {
    pub fn final_samples(&self) -> Vec<Sample> {
        self.reports.iter().map(|r| r.final_sample).collect()
    }

    /// Median over the per-probe final samples.
    pub fn aggregate(&self) -> AggregateResult {
        SpeedAggregator::from_samples(self.reports.iter().map(|r| &r.final_sample)).result()
    }

    /// True when at least one probe ran and none of them moved any data.
    pub fn all_failed(&self) -> bool {
        !self.reports.is_empty()
            && self
                .reports
                .iter()
                .all(|r| r.status == ProbeStatus::Failed && r.bytes_transferred == 0)
    }
}

pub struct ProbeOrchestrator {
    probe: TransferProbe,
}

impl ProbeOrchestrator {
    pub fn new(probe: TransferProbe) -> Self {
        Self { probe }
    }

    pub async fn run(
        &self,
        endpoints: &[Endpoint],
        direction: Direction,
        duration: Duration,
        mode: Mode,
        cancel: &CancellationToken,
        sink: &mut dyn DisplaySink,
    ) -> Result<OrchestrationRun, ThroughputError> {
        if endpoints.is_empty() {
            return Err(ThroughputError::NoEndpoints { direction });
        }

        info!(
            %direction,
            %mode,
            endpoints = endpoints.len(),
            duration_secs = duration.as_secs_f64(),
            "starting throughput phase"
        );

        let mut live = SpeedAggregator::new();
        let reports = match mode {
            Mode::Parallel => {
                self.run_parallel(endpoints, direction, duration, cancel, sink, &mut live)
                    .await
            }
            Mode::Sequential => {
                self.run_sequential(endpoints, direction, duration, cancel, sink, &mut live)
                    .await
            }
        };

        let run = OrchestrationRun {
            direction,
            mode,
            reports,
            live: live.result(),
        };
        if run.all_failed() {
            warn!(%direction, "every endpoint failed");
        }
        Ok(run)
    }

    async fn run_parallel(
        &self,
        endpoints: &[Endpoint],
        direction: Direction,
        duration: Duration,
        cancel: &CancellationToken,
        sink: &mut dyn DisplaySink,
        live: &mut SpeedAggregator,
    ) -> Vec<ProbeReport> {
        let started = Instant::now();
        let deadline = started + duration;
        let unit = self.probe.settings().unit;
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut latest = vec![0u64; endpoints.len()];

        let probes = join_all(endpoints.iter().enumerate().map(|(i, endpoint)| {
            self.probe
                .run_until(i, endpoint, direction, deadline, cancel, Some(&tx))
        }));

        drive(probes, &mut rx, |progress| {
            latest[progress.index] = progress.bytes;
            let combined: u64 = latest.iter().sum();
            let now = progress.sample.timestamp;
            if let Some(value) = mbps(combined, now.saturating_duration_since(started), unit) {
                let agg = live.push(value);
                sink.show_live(&LiveUpdate {
                    direction,
                    mbps: value,
                    median_mbps: agg.median_mbps,
                    sample_count: agg.sample_count,
                    position: None,
                });
            }
        })
        .await
    }

    async fn run_sequential(
        &self,
        endpoints: &[Endpoint],
        direction: Direction,
        duration: Duration,
        cancel: &CancellationToken,
        sink: &mut dyn DisplaySink,
        live: &mut SpeedAggregator,
    ) -> Vec<ProbeReport> {
        let total = endpoints.len();
        let mut reports = Vec::with_capacity(total);

        for (i, endpoint) in endpoints.iter().enumerate() {
            if cancel.is_cancelled() {
                info!(skipped = total - i, "phase cancelled, not starting remaining endpoints");
                break;
            }
            info!(%endpoint, position = i + 1, total, "probing endpoint");

            let (tx, mut rx) = mpsc::unbounded_channel();
            let deadline = Instant::now() + duration;
            let probe = self
                .probe
                .run_until(i, endpoint, direction, deadline, cancel, Some(&tx));

            let report = drive(probe, &mut rx, |progress| {
                let agg = live.push(progress.sample.value);
                sink.show_live(&LiveUpdate {
                    direction,
                    mbps: progress.sample.value,
                    median_mbps: agg.median_mbps,
                    sample_count: agg.sample_count,
                    position: Some((i + 1, total)),
                });
            })
            .await;
            reports.push(report);
        }

        reports
    }
}

/// Poll `fut` to completion while handing every progress event to
/// `on_progress`, including events still queued when it finishes.
async fn drive<F, T>(
    fut: F,
    rx: &mut mpsc::UnboundedReceiver<ProbeProgress>,
    mut on_progress: impl FnMut(ProbeProgress),
) -> T
where
    F: Future<Output = T>,
{
    tokio::pin!(fut);
    let out = loop {
        tokio::select! {
            biased;
            Some(progress) = rx.recv() => on_progress(progress),
            out = &mut fut => break out,
        }
    };
    while let Ok(progress) = rx.try_recv() {
        on_progress(progress);
    }
    out
}
