//! A single timed transfer against one endpoint.
//!
//! The probe starts its timer when the transfer is issued, turns every progress
//! notification into a [`Sample`], and always resolves with a final sample:
//! on completion, at the deadline, on caller cancellation, and on failure.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures::FutureExt;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::transfer::{cache_busted, random_payload, Transfer, TransferRequest};
use super::{mbps, Direction, Endpoint, Sample, ThroughputError, Unit};

/// Lifecycle of a probe run. Exactly one terminal state is ever reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProbeStatus {
    Running,
    Completed,
    Aborted,
    Failed,
}

impl ProbeStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Running)
    }
}

/// Byte and sample bookkeeping for one probe.
#[derive(Debug, Clone)]
pub struct ProbeRun {
    unit: Unit,
    started_at: Instant,
    bytes_transferred: u64,
    status: ProbeStatus,
    samples_emitted: usize,
}

impl ProbeRun {
    pub fn start(unit: Unit, now: Instant) -> Self {
        Self {
            unit,
            started_at: now,
            bytes_transferred: 0,
            status: ProbeStatus::Running,
            samples_emitted: 0,
        }
    }

    /// Record a cumulative byte count and return the sample it produces.
    ///
    /// Yields nothing once the run is terminal or while no time has elapsed.
    /// Byte counts never move backwards.
    pub fn record(&mut self, bytes: u64, now: Instant) -> Option<Sample> {
        if self.status.is_terminal() {
            return None;
        }
        self.bytes_transferred = self.bytes_transferred.max(bytes);
        let value = mbps(
            self.bytes_transferred,
            now.saturating_duration_since(self.started_at),
            self.unit,
        )?;
        self.samples_emitted += 1;
        Some(Sample::new(value, now))
    }

    /// Move to a terminal status and compute the final sample.
    pub fn finish(&mut self, status: ProbeStatus, now: Instant) -> Sample {
        debug_assert!(status.is_terminal());
        if !self.status.is_terminal() {
            self.status = status;
        }
        let value = mbps(
            self.bytes_transferred,
            now.saturating_duration_since(self.started_at),
            self.unit,
        )
        .unwrap_or(0.0);
        Sample::new(value, now)
    }

    pub fn started_at(&self) -> Instant {
        self.started_at
    }

    pub fn bytes_transferred(&self) -> u64 {
        self.bytes_transferred
    }

    pub fn status(&self) -> ProbeStatus {
        self.status
    }

    pub fn samples_emitted(&self) -> usize {
        self.samples_emitted
    }
}

/// Outcome of a finished probe.
#[derive(Debug, Clone)]
pub struct ProbeReport {
    pub endpoint: Endpoint,
    pub direction: Direction,
    pub status: ProbeStatus,
    pub bytes_transferred: u64,
    pub elapsed: Duration,
    pub samples_emitted: usize,
    pub final_sample: Sample,
    pub error: Option<String>,
}

/// Progress sample forwarded to an orchestrator.
#[derive(Debug, Clone, Copy)]
pub struct ProbeProgress {
    /// Position of the endpoint in the orchestrated list.
    pub index: usize,
    pub bytes: u64,
    pub sample: Sample,
}

pub type ProbeEventTx = mpsc::UnboundedSender<ProbeProgress>;

/// Knobs held fixed for every probe of a run.
#[derive(Debug, Clone, Copy)]
pub struct ProbeSettings {
    pub unit: Unit,
    pub chunk_size_bytes: usize,
    pub cache_bust: bool,
}

impl Default for ProbeSettings {
    fn default() -> Self {
        Self {
            unit: Unit::Binary,
            chunk_size_bytes: 1024 * 1024,
            cache_bust: true,
        }
    }
}

enum Step {
    Finished(Result<u64, ThroughputError>),
    Stopped,
}

#[derive(Clone)]
pub struct TransferProbe {
    transport: Arc<dyn Transfer>,
    settings: ProbeSettings,
}

impl TransferProbe {
    pub fn new(transport: Arc<dyn Transfer>, settings: ProbeSettings) -> Self {
        Self {
            transport,
            settings,
        }
    }

    pub fn settings(&self) -> &ProbeSettings {
        &self.settings
    }

    /// Run one probe for at most `duration`.
    pub async fn run(&self, endpoint: &Endpoint, direction: Direction, duration: Duration) -> ProbeReport {
        let cancel = CancellationToken::new();
        self.run_until(0, endpoint, direction, Instant::now() + duration, &cancel, None)
            .await
    }

    /// Run one probe until `deadline` or until `cancel` fires, forwarding each
    /// progress sample to `events`. Never fails: errors end up in the report
    /// with a final sample computed from whatever was transferred.
    pub async fn run_until(
        &self,
        index: usize,
        endpoint: &Endpoint,
        direction: Direction,
        deadline: Instant,
        cancel: &CancellationToken,
        events: Option<&ProbeEventTx>,
    ) -> ProbeReport {
        let mut run = ProbeRun::start(self.settings.unit, Instant::now());
        let token = cancel.child_token();
        let payload = match direction {
            Direction::Upload => random_payload(self.settings.chunk_size_bytes),
            Direction::Download => Bytes::new(),
        };

        debug!(%endpoint, %direction, index, "probe started");

        let sleep = tokio::time::sleep_until(deadline);
        tokio::pin!(sleep);

        // Bytes from upload chunks that already completed.
        let mut base: u64 = 0;
        let mut chunks: u32 = 0;
        let mut error: Option<ThroughputError> = None;

        let status = loop {
            let url = if self.settings.cache_bust {
                cache_busted(endpoint.url())
            } else {
                endpoint.url().clone()
            };
            let request = match direction {
                Direction::Download => TransferRequest::download(url),
                Direction::Upload => TransferRequest::upload(url, payload.clone()),
            };

            let (tx, mut rx) = mpsc::unbounded_channel();
            let transfer = self.transport.issue(request, tx, token.clone());
            tokio::pin!(transfer);
            chunks += 1;

            let step = loop {
                tokio::select! {
                    biased;
                    Some(bytes) = rx.recv() => forward(&mut run, base + bytes, index, events),
                    result = &mut transfer => break Step::Finished(result),
                    _ = &mut sleep => break Step::Stopped,
                    _ = token.cancelled() => break Step::Stopped,
                }
            };

            let result = match step {
                Step::Finished(result) => result,
                Step::Stopped => {
                    token.cancel();
                    while let Ok(bytes) = rx.try_recv() {
                        forward(&mut run, base + bytes, index, events);
                    }
                    // One more poll lets a cooperative transfer report its
                    // last count. One that ignores cancellation stays frozen.
                    if let Some(Ok(total)) = transfer.as_mut().now_or_never() {
                        forward(&mut run, base + total, index, events);
                    }
                    break ProbeStatus::Aborted;
                }
            };

            while let Ok(bytes) = rx.try_recv() {
                forward(&mut run, base + bytes, index, events);
            }

            match result {
                Err(e) => {
                    warn!(%endpoint, %direction, error = %e, "transfer failed");
                    error = Some(e);
                    break ProbeStatus::Failed;
                }
                Ok(total) => {
                    forward(&mut run, base + total, index, events);
                    // The transfer saw the caller's cancellation first.
                    if token.is_cancelled() {
                        break ProbeStatus::Aborted;
                    }
                    match direction {
                        Direction::Download => {
                            if let Some(expected) = endpoint.size_bytes() {
                                if total != expected {
                                    warn!(%endpoint, expected, received = total, "payload size mismatch");
                                }
                            }
                            break ProbeStatus::Completed;
                        }
                        Direction::Upload => {
                            base += total;
                            // A chunk finishing past the deadline still counts,
                            // but starts no successor.
                            if Instant::now() >= deadline {
                                break ProbeStatus::Completed;
                            }
                        }
                    }
                }
            }
        };

        let final_sample = run.finish(status, Instant::now());
        let elapsed = final_sample.timestamp.saturating_duration_since(run.started_at());

        info!(
            %endpoint,
            %direction,
            status = ?status,
            bytes = run.bytes_transferred(),
            chunks,
            mbps = final_sample.value,
            elapsed_ms = elapsed.as_millis() as u64,
            "probe finished"
        );

        ProbeReport {
            endpoint: endpoint.clone(),
            direction,
            status,
            bytes_transferred: run.bytes_transferred(),
            elapsed,
            samples_emitted: run.samples_emitted(),
            final_sample,
            error: error.map(|e| e.to_string()),
        }
    }
}

fn forward(run: &mut ProbeRun, bytes: u64, index: usize, events: Option<&ProbeEventTx>) {
    if let Some(sample) = run.record(bytes, Instant::now()) {
        if let Some(tx) = events {
            let _ = tx.send(ProbeProgress {
                index,
                bytes: run.bytes_transferred(),
                sample,
            });
        }
    }
}
