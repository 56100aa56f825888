// Shared helpers: scripted in-memory transfers and a recording display sink.
#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use speedprobe::display::{DisplaySink, LiveUpdate};
use speedprobe::throughput::report::SpeedReport;
use speedprobe::throughput::transfer::{ProgressTx, Transfer, TransferRequest};
use speedprobe::throughput::{Direction, Endpoint, ThroughputError};
use tokio_util::sync::CancellationToken;

pub const MIB: u64 = 1_048_576;

/// How a scripted endpoint behaves.
#[derive(Debug, Clone, Copy)]
pub enum Behavior {
    /// `chunk` bytes every `every`. Completes at `total` (uploads default to the
    /// payload length), honours cancellation.
    Steady {
        chunk: u64,
        every: Duration,
        total: Option<u64>,
    },
    /// Fails before moving any data.
    Refuse,
    /// Moves `bytes` after `after`, then fails.
    FailAfter { bytes: u64, after: Duration },
    /// Reports `bytes` immediately, then hangs forever and ignores cancellation.
    Stuck { bytes: u64 },
    /// `per_tick` notifications of `chunk` bytes each, every `every`. Never
    /// completes on its own, honours cancellation.
    Burst {
        chunk: u64,
        per_tick: u32,
        every: Duration,
    },
}

impl Behavior {
    pub fn steady_mib_per_tick(ticks_ms: u64) -> Self {
        Self::Steady {
            chunk: MIB,
            every: Duration::from_millis(ticks_ms),
            total: None,
        }
    }
}

/// Transfer whose behaviour is keyed by URL path.
#[derive(Default)]
pub struct ScriptedTransfer {
    behaviors: HashMap<String, Behavior>,
    requests: Mutex<Vec<TransferRequest>>,
}

impl ScriptedTransfer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, path: &str, behavior: Behavior) -> Self {
        self.behaviors.insert(path.to_string(), behavior);
        self
    }

    pub fn requests(&self) -> Vec<TransferRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl Transfer for ScriptedTransfer {
    async fn issue(
        &self,
        request: TransferRequest,
        progress: ProgressTx,
        cancel: CancellationToken,
    ) -> Result<u64, ThroughputError> {
        self.requests.lock().unwrap().push(request.clone());
        let behavior = self
            .behaviors
            .get(request.url.path())
            .copied()
            .unwrap_or(Behavior::Refuse);

        match behavior {
            Behavior::Refuse => Err(ThroughputError::TransferUnreachable {
                url: request.url.to_string(),
                reason: "connection refused".to_string(),
            }),
            Behavior::FailAfter { bytes, after } => {
                tokio::time::sleep(after).await;
                let _ = progress.send(bytes);
                Err(ThroughputError::TransferUnreachable {
                    url: request.url.to_string(),
                    reason: "connection reset".to_string(),
                })
            }
            Behavior::Stuck { bytes } => {
                let _ = progress.send(bytes);
                Ok(std::future::pending::<u64>().await)
            }
            Behavior::Burst {
                chunk,
                per_tick,
                every,
            } => {
                let mut sent = 0u64;
                loop {
                    tokio::select! {
                        biased;
                        _ = cancel.cancelled() => {
                            let _ = progress.send(sent);
                            return Ok(sent);
                        }
                        _ = tokio::time::sleep(every) => {
                            for _ in 0..per_tick {
                                sent += chunk;
                                let _ = progress.send(sent);
                            }
                        }
                    }
                }
            }
            Behavior::Steady { chunk, every, total } => {
                let limit = match request.direction {
                    Direction::Upload => total.or(Some(request.payload.len() as u64)),
                    Direction::Download => total,
                };
                let mut sent = 0u64;
                loop {
                    tokio::select! {
                        biased;
                        _ = cancel.cancelled() => {
                            let _ = progress.send(sent);
                            return Ok(sent);
                        }
                        _ = tokio::time::sleep(every) => {
                            sent += chunk;
                            if let Some(limit) = limit {
                                sent = sent.min(limit);
                            }
                            let _ = progress.send(sent);
                            if limit.map_or(false, |l| sent >= l) {
                                return Ok(sent);
                            }
                        }
                    }
                }
            }
        }
    }
}

pub fn endpoint(path: &str) -> Endpoint {
    Endpoint::parse(&format!("http://scripted.test{}", path), None).unwrap()
}

/// Sink that keeps everything it is shown.
#[derive(Default)]
pub struct RecordingSink {
    pub live: Vec<LiveUpdate>,
    pub finals: Vec<SpeedReport>,
    pub errors: Vec<String>,
}

impl DisplaySink for RecordingSink {
    fn show_live(&mut self, update: &LiveUpdate) {
        self.live.push(update.clone());
    }

    fn show_final(&mut self, report: &SpeedReport) {
        self.finals.push(report.clone());
    }

    fn show_error(&mut self, message: &str) {
        self.errors.push(message.to_string());
    }
}

pub fn assert_close(actual: f64, expected: f64) {
    assert!(
        (actual - expected).abs() < 1e-6,
        "expected {} to be close to {}",
        actual,
        expected
    );
}
