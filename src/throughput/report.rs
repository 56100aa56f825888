//! Throughput result formatting.

use serde::Serialize;

use super::orchestrator::OrchestrationRun;
use super::probe::ProbeStatus;
use super::{Direction, Mode, Unit};

/// Per-endpoint line of a phase summary.
#[derive(Debug, Clone, Serialize)]
pub struct EndpointResult {
    pub url: String,
    pub status: ProbeStatus,
    pub mbps: f64,
    pub bytes_transferred: u64,
    pub elapsed_secs: f64,
    pub error: Option<String>,
}

/// Result of one direction of a test.
#[derive(Debug, Clone, Serialize)]
pub struct PhaseSummary {
    pub direction: Direction,
    pub median_mbps: f64,
    pub sample_count: usize,
    pub live_median_mbps: f64,
    pub endpoints: Vec<EndpointResult>,
}

impl From<&OrchestrationRun> for PhaseSummary {
    fn from(run: &OrchestrationRun) -> Self {
        let agg = run.aggregate();
        Self {
            direction: run.direction,
            median_mbps: agg.median_mbps,
            sample_count: agg.sample_count,
            live_median_mbps: run.live.median_mbps,
            endpoints: run
                .reports
                .iter()
                .map(|r| EndpointResult {
                    url: r.endpoint.to_string(),
                    status: r.status,
                    mbps: r.final_sample.value,
                    bytes_transferred: r.bytes_transferred,
                    elapsed_secs: r.elapsed.as_secs_f64(),
                    error: r.error.clone(),
                })
                .collect(),
        }
    }
}

/// Final result of a whole test cycle.
#[derive(Debug, Clone, Serialize)]
pub struct SpeedReport {
    pub run_id: String,
    pub tested_at: chrono::DateTime<chrono::Local>,
    pub mode: Mode,
    pub unit: Unit,
    pub download: Option<PhaseSummary>,
    pub upload: Option<PhaseSummary>,
    pub latency_ms: Option<u64>,
    pub public_ip: String,
}

/// Two-decimal rendering; non-finite values render as `0.00`.
pub fn format_mbps(value: f64) -> String {
    if value.is_finite() {
        format!("{:.2}", value)
    } else {
        "0.00".to_string()
    }
}

fn format_speed(mbps: f64) -> String {
    if mbps >= 1000.0 {
        format!("{} Gbps", format_mbps(mbps / 1000.0))
    } else {
        format!("{} Mbps", format_mbps(mbps))
    }
}

fn format_phase(phase: &PhaseSummary) -> String {
    let ok = phase
        .endpoints
        .iter()
        .filter(|e| e.status != ProbeStatus::Failed)
        .count();
    format!(
        "{:<9} {} (median of {} endpoint{}, {} reachable)",
        format!("{}:", phase.direction),
        format_speed(phase.median_mbps),
        phase.sample_count,
        if phase.sample_count == 1 { "" } else { "s" },
        ok,
    )
}

/// Format a report as a human-readable summary.
pub fn format_summary(report: &SpeedReport) -> String {
    let mut lines = vec![format!(
        "Speed test ({} mode, {} units) at {}",
        report.mode,
        report.unit,
        report.tested_at.format("%Y-%m-%d %H:%M:%S"),
    )];

    if let Some(download) = &report.download {
        lines.push(format_phase(download));
    }
    if let Some(upload) = &report.upload {
        lines.push(format_phase(upload));
    }

    lines.push(match report.latency_ms {
        Some(ms) => format!("{:<9} {} ms", "Ping:", ms),
        None => format!("{:<9} Unavailable", "Ping:"),
    });
    lines.push(format!("{:<9} {}", "IP:", report.public_ip));

    lines.join("\n")
}
