//! Display sinks: where live figures, final reports and errors are rendered.

use std::io::Write;

use serde::Serialize;

use crate::throughput::report::{format_mbps, format_summary, SpeedReport};
use crate::throughput::Direction;

/// A live figure pushed while a phase is running.
#[derive(Debug, Clone, Serialize)]
pub struct LiveUpdate {
    pub direction: Direction,
    /// Aggregate throughput (parallel) or the current probe's (sequential).
    pub mbps: f64,
    /// Median over every progress sample seen so far in this phase.
    pub median_mbps: f64,
    pub sample_count: usize,
    /// `(i, n)` for "endpoint i of n" in sequential mode.
    pub position: Option<(usize, usize)>,
}

pub trait DisplaySink: Send {
    fn show_live(&mut self, update: &LiveUpdate);
    fn show_final(&mut self, report: &SpeedReport);
    fn show_error(&mut self, message: &str);
}

/// Human-readable console output. Live figures overwrite the current line.
#[derive(Debug, Default)]
pub struct ConsoleSink {
    live_line_open: bool,
}

impl ConsoleSink {
    pub fn new() -> Self {
        Self::default()
    }

    fn end_live_line(&mut self) {
        if self.live_line_open {
            println!();
            self.live_line_open = false;
        }
    }
}

impl DisplaySink for ConsoleSink {
    fn show_live(&mut self, update: &LiveUpdate) {
        let position = match update.position {
            Some((i, n)) => format!(" [endpoint {} of {}]", i, n),
            None => String::new(),
        };
        print!(
            "\r  {:<8} {:>10} Mbps (median {} Mbps, {} samples){}   ",
            update.direction.as_str(),
            format_mbps(update.mbps),
            format_mbps(update.median_mbps),
            update.sample_count,
            position
        );
        let _ = std::io::stdout().flush();
        self.live_line_open = true;
    }

    fn show_final(&mut self, report: &SpeedReport) {
        self.end_live_line();
        println!("\n{}", format_summary(report));
    }

    fn show_error(&mut self, message: &str) {
        self.end_live_line();
        eprintln!("error: {}", message);
    }
}

/// One JSON object per line, for machine consumers. Writes to stdout unless
/// built with [`JsonLinesSink::with_writer`].
#[derive(Debug)]
pub struct JsonLinesSink<W = std::io::Stdout> {
    out: W,
    /// Emit live updates too, not just the final report.
    live: bool,
}

impl JsonLinesSink {
    pub fn stdout(live: bool) -> Self {
        Self::with_writer(std::io::stdout(), live)
    }
}

impl<W: Write> JsonLinesSink<W> {
    pub fn with_writer(out: W, live: bool) -> Self {
        Self { out, live }
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    fn emit(&mut self, value: serde_json::Value) {
        let _ = writeln!(self.out, "{}", value);
        let _ = self.out.flush();
    }
}

impl<W: Write + Send> DisplaySink for JsonLinesSink<W> {
    fn show_live(&mut self, update: &LiveUpdate) {
        if self.live {
            self.emit(serde_json::json!({ "event": "live", "data": update }));
        }
    }

    fn show_final(&mut self, report: &SpeedReport) {
        self.emit(serde_json::json!({ "event": "final", "data": report }));
    }

    fn show_error(&mut self, message: &str) {
        self.emit(serde_json::json!({ "event": "error", "data": { "message": message } }));
    }
}

/// Sink that discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl DisplaySink for NullSink {
    fn show_live(&mut self, _update: &LiveUpdate) {}
    fn show_final(&mut self, _report: &SpeedReport) {}
    fn show_error(&mut self, _message: &str) {}
}
