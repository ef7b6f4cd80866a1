use std::collections::HashMap;
use std::time::Instant;

/// Cross-cutting logger for detection-loop events of one stream.
///
/// Decouples the session loop from specific output mechanisms so each
/// caller can observe loop behaviour without changing the loop itself.
pub trait SessionLogger: Send {
    /// Report that one loop iteration completed.
    fn cycle(&mut self);

    /// Record how long a named loop stage took for one iteration.
    fn timing(&mut self, stage: &str, duration_ms: f64);

    /// Record a point-in-time metric (e.g. live tracks, detections).
    fn metric(&mut self, name: &str, value: f64);

    /// Log a human-readable status message.
    fn info(&mut self, message: &str);

    /// Emit an end-of-session summary. Default: no-op.
    fn summary(&self) {}
}

/// Silent logger that discards all events.
pub struct NullSessionLogger;

impl SessionLogger for NullSessionLogger {
    fn cycle(&mut self) {}
    fn timing(&mut self, _stage: &str, _duration_ms: f64) {}
    fn metric(&mut self, _name: &str, _value: f64) {}
    fn info(&mut self, _message: &str) {}
}

#[derive(Clone, Copy, Debug, Default)]
struct RunningStat {
    count: u64,
    total: f64,
}

impl RunningStat {
    fn push(&mut self, value: f64) {
        self.count += 1;
        self.total += value;
    }

    fn average(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.total / self.count as f64
        }
    }
}

/// `log`-backed logger that aggregates per-stage timings and metrics
/// and reports a summary when the session stops.
///
/// Live streams run indefinitely, so only running totals are kept.
/// A debug line is emitted every `report_every` cycles.
pub struct LogSessionLogger {
    stream_id: String,
    report_every: u64,
    timings: HashMap<String, RunningStat>,
    metrics: HashMap<String, RunningStat>,
    start_time: Instant,
    cycles: u64,
}

impl LogSessionLogger {
    pub fn new(stream_id: impl Into<String>, report_every: u64) -> Self {
        Self {
            stream_id: stream_id.into(),
            report_every: report_every.max(1),
            timings: HashMap::new(),
            metrics: HashMap::new(),
            start_time: Instant::now(),
            cycles: 0,
        }
    }

    /// Returns the formatted summary string, or `None` if no data recorded.
    pub fn summary_string(&self) -> Option<String> {
        if self.timings.is_empty() && self.metrics.is_empty() {
            return None;
        }

        let elapsed_ms = self.start_time.elapsed().as_secs_f64() * 1000.0;
        let mut lines = vec![format!(
            "Stream {} summary ({} cycles, {:.1}s):",
            self.stream_id,
            self.cycles,
            elapsed_ms / 1000.0
        )];

        let mut stages: Vec<_> = self.timings.iter().collect();
        stages.sort_by(|a, b| a.0.cmp(b.0));
        for (stage, stat) in stages {
            let avg_ms = stat.average();
            let total_ms = stat.total;
            let pct = if elapsed_ms > 0.0 {
                total_ms / elapsed_ms * 100.0
            } else {
                0.0
            };
            lines.push(format!(
                "  {stage:10}: avg {avg_ms:6.1}ms  total {total_ms:7.0}ms  ({pct:4.1}%)"
            ));
        }

        let mut metrics: Vec<_> = self.metrics.iter().collect();
        metrics.sort_by(|a, b| a.0.cmp(b.0));
        for (name, stat) in metrics {
            lines.push(format!("  {name}: avg {:.1}", stat.average()));
        }

        if self.cycles > 0 && elapsed_ms > 0.0 {
            let rate = self.cycles as f64 / (elapsed_ms / 1000.0);
            lines.push(format!("  Cycle rate: {rate:.1}/s"));
        }

        Some(lines.join("\n"))
    }

    pub fn average_timing(&self, stage: &str) -> Option<f64> {
        self.timings.get(stage).map(RunningStat::average)
    }

    pub fn average_metric(&self, name: &str) -> Option<f64> {
        self.metrics.get(name).map(RunningStat::average)
    }
}

impl SessionLogger for LogSessionLogger {
    fn cycle(&mut self) {
        self.cycles += 1;
        if self.cycles % self.report_every == 0 {
            let tracks = self.average_metric("tracks").unwrap_or(0.0);
            let detect = self.average_timing("detect").unwrap_or(0.0);
            log::debug!(
                "[{}] {} cycles, avg detect {detect:.1}ms, avg tracks {tracks:.1}",
                self.stream_id,
                self.cycles
            );
        }
    }

    fn timing(&mut self, stage: &str, duration_ms: f64) {
        self.timings
            .entry(stage.to_string())
            .or_default()
            .push(duration_ms);
    }

    fn metric(&mut self, name: &str, value: f64) {
        self.metrics.entry(name.to_string()).or_default().push(value);
    }

    fn info(&mut self, message: &str) {
        log::info!("[{}] {message}", self.stream_id);
    }

    fn summary(&self) {
        if let Some(text) = self.summary_string() {
            log::info!("\n\n{text}");
        }
    }
}
