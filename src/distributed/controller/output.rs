use std::time::Duration;

use crate::engine::{ExecutionBudget, HistoryEntry, WorkerResult};

const FIXED_POINT_DIVISOR: u64 = 100;

/// Renders a finished run as plain text lines for the terminal.
pub(super) fn summary_lines(entry: &HistoryEntry) -> Vec<String> {
    let summary = &entry.summary;
    let mut lines = vec![
        format!("Run: {}", summary.run_id),
        format!("Workload: {}", summary.workload),
        format!(
            "Workers: {} x concurrency {}",
            summary.worker_count, summary.concurrency
        ),
        match summary.budget {
            ExecutionBudget::Total(total) => {
                format!("Budget: {} executions (planned {})", total, summary.planned_executions)
            }
            ExecutionBudget::Unbounded => "Budget: until cancelled".to_owned(),
        },
    ];

    match summary.totals.as_ref() {
        Some(totals) => {
            lines.push(format!("Outcome: {}", totals.completion));
            lines.push(format!("Running Time: {}", format_duration(totals.running_time)));
            lines.push(format!("Succeeded: {}", totals.succeeded_sum));
            lines.push(format!("Errors: {}", totals.error_sum));
            lines.push(format!("Throughput: {}/s", format_x100(totals.rps_x100_sum)));
        }
        None => lines.push("Outcome: running".to_owned()),
    }

    for result in &entry.results {
        lines.push(worker_line(result));
    }
    lines
}

fn worker_line(result: &WorkerResult) -> String {
    let mut parts = vec![format!(
        "  {} [{:?}] ok={} err={} avg={} min={} max={} rps={}",
        result.worker_id,
        result.status,
        result.succeeded,
        result.failed,
        format_optional(result.average),
        format_optional(result.min),
        format_optional(result.max),
        format_x100(result.rps_x100),
    )];
    if let Some(percentiles) = result.percentiles {
        parts.push(format!(
            "p50={} p90={} p95={}",
            format_duration(percentiles.median),
            format_duration(percentiles.p90),
            format_duration(percentiles.p95),
        ));
    }
    if let Some(error) = result.last_error.as_deref() {
        parts.push(format!("last_error=\"{}\"", error));
    }
    parts.join(" ")
}

pub(super) fn print_summary(entry: &HistoryEntry) {
    for line in summary_lines(entry) {
        println!("{}", line);
    }
}

fn format_optional(value: Option<Duration>) -> String {
    value.map_or_else(|| "-".to_owned(), format_duration)
}

/// Millisecond precision with three decimals, e.g. `12.345ms`.
fn format_duration(duration: Duration) -> String {
    let micros = duration.as_micros();
    format!("{}.{:03}ms", micros / 1000, micros % 1000)
}

fn format_x100(value: u64) -> String {
    format!(
        "{}.{:02}",
        value / FIXED_POINT_DIVISOR,
        value % FIXED_POINT_DIVISOR
    )
}

