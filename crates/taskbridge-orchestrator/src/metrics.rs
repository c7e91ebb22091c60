//! Prometheus metrics formatting.
//!
//! Renders bridge counters in Prometheus text exposition format.

use std::fmt::Write;

use crate::bridge::{BridgeMetrics, OrchestratorBridge};

/// Collect the bridge metrics and format them as Prometheus text.
pub async fn collect_metrics(bridge: &OrchestratorBridge) -> String {
    render_metrics(&bridge.metrics().await)
}

/// Format a metrics snapshot as Prometheus text.
pub fn render_metrics(metrics: &BridgeMetrics) -> String {
    let mut output = String::new();
    write_scheduled(metrics, &mut output);
    write_counter(
        &mut output,
        "taskbridge_tracking_records_total",
        "Tracking records enqueued for durable executions by outcome",
        &[
            ("outcome=\"recorded\"", metrics.tracking_recorded),
            ("outcome=\"failed\"", metrics.tracking_failed),
        ],
    );
    write_counter(
        &mut output,
        "taskbridge_cancellations_total",
        "Cancellation requests that took effect",
        &[("", metrics.cancelled)],
    );
    write_counter(
        &mut output,
        "taskbridge_signals_total",
        "Signals delivered to durable executions",
        &[("", metrics.signals)],
    );
    write_counter(
        &mut output,
        "taskbridge_legacy_probes_total",
        "Lookups of unqualified execution ids that probed both engines",
        &[("", metrics.legacy_probes)],
    );

    writeln!(
        output,
        "# HELP taskbridge_registered_workflows Number of registered workflow definitions"
    )
    .ok();
    writeln!(output, "# TYPE taskbridge_registered_workflows gauge").ok();
    writeln!(
        output,
        "taskbridge_registered_workflows {}",
        metrics.registered_workflows
    )
    .ok();

    output
}

/// Scheduled tasks by engine.
fn write_scheduled(metrics: &BridgeMetrics, output: &mut String) {
    write_counter(
        output,
        "taskbridge_tasks_scheduled_total",
        "Tasks scheduled by target engine",
        &[
            ("engine=\"durable\"", metrics.scheduled_durable),
            ("engine=\"queue\"", metrics.scheduled_queue),
        ],
    );
}

fn write_counter(output: &mut String, name: &str, help: &str, samples: &[(&str, u64)]) {
    writeln!(output, "# HELP {name} {help}").ok();
    writeln!(output, "# TYPE {name} counter").ok();
    for (labels, value) in samples {
        if labels.is_empty() {
            writeln!(output, "{name} {value}").ok();
        } else {
            writeln!(output, "{name}{{{labels}}} {value}").ok();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_metrics() {
        let metrics = BridgeMetrics {
            scheduled_durable: 2,
            scheduled_queue: 5,
            cancelled: 1,
            registered_workflows: 3,
            ..BridgeMetrics::default()
        };
        let text = render_metrics(&metrics);

        assert!(text.contains("# TYPE taskbridge_tasks_scheduled_total counter"));
        assert!(text.contains("taskbridge_tasks_scheduled_total{engine=\"durable\"} 2"));
        assert!(text.contains("taskbridge_tasks_scheduled_total{engine=\"queue\"} 5"));
        assert!(text.contains("taskbridge_cancellations_total 1"));
        assert!(text.contains("taskbridge_tracking_records_total{outcome=\"failed\"} 0"));
        assert!(text.contains("taskbridge_registered_workflows 3"));
    }
}
