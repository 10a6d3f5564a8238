//! Prometheus text exposition for the doorway counters
//!
//! Served at `/metrics` by the API server.

use crate::domain::types::{ConnectionState, Subsystem};
use crate::infra::metrics::MetricsSummary;
use std::fmt::Write;

/// Prometheus metric type
enum MetricType {
    Counter,
    Gauge,
}

impl MetricType {
    fn as_str(&self) -> &'static str {
        match self {
            MetricType::Counter => "counter",
            MetricType::Gauge => "gauge",
        }
    }
}

/// Write a simple metric (counter or gauge)
fn write_metric(output: &mut String, name: &str, help: &str, typ: MetricType, val: u64) {
    let _ = writeln!(output, "# HELP {name} {help}");
    let _ = writeln!(output, "# TYPE {name} {}", typ.as_str());
    let _ = writeln!(output, "{name} {val}");
}

/// Point-in-time ledger and device state rendered next to the counters
#[derive(Debug, Clone)]
pub struct DoorwayGauges {
    pub ledger_records: usize,
    pub current_balance: i64,
    pub connections: [(Subsystem, ConnectionState); 3],
}

/// Format metrics in Prometheus text exposition format
pub fn format_prometheus_metrics(summary: &MetricsSummary, gauges: &DoorwayGauges) -> String {
    let mut output = String::with_capacity(2048);

    write_read_metrics(&mut output, summary);
    write_crossing_metrics(&mut output, summary);
    write_fault_metrics(&mut output, summary);
    write_doorway_gauges(&mut output, gauges);

    output
}

fn write_read_metrics(output: &mut String, summary: &MetricsSummary) {
    write_metric(
        output,
        "doorway_tag_reads_total",
        "Tag reads returned by the RFID reader",
        MetricType::Counter,
        summary.tag_reads_total,
    );
    write_metric(
        output,
        "doorway_tags_discarded_total",
        "Tag reads dropped for lack of presence",
        MetricType::Counter,
        summary.tags_discarded_total,
    );

    let _ = writeln!(output, "# HELP doorway_detections_total Presence detections per sensor");
    let _ = writeln!(output, "# TYPE doorway_detections_total counter");
    let _ = writeln!(
        output,
        "doorway_detections_total{{sensor=\"inside\"}} {}",
        summary.detections_inside_total
    );
    let _ = writeln!(
        output,
        "doorway_detections_total{{sensor=\"outside\"}} {}",
        summary.detections_outside_total
    );
}

fn write_crossing_metrics(output: &mut String, summary: &MetricsSummary) {
    let _ = writeln!(output, "# HELP doorway_crossings_total Crossings appended to the ledger");
    let _ = writeln!(output, "# TYPE doorway_crossings_total counter");
    let _ = writeln!(
        output,
        "doorway_crossings_total{{direction=\"IN\"}} {}",
        summary.crossings_in_total
    );
    let _ = writeln!(
        output,
        "doorway_crossings_total{{direction=\"OUT\"}} {}",
        summary.crossings_out_total
    );

    write_metric(
        output,
        "doorway_manual_records_total",
        "Crossings added through the API",
        MetricType::Counter,
        summary.manual_records_total,
    );
}

fn write_fault_metrics(output: &mut String, summary: &MetricsSummary) {
    write_metric(
        output,
        "doorway_transport_errors_total",
        "Device read errors",
        MetricType::Counter,
        summary.transport_errors_total,
    );
    write_metric(
        output,
        "doorway_store_failures_total",
        "Failed writes of the ledger file",
        MetricType::Counter,
        summary.store_failures_total,
    );
}

fn write_doorway_gauges(output: &mut String, gauges: &DoorwayGauges) {
    write_metric(
        output,
        "doorway_ledger_records",
        "Records currently in the ledger",
        MetricType::Gauge,
        gauges.ledger_records as u64,
    );

    let _ = writeln!(output, "# HELP doorway_current_balance IN minus OUT crossings");
    let _ = writeln!(output, "# TYPE doorway_current_balance gauge");
    let _ = writeln!(output, "doorway_current_balance {}", gauges.current_balance);

    let _ = writeln!(
        output,
        "# HELP doorway_device_connected Device connection state (0=disconnected, 1=connected, 2=error)"
    );
    let _ = writeln!(output, "# TYPE doorway_device_connected gauge");
    for (subsystem, state) in &gauges.connections {
        let _ = writeln!(
            output,
            "doorway_device_connected{{device=\"{}\"}} {}",
            subsystem.as_str(),
            *state as u8
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::types::Direction;
    use crate::infra::metrics::Metrics;

    #[test]
    fn test_format_prometheus_metrics() {
        let metrics = Metrics::new();
        metrics.record_tag_read();
        metrics.record_tag_read();
        metrics.record_tag_discarded();
        metrics.record_crossing(Direction::In);

        let gauges = DoorwayGauges {
            ledger_records: 4,
            current_balance: -1,
            connections: [
                (Subsystem::RfidReader, ConnectionState::Connected),
                (Subsystem::SensorInside, ConnectionState::Error),
                (Subsystem::SensorOutside, ConnectionState::Disconnected),
            ],
        };
        let output = format_prometheus_metrics(&metrics.snapshot(), &gauges);

        assert!(output.contains("doorway_tag_reads_total 2\n"));
        assert!(output.contains("doorway_tags_discarded_total 1\n"));
        assert!(output.contains("doorway_crossings_total{direction=\"IN\"} 1\n"));
        assert!(output.contains("doorway_crossings_total{direction=\"OUT\"} 0\n"));
        assert!(output.contains("doorway_ledger_records 4\n"));
        assert!(output.contains("doorway_current_balance -1\n"));
        assert!(output.contains("doorway_device_connected{device=\"sensor_inside\"} 2\n"));
        assert!(output.contains("# TYPE doorway_transport_errors_total counter"));
    }
}
