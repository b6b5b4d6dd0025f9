//! Prometheus text exposition for the service metrics
//!
//! Served at `/metrics` by the HTTP API. Every sample carries a `site` label.

use std::fmt::Write;

use crate::infra::metrics::{Metrics, MetricsSummary, METRICS_BUCKET_BOUNDS, METRICS_NUM_BUCKETS};

pub const CONTENT_TYPE: &str = "text/plain; version=0.0.4; charset=utf-8";

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

/// Write a simple metric (counter or gauge) with site label
fn write_metric(
    output: &mut String,
    name: &str,
    help: &str,
    typ: MetricType,
    site: &str,
    val: u64,
) {
    let _ = writeln!(output, "# HELP {name} {help}");
    let _ = writeln!(output, "# TYPE {name} {}", typ.as_str());
    let _ = writeln!(output, "{name}{{site=\"{site}\"}} {val}");
}

/// Write one counter family split by a second label
fn write_labeled_counter(
    output: &mut String,
    name: &str,
    help: &str,
    site: &str,
    label: &str,
    samples: &[(&str, u64)],
) {
    let _ = writeln!(output, "# HELP {name} {help}");
    let _ = writeln!(output, "# TYPE {name} counter");
    for (value, count) in samples {
        let _ = writeln!(output, "{name}{{site=\"{site}\",{label}=\"{value}\"}} {count}");
    }
}

fn write_gauge_f64(output: &mut String, name: &str, help: &str, site: &str, val: f64) {
    let _ = writeln!(output, "# HELP {name} {help}");
    let _ = writeln!(output, "# TYPE {name} gauge");
    let _ = writeln!(output, "{name}{{site=\"{site}\"}} {val:.6}");
}

/// Write a histogram metric with buckets, sum, and count
fn write_histogram(
    output: &mut String,
    name: &str,
    help: &str,
    site: &str,
    buckets: &[u64; METRICS_NUM_BUCKETS],
    bounds: &[u64; 10],
    sum: u64,
) {
    let _ = writeln!(output, "# HELP {name} {help}");
    let _ = writeln!(output, "# TYPE {name} histogram");

    let mut cumulative = 0u64;
    for (i, &bound) in bounds.iter().enumerate() {
        cumulative += buckets[i];
        let _ = writeln!(output, "{name}_bucket{{site=\"{site}\",le=\"{bound}\"}} {cumulative}");
    }
    cumulative += buckets[METRICS_NUM_BUCKETS - 1];
    let _ = writeln!(output, "{name}_bucket{{site=\"{site}\",le=\"+Inf\"}} {cumulative}");
    let _ = writeln!(output, "{name}_sum{{site=\"{site}\"}} {sum}");
    let _ = writeln!(output, "{name}_count{{site=\"{site}\"}} {cumulative}");
}

/// Format metrics in Prometheus text exposition format
pub fn format_prometheus_metrics(metrics: &Metrics, site_id: &str) -> String {
    let summary = metrics.snapshot();
    let mut output = String::with_capacity(4096);

    write_qr_metrics(&mut output, site_id, &summary);
    write_booking_metrics(&mut output, site_id, &summary);
    write_http_metrics(&mut output, site_id, &summary);
    write_gateway_metrics(&mut output, site_id, &summary);

    output
}

fn write_qr_metrics(output: &mut String, site: &str, summary: &MetricsSummary) {
    write_labeled_counter(
        output,
        "salon_qr_resolutions_total",
        "QR and manual business-id resolutions by result",
        site,
        "result",
        &[
            ("resolved", summary.qr_resolved),
            ("invalid_format", summary.qr_invalid),
            ("not_found", summary.qr_not_found),
            ("inactive", summary.qr_inactive),
            ("failed", summary.qr_failed),
        ],
    );
}

fn write_booking_metrics(output: &mut String, site: &str, summary: &MetricsSummary) {
    write_metric(
        output,
        "salon_bookings_created_total",
        "Appointments created by the wizard",
        MetricType::Counter,
        site,
        summary.bookings_created,
    );
    write_metric(
        output,
        "salon_bookings_failed_total",
        "Confirm attempts rejected by the backend",
        MetricType::Counter,
        site,
        summary.bookings_failed,
    );
    write_labeled_counter(
        output,
        "salon_sign_ins_total",
        "Sign-in attempts by outcome",
        site,
        "outcome",
        &[("ok", summary.sign_ins), ("failed", summary.sign_in_failures)],
    );
    write_metric(
        output,
        "salon_registrations_total",
        "Completed customer and business registrations",
        MetricType::Counter,
        site,
        summary.registrations,
    );
    write_metric(
        output,
        "salon_active_sessions",
        "Live sessions held by the API",
        MetricType::Gauge,
        site,
        summary.active_sessions,
    );
}

fn write_http_metrics(output: &mut String, site: &str, summary: &MetricsSummary) {
    write_metric(
        output,
        "salon_http_requests_total",
        "HTTP requests served",
        MetricType::Counter,
        site,
        summary.http_requests,
    );
    write_metric(
        output,
        "salon_http_errors_total",
        "HTTP responses with a 5xx status",
        MetricType::Counter,
        site,
        summary.http_errors,
    );
    write_gauge_f64(
        output,
        "salon_http_requests_per_sec",
        "Request rate since the previous report",
        site,
        summary.requests_per_sec,
    );
}

fn write_gateway_metrics(output: &mut String, site: &str, summary: &MetricsSummary) {
    write_histogram(
        output,
        "salon_gateway_latency_ms",
        "Backend round-trip latency in milliseconds",
        site,
        &summary.gateway_latency_buckets,
        &METRICS_BUCKET_BOUNDS,
        summary.gateway_latency_sum_ms,
    );
    write_metric(
        output,
        "salon_gateway_latency_p99_ms",
        "99th percentile backend latency",
        MetricType::Gauge,
        site,
        summary.gateway_latency_p99_ms,
    );
    write_metric(
        output,
        "salon_gateway_latency_max_ms",
        "Slowest backend round trip",
        MetricType::Gauge,
        site,
        summary.gateway_latency_max_ms,
    );
    write_metric(
        output,
        "salon_gateway_errors_total",
        "Backend calls that failed",
        MetricType::Counter,
        site,
        summary.gateway_errors,
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infra::metrics::QrResult;

    #[test]
    fn test_format_prometheus_metrics() {
        let metrics = Metrics::new();
        metrics.record_qr(QrResult::Resolved);
        metrics.record_qr(QrResult::InvalidFormat);
        metrics.record_booking_created();
        metrics.record_gateway_latency(12);
        metrics.record_gateway_latency(300);
        metrics.set_active_sessions(3);

        let output = format_prometheus_metrics(&metrics, "salon-dev");

        assert!(output.contains("salon_qr_resolutions_total{site=\"salon-dev\",result=\"resolved\"} 1"));
        assert!(output.contains("salon_qr_resolutions_total{site=\"salon-dev\",result=\"invalid_format\"} 1"));
        assert!(output.contains("salon_bookings_created_total{site=\"salon-dev\"} 1"));
        assert!(output.contains("salon_active_sessions{site=\"salon-dev\"} 3"));
        assert!(output.contains("salon_gateway_latency_ms_bucket{site=\"salon-dev\",le=\"25\"} 1"));
        assert!(output.contains("salon_gateway_latency_ms_bucket{site=\"salon-dev\",le=\"+Inf\"} 2"));
        assert!(output.contains("salon_gateway_latency_ms_sum{site=\"salon-dev\"} 312"));
    }

    #[test]
    fn test_counters_survive_repeated_scrapes() {
        let metrics = Metrics::new();
        metrics.record_booking_created();
        let _ = format_prometheus_metrics(&metrics, "s");
        let second = format_prometheus_metrics(&metrics, "s");
        assert!(second.contains("salon_bookings_created_total{site=\"s\"} 1"));
    }

    #[test]
    fn test_scrape_does_not_consume_log_window() {
        let metrics = Metrics::new();
        metrics.record_http_request(200);
        let _ = format_prometheus_metrics(&metrics, "s");
        let _ = format_prometheus_metrics(&metrics, "s");

        // The log reporter still sees the request after two scrapes
        let logged = metrics.report();
        assert!(logged.requests_per_sec > 0.0);
    }
}
