//! Prometheus metrics HTTP server.
//!
//! Exposes engine statistics in Prometheus text format via HTTP endpoint.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{Router, extract::State, http::StatusCode, response::IntoResponse, routing::get};
use tokio::net::TcpListener;
use tracing::info;

use crate::stats::{EngineStats, Stream};

/// Start the Prometheus metrics HTTP server.
///
/// Runs in the background and serves metrics at `/metrics`.
/// Returns an error if the server fails to bind to the port.
pub async fn start_metrics_server(port: u16, stats: Arc<EngineStats>) -> Result<(), std::io::Error> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));

    let app = Router::new()
        .route("/metrics", get(metrics_handler))
        .route("/health", get(health_handler))
        .with_state(stats);

    let listener = TcpListener::bind(addr).await?;
    info!("Prometheus metrics server listening on http://{}/metrics", addr);

    axum::serve(listener, app)
        .await
        .map_err(|e| std::io::Error::other(e.to_string()))
}

/// Health check endpoint.
async fn health_handler() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

/// Prometheus metrics endpoint.
async fn metrics_handler(State(stats): State<Arc<EngineStats>>) -> impl IntoResponse {
    let output = format_prometheus_metrics(&stats);
    (
        StatusCode::OK,
        [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
        output,
    )
}

/// Format statistics as Prometheus text format.
fn format_prometheus_metrics(stats: &EngineStats) -> String {
    let summary = stats.summary();
    let mut output = String::with_capacity(2048);

    output.push_str("# HELP stormwatch_uptime_seconds Time since the engine statistics started\n");
    output.push_str("# TYPE stormwatch_uptime_seconds gauge\n");
    output.push_str(&format!("stormwatch_uptime_seconds {:.3}\n", summary.elapsed_secs));

    output.push_str("# HELP stormwatch_ticks_total Poll cycles run\n");
    output.push_str("# TYPE stormwatch_ticks_total counter\n");
    output.push_str(&format!("stormwatch_ticks_total {}\n", summary.ticks));

    output.push_str("# HELP stormwatch_announced_total Entities announced to observers\n");
    output.push_str("# TYPE stormwatch_announced_total counter\n");
    for stream in Stream::ALL {
        output.push_str(&format!(
            "stormwatch_announced_total{{stream=\"{}\"}} {}\n",
            stream,
            summary.announced.get(&stream).copied().unwrap_or(0)
        ));
    }

    output.push_str("# HELP stormwatch_watch_boxes_announced_total Watch boxes delivered with watch notifications\n");
    output.push_str("# TYPE stormwatch_watch_boxes_announced_total counter\n");
    output.push_str(&format!(
        "stormwatch_watch_boxes_announced_total {}\n",
        summary.watch_boxes_announced
    ));

    output.push_str("# HELP stormwatch_fetch_failures_total Failed upstream fetches\n");
    output.push_str("# TYPE stormwatch_fetch_failures_total counter\n");
    for stream in Stream::ALL {
        output.push_str(&format!(
            "stormwatch_fetch_failures_total{{stream=\"{}\"}} {}\n",
            stream,
            summary.fetch_failures.get(&stream).copied().unwrap_or(0)
        ));
    }

    output.push_str("# HELP stormwatch_observer_failures_total Observer calls that failed or panicked\n");
    output.push_str("# TYPE stormwatch_observer_failures_total counter\n");
    output.push_str(&format!(
        "stormwatch_observer_failures_total {}\n",
        summary.observer_failures
    ));

    if let Some(ref latency) = summary.tick_latency_us {
        output.push_str("# HELP stormwatch_tick_seconds Poll cycle duration\n");
        output.push_str("# TYPE stormwatch_tick_seconds summary\n");
        for (quantile, value) in [("0.5", latency.p50), ("0.9", latency.p90), ("0.99", latency.p99)] {
            output.push_str(&format!(
                "stormwatch_tick_seconds{{quantile=\"{}\"}} {:.6}\n",
                quantile,
                value as f64 / 1_000_000.0
            ));
        }
        output.push_str(&format!("stormwatch_tick_seconds_count {}\n", summary.ticks));
    }

    output
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_format_prometheus_metrics_empty() {
        let stats = EngineStats::new();
        let output = format_prometheus_metrics(&stats);

        assert!(output.contains("stormwatch_uptime_seconds"));
        assert!(output.contains("stormwatch_ticks_total 0"));
        assert!(output.contains("stormwatch_observer_failures_total 0"));
        assert!(output.contains("stormwatch_fetch_failures_total{stream=\"warnings\"} 0"));
        assert!(!output.contains("stormwatch_tick_seconds{"));
    }

    #[test]
    fn test_format_prometheus_metrics_with_data() {
        let stats = EngineStats::new();
        stats.record_tick(Duration::from_millis(20));
        stats.record_announced(Stream::Watches, 2);
        stats.record_fetch_failure(Stream::MesoscaleDiscussions);

        let output = format_prometheus_metrics(&stats);

        assert!(output.contains("stormwatch_ticks_total 1"));
        assert!(output.contains("stormwatch_announced_total{stream=\"watches\"} 2"));
        assert!(output.contains("stormwatch_fetch_failures_total{stream=\"mesoscale_discussions\"} 1"));
        assert!(output.contains("stormwatch_tick_seconds{quantile=\"0.5\"}"));
        assert!(output.contains("stormwatch_tick_seconds_count 1"));
    }

    #[test]
    fn test_prometheus_format_validity() {
        let stats = EngineStats::new();
        stats.record_tick(Duration::from_millis(5));
        let output = format_prometheus_metrics(&stats);

        // Check that each non-comment, non-empty line has proper format
        for line in output.lines() {
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let parts: Vec<&str> = line.split_whitespace().collect();
            assert!(parts.len() >= 2, "Invalid metric line: {}", line);
        }
    }
}
