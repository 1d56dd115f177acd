//! HTTP endpoint for metrics and the guide status feed
//!
//! - `GET /metrics` Prometheus text exposition
//! - `GET /status` current `GuideSnapshot` as JSON
//! - `GET /health` liveness probe
//! - `POST /tracking/start`, `POST /tracking/stop` switch the location feed
//! - `POST /reset` restores every POI to its configured state
//! - `POST /guide/active`, `POST /guide/inactive` mark the guide view shown or hidden
//!
//! Uses hyper for the HTTP server.

use crate::domain::types::{GuideEvent, PoiStatus};
use crate::infra::metrics::{Metrics, MetricsSummary, METRICS_BUCKET_BOUNDS, METRICS_NUM_BUCKETS};
use crate::io::location::FeedControl;
use crate::services::reconciler::GuideSnapshot;
use bytes::Bytes;
use http_body_util::Full;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use std::convert::Infallible;
use std::fmt::Write;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::{mpsc, watch};
use tracing::{error, info, warn};

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

fn write_metric(output: &mut String, name: &str, help: &str, typ: MetricType, val: u64) {
    let _ = writeln!(output, "# HELP {name} {help}");
    let _ = writeln!(output, "# TYPE {name} {}", typ.as_str());
    let _ = writeln!(output, "{name} {val}");
}

/// Write a histogram metric with buckets, sum, and count
fn write_histogram(
    output: &mut String,
    name: &str,
    help: &str,
    buckets: &[u64; METRICS_NUM_BUCKETS],
    bounds: &[u64; 10],
    avg: u64,
) {
    let _ = writeln!(output, "# HELP {name} {help}");
    let _ = writeln!(output, "# TYPE {name} histogram");

    let mut cumulative = 0u64;
    for (i, &bound) in bounds.iter().enumerate() {
        cumulative += buckets[i];
        let _ = writeln!(output, "{name}_bucket{{le=\"{bound}\"}} {cumulative}");
    }
    cumulative += buckets[METRICS_NUM_BUCKETS - 1];
    let _ = writeln!(output, "{name}_bucket{{le=\"+Inf\"}} {cumulative}");

    let count: u64 = buckets.iter().sum();
    let sum = avg * count;
    let _ = writeln!(output, "{name}_sum {sum}");
    let _ = writeln!(output, "{name}_count {count}");
}

/// Format metrics in Prometheus text exposition format
pub fn format_prometheus_metrics(metrics: &Metrics, snapshot: &GuideSnapshot) -> String {
    let summary = metrics.report();
    let mut output = String::with_capacity(4096);

    write_core_metrics(&mut output, &summary);
    write_playback_metrics(&mut output, &summary);
    write_location_metrics(&mut output, &summary);
    write_guide_state(&mut output, snapshot);

    output
}

fn write_core_metrics(output: &mut String, summary: &MetricsSummary) {
    write_metric(
        output,
        "audio_tour_events_total",
        "Total guide events processed",
        MetricType::Counter,
        summary.events_total,
    );
    let _ = writeln!(output, "# HELP audio_tour_events_per_sec Events processed per second");
    let _ = writeln!(output, "# TYPE audio_tour_events_per_sec gauge");
    let _ = writeln!(output, "audio_tour_events_per_sec {:.2}", summary.events_per_sec);

    write_histogram(
        output,
        "audio_tour_event_latency_us",
        "Event processing latency in microseconds",
        &summary.lat_buckets,
        &METRICS_BUCKET_BOUNDS,
        summary.avg_process_latency_us,
    );
    write_metric(
        output,
        "audio_tour_event_latency_p99_us",
        "99th percentile event latency",
        MetricType::Gauge,
        summary.lat_p99_us,
    );
    write_metric(
        output,
        "audio_tour_ticks_total",
        "Reconciliation passes",
        MetricType::Counter,
        summary.ticks_total,
    );
    write_metric(
        output,
        "audio_tour_status_writes_total",
        "Effective POI status changes",
        MetricType::Counter,
        summary.status_writes_total,
    );
}

fn write_playback_metrics(output: &mut String, summary: &MetricsSummary) {
    write_metric(
        output,
        "audio_tour_playback_starts_total",
        "Playback start commands issued",
        MetricType::Counter,
        summary.playback_starts_total,
    );
    write_metric(
        output,
        "audio_tour_playback_stops_total",
        "Playback stop commands issued",
        MetricType::Counter,
        summary.playback_stops_total,
    );
    write_metric(
        output,
        "audio_tour_playback_ended_total",
        "Narrations that played to the end",
        MetricType::Counter,
        summary.playback_ended_total,
    );
    write_metric(
        output,
        "audio_tour_playback_failed_total",
        "Narrations that failed to load or play",
        MetricType::Counter,
        summary.playback_failed_total,
    );
    write_metric(
        output,
        "audio_tour_stale_events_total",
        "Playback callbacks discarded as stale",
        MetricType::Counter,
        summary.stale_events_total,
    );
    write_metric(
        output,
        "audio_tour_playback_cmds_dropped_total",
        "Playback commands dropped due to channel full",
        MetricType::Counter,
        summary.playback_cmds_dropped,
    );
    write_metric(
        output,
        "audio_tour_playback_queue_delay_max_us",
        "Maximum playback command queue delay",
        MetricType::Gauge,
        summary.playback_queue_delay_max_us,
    );
}

fn write_location_metrics(output: &mut String, summary: &MetricsSummary) {
    write_metric(
        output,
        "audio_tour_location_fixes_total",
        "Position fixes forwarded by the location feed",
        MetricType::Counter,
        summary.location_fixes_total,
    );
    write_metric(
        output,
        "audio_tour_location_errors_total",
        "Tracking sessions ended by a location error",
        MetricType::Counter,
        summary.location_errors_total,
    );
}

fn write_guide_state(output: &mut String, snapshot: &GuideSnapshot) {
    let _ = writeln!(output, "# HELP audio_tour_pois Number of POIs in each status");
    let _ = writeln!(output, "# TYPE audio_tour_pois gauge");
    for status in [
        PoiStatus::Idle,
        PoiStatus::Approaching,
        PoiStatus::Playing,
        PoiStatus::Played,
        PoiStatus::Error,
    ] {
        let count = snapshot.pois.iter().filter(|p| p.status == status).count();
        let _ = writeln!(output, "audio_tour_pois{{status=\"{status}\"}} {count}");
    }

    write_metric(
        output,
        "audio_tour_tracking",
        "Location tracking active (0/1)",
        MetricType::Gauge,
        snapshot.tracking as u64,
    );
}

/// Guide command accepted on a `POST` route
#[derive(Debug, Clone, Copy, PartialEq)]
enum ControlCommand {
    StartTracking,
    StopTracking,
    Reset,
    GuideActive(bool),
}

impl ControlCommand {
    fn from_path(path: &str) -> Option<Self> {
        match path {
            "/tracking/start" => Some(Self::StartTracking),
            "/tracking/stop" => Some(Self::StopTracking),
            "/reset" => Some(Self::Reset),
            "/guide/active" => Some(Self::GuideActive(true)),
            "/guide/inactive" => Some(Self::GuideActive(false)),
            _ => None,
        }
    }

    fn as_str(&self) -> &'static str {
        match self {
            Self::StartTracking => "tracking_start",
            Self::StopTracking => "tracking_stop",
            Self::Reset => "reset",
            Self::GuideActive(true) => "guide_active",
            Self::GuideActive(false) => "guide_inactive",
        }
    }
}

/// Handles the HTTP server uses to steer the guide
#[derive(Clone)]
pub struct GuideControl {
    event_tx: mpsc::Sender<GuideEvent>,
    feed: FeedControl,
}

impl GuideControl {
    pub fn new(event_tx: mpsc::Sender<GuideEvent>, feed: FeedControl) -> Self {
        Self { event_tx, feed }
    }

    /// Returns false when the reconciler is no longer accepting events
    async fn apply(&self, command: ControlCommand) -> bool {
        match command {
            ControlCommand::StartTracking => {
                self.feed.start();
                true
            }
            ControlCommand::StopTracking => {
                self.feed.stop();
                true
            }
            ControlCommand::Reset => self.event_tx.send(GuideEvent::Reset).await.is_ok(),
            ControlCommand::GuideActive(active) => {
                self.event_tx.send(GuideEvent::GuideActive(active)).await.is_ok()
            }
        }
    }
}

fn control_response(command: ControlCommand, accepted: bool) -> Response<Full<Bytes>> {
    let (status, body) = if accepted {
        (StatusCode::OK, format!(r#"{{"ok":true,"command":"{}"}}"#, command.as_str()))
    } else {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            format!(r#"{{"ok":false,"command":"{}","error":"guide_stopped"}}"#, command.as_str()),
        )
    };
    Response::builder()
        .status(status)
        .header("Content-Type", "application/json")
        .header("Access-Control-Allow-Origin", "*")
        .body(Full::new(Bytes::from(body)))
        .expect("static response should not fail")
}

/// Handle HTTP requests
async fn handle_request(
    req: Request<hyper::body::Incoming>,
    metrics: Arc<Metrics>,
    status_rx: watch::Receiver<GuideSnapshot>,
    control: GuideControl,
) -> Result<Response<Full<Bytes>>, Infallible> {
    if let Some(command) = ControlCommand::from_path(req.uri().path()) {
        return Ok(match *req.method() {
            Method::POST => {
                let accepted = control.apply(command).await;
                if accepted {
                    info!(command = %command.as_str(), "guide_command_received");
                } else {
                    warn!(command = %command.as_str(), "guide_command_rejected");
                }
                control_response(command, accepted)
            }
            // CORS preflight for the command routes
            Method::OPTIONS => Response::builder()
                .status(StatusCode::OK)
                .header("Access-Control-Allow-Origin", "*")
                .header("Access-Control-Allow-Methods", "POST, OPTIONS")
                .header("Access-Control-Allow-Headers", "Content-Type")
                .body(Full::new(Bytes::from("")))
                .expect("static response should not fail"),
            _ => not_found(),
        });
    }

    match (req.method(), req.uri().path()) {
        (&Method::GET, "/metrics") => {
            let snapshot = status_rx.borrow().clone();
            let body = format_prometheus_metrics(&metrics, &snapshot);
            Ok(Response::builder()
                .status(StatusCode::OK)
                .header("Content-Type", "text/plain; version=0.0.4; charset=utf-8")
                .body(Full::new(Bytes::from(body)))
                .expect("static response should not fail"))
        }
        (&Method::GET, "/status") => {
            let body = serde_json::to_string(&*status_rx.borrow());
            match body {
                Ok(json) => Ok(Response::builder()
                    .status(StatusCode::OK)
                    .header("Content-Type", "application/json")
                    .header("Access-Control-Allow-Origin", "*")
                    .body(Full::new(Bytes::from(json)))
                    .expect("static response should not fail")),
                Err(e) => {
                    error!(error = %e, "status_serialize_failed");
                    Ok(Response::builder()
                        .status(StatusCode::INTERNAL_SERVER_ERROR)
                        .body(Full::new(Bytes::from("status unavailable")))
                        .expect("static response should not fail"))
                }
            }
        }
        (&Method::GET, "/health") => Ok(Response::builder()
            .status(StatusCode::OK)
            .body(Full::new(Bytes::from("ok")))
            .expect("static response should not fail")),
        _ => Ok(not_found()),
    }
}

fn not_found() -> Response<Full<Bytes>> {
    Response::builder()
        .status(StatusCode::NOT_FOUND)
        .body(Full::new(Bytes::from("Not Found")))
        .expect("static response should not fail")
}

/// Start the metrics/status HTTP server
pub async fn start_http_server(
    port: u16,
    metrics: Arc<Metrics>,
    status_rx: watch::Receiver<GuideSnapshot>,
    control: GuideControl,
    mut shutdown: watch::Receiver<bool>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr).await?;

    info!(port = %port, "http_server_started");

    loop {
        tokio::select! {
            result = listener.accept() => {
                match result {
                    Ok((stream, _addr)) => {
                        let io = TokioIo::new(stream);
                        let metrics = metrics.clone();
                        let status_rx = status_rx.clone();
                        let control = control.clone();

                        tokio::spawn(async move {
                            let service = service_fn(move |req| {
                                let metrics = metrics.clone();
                                let status_rx = status_rx.clone();
                                let control = control.clone();
                                async move { handle_request(req, metrics, status_rx, control).await }
                            });

                            if let Err(e) = http1::Builder::new()
                                .serve_connection(io, service)
                                .await
                            {
                                error!(error = %e, "http_connection_error");
                            }
                        });
                    }
                    Err(e) => {
                        error!(error = %e, "http_accept_error");
                    }
                }
            }
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    info!("http_server_shutdown");
                    return Ok(());
                }
            }
        }
    }
}
