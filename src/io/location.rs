//! Location feed - turns a source of position fixes into guide events
//!
//! The feed is started and stopped through a `FeedControl` handle. While
//! started it forwards every fix as `GuideEvent::Location`; it announces
//! `Tracking(true)` on start and `Tracking(false)` on stop. Any source error,
//! including a fix that does not arrive within the timeout, ends the tracking
//! session and leaves the feed stopped until `start()` is called again.

use crate::domain::types::{GuideEvent, LocationSnapshot};
use crate::infra::metrics::Metrics;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum LocationError {
    #[error("location permission denied")]
    PermissionDenied,
    #[error("position unavailable: {0}")]
    PositionUnavailable(String),
    #[error("no position fix within {0:?}")]
    Timeout(Duration),
}

impl LocationError {
    pub fn kind(&self) -> &'static str {
        match self {
            LocationError::PermissionDenied => "permission_denied",
            LocationError::PositionUnavailable(_) => "position_unavailable",
            LocationError::Timeout(_) => "timeout",
        }
    }
}

/// Anything that yields position fixes
#[async_trait]
pub trait LocationSource: Send {
    fn name(&self) -> &'static str;

    /// Wait for the next fix. Errors are unrecoverable for the current session.
    async fn next_fix(&mut self) -> Result<LocationSnapshot, LocationError>;
}

/// Start/stop handle for a running feed
#[derive(Clone)]
pub struct FeedControl {
    tx: Arc<watch::Sender<bool>>,
}

impl FeedControl {
    pub(crate) fn new() -> Self {
        let (tx, _) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    pub fn start(&self) {
        self.tx.send_replace(true);
    }

    /// Idempotent
    pub fn stop(&self) {
        self.tx.send_replace(false);
    }

    pub fn is_started(&self) -> bool {
        *self.tx.borrow()
    }

    fn subscribe(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }
}

/// Why a tracking session ended
enum SessionEnd {
    Stopped,
    Failed(LocationError),
    Shutdown,
    /// Reconciler is gone
    Closed,
}

pub struct LocationFeed {
    source: Box<dyn LocationSource>,
    event_tx: mpsc::Sender<GuideEvent>,
    control: FeedControl,
    control_rx: watch::Receiver<bool>,
    fix_timeout: Duration,
    metrics: Arc<Metrics>,
}

impl LocationFeed {
    /// Run until shutdown or until the event channel closes
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        info!(source = %self.source.name(), fix_timeout_ms = %self.fix_timeout.as_millis(), "location_feed_ready");

        loop {
            if !*self.control_rx.borrow_and_update() {
                tokio::select! {
                    changed = self.control_rx.changed() => {
                        if changed.is_err() {
                            return;
                        }
                        continue;
                    }
                    _ = shutdown.changed() => {
                        if *shutdown.borrow() {
                            info!("location_feed_shutdown");
                            return;
                        }
                        continue;
                    }
                }
            }

            info!(source = %self.source.name(), "tracking_started");
            if !self.emit(GuideEvent::Tracking(true)).await {
                return;
            }

            let end = self.track(&mut shutdown).await;

            match &end {
                SessionEnd::Stopped => info!("tracking_stopped"),
                SessionEnd::Failed(e) => {
                    self.metrics.record_location_error();
                    warn!(kind = %e.kind(), error = %e, "tracking_halted_by_error");
                    // Stay stopped until explicitly restarted
                    self.control.stop();
                    self.control_rx.borrow_and_update();
                }
                SessionEnd::Shutdown => info!("location_feed_shutdown"),
                SessionEnd::Closed => return,
            }

            if !self.emit(GuideEvent::Tracking(false)).await {
                return;
            }
            if matches!(end, SessionEnd::Shutdown) {
                return;
            }
        }
    }

    /// Forward fixes until stopped, failed, or shut down
    async fn track(&mut self, shutdown: &mut watch::Receiver<bool>) -> SessionEnd {
        loop {
            tokio::select! {
                result = tokio::time::timeout(self.fix_timeout, self.source.next_fix()) => {
                    let fix = match result {
                        Ok(Ok(fix)) => fix,
                        Ok(Err(e)) => return SessionEnd::Failed(e),
                        Err(_) => return SessionEnd::Failed(LocationError::Timeout(self.fix_timeout)),
                    };
                    self.metrics.record_location_fix();
                    debug!(
                        lat = %fix.coords.latitude,
                        lon = %fix.coords.longitude,
                        acc = ?fix.coords.accuracy,
                        ts = %fix.timestamp_ms,
                        "location_fix"
                    );
                    if !self.emit(GuideEvent::Location(fix)).await {
                        return SessionEnd::Closed;
                    }
                }
                changed = self.control_rx.changed() => {
                    if changed.is_err() || !*self.control_rx.borrow_and_update() {
                        return SessionEnd::Stopped;
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        return SessionEnd::Shutdown;
                    }
                }
            }
        }
    }

    async fn emit(&mut self, event: GuideEvent) -> bool {
        if self.event_tx.send(event).await.is_err() {
            debug!("location_feed_event_channel_closed");
            return false;
        }
        true
    }
}

/// Create a location feed and its control handle
///
/// The feed starts stopped; call `FeedControl::start` to begin tracking.
pub fn create_location_feed(
    source: Box<dyn LocationSource>,
    event_tx: mpsc::Sender<GuideEvent>,
    fix_timeout: Duration,
    metrics: Arc<Metrics>,
) -> (FeedControl, LocationFeed) {
    let control = FeedControl::new();
    let control_rx = control.subscribe();
    let feed = LocationFeed {
        source,
        event_tx,
        control: control.clone(),
        control_rx,
        fix_timeout,
        metrics,
    };
    (control, feed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::types::Coordinates;
    use std::collections::VecDeque;

    /// Scripted source: each step waits, then yields a fix or an error
    struct ScriptedSource {
        steps: VecDeque<(Duration, Result<LocationSnapshot, LocationError>)>,
    }

    #[async_trait]
    impl LocationSource for ScriptedSource {
        fn name(&self) -> &'static str {
            "scripted"
        }

        async fn next_fix(&mut self) -> Result<LocationSnapshot, LocationError> {
            match self.steps.pop_front() {
                Some((delay, result)) => {
                    tokio::time::sleep(delay).await;
                    result
                }
                None => std::future::pending().await,
            }
        }
    }

    fn fix(lat: f64) -> LocationSnapshot {
        LocationSnapshot::new(Coordinates::new(lat, -45.5), 0)
    }

    struct Harness {
        control: FeedControl,
        event_rx: mpsc::Receiver<GuideEvent>,
        shutdown_tx: watch::Sender<bool>,
        metrics: Arc<Metrics>,
        handle: tokio::task::JoinHandle<()>,
    }

    fn spawn_feed(
        steps: Vec<(Duration, Result<LocationSnapshot, LocationError>)>,
        fix_timeout: Duration,
    ) -> Harness {
        let (event_tx, event_rx) = mpsc::channel(32);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let metrics = Arc::new(Metrics::new());
        let source = ScriptedSource { steps: steps.into() };
        let (control, feed) =
            create_location_feed(Box::new(source), event_tx, fix_timeout, metrics.clone());
        let handle = tokio::spawn(feed.run(shutdown_rx));
        Harness { control, event_rx, shutdown_tx, metrics, handle }
    }

    #[test]
    fn test_feed_future_is_send() {
        fn assert_send<T: Send>(_: &T) {}

        let (event_tx, _event_rx) = mpsc::channel(1);
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);
        let source = ScriptedSource { steps: VecDeque::new() };
        let (_control, feed) = create_location_feed(
            Box::new(source),
            event_tx,
            Duration::from_secs(1),
            Arc::new(Metrics::new()),
        );

        let run = feed.run(shutdown_rx);
        assert_send(&run);
    }

    #[tokio::test(start_paused = true)]
    async fn test_feed_is_silent_until_started() {
        let mut h = spawn_feed(vec![(Duration::ZERO, Ok(fix(1.0)))], Duration::from_secs(20));

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert!(h.event_rx.try_recv().is_err());

        h.control.start();
        assert_eq!(h.event_rx.recv().await, Some(GuideEvent::Tracking(true)));
        assert_eq!(h.event_rx.recv().await, Some(GuideEvent::Location(fix(1.0))));
        assert_eq!(h.metrics.location_fixes_total(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_emits_tracking_off() {
        let mut h = spawn_feed(
            vec![(Duration::ZERO, Ok(fix(1.0))), (Duration::from_secs(5), Ok(fix(2.0)))],
            Duration::from_secs(20),
        );

        h.control.start();
        assert_eq!(h.event_rx.recv().await, Some(GuideEvent::Tracking(true)));
        assert_eq!(h.event_rx.recv().await, Some(GuideEvent::Location(fix(1.0))));

        h.control.stop();
        assert_eq!(h.event_rx.recv().await, Some(GuideEvent::Tracking(false)));
        assert!(!h.control.is_started());
    }

    #[tokio::test(start_paused = true)]
    async fn test_source_error_turns_tracking_off() {
        let mut h = spawn_feed(
            vec![(Duration::ZERO, Err(LocationError::PermissionDenied))],
            Duration::from_secs(20),
        );

        h.control.start();
        assert_eq!(h.event_rx.recv().await, Some(GuideEvent::Tracking(true)));
        assert_eq!(h.event_rx.recv().await, Some(GuideEvent::Tracking(false)));
        assert!(!h.control.is_started());
        assert_eq!(h.metrics.report().location_errors_total, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fix_timeout_turns_tracking_off() {
        let mut h = spawn_feed(
            vec![(Duration::ZERO, Ok(fix(1.0))), (Duration::from_secs(30), Ok(fix(2.0)))],
            Duration::from_secs(20),
        );

        h.control.start();
        assert_eq!(h.event_rx.recv().await, Some(GuideEvent::Tracking(true)));
        assert_eq!(h.event_rx.recv().await, Some(GuideEvent::Location(fix(1.0))));

        let before = tokio::time::Instant::now();
        assert_eq!(h.event_rx.recv().await, Some(GuideEvent::Tracking(false)));
        assert_eq!(before.elapsed(), Duration::from_secs(20));
    }

    #[tokio::test(start_paused = true)]
    async fn test_restart_after_error() {
        let mut h = spawn_feed(
            vec![
                (Duration::ZERO, Err(LocationError::PositionUnavailable("no signal".into()))),
                (Duration::ZERO, Ok(fix(3.0))),
            ],
            Duration::from_secs(20),
        );

        h.control.start();
        assert_eq!(h.event_rx.recv().await, Some(GuideEvent::Tracking(true)));
        assert_eq!(h.event_rx.recv().await, Some(GuideEvent::Tracking(false)));

        h.control.start();
        assert_eq!(h.event_rx.recv().await, Some(GuideEvent::Tracking(true)));
        assert_eq!(h.event_rx.recv().await, Some(GuideEvent::Location(fix(3.0))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_while_tracking() {
        let mut h = spawn_feed(vec![], Duration::from_secs(20));

        h.control.start();
        assert_eq!(h.event_rx.recv().await, Some(GuideEvent::Tracking(true)));

        h.shutdown_tx.send(true).unwrap();
        assert_eq!(h.event_rx.recv().await, Some(GuideEvent::Tracking(false)));
        h.handle.await.unwrap();
    }

    #[test]
    fn test_error_kinds() {
        assert_eq!(LocationError::PermissionDenied.kind(), "permission_denied");
        assert_eq!(LocationError::PositionUnavailable("x".into()).kind(), "position_unavailable");
        assert_eq!(LocationError::Timeout(Duration::from_secs(20)).kind(), "timeout");
    }
}
