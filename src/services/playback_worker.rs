//! Playback worker - owns the single live audio session
//!
//! The reconciler never touches audio directly. It enqueues start/stop
//! commands here; the worker runs each session in its own task and reports
//! natural completion or failure back on the guide event channel, tagged with
//! the slot token the session was started under.

use crate::domain::types::{
    AudioLocator, GuideEvent, PlaybackEvent, PlaybackOutcome, PoiId, SlotToken,
};
use crate::infra::metrics::Metrics;
use crate::services::playback::AudioOutput;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// A playback command to be processed by the worker
#[derive(Debug)]
pub enum PlaybackCmd {
    /// Replace whatever is playing with this POI's narration
    Start {
        poi_id: PoiId,
        token: SlotToken,
        audio: AudioLocator,
        /// When the command was enqueued (for queue delay measurement)
        enqueued_at: Instant,
    },
    /// Silence the current session, if any
    Stop { enqueued_at: Instant },
}

impl PlaybackCmd {
    fn enqueued_at(&self) -> Instant {
        match self {
            PlaybackCmd::Start { enqueued_at, .. } | PlaybackCmd::Stop { enqueued_at } => {
                *enqueued_at
            }
        }
    }
}

struct Session {
    poi_id: PoiId,
    token: SlotToken,
    handle: JoinHandle<()>,
}

/// Worker that executes playback commands asynchronously
pub struct PlaybackWorker {
    output: Arc<dyn AudioOutput>,
    cmd_rx: mpsc::Receiver<PlaybackCmd>,
    /// Completion callbacks go back to the reconciler on this channel
    event_tx: mpsc::Sender<GuideEvent>,
    metrics: Arc<Metrics>,
    session: Option<Session>,
}

impl PlaybackWorker {
    pub fn new(
        output: Arc<dyn AudioOutput>,
        cmd_rx: mpsc::Receiver<PlaybackCmd>,
        event_tx: mpsc::Sender<GuideEvent>,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self { output, cmd_rx, event_tx, metrics, session: None }
    }

    /// Run the worker, processing commands until the channel closes
    pub async fn run(mut self) {
        info!(output = %self.output.name(), "playback_worker_started");

        while let Some(cmd) = self.cmd_rx.recv().await {
            let queue_delay_us = cmd.enqueued_at().elapsed().as_micros() as u64;
            self.metrics.record_playback_queue_delay(queue_delay_us);

            if queue_delay_us > 1000 {
                warn!(queue_delay_us = %queue_delay_us, "playback_cmd_queue_delay_high");
            }

            match cmd {
                PlaybackCmd::Start { poi_id, token, audio, .. } => {
                    self.stop_session().await;
                    self.start_session(poi_id, token, audio);
                }
                PlaybackCmd::Stop { .. } => {
                    self.stop_session().await;
                }
            }
        }

        self.stop_session().await;
        info!("playback_worker_stopped");
    }

    fn start_session(&mut self, poi_id: PoiId, token: SlotToken, audio: AudioLocator) {
        info!(poi_id = %poi_id, token = %token, audio = %audio, "playback_session_started");

        let output = Arc::clone(&self.output);
        let event_tx = self.event_tx.clone();
        let task_poi = poi_id.clone();

        let handle = tokio::spawn(async move {
            let started = Instant::now();
            let outcome = match output.play(&audio).await {
                Ok(()) => PlaybackOutcome::Ended,
                Err(e) => PlaybackOutcome::Failed(e.to_string()),
            };

            let elapsed_ms = started.elapsed().as_millis() as u64;
            match &outcome {
                PlaybackOutcome::Ended => {
                    info!(poi_id = %task_poi, token = %token, elapsed_ms = %elapsed_ms, "playback_session_ended")
                }
                PlaybackOutcome::Failed(reason) => {
                    warn!(poi_id = %task_poi, token = %token, error = %reason, "playback_session_failed")
                }
            }

            let event = GuideEvent::Playback(PlaybackEvent { poi_id: task_poi, token, outcome });
            if event_tx.send(event).await.is_err() {
                debug!(token = %token, "playback_event_dropped_reconciler_gone");
            }
        });

        self.session = Some(Session { poi_id, token, handle });
    }

    /// Abort the live session and wait for its task to unwind
    ///
    /// An aborted session reports nothing. A session that already finished
    /// has sent its callback; the reconciler decides whether it is stale.
    async fn stop_session(&mut self) {
        let Some(session) = self.session.take() else {
            return;
        };

        if session.handle.is_finished() {
            return;
        }

        session.handle.abort();
        let _ = session.handle.await;
        info!(poi_id = %session.poi_id, token = %session.token, "playback_session_interrupted");
    }
}

/// Create a playback command channel and worker
///
/// Returns the sender (for the reconciler) and the worker (to be spawned)
pub fn create_playback_worker(
    output: Arc<dyn AudioOutput>,
    event_tx: mpsc::Sender<GuideEvent>,
    metrics: Arc<Metrics>,
    buffer_size: usize,
) -> (mpsc::Sender<PlaybackCmd>, PlaybackWorker) {
    let (cmd_tx, cmd_rx) = mpsc::channel(buffer_size);
    let worker = PlaybackWorker::new(output, cmd_rx, event_tx, metrics);
    (cmd_tx, worker)
}
