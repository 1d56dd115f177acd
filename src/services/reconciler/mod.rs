//! Proximity reconciliation and playback orchestration
//!
//! The Reconciler is the single owner of guide state:
//! - POI statuses (through the registry)
//! - The playback slot and its generation token
//! - Tracking and guide-view flags plus the latest position fix
//!
//! Every input arrives as a `GuideEvent` on one channel and each event runs a
//! full reconciliation pass before the next is read. Playback commands leave
//! through the worker channel; the resulting callbacks come back as events.

mod handlers;

use crate::domain::types::{GuideEvent, LocationSnapshot, Poi, PoiId, PoiStatus, SlotToken};
use crate::infra::config::Config;
use crate::infra::metrics::Metrics;
use crate::services::playback_worker::PlaybackCmd;
use crate::services::registry::PoiRegistry;
use rustc_hash::FxHashSet;
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{mpsc, watch};
use tracing::info;

/// Current owner of the playback slot
#[derive(Debug, Clone, PartialEq)]
pub struct Slot {
    pub poi_id: PoiId,
    pub token: SlotToken,
}

/// One POI as presented to readers of the status feed
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PoiView {
    pub id: PoiId,
    pub name: String,
    pub description: String,
    pub status: PoiStatus,
}

/// Read-only view of the guide published after every event
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct GuideSnapshot {
    /// POIs in configuration order
    pub pois: Vec<PoiView>,
    /// POI currently owning the playback slot
    pub playing: Option<PoiId>,
    pub tracking: bool,
    pub guide_active: bool,
}

/// Central event processor for proximity-triggered playback
pub struct Reconciler {
    /// All POIs and their live statuses
    pub(crate) registry: PoiRegistry,
    /// Pristine POI set restored on reset
    pub(crate) initial: Vec<Poi>,
    /// Latest fix, cleared whenever tracking stops
    pub(crate) location: Option<LocationSnapshot>,
    pub(crate) tracking: bool,
    pub(crate) guide_active: bool,
    pub(crate) slot: Option<Slot>,
    /// A `Stop` that could not be enqueued; retried on every pass until sent
    pub(crate) pending_stop: bool,
    /// Last token handed out; tokens are never reused within a process
    pub(crate) next_token: u64,
    /// Former holders that left their padded radius and stay idle until they
    /// re-enter the trigger radius or leave the approach band
    pub(crate) released: FxHashSet<PoiId>,
    pub(crate) approach_multiplier: f64,
    pub(crate) hysteresis_factor: f64,
    /// Playback command channel (non-blocking send)
    pub(crate) cmd_tx: mpsc::Sender<PlaybackCmd>,
    pub(crate) status_tx: watch::Sender<GuideSnapshot>,
    pub(crate) metrics: Arc<Metrics>,
}

impl Reconciler {
    pub fn new(
        config: &Config,
        registry: PoiRegistry,
        cmd_tx: mpsc::Sender<PlaybackCmd>,
        metrics: Arc<Metrics>,
    ) -> Self {
        let initial: Vec<Poi> = registry.iter().cloned().collect();
        let (status_tx, _) = watch::channel(GuideSnapshot::default());

        let reconciler = Self {
            registry,
            initial,
            location: None,
            tracking: false,
            guide_active: true,
            slot: None,
            pending_stop: false,
            next_token: 0,
            released: FxHashSet::default(),
            approach_multiplier: config.approach_multiplier(),
            hysteresis_factor: config.hysteresis_factor(),
            cmd_tx,
            status_tx,
            metrics,
        };
        reconciler.publish();
        reconciler
    }

    /// Subscribe to the status feed
    pub fn status_feed(&self) -> watch::Receiver<GuideSnapshot> {
        self.status_tx.subscribe()
    }

    /// Consume events until the channel closes or shutdown is signalled
    ///
    /// On exit any active playback is stopped and statuses are normalized.
    pub async fn run(
        &mut self,
        mut event_rx: mpsc::Receiver<GuideEvent>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        info!(pois = %self.registry.len(), "reconciler_started");

        loop {
            tokio::select! {
                event = event_rx.recv() => {
                    match event {
                        Some(e) => self.process_event(e),
                        None => break,
                    }
                }
                _ = shutdown.changed() => {
                    info!("reconciler_shutdown_signal");
                    break;
                }
            }
        }

        self.halt();
        self.publish();
        info!(events = %self.metrics.events_total(), "reconciler_stopped");
    }

    /// Process a single event, then reconcile and publish
    pub fn process_event(&mut self, event: GuideEvent) {
        let process_start = Instant::now();

        match event {
            GuideEvent::Location(snapshot) => self.handle_location(snapshot),
            GuideEvent::Tracking(on) => self.handle_tracking(on),
            GuideEvent::GuideActive(active) => self.handle_guide_active(active),
            GuideEvent::Reset => self.handle_reset(),
            GuideEvent::Playback(event) => self.handle_playback_event(event),
        }

        self.reconcile();
        self.publish();

        let latency_us = process_start.elapsed().as_micros() as u64;
        self.metrics.record_event_processed(latency_us);
    }

    /// Build the current snapshot and publish it if anything changed
    pub(crate) fn publish(&self) {
        let snapshot = GuideSnapshot {
            pois: self
                .registry
                .iter()
                .map(|p| PoiView {
                    id: p.id.clone(),
                    name: p.name.clone(),
                    description: p.description.clone(),
                    status: p.status,
                })
                .collect(),
            playing: self.slot.as_ref().map(|s| s.poi_id.clone()),
            tracking: self.tracking,
            guide_active: self.guide_active,
        };

        self.status_tx.send_if_modified(|current| {
            if *current == snapshot {
                false
            } else {
                *current = snapshot;
                true
            }
        });
    }

    pub fn registry(&self) -> &PoiRegistry {
        &self.registry
    }

    /// POI currently owning the playback slot
    pub fn slot_holder(&self) -> Option<&PoiId> {
        self.slot.as_ref().map(|s| &s.poi_id)
    }
}
