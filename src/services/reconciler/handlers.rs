//! Event handlers and the reconciliation pass for the Reconciler
//!
//! Handlers only update inputs (position, flags, slot). Status writes and
//! playback commands are decided by `reconcile`, which runs after every event.

use super::{Reconciler, Slot};
use crate::domain::geo::distance_m;
use crate::domain::transition::{halted_status, next_status, DistanceBand, SlotRole};
use crate::domain::types::{
    AudioLocator, LocationSnapshot, PlaybackEvent, PlaybackOutcome, PoiId, PoiStatus, SlotToken,
};
use crate::services::playback_worker::PlaybackCmd;
use std::time::Instant;
use tracing::{debug, error, info, warn};

/// Per-POI result of the candidate scan
struct Candidate {
    distance_m: f64,
    band: DistanceBand,
}

impl Reconciler {
    pub(crate) fn handle_location(&mut self, snapshot: LocationSnapshot) {
        if !snapshot.coords.is_valid() {
            warn!(
                latitude = %snapshot.coords.latitude,
                longitude = %snapshot.coords.longitude,
                "location_fix_invalid"
            );
            return;
        }
        if !self.tracking {
            debug!(ts = %snapshot.timestamp_ms, "location_fix_ignored_not_tracking");
            return;
        }
        self.location = Some(snapshot);
    }

    pub(crate) fn handle_tracking(&mut self, on: bool) {
        if on == self.tracking {
            return;
        }
        self.tracking = on;
        // A fresh fix is required after every restart
        self.location = None;
        info!(tracking = %on, "tracking_changed");
    }

    pub(crate) fn handle_guide_active(&mut self, active: bool) {
        if active == self.guide_active {
            return;
        }
        self.guide_active = active;
        info!(guide_active = %active, "guide_active_changed");
    }

    /// Restore every POI, terminal ones included, to its configured state
    pub(crate) fn handle_reset(&mut self) {
        self.halt();
        match self.registry.replace_all(self.initial.clone()) {
            Ok(()) => info!(pois = %self.registry.len(), "guide_reset"),
            Err(e) => error!(error = %e, "guide_reset_failed"),
        }
    }

    /// Apply a terminal playback callback if it still belongs to the slot
    pub(crate) fn handle_playback_event(&mut self, event: PlaybackEvent) {
        let PlaybackEvent { poi_id, token, outcome } = event;

        let current = match &self.slot {
            Some(slot) if slot.token == token && slot.poi_id == poi_id => slot.clone(),
            other => {
                self.metrics.record_stale_event();
                info!(
                    poi_id = %poi_id,
                    token = %token,
                    slot_poi = ?other.as_ref().map(|s| s.poi_id.as_str()),
                    slot_token = ?other.as_ref().map(|s| s.token.0),
                    "playback_stale_event_discarded"
                );
                return;
            }
        };

        self.slot = None;
        let status = match outcome {
            PlaybackOutcome::Ended => {
                self.metrics.record_playback_ended();
                info!(poi_id = %current.poi_id, token = %token, "poi_played");
                PoiStatus::Played
            }
            PlaybackOutcome::Failed(reason) => {
                self.metrics.record_playback_failed();
                warn!(poi_id = %current.poi_id, token = %token, error = %reason, "poi_playback_error");
                PoiStatus::Error
            }
        };
        self.write_status(&current.poi_id, status);
    }

    /// Run one reconciliation pass over the registry
    pub(crate) fn reconcile(&mut self) {
        self.metrics.record_tick();
        self.retry_pending_stop();

        let here = match (&self.location, self.tracking, self.guide_active) {
            (Some(snapshot), true, true) => snapshot.coords,
            _ => {
                self.halt();
                return;
            }
        };

        // Candidate scan: terminal POIs are never classified
        let candidates: Vec<Option<Candidate>> = self
            .registry
            .iter()
            .map(|poi| {
                if poi.status.is_terminal() {
                    return None;
                }
                let distance_m = distance_m(&here, &poi.coordinates);
                let band = DistanceBand::classify(
                    distance_m,
                    poi.trigger_radius_m,
                    self.approach_multiplier,
                );
                Some(Candidate { distance_m, band })
            })
            .collect();

        self.retain_or_release_holder(&candidates);

        // Released POIs rejoin selection once back inside their trigger radius
        // and lose the marker once they leave the approach band.
        let registry = &self.registry;
        self.released.retain(|id| {
            let Some(index) = registry.index_of(id) else {
                return false;
            };
            matches!(
                candidates.get(index),
                Some(Some(Candidate { band: DistanceBand::Approach, .. }))
            )
        });

        if self.slot.is_none() {
            if let Some(index) = self.select_nearest(&candidates) {
                self.start_playback(index, candidates[index].as_ref().map(|c| c.distance_m));
            }
        }

        // Status projection through the transition table
        for (index, candidate) in candidates.iter().enumerate() {
            let Some(candidate) = candidate else {
                continue;
            };
            let Some(poi) = self.registry.get_at(index) else {
                continue;
            };

            let role = match &self.slot {
                Some(slot) if slot.poi_id == poi.id => SlotRole::Holder,
                _ if self.released.contains(&poi.id) => SlotRole::Released,
                _ => SlotRole::Other,
            };
            let next = next_status(poi.status, candidate.band, role);
            if next != poi.status {
                let id = poi.id.clone();
                let previous = poi.status;
                if self.registry.set_status_at(index, next) {
                    self.metrics.record_status_write();
                    debug!(
                        poi_id = %id,
                        from = %previous,
                        to = %next,
                        distance_m = %format!("{:.1}", candidate.distance_m),
                        band = %candidate.band.as_str(),
                        "poi_status_changed"
                    );
                }
            }
        }

        debug_assert!(self.registry.playing_count() <= 1);
    }

    /// Keep the slot holder while inside its hysteresis-padded radius
    fn retain_or_release_holder(&mut self, candidates: &[Option<Candidate>]) {
        let Some(slot) = self.slot.clone() else {
            return;
        };

        let retained = self.registry.index_of(&slot.poi_id).and_then(|index| {
            let poi = self.registry.get_at(index)?;
            let candidate = candidates.get(index)?.as_ref()?;
            let padded = poi.trigger_radius_m * self.hysteresis_factor;
            (candidate.distance_m <= padded).then_some(candidate.distance_m)
        });

        if retained.is_some() {
            return;
        }

        info!(poi_id = %slot.poi_id, token = %slot.token, "poi_left_radius");
        self.stop_playback();
        self.released.insert(slot.poi_id.clone());
        self.write_status(&slot.poi_id, PoiStatus::Idle);
    }

    /// Nearest trigger-band POI; exact ties keep registry order
    fn select_nearest(&self, candidates: &[Option<Candidate>]) -> Option<usize> {
        let mut best: Option<(usize, f64)> = None;
        for (index, candidate) in candidates.iter().enumerate() {
            let Some(Candidate { distance_m, band: DistanceBand::Trigger }) = candidate else {
                continue;
            };
            let Some(poi) = self.registry.get_at(index) else {
                continue;
            };
            if self.released.contains(&poi.id) {
                continue;
            }
            if best.map_or(true, |(_, d)| *distance_m < d) {
                best = Some((index, *distance_m));
            }
        }
        best.map(|(index, _)| index)
    }

    /// Halted state: no playback, every non-terminal POI idle
    pub(crate) fn halt(&mut self) {
        if self.slot.is_some() {
            self.stop_playback();
        }
        self.released.clear();

        for index in 0..self.registry.len() {
            let Some(current) = self.registry.get_at(index).map(|p| p.status) else {
                continue;
            };
            if self.registry.set_status_at(index, halted_status(current)) {
                self.metrics.record_status_write();
            }
        }
    }

    /// Take the slot for the POI at `index` and command the worker to play it
    fn start_playback(&mut self, index: usize, distance_m: Option<f64>) {
        let Some(poi) = self.registry.get_at(index) else {
            return;
        };
        let poi_id = poi.id.clone();
        let audio: AudioLocator = poi.audio.clone();
        let token = SlotToken(self.next_token + 1);

        let cmd = PlaybackCmd::Start {
            poi_id: poi_id.clone(),
            token,
            audio,
            enqueued_at: Instant::now(),
        };
        if !self.send_cmd(cmd) {
            // Slot stays free; the next pass retries
            return;
        }

        self.next_token = token.0;
        // The worker ends any previous session before starting this one
        self.pending_stop = false;
        self.metrics.record_playback_start();
        info!(
            poi_id = %poi_id,
            token = %token,
            distance_m = %distance_m.map(|d| format!("{d:.1}")).unwrap_or_default(),
            "poi_selected"
        );
        self.slot = Some(Slot { poi_id, token });
    }

    /// Release the slot and command the worker to silence it
    fn stop_playback(&mut self) {
        let Some(slot) = self.slot.take() else {
            return;
        };
        self.metrics.record_playback_stop();
        info!(poi_id = %slot.poi_id, token = %slot.token, "playback_stop_commanded");
        if !self.send_cmd(PlaybackCmd::Stop { enqueued_at: Instant::now() }) {
            self.pending_stop = true;
        }

        if let Some(current) = self.registry.status(&slot.poi_id) {
            self.write_status(&slot.poi_id, halted_status(current));
        }
    }

    fn retry_pending_stop(&mut self) {
        if !self.pending_stop {
            return;
        }
        if self.send_cmd(PlaybackCmd::Stop { enqueued_at: Instant::now() }) {
            self.pending_stop = false;
            info!("playback_stop_retried");
        }
    }

    /// Non-blocking enqueue to the playback worker
    fn send_cmd(&self, cmd: PlaybackCmd) -> bool {
        match self.cmd_tx.try_send(cmd) {
            Ok(()) => true,
            Err(e) => {
                self.metrics.record_playback_cmd_dropped();
                error!(error = %e, "playback_cmd_send_failed");
                false
            }
        }
    }

    fn write_status(&mut self, id: &PoiId, status: PoiStatus) {
        if self.registry.set_status(id, status) {
            self.metrics.record_status_write();
        }
    }
}
