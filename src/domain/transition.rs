//! POI status transition table
//!
//! Next status is a pure function of (current status, distance band, slot
//! role). The reconciler classifies each POI and looks the answer up here.

use crate::domain::types::PoiStatus;

/// Where a POI sits relative to the device
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DistanceBand {
    /// Within the trigger radius
    Trigger,
    /// Outside the trigger radius, within radius x approach multiplier
    Approach,
    /// Beyond the approach band
    Far,
}

impl DistanceBand {
    pub fn classify(distance_m: f64, trigger_radius_m: f64, approach_multiplier: f64) -> Self {
        if distance_m <= trigger_radius_m {
            DistanceBand::Trigger
        } else if distance_m <= trigger_radius_m * approach_multiplier {
            DistanceBand::Approach
        } else {
            DistanceBand::Far
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DistanceBand::Trigger => "trigger",
            DistanceBand::Approach => "approach",
            DistanceBand::Far => "far",
        }
    }
}

/// A POI's relation to the playback slot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotRole {
    /// Owns the slot
    Holder,
    /// Lost the slot by leaving its padded radius and has not yet re-entered
    /// its trigger radius or left the approach band
    Released,
    /// Everything else
    Other,
}

/// Transition table
///
/// | current      | role     | band             | next        |
/// |--------------|----------|------------------|-------------|
/// | played/error | any      | any              | unchanged   |
/// | other        | Holder   | any              | playing     |
/// | other        | Released | any              | idle        |
/// | other        | Other    | trigger/approach | approaching |
/// | other        | Other    | far              | idle        |
pub fn next_status(current: PoiStatus, band: DistanceBand, role: SlotRole) -> PoiStatus {
    if current.is_terminal() {
        return current;
    }

    match (role, band) {
        (SlotRole::Holder, _) => PoiStatus::Playing,
        (SlotRole::Released, _) => PoiStatus::Idle,
        (SlotRole::Other, DistanceBand::Trigger | DistanceBand::Approach) => PoiStatus::Approaching,
        (SlotRole::Other, DistanceBand::Far) => PoiStatus::Idle,
    }
}

/// Status a POI takes when the guide halts (tracking off, no fix, view left)
#[inline]
pub fn halted_status(current: PoiStatus) -> PoiStatus {
    if current.is_terminal() {
        current
    } else {
        PoiStatus::Idle
    }
}
