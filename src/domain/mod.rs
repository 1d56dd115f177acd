//! Domain models - core types, geometry, and status transitions
//!
//! This module contains the canonical data types used throughout the guide:
//! - `types` - POIs, coordinates, audio locators, and guide events
//! - `geo` - haversine distance
//! - `transition` - the POI status transition table

pub mod geo;
pub mod transition;
pub mod types;

pub use types::{
    AudioLocator, Coordinates, GuideEvent, LocationSnapshot, PlaybackEvent, PlaybackOutcome, Poi,
    PoiId, PoiStatus, SlotToken,
};
