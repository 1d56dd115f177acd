//! Services - business logic and state management
//!
//! This module contains the core guide services:
//! - `registry` - POI store with identity-keyed status updates
//! - `reconciler` - Central event orchestrator and playback slot owner
//! - `playback` - Audio output implementations
//! - `playback_worker` - Async playback session worker

pub mod playback;
pub mod playback_worker;
pub mod reconciler;
pub mod registry;

// Re-export commonly used types
pub use playback::{output_from_config, AudioOutput, CommandOutput, PlaybackError, SimulatedOutput};
pub use playback_worker::{create_playback_worker, PlaybackCmd, PlaybackWorker};
pub use reconciler::{GuideSnapshot, PoiView, Reconciler};
pub use registry::{PoiRegistry, RegistryError};
