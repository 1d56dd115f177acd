//! IO modules - external system interfaces
//!
//! This module contains all external IO operations:
//! - `location` - Location source trait and the feed that drives it
//! - `replay` - JSONL walk replay source
//! - `mqtt` - OwnTracks location reports over MQTT
//! - `http` - Prometheus metrics, status feed, and guide command endpoint

pub mod http;
pub mod location;
pub mod mqtt;
pub mod replay;

// Re-export commonly used types
pub use location::{create_location_feed, FeedControl, LocationError, LocationFeed, LocationSource};
pub use http::GuideControl;
pub use mqtt::MqttSource;
pub use replay::{RecordedFix, ReplaySource};
