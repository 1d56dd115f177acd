//! Shared types for the audio tour guide

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};

/// Get current epoch milliseconds
#[inline]
pub fn epoch_ms() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_millis() as u64
}

/// Newtype wrapper for POI ids to provide type safety
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PoiId(pub String);

impl PoiId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for PoiId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for PoiId {
    fn from(id: &str) -> Self {
        PoiId(id.to_string())
    }
}

/// Generation counter handed out each time a POI acquires the playback slot.
///
/// Every playback callback carries the token it was started with; a callback
/// whose token no longer matches the current slot is stale.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[repr(transparent)]
pub struct SlotToken(pub u64);

impl std::fmt::Display for SlotToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Geographic position in degrees (WGS84)
///
/// Only latitude and longitude take part in distance math; the remaining
/// fields are carried through for logging and the status feed.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Coordinates {
    pub latitude: f64,
    pub longitude: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub accuracy: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub altitude: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub altitude_accuracy: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub heading: Option<f64>,
    /// Ground speed in m/s
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub speed: Option<f64>,
}

impl Coordinates {
    #[inline]
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self { latitude, longitude, ..Default::default() }
    }

    pub fn with_accuracy(mut self, accuracy: f64) -> Self {
        self.accuracy = Some(accuracy);
        self
    }

    /// True when both components are finite and inside the WGS84 ranges
    pub fn is_valid(&self) -> bool {
        self.latitude.is_finite()
            && self.longitude.is_finite()
            && (-90.0..=90.0).contains(&self.latitude)
            && (-180.0..=180.0).contains(&self.longitude)
    }
}

/// A single position fix from the location feed
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct LocationSnapshot {
    pub coords: Coordinates,
    /// Fix time (epoch ms)
    pub timestamp_ms: u64,
}

impl LocationSnapshot {
    pub fn new(coords: Coordinates, timestamp_ms: u64) -> Self {
        Self { coords, timestamp_ms }
    }
}

/// POI lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PoiStatus {
    Idle,
    Approaching,
    Playing,
    /// Narration finished naturally (terminal)
    Played,
    /// Narration failed to load or play (terminal)
    Error,
}

impl PoiStatus {
    #[inline]
    pub fn as_str(&self) -> &'static str {
        match self {
            PoiStatus::Idle => "idle",
            PoiStatus::Approaching => "approaching",
            PoiStatus::Playing => "playing",
            PoiStatus::Played => "played",
            PoiStatus::Error => "error",
        }
    }

    /// Terminal statuses only change through an explicit reset
    #[inline]
    pub fn is_terminal(&self) -> bool {
        matches!(self, PoiStatus::Played | PoiStatus::Error)
    }
}

impl std::fmt::Display for PoiStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Reasons an audio locator is rejected
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LocatorError {
    #[error("locator is empty")]
    Empty,
    #[error("unsupported scheme `{0}`")]
    UnsupportedScheme(String),
    #[error("locator has no target after the scheme")]
    MissingTarget,
    #[error("locator contains whitespace or control characters")]
    InvalidCharacters,
}

/// Opaque reference to a narration asset
///
/// Accepted forms are `http://`, `https://` and `file://` URLs, or a bare
/// filesystem path. Resolution is left to the audio output.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct AudioLocator(String);

const SUPPORTED_SCHEMES: [&str; 3] = ["http", "https", "file"];

impl AudioLocator {
    pub fn parse(raw: &str) -> Result<Self, LocatorError> {
        if raw.trim().is_empty() {
            return Err(LocatorError::Empty);
        }
        if raw.chars().any(|c| c.is_whitespace() || c.is_control()) {
            return Err(LocatorError::InvalidCharacters);
        }

        if let Some((scheme, target)) = raw.split_once("://") {
            let scheme = scheme.to_ascii_lowercase();
            if !SUPPORTED_SCHEMES.contains(&scheme.as_str()) {
                return Err(LocatorError::UnsupportedScheme(scheme));
            }
            if target.is_empty() {
                return Err(LocatorError::MissingTarget);
            }
        }

        Ok(Self(raw.to_string()))
    }

    #[inline]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Filesystem path for `file://` locators and bare paths, None for remote assets
    pub fn local_path(&self) -> Option<PathBuf> {
        match self.0.split_once("://") {
            Some((scheme, target)) if scheme.eq_ignore_ascii_case("file") => {
                Some(PathBuf::from(target))
            }
            Some(_) => None,
            None => Some(PathBuf::from(&self.0)),
        }
    }
}

impl std::fmt::Display for AudioLocator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Point of interest: immutable geometry and metadata plus a live status
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Poi {
    pub id: PoiId,
    pub name: String,
    pub description: String,
    pub audio: AudioLocator,
    pub coordinates: Coordinates,
    pub trigger_radius_m: f64,
    pub status: PoiStatus,
}

impl Poi {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        audio: AudioLocator,
        coordinates: Coordinates,
        trigger_radius_m: f64,
    ) -> Self {
        Self {
            id: PoiId(id.into()),
            name: name.into(),
            description: String::new(),
            audio,
            coordinates,
            trigger_radius_m,
            status: PoiStatus::Idle,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }
}

/// Outcome reported by the playback worker when a session ends on its own
#[derive(Debug, Clone, PartialEq)]
pub enum PlaybackOutcome {
    Ended,
    Failed(String),
}

/// Terminal playback callback, tagged with the slot token it was started under
#[derive(Debug, Clone, PartialEq)]
pub struct PlaybackEvent {
    pub poi_id: PoiId,
    pub token: SlotToken,
    pub outcome: PlaybackOutcome,
}

/// Every input the reconciler reacts to, funnelled through one channel
#[derive(Debug, Clone, PartialEq)]
pub enum GuideEvent {
    /// New position fix
    Location(LocationSnapshot),
    /// Location tracking switched on or off
    Tracking(bool),
    /// Guide view shown (true) or left for the welcome flow (false)
    GuideActive(bool),
    /// Restore every POI to its configured state
    Reset,
    /// Playback session ended or failed
    Playback(PlaybackEvent),
}

impl GuideEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            GuideEvent::Location(_) => "location",
            GuideEvent::Tracking(_) => "tracking",
            GuideEvent::GuideActive(_) => "guide_active",
            GuideEvent::Reset => "reset",
            GuideEvent::Playback(_) => "playback",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_locator_accepts_urls_and_paths() {
        assert!(AudioLocator::parse("https://res.example.com/a/b.wav").is_ok());
        assert!(AudioLocator::parse("HTTP://host/x.mp3").is_ok());
        assert!(AudioLocator::parse("file:///srv/audio/a.ogg").is_ok());
        assert!(AudioLocator::parse("audio/a.ogg").is_ok());
    }

    #[test]
    fn test_locator_rejects_malformed() {
        assert_eq!(AudioLocator::parse(""), Err(LocatorError::Empty));
        assert_eq!(AudioLocator::parse("   "), Err(LocatorError::Empty));
        assert_eq!(
            AudioLocator::parse("ftp://host/a.wav"),
            Err(LocatorError::UnsupportedScheme("ftp".to_string()))
        );
        assert_eq!(AudioLocator::parse("https://"), Err(LocatorError::MissingTarget));
        assert_eq!(
            AudioLocator::parse("https://host/a b.wav"),
            Err(LocatorError::InvalidCharacters)
        );
    }

    #[test]
    fn test_locator_local_path() {
        let remote = AudioLocator::parse("https://host/a.wav").unwrap();
        assert_eq!(remote.local_path(), None);

        let file = AudioLocator::parse("file:///srv/a.wav").unwrap();
        assert_eq!(file.local_path(), Some(PathBuf::from("/srv/a.wav")));

        let bare = AudioLocator::parse("audio/a.wav").unwrap();
        assert_eq!(bare.local_path(), Some(PathBuf::from("audio/a.wav")));
    }

    #[test]
    fn test_terminal_statuses() {
        assert!(PoiStatus::Played.is_terminal());
        assert!(PoiStatus::Error.is_terminal());
        assert!(!PoiStatus::Idle.is_terminal());
        assert!(!PoiStatus::Approaching.is_terminal());
        assert!(!PoiStatus::Playing.is_terminal());
    }

    #[test]
    fn test_coordinates_validity() {
        assert!(Coordinates::new(-22.97, -45.54).is_valid());
        assert!(!Coordinates::new(91.0, 0.0).is_valid());
        assert!(!Coordinates::new(0.0, -180.5).is_valid());
        assert!(!Coordinates::new(f64::NAN, 0.0).is_valid());
    }
}
