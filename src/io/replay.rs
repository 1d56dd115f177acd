//! Replay location source - walks recorded as JSONL
//!
//! One fix per line:
//! `{"lat": -22.9717, "lon": -45.5445, "acc": 5.0, "ts": 1767617600000}`
//! `ts` may be epoch milliseconds or an RFC 3339 string; when absent the fix
//! is stamped with the wall clock at emission. Blank lines and lines starting
//! with `#` are skipped.

use crate::domain::types::{epoch_ms, Coordinates, LocationSnapshot};
use crate::io::location::{LocationError, LocationSource};
use anyhow::Context;
use async_trait::async_trait;
use serde::Deserialize;
use std::fs;
use std::path::Path;
use std::time::Duration;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;
use tokio::time::Instant;
use tracing::info;

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ReplayTimestamp {
    EpochMs(u64),
    Rfc3339(String),
}

#[derive(Debug, Deserialize)]
struct ReplayLine {
    lat: f64,
    lon: f64,
    #[serde(default)]
    acc: Option<f64>,
    #[serde(default)]
    alt: Option<f64>,
    #[serde(default)]
    heading: Option<f64>,
    #[serde(default)]
    speed: Option<f64>,
    #[serde(default)]
    ts: Option<ReplayTimestamp>,
}

/// Parse RFC 3339 timestamp to epoch milliseconds
fn parse_rfc3339_ms(value: &str) -> Option<u64> {
    OffsetDateTime::parse(value, &Rfc3339)
        .ok()
        .map(|dt| (dt.unix_timestamp_nanos() / 1_000_000) as u64)
}

/// A recorded fix; fixes without a timestamp are stamped when emitted
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RecordedFix {
    pub coords: Coordinates,
    pub timestamp_ms: Option<u64>,
}

impl RecordedFix {
    pub fn unstamped(coords: Coordinates) -> Self {
        Self { coords, timestamp_ms: None }
    }
}

impl From<LocationSnapshot> for RecordedFix {
    fn from(snapshot: LocationSnapshot) -> Self {
        Self { coords: snapshot.coords, timestamp_ms: Some(snapshot.timestamp_ms) }
    }
}

fn parse_line(line: &str) -> anyhow::Result<RecordedFix> {
    let raw: ReplayLine = serde_json::from_str(line)?;
    let coords = Coordinates {
        latitude: raw.lat,
        longitude: raw.lon,
        accuracy: raw.acc,
        altitude: raw.alt,
        altitude_accuracy: None,
        heading: raw.heading,
        speed: raw.speed,
    };
    if !coords.is_valid() {
        anyhow::bail!("coordinates out of range ({}, {})", raw.lat, raw.lon);
    }

    let timestamp_ms = match raw.ts {
        None => None,
        Some(ReplayTimestamp::EpochMs(ms)) => Some(ms),
        Some(ReplayTimestamp::Rfc3339(s)) => Some(
            parse_rfc3339_ms(&s).with_context(|| format!("invalid RFC 3339 timestamp `{s}`"))?,
        ),
    };

    Ok(RecordedFix { coords, timestamp_ms })
}

/// Parse a JSONL walk
pub fn parse_walk(content: &str) -> anyhow::Result<Vec<RecordedFix>> {
    let mut fixes = Vec::new();
    for (number, line) in content.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let fix = parse_line(line).with_context(|| format!("line {}", number + 1))?;
        fixes.push(fix);
    }
    Ok(fixes)
}

/// Emits recorded fixes one per interval; the first fix of a session is immediate
pub struct ReplaySource {
    fixes: Vec<RecordedFix>,
    next: usize,
    interval: Duration,
    last_emit: Option<Instant>,
}

impl ReplaySource {
    pub fn from_fixes(fixes: Vec<RecordedFix>, interval: Duration) -> Self {
        Self { fixes, next: 0, interval, last_emit: None }
    }

    pub fn from_file<P: AsRef<Path>>(path: P, interval: Duration) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read replay file {}", path.display()))?;
        let fixes = parse_walk(&content)
            .with_context(|| format!("Failed to parse replay file {}", path.display()))?;

        info!(replay_file = %path.display(), fixes = %fixes.len(), "replay_loaded");
        Ok(Self::from_fixes(fixes, interval))
    }

    pub fn remaining(&self) -> usize {
        self.fixes.len() - self.next
    }
}

#[async_trait]
impl LocationSource for ReplaySource {
    fn name(&self) -> &'static str {
        "replay"
    }

    async fn next_fix(&mut self) -> Result<LocationSnapshot, LocationError> {
        let Some(fix) = self.fixes.get(self.next).copied() else {
            return Err(LocationError::PositionUnavailable("replay exhausted".to_string()));
        };

        if let Some(last) = self.last_emit {
            tokio::time::sleep_until(last + self.interval).await;
        }

        self.next += 1;
        self.last_emit = Some(Instant::now());
        Ok(LocationSnapshot::new(fix.coords, fix.timestamp_ms.unwrap_or_else(epoch_ms)))
    }
}
