//! POI registry - the single owner of every POI and its live status
//!
//! Geometry and metadata are fixed once loaded; only status changes, and
//! only through `set_status`. The whole set can be swapped atomically on reset.

use crate::domain::types::{AudioLocator, Coordinates, LocatorError, Poi, PoiId, PoiStatus};
use crate::infra::config::PoiConfig;
use rustc_hash::FxHashMap;
use tracing::debug;

/// Configuration errors detected while loading POIs
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RegistryError {
    #[error("POI id must not be empty")]
    EmptyId,
    #[error("duplicate POI id `{0}`")]
    DuplicateId(PoiId),
    #[error("POI `{id}` has non-positive trigger radius {radius_m}")]
    InvalidRadius { id: PoiId, radius_m: f64 },
    #[error("POI `{id}` has invalid coordinates ({latitude}, {longitude})")]
    InvalidCoordinates { id: PoiId, latitude: f64, longitude: f64 },
    #[error("POI `{id}` has malformed audio locator: {source}")]
    MalformedLocator {
        id: PoiId,
        #[source]
        source: LocatorError,
    },
}

/// Build a POI from its `[[pois]]` table
pub fn poi_from_config(config: &PoiConfig) -> Result<Poi, RegistryError> {
    let audio = AudioLocator::parse(&config.audio_src).map_err(|source| {
        RegistryError::MalformedLocator { id: PoiId(config.id.clone()), source }
    })?;

    Ok(Poi::new(
        config.id.clone(),
        config.name.clone(),
        audio,
        Coordinates::new(config.latitude, config.longitude),
        config.trigger_radius_m,
    )
    .with_description(config.description.clone()))
}

fn validate(pois: &[Poi]) -> Result<FxHashMap<PoiId, usize>, RegistryError> {
    let mut index = FxHashMap::default();
    for (i, poi) in pois.iter().enumerate() {
        if poi.id.0.trim().is_empty() {
            return Err(RegistryError::EmptyId);
        }
        if !poi.trigger_radius_m.is_finite() || poi.trigger_radius_m <= 0.0 {
            return Err(RegistryError::InvalidRadius {
                id: poi.id.clone(),
                radius_m: poi.trigger_radius_m,
            });
        }
        if !poi.coordinates.is_valid() {
            return Err(RegistryError::InvalidCoordinates {
                id: poi.id.clone(),
                latitude: poi.coordinates.latitude,
                longitude: poi.coordinates.longitude,
            });
        }
        if index.insert(poi.id.clone(), i).is_some() {
            return Err(RegistryError::DuplicateId(poi.id.clone()));
        }
    }
    Ok(index)
}

/// Ordered POI store with identity-keyed lookup
#[derive(Debug, Clone)]
pub struct PoiRegistry {
    pois: Vec<Poi>,
    index: FxHashMap<PoiId, usize>,
    /// Incremented on every effective status write and on replacement
    revision: u64,
}

impl PoiRegistry {
    /// Create a registry, rejecting the whole set on any invalid POI
    pub fn new(pois: Vec<Poi>) -> Result<Self, RegistryError> {
        let index = validate(&pois)?;
        Ok(Self { pois, index, revision: 0 })
    }

    pub fn from_config(configs: &[PoiConfig]) -> Result<Self, RegistryError> {
        let pois = configs.iter().map(poi_from_config).collect::<Result<Vec<_>, _>>()?;
        Self::new(pois)
    }

    /// Replace the full set; the current set is kept if the new one is invalid
    pub fn replace_all(&mut self, pois: Vec<Poi>) -> Result<(), RegistryError> {
        let index = validate(&pois)?;
        self.pois = pois;
        self.index = index;
        self.revision += 1;
        debug!(pois = %self.pois.len(), revision = %self.revision, "registry_replaced");
        Ok(())
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.pois.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.pois.is_empty()
    }

    /// POIs in configuration order
    pub fn iter(&self) -> impl Iterator<Item = &Poi> {
        self.pois.iter()
    }

    pub fn get(&self, id: &PoiId) -> Option<&Poi> {
        self.index.get(id).map(|&i| &self.pois[i])
    }

    #[inline]
    pub fn index_of(&self, id: &PoiId) -> Option<usize> {
        self.index.get(id).copied()
    }

    #[inline]
    pub fn get_at(&self, index: usize) -> Option<&Poi> {
        self.pois.get(index)
    }

    pub fn status(&self, id: &PoiId) -> Option<PoiStatus> {
        self.get(id).map(|p| p.status)
    }

    /// Replace the status of one POI. Returns true if it actually changed.
    pub fn set_status(&mut self, id: &PoiId, status: PoiStatus) -> bool {
        match self.index_of(id) {
            Some(i) => self.set_status_at(i, status),
            None => false,
        }
    }

    /// Positional variant of `set_status` for callers already holding an index
    pub fn set_status_at(&mut self, index: usize, status: PoiStatus) -> bool {
        let Some(poi) = self.pois.get_mut(index) else {
            return false;
        };
        if poi.status == status {
            return false;
        }
        poi.status = status;
        self.revision += 1;
        true
    }

    #[inline]
    pub fn revision(&self) -> u64 {
        self.revision
    }

    /// Number of POIs currently `playing` (never more than one)
    pub fn playing_count(&self) -> usize {
        self.pois.iter().filter(|p| p.status == PoiStatus::Playing).count()
    }
}
