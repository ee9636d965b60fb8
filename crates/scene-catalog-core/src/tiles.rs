//! Tile maps: sub-index geometry bucketed into 1°×1° cells.
//!
//! Each feature of a WFS response is assigned to the cell containing the
//! lower-left corner of its envelope, and all polygons sharing a cell are
//! unioned into one geometry. A scene belongs to the sub-index when its
//! footprint intersects any tile.
//!
//! A built map is immutable. Rebuilding a sub-index constructs a fresh map
//! and swaps it into the [`TileRegistry`] in one step, so readers see either
//! the old map or the new one.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::{Arc, RwLock};

use geo_types::{Geometry as GeoGeometry, MultiPolygon};
use tracing::warn;

use crate::error::{CatalogError, Result};
use crate::geometry;
use crate::models::{BBox, Feature, FeatureCollection};

/// Cell index: `floor(lon) + 180` and `floor(lat) + 90`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TileKey {
    pub lon: u16,
    pub lat: u16,
}

impl TileKey {
    /// Cell holding the lower-left corner of `bbox`.
    pub fn from_bbox(bbox: &BBox) -> Self {
        let lon = (bbox.min_lon.floor() + 180.0).clamp(0.0, 359.0) as u16;
        let lat = (bbox.min_lat.floor() + 90.0).clamp(0.0, 179.0) as u16;
        Self { lon, lat }
    }

    pub fn parse(s: &str) -> Option<Self> {
        if s.len() != 6 || !s.is_ascii() {
            return None;
        }
        Some(Self {
            lon: s[..3].parse().ok()?,
            lat: s[3..].parse().ok()?,
        })
    }
}

impl fmt::Display for TileKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:03}{:03}", self.lon, self.lat)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Tile {
    pub geometry: MultiPolygon<f64>,
    pub bbox: BBox,
}

impl Tile {
    fn new(geometry: MultiPolygon<f64>) -> Option<Self> {
        let bbox = geometry::envelope_of(&GeoGeometry::MultiPolygon(geometry.clone()))?;
        Some(Self { geometry, bbox })
    }

    fn intersects(&self, bbox: Option<&BBox>, footprint: &GeoGeometry<f64>) -> bool {
        if let Some(b) = bbox {
            if !self.bbox.overlaps(b) {
                return false;
            }
        }
        geometry::intersects(&GeoGeometry::MultiPolygon(self.geometry.clone()), footprint)
    }
}

/// Immutable map from cell to unioned geometry.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TileMap {
    tiles: BTreeMap<TileKey, Tile>,
}

impl TileMap {
    /// Bucket and union the polygonal features of a collection.
    ///
    /// Features without usable polygon geometry are skipped. When a plain
    /// union of a cell fails, each polygon is re-normalized and the union is
    /// retried; a cell that still fails is dropped with a warning.
    pub fn build(features: &[Feature]) -> Self {
        let mut buckets: BTreeMap<TileKey, Vec<MultiPolygon<f64>>> = BTreeMap::new();
        for feature in features {
            let Some(g) = &feature.geometry else {
                continue;
            };
            let geo = match geometry::to_geo(g) {
                Ok(geo) => geo,
                Err(e) => {
                    warn!(id = %feature.id, error = %e, "skipping tile feature with bad geometry");
                    continue;
                }
            };
            let polygons = geometry::polygonal(&geo);
            if polygons.0.is_empty() {
                continue;
            }
            let Some(bbox) = geometry::envelope_of(&geo) else {
                continue;
            };
            buckets
                .entry(TileKey::from_bbox(&bbox))
                .or_default()
                .push(polygons);
        }

        let mut tiles = BTreeMap::new();
        for (key, parts) in buckets {
            let merged = geometry::union_all(&parts).or_else(|| {
                warn!(tile = %key, "union failed, healing tile geometry");
                geometry::heal(&parts)
            });
            match merged.and_then(Tile::new) {
                Some(tile) => {
                    tiles.insert(key, tile);
                }
                None => warn!(tile = %key, "dropping tile that could not be unioned"),
            }
        }
        Self { tiles }
    }

    pub fn len(&self) -> usize {
        self.tiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tiles.is_empty()
    }

    pub fn get(&self, key: &TileKey) -> Option<&Tile> {
        self.tiles.get(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &TileKey> {
        self.tiles.keys()
    }

    /// True when `footprint` intersects any tile. `bbox` is the footprint's
    /// envelope, used to skip tiles cheaply.
    pub fn intersects(&self, bbox: Option<&BBox>, footprint: &GeoGeometry<f64>) -> bool {
        self.tiles.values().any(|t| t.intersects(bbox, footprint))
    }

    /// True when the scene's geometry (or, lacking one, its bbox) intersects
    /// any tile. Scenes with neither never match.
    pub fn matches(&self, scene: &Feature) -> Result<bool> {
        let footprint = match (&scene.geometry, &scene.bbox) {
            (Some(g), _) => geometry::to_geo(g)?,
            (None, Some(b)) => geometry::to_geo(&crate::models::Geometry::from_bbox(b))?,
            (None, None) => return Ok(false),
        };
        let bbox = scene.bbox.or_else(|| geometry::envelope_of(&footprint));
        Ok(self.intersects(bbox.as_ref(), &footprint))
    }

    /// Persistable form: one feature per tile, id = tile key.
    pub fn to_collection(&self) -> FeatureCollection {
        FeatureCollection::new(
            self.tiles
                .iter()
                .map(|(key, tile)| {
                    Feature::new(key.to_string())
                        .with_geometry(geometry::from_multipolygon(&tile.geometry))
                        .with_bbox(tile.bbox)
                })
                .collect(),
        )
    }

    /// Inverse of [`to_collection`](Self::to_collection).
    pub fn from_collection(fc: &FeatureCollection) -> Result<Self> {
        let mut tiles = BTreeMap::new();
        for f in &fc.features {
            let key = TileKey::parse(&f.id)
                .ok_or_else(|| CatalogError::internal(format!("bad tile key: {}", f.id)))?;
            let Some(g) = &f.geometry else {
                continue;
            };
            let mp = geometry::polygonal(&geometry::to_geo(g)?);
            if let Some(tile) = Tile::new(mp) {
                tiles.insert(key, tile);
            }
        }
        Ok(Self { tiles })
    }
}

/// Live tile maps keyed by sub-index key.
#[derive(Debug, Default)]
pub struct TileRegistry {
    maps: RwLock<HashMap<String, Arc<TileMap>>>,
}

impl TileRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, subindex_key: &str) -> Option<Arc<TileMap>> {
        self.maps
            .read()
            .ok()
            .and_then(|m| m.get(subindex_key).cloned())
    }

    /// Swap in a freshly built map.
    pub fn replace(&self, subindex_key: &str, map: TileMap) -> Arc<TileMap> {
        let map = Arc::new(map);
        if let Ok(mut maps) = self.maps.write() {
            maps.insert(subindex_key.to_string(), map.clone());
        }
        map
    }

    pub fn remove(&self, subindex_key: &str) -> Option<Arc<TileMap>> {
        self.maps.write().ok()?.remove(subindex_key)
    }
}
