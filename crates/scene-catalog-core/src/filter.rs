//! Discovery filter engine.
//!
//! A [`QueryFilter`] is parsed once from a query feature and then applied to
//! each candidate scene. Predicates run in a fixed order and stop at the
//! first failure:
//!
//! 1. cloud cover ≤ query
//! 2. bit depth ≥ query
//! 3. beachfront score ≥ query
//! 4. acquired on or after `acquiredDate`
//! 5. acquired on or before `maxAcquiredDate`
//! 6. query bands ⊆ scene bands
//! 7. sensor name, file format (case-insensitive equality), resolution and
//!    file size (scene ≤ query)
//! 8. bbox overlap
//! 9. sub-index membership
//! 10. exact polygon intersection (rigorous queries only)
//!
//! A property missing on either side satisfies its predicate. On the query
//! side a `0` for cloud cover, bit depth, or beachfront score means "not
//! set". Only membership touches the store; everything else is pure.

use chrono::{DateTime, Utc};
use geo_types::Geometry as GeoGeometry;
use tracing::warn;

use crate::error::{CatalogError, Result};
use crate::geometry;
use crate::kv::KvStore;
use crate::member::Member;
use crate::models::{props, parse_instant, BBox, Feature, Geometry};

/// Parsed discovery constraints.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryFilter {
    pub cloud_cover: Option<f64>,
    pub bit_depth: Option<i64>,
    pub beachfront_score: Option<f64>,
    pub acquired_from: Option<DateTime<Utc>>,
    pub acquired_to: Option<DateTime<Utc>>,
    pub bands: Vec<String>,
    pub sensor_name: Option<String>,
    pub file_format: Option<String>,
    pub resolution: Option<f64>,
    pub file_size: Option<f64>,
    pub bbox: Option<BBox>,
    /// Sub-index name as given in the query.
    pub sub_index_name: Option<String>,
    /// Sorted-set key the name resolved to.
    pub sub_index_key: Option<String>,
    pub rigorous: bool,
    pub geometry: Option<GeoGeometry<f64>>,
}

fn date_bound(query: &Feature, key: &str) -> Result<Option<DateTime<Utc>>> {
    match query.text(key) {
        None => Ok(None),
        Some(s) if s.trim().is_empty() => Ok(None),
        Some(s) => parse_instant(s)
            .map(Some)
            .ok_or_else(|| CatalogError::invalid(format!("{} is not RFC3339: {}", key, s))),
    }
}

fn non_empty(query: &Feature, key: &str) -> Option<String> {
    query
        .text(key)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

impl QueryFilter {
    /// Parse a query feature. `rigorous` also honors a `rigorous: true`
    /// property on the feature itself.
    pub fn from_query(query: &Feature, rigorous: bool) -> Result<Self> {
        let bbox = query.bbox;
        if let Some(b) = &bbox {
            if b.crosses_antimeridian() {
                return Err(CatalogError::invalid(
                    "bbox crosses the antimeridian; split it into two queries",
                ));
            }
        }
        let rigorous = rigorous || query.flag(props::RIGOROUS);
        let geometry = if rigorous {
            match (&query.geometry, &bbox) {
                (Some(g), _) => Some(geometry::to_geo(g)?),
                (None, Some(b)) => Some(geometry::to_geo(&Geometry::from_bbox(b))?),
                (None, None) => None,
            }
        } else {
            None
        };

        Ok(Self {
            cloud_cover: query.number(props::CLOUD_COVER).filter(|c| *c > 0.0),
            bit_depth: query.integer(props::BIT_DEPTH).filter(|b| *b != 0),
            beachfront_score: query
                .number(props::BEACHFRONT_SCORE)
                .filter(|s| s.is_finite() && *s != 0.0),
            acquired_from: date_bound(query, props::ACQUIRED_DATE)?,
            acquired_to: date_bound(query, props::MAX_ACQUIRED_DATE)?,
            bands: query.band_names(),
            sensor_name: non_empty(query, props::SENSOR_NAME),
            file_format: non_empty(query, props::FILE_FORMAT),
            resolution: query.number(props::RESOLUTION).filter(|r| *r > 0.0),
            file_size: query.number(props::FILE_SIZE).filter(|s| *s > 0.0),
            bbox,
            sub_index_name: non_empty(query, props::SUB_INDEX),
            sub_index_key: None,
            rigorous,
            geometry,
        })
    }

    /// Cheap test using only the index member string.
    pub fn prefilter(&self, member: &Member) -> bool {
        if let (Some(max), Some(cc)) = (self.cloud_cover, member.cloud_cover) {
            if cc.is_finite() && cc > max {
                return false;
            }
        }
        if let (Some(q), Some(b)) = (&self.bbox, &member.bbox) {
            if !q.overlaps(b) {
                return false;
            }
        }
        true
    }

    /// Attribute and bbox predicates; no store access.
    pub fn matches_attributes(&self, scene: &Feature) -> bool {
        if let (Some(max), Some(cc)) = (self.cloud_cover, scene.cloud_cover()) {
            if cc > max {
                return false;
            }
        }
        if let (Some(min), Some(depth)) = (self.bit_depth, scene.integer(props::BIT_DEPTH)) {
            if depth < min {
                return false;
            }
        }
        if let (Some(min), Some(s)) = (
            self.beachfront_score,
            scene.number(props::BEACHFRONT_SCORE),
        ) {
            if s.is_finite() && s < min {
                return false;
            }
        }
        let acquired = scene.acquired_date();
        if let (Some(from), Some(at)) = (self.acquired_from, acquired) {
            if at < from {
                return false;
            }
        }
        if let (Some(to), Some(at)) = (self.acquired_to, acquired) {
            if at > to {
                return false;
            }
        }
        if !self.bands.is_empty() && scene.properties.contains_key(props::BANDS) {
            let have = scene.band_names();
            if !self.bands.iter().all(|b| have.contains(b)) {
                return false;
            }
        }
        if let (Some(want), Some(have)) = (&self.sensor_name, scene.text(props::SENSOR_NAME)) {
            if !want.eq_ignore_ascii_case(have) {
                return false;
            }
        }
        if let (Some(want), Some(have)) = (&self.file_format, scene.text(props::FILE_FORMAT)) {
            if !want.eq_ignore_ascii_case(have) {
                return false;
            }
        }
        if let (Some(max), Some(r)) = (self.resolution, scene.number(props::RESOLUTION)) {
            if r > max {
                return false;
            }
        }
        if let (Some(max), Some(size)) = (self.file_size, scene.number(props::FILE_SIZE)) {
            if size > max {
                return false;
            }
        }
        if let (Some(q), Some(b)) = (&self.bbox, &scene.bbox) {
            if !q.overlaps(b) {
                return false;
            }
        }
        true
    }

    fn matches_geometry(&self, scene: &Feature) -> bool {
        let (Some(query_geom), Some(scene_geom)) = (&self.geometry, &scene.geometry) else {
            return true;
        };
        match geometry::to_geo(scene_geom) {
            Ok(g) => geometry::intersects(query_geom, &g),
            Err(e) => {
                warn!(id = %scene.id, error = %e, "skipping scene with unusable geometry");
                false
            }
        }
    }

    /// Full evaluation. `member` is the scene's encoded index member.
    pub async fn passes(&self, kv: &dyn KvStore, scene: &Feature, member: &str) -> Result<bool> {
        if !self.matches_attributes(scene) {
            return Ok(false);
        }
        if let Some(key) = &self.sub_index_key {
            if kv.zscore(key, member).await?.is_none() {
                return Ok(false);
            }
        }
        if self.rigorous && !self.matches_geometry(scene) {
            return Ok(false);
        }
        Ok(true)
    }
}
