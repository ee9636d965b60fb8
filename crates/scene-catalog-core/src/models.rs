//! Core data models for Scene Catalog.
//!
//! Scenes are GeoJSON features. The catalog only needs a small, strict
//! subset of GeoJSON: geometries in WGS84 lon/lat, an optional envelope, and
//! an open property map. Field order on [`Feature`] is part of the cache
//! contract: the canonical JSON of an empty query feature is exactly
//! `{"type":"Feature","geometry":null}`.
//!
//! # Property keys
//!
//! | Key | Type | Meaning |
//! |-----|------|---------|
//! | `acquiredDate` | RFC3339 string | Acquisition instant (UTC) |
//! | `cloudCover` | number, 0–100 | Percent cloud cover |
//! | `bitDepth` | integer | Radiometric depth |
//! | `beachfrontScore` | number | Coastline suitability; higher is better |
//! | `sensorName` | string | Sensor or platform |
//! | `bands` | array or object | Band names, or band name → asset URL |
//! | `resolution` | number | Ground sample distance in meters |
//! | `fileFormat`, `fileSize`, `path`, `thumbnail` | | Asset metadata |

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::de::{self, Deserializer, SeqAccess, Visitor};
use serde::ser::{SerializeSeq, Serializer};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{CatalogError, Result};

/// Recognized property keys.
pub mod props {
    pub const ACQUIRED_DATE: &str = "acquiredDate";
    pub const MAX_ACQUIRED_DATE: &str = "maxAcquiredDate";
    pub const CLOUD_COVER: &str = "cloudCover";
    pub const BIT_DEPTH: &str = "bitDepth";
    pub const BEACHFRONT_SCORE: &str = "beachfrontScore";
    pub const SENSOR_NAME: &str = "sensorName";
    pub const BANDS: &str = "bands";
    pub const RESOLUTION: &str = "resolution";
    pub const FILE_FORMAT: &str = "fileFormat";
    pub const FILE_SIZE: &str = "fileSize";
    pub const PATH: &str = "path";
    pub const THUMBNAIL: &str = "thumbnail";
    pub const SUB_INDEX: &str = "subIndex";
    pub const RIGOROUS: &str = "rigorous";
}

pub const FEATURE: &str = "Feature";
pub const FEATURE_COLLECTION: &str = "FeatureCollection";

/// A GeoJSON position: `[lon, lat]` with optional trailing ordinates.
pub type Position = Vec<f64>;

/// Open property map. A `BTreeMap` keeps serialization canonical.
pub type Properties = BTreeMap<String, Value>;

/// A GeoJSON geometry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Geometry {
    Point { coordinates: Position },
    MultiPoint { coordinates: Vec<Position> },
    LineString { coordinates: Vec<Position> },
    MultiLineString { coordinates: Vec<Vec<Position>> },
    Polygon { coordinates: Vec<Vec<Position>> },
    MultiPolygon { coordinates: Vec<Vec<Vec<Position>>> },
    GeometryCollection { geometries: Vec<Geometry> },
}

impl Geometry {
    /// Closed rectangular polygon covering `bbox`.
    pub fn from_bbox(bbox: &BBox) -> Self {
        let ring = vec![
            vec![bbox.min_lon, bbox.min_lat],
            vec![bbox.max_lon, bbox.min_lat],
            vec![bbox.max_lon, bbox.max_lat],
            vec![bbox.min_lon, bbox.max_lat],
            vec![bbox.min_lon, bbox.min_lat],
        ];
        Geometry::Polygon {
            coordinates: vec![ring],
        }
    }
}

/// Axis-aligned lon/lat envelope, serialized as a GeoJSON bbox array
/// `[min_lon, min_lat, max_lon, max_lat]`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BBox {
    pub min_lon: f64,
    pub min_lat: f64,
    pub max_lon: f64,
    pub max_lat: f64,
}

impl BBox {
    pub fn new(min_lon: f64, min_lat: f64, max_lon: f64, max_lat: f64) -> Self {
        Self {
            min_lon,
            min_lat,
            max_lon,
            max_lat,
        }
    }

    /// The whole globe.
    pub fn world() -> Self {
        Self::new(-180.0, -90.0, 180.0, 90.0)
    }

    /// Parse the `minLon,minLat,maxLon,maxLat` query-string form.
    pub fn parse(s: &str) -> Result<Self> {
        let parts: Vec<f64> = s
            .split(',')
            .map(|p| p.trim().parse::<f64>())
            .collect::<std::result::Result<_, _>>()
            .map_err(|_| CatalogError::invalid(format!("bbox is not numeric: {}", s)))?;
        if parts.len() != 4 {
            return Err(CatalogError::invalid(format!(
                "bbox needs 4 values, got {}",
                parts.len()
            )));
        }
        if parts.iter().any(|v| !v.is_finite()) {
            return Err(CatalogError::invalid(format!("bbox is not finite: {}", s)));
        }
        Ok(Self::new(parts[0], parts[1], parts[2], parts[3]))
    }

    /// True when the box wraps across the 180° meridian.
    pub fn crosses_antimeridian(&self) -> bool {
        self.min_lon > self.max_lon
    }

    /// Closed-interval overlap test.
    pub fn overlaps(&self, other: &BBox) -> bool {
        self.min_lon <= other.max_lon
            && self.max_lon >= other.min_lon
            && self.min_lat <= other.max_lat
            && self.max_lat >= other.min_lat
    }

    /// Smallest box covering both.
    pub fn expand(&self, other: &BBox) -> BBox {
        BBox::new(
            self.min_lon.min(other.min_lon),
            self.min_lat.min(other.min_lat),
            self.max_lon.max(other.max_lon),
            self.max_lat.max(other.max_lat),
        )
    }

    /// Center point as `(lon, lat)`.
    pub fn centroid(&self) -> (f64, f64) {
        (
            (self.min_lon + self.max_lon) / 2.0,
            (self.min_lat + self.max_lat) / 2.0,
        )
    }
}

impl Serialize for BBox {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut seq = serializer.serialize_seq(Some(4))?;
        seq.serialize_element(&self.min_lon)?;
        seq.serialize_element(&self.min_lat)?;
        seq.serialize_element(&self.max_lon)?;
        seq.serialize_element(&self.max_lat)?;
        seq.end()
    }
}

impl<'de> Deserialize<'de> for BBox {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        struct BBoxVisitor;

        impl<'de> Visitor<'de> for BBoxVisitor {
            type Value = BBox;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a bbox array of 4 or 6 numbers")
            }

            fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> std::result::Result<BBox, A::Error> {
                let mut values = Vec::with_capacity(6);
                while let Some(v) = seq.next_element::<f64>()? {
                    values.push(v);
                }
                match values.len() {
                    4 => Ok(BBox::new(values[0], values[1], values[2], values[3])),
                    // 3D bbox: [minx, miny, minz, maxx, maxy, maxz]
                    6 => Ok(BBox::new(values[0], values[1], values[3], values[4])),
                    n => Err(de::Error::invalid_length(n, &self)),
                }
            }
        }

        deserializer.deserialize_seq(BBoxVisitor)
    }
}

fn feature_kind() -> String {
    FEATURE.to_string()
}

fn collection_kind() -> String {
    FEATURE_COLLECTION.to_string()
}

fn null_as_empty<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Properties, D::Error> {
    Ok(Option::<Properties>::deserialize(deserializer)?.unwrap_or_default())
}

fn string_or_number<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<String, D::Error> {
    match Option::<Value>::deserialize(deserializer)? {
        None | Some(Value::Null) => Ok(String::new()),
        Some(Value::String(s)) => Ok(s),
        Some(Value::Number(n)) => Ok(n.to_string()),
        Some(other) => Err(de::Error::custom(format!("feature id must be a string or number, got {}", other))),
    }
}

/// A GeoJSON feature: one scene, or one query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Feature {
    #[serde(rename = "type", default = "feature_kind")]
    pub kind: String,
    #[serde(default)]
    pub geometry: Option<Geometry>,
    #[serde(
        default,
        deserialize_with = "null_as_empty",
        skip_serializing_if = "BTreeMap::is_empty"
    )]
    pub properties: Properties,
    #[serde(
        default,
        deserialize_with = "string_or_number",
        skip_serializing_if = "String::is_empty"
    )]
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bbox: Option<BBox>,
}

impl Default for Feature {
    fn default() -> Self {
        Self {
            kind: feature_kind(),
            geometry: None,
            properties: Properties::new(),
            id: String::new(),
            bbox: None,
        }
    }
}

impl Feature {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Self::default()
        }
    }

    pub fn with_geometry(mut self, geometry: Geometry) -> Self {
        self.geometry = Some(geometry);
        self
    }

    pub fn with_bbox(mut self, bbox: BBox) -> Self {
        self.bbox = Some(bbox);
        self
    }

    pub fn with_property(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.set_property(key, value);
        self
    }

    pub fn set_property(&mut self, key: &str, value: impl Into<Value>) {
        self.properties.insert(key.to_string(), value.into());
    }

    /// Canonical JSON rendering. Deterministic for equal features.
    pub fn canonical_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Numeric property; numeric strings are accepted.
    pub fn number(&self, key: &str) -> Option<f64> {
        match self.properties.get(key)? {
            Value::Number(n) => n.as_f64(),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    pub fn integer(&self, key: &str) -> Option<i64> {
        match self.properties.get(key)? {
            Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    pub fn text(&self, key: &str) -> Option<&str> {
        self.properties.get(key)?.as_str()
    }

    pub fn flag(&self, key: &str) -> bool {
        match self.properties.get(key) {
            Some(Value::Bool(b)) => *b,
            Some(Value::String(s)) => s.eq_ignore_ascii_case("true"),
            _ => false,
        }
    }

    /// RFC3339 instant property, if present and parseable.
    pub fn instant(&self, key: &str) -> Option<DateTime<Utc>> {
        self.text(key).and_then(parse_instant)
    }

    pub fn acquired_date(&self) -> Option<DateTime<Utc>> {
        self.instant(props::ACQUIRED_DATE)
    }

    pub fn cloud_cover(&self) -> Option<f64> {
        self.number(props::CLOUD_COVER).filter(|c| c.is_finite())
    }

    /// Band names, whether `bands` is an array of names or a name → URL map.
    pub fn band_names(&self) -> Vec<String> {
        match self.properties.get(props::BANDS) {
            Some(Value::Array(items)) => items
                .iter()
                .filter_map(|v| v.as_str().map(str::to_string))
                .collect(),
            Some(Value::Object(map)) => map.keys().cloned().collect(),
            Some(Value::String(s)) => s
                .split(',')
                .map(str::trim)
                .filter(|b| !b.is_empty())
                .map(str::to_string)
                .collect(),
            _ => Vec::new(),
        }
    }

    /// Asset URL recorded for `band`, when `bands` is a name → URL map.
    pub fn band_url(&self, band: &str) -> Option<&str> {
        match self.properties.get(props::BANDS)? {
            Value::Object(map) => map.get(band)?.as_str(),
            _ => None,
        }
    }
}

/// A GeoJSON feature collection, as returned by a WFS.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureCollection {
    #[serde(rename = "type", default = "collection_kind")]
    pub kind: String,
    #[serde(default)]
    pub features: Vec<Feature>,
}

impl FeatureCollection {
    pub fn new(features: Vec<Feature>) -> Self {
        Self {
            kind: collection_kind(),
            features,
        }
    }
}

/// A page of discovery results, rendered as a feature collection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageDescriptors {
    #[serde(rename = "type", default = "collection_kind")]
    pub kind: String,
    #[serde(default)]
    pub features: Vec<Feature>,
    #[serde(default)]
    pub count: usize,
    #[serde(default)]
    pub start_index: usize,
    /// Size of the full filtered result; known only when it was materialized.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_count: Option<usize>,
}

impl ImageDescriptors {
    pub fn new(features: Vec<Feature>, start_index: usize, total_count: Option<usize>) -> Self {
        Self {
            kind: collection_kind(),
            count: features.len(),
            features,
            start_index,
            total_count,
        }
    }

    /// Inclusive rank slice `[min, max]` of a fully materialized collection.
    pub fn page(&self, min: usize, max: usize) -> ImageDescriptors {
        let total = self.features.len();
        let features = if min >= total || max < min {
            Vec::new()
        } else {
            let end = max.saturating_add(1).min(total);
            self.features[min..end].to_vec()
        };
        ImageDescriptors::new(features, min, Some(total))
    }

    pub fn render(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Parse an RFC3339 instant into UTC.
pub fn parse_instant(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s.trim())
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

/// Format an instant as RFC3339 UTC with a `Z` suffix.
pub fn format_instant(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Secs, true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_empty_feature_canonical_json() {
        let f = Feature::default();
        assert_eq!(
            f.canonical_json().unwrap(),
            r#"{"type":"Feature","geometry":null}"#
        );
    }

    #[test]
    fn test_numeric_id_and_null_properties() {
        let f: Feature = serde_json::from_value(json!({
            "type": "Feature",
            "id": 42,
            "geometry": null,
            "properties": null
        }))
        .unwrap();
        assert_eq!(f.id, "42");
        assert!(f.properties.is_empty());
    }

    #[test]
    fn test_bbox_serde_shape() {
        let b = BBox::new(-50.0, -45.0, -49.0, -44.0);
        assert_eq!(serde_json::to_string(&b).unwrap(), "[-50.0,-45.0,-49.0,-44.0]");
        let back: BBox = serde_json::from_str("[-50,-45,-49,-44]").unwrap();
        assert_eq!(back, b);
        let three_d: BBox = serde_json::from_str("[1,2,0,3,4,10]").unwrap();
        assert_eq!(three_d, BBox::new(1.0, 2.0, 3.0, 4.0));
    }

    #[test]
    fn test_bbox_parse_rejects_bad_input() {
        assert!(BBox::parse("1,2,3").is_err());
        assert!(BBox::parse("a,b,c,d").is_err());
        let b = BBox::parse(" -10, -5, 10, 5 ").unwrap();
        assert!(!b.crosses_antimeridian());
        assert!(BBox::parse("170,0,-170,10").unwrap().crosses_antimeridian());
    }

    #[test]
    fn test_band_names_from_array_and_object() {
        let arr = Feature::new("a").with_property("bands", json!(["red", "nir"]));
        assert_eq!(arr.band_names(), vec!["red", "nir"]);

        let obj = Feature::new("b").with_property(
            "bands",
            json!({"coastal": "https://x/B1.TIF", "red": "https://x/B4.TIF"}),
        );
        assert_eq!(obj.band_names(), vec!["coastal", "red"]);
        assert_eq!(obj.band_url("red"), Some("https://x/B4.TIF"));
        assert_eq!(arr.band_url("red"), None);
    }

    #[test]
    fn test_page_slices_inclusive() {
        let features: Vec<Feature> = (0..5).map(|i| Feature::new(i.to_string())).collect();
        let all = ImageDescriptors::new(features, 0, Some(5));
        let page = all.page(1, 2);
        assert_eq!(page.count, 2);
        assert_eq!(page.features[0].id, "1");
        assert_eq!(page.start_index, 1);
        assert_eq!(page.total_count, Some(5));
        assert!(all.page(7, 9).features.is_empty());
    }

    #[test]
    fn test_instant_roundtrip_utc() {
        let dt = parse_instant("2020-06-01T12:00:00+02:00").unwrap();
        assert_eq!(format_instant(&dt), "2020-06-01T10:00:00Z");
    }
}
