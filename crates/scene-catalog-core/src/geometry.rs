//! Geometry adapter.
//!
//! Converts between the public GeoJSON [`Geometry`](crate::models::Geometry)
//! and `geo-types` geometries, and exposes the handful of predicates and
//! operations the catalog needs. All real geometry work is delegated to the
//! `geo` crate.
//!
//! Boolean operations run inside `catch_unwind`: a panic from the overlay
//! engine on a degenerate input is reported as `None` so one bad tile cannot
//! take down a sub-index build.

use std::panic::{catch_unwind, AssertUnwindSafe};

use geo::{BooleanOps, BoundingRect, Intersects, Relate};
use geo_types::{
    Coord, Geometry as GeoGeometry, GeometryCollection, LineString, MultiLineString, MultiPoint,
    MultiPolygon, Point, Polygon,
};

use crate::error::{CatalogError, Result};
use crate::models::{BBox, Geometry, Position};

fn coord(p: &Position) -> Result<Coord<f64>> {
    match p.as_slice() {
        [x, y, ..] if x.is_finite() && y.is_finite() => Ok(Coord { x: *x, y: *y }),
        _ => Err(CatalogError::invalid(format!("invalid position: {:?}", p))),
    }
}

fn line(points: &[Position]) -> Result<LineString<f64>> {
    points
        .iter()
        .map(coord)
        .collect::<Result<Vec<_>>>()
        .map(LineString::new)
}

fn polygon(rings: &[Vec<Position>]) -> Result<Polygon<f64>> {
    let (exterior, interiors) = rings
        .split_first()
        .ok_or_else(|| CatalogError::invalid("polygon has no rings"))?;
    if exterior.len() < 3 {
        return Err(CatalogError::invalid("polygon exterior needs at least 3 positions"));
    }
    let interiors = interiors.iter().map(|r| line(r)).collect::<Result<Vec<_>>>()?;
    Ok(Polygon::new(line(exterior)?, interiors))
}

/// GeoJSON → `geo-types`.
pub fn to_geo(g: &Geometry) -> Result<GeoGeometry<f64>> {
    Ok(match g {
        Geometry::Point { coordinates } => GeoGeometry::Point(Point(coord(coordinates)?)),
        Geometry::MultiPoint { coordinates } => GeoGeometry::MultiPoint(MultiPoint::new(
            coordinates
                .iter()
                .map(|p| coord(p).map(Point))
                .collect::<Result<Vec<_>>>()?,
        )),
        Geometry::LineString { coordinates } => GeoGeometry::LineString(line(coordinates)?),
        Geometry::MultiLineString { coordinates } => GeoGeometry::MultiLineString(
            MultiLineString::new(coordinates.iter().map(|l| line(l)).collect::<Result<Vec<_>>>()?),
        ),
        Geometry::Polygon { coordinates } => GeoGeometry::Polygon(polygon(coordinates)?),
        Geometry::MultiPolygon { coordinates } => GeoGeometry::MultiPolygon(MultiPolygon::new(
            coordinates.iter().map(|p| polygon(p)).collect::<Result<Vec<_>>>()?,
        )),
        Geometry::GeometryCollection { geometries } => {
            GeoGeometry::GeometryCollection(GeometryCollection::new_from(
                geometries.iter().map(to_geo).collect::<Result<Vec<_>>>()?,
            ))
        }
    })
}

fn position(c: &Coord<f64>) -> Position {
    vec![c.x, c.y]
}

fn positions(l: &LineString<f64>) -> Vec<Position> {
    l.coords().map(position).collect()
}

fn rings(p: &Polygon<f64>) -> Vec<Vec<Position>> {
    std::iter::once(p.exterior())
        .chain(p.interiors().iter())
        .map(positions)
        .collect()
}

/// `geo-types` → GeoJSON.
pub fn from_geo(g: &GeoGeometry<f64>) -> Geometry {
    match g {
        GeoGeometry::Point(p) => Geometry::Point {
            coordinates: position(&p.0),
        },
        GeoGeometry::Line(l) => Geometry::LineString {
            coordinates: vec![position(&l.start), position(&l.end)],
        },
        GeoGeometry::LineString(l) => Geometry::LineString {
            coordinates: positions(l),
        },
        GeoGeometry::Polygon(p) => Geometry::Polygon {
            coordinates: rings(p),
        },
        GeoGeometry::MultiPoint(mp) => Geometry::MultiPoint {
            coordinates: mp.0.iter().map(|p| position(&p.0)).collect(),
        },
        GeoGeometry::MultiLineString(ml) => Geometry::MultiLineString {
            coordinates: ml.0.iter().map(positions).collect(),
        },
        GeoGeometry::MultiPolygon(mp) => Geometry::MultiPolygon {
            coordinates: mp.0.iter().map(rings).collect(),
        },
        GeoGeometry::GeometryCollection(gc) => Geometry::GeometryCollection {
            geometries: gc.0.iter().map(from_geo).collect(),
        },
        GeoGeometry::Rect(r) => Geometry::Polygon {
            coordinates: rings(&r.to_polygon()),
        },
        GeoGeometry::Triangle(t) => Geometry::Polygon {
            coordinates: rings(&t.to_polygon()),
        },
    }
}

/// A multipolygon rendered as a polygon when it has exactly one member.
pub fn from_multipolygon(mp: &MultiPolygon<f64>) -> Geometry {
    match mp.0.as_slice() {
        [single] => from_geo(&GeoGeometry::Polygon(single.clone())),
        _ => from_geo(&GeoGeometry::MultiPolygon(mp.clone())),
    }
}

pub fn intersects(a: &GeoGeometry<f64>, b: &GeoGeometry<f64>) -> bool {
    a.intersects(b)
}

/// True when `a` contains `b` (DE-9IM "contains").
pub fn contains(a: &GeoGeometry<f64>, b: &GeoGeometry<f64>) -> bool {
    a.relate(b).is_contains()
}

/// Union of two polygonal geometries; `None` when the overlay engine fails.
pub fn union(a: &MultiPolygon<f64>, b: &MultiPolygon<f64>) -> Option<MultiPolygon<f64>> {
    catch_unwind(AssertUnwindSafe(|| a.union(b))).ok()
}

/// Union of a list of polygonal geometries.
pub fn union_all(parts: &[MultiPolygon<f64>]) -> Option<MultiPolygon<f64>> {
    let mut iter = parts.iter();
    let first = iter.next()?.clone();
    iter.try_fold(first, |acc, next| union(&acc, next))
}

/// Re-normalize each polygon on its own (self-union resolves
/// self-intersections), then union the cleaned parts.
pub fn heal(parts: &[MultiPolygon<f64>]) -> Option<MultiPolygon<f64>> {
    let empty = MultiPolygon::<f64>::new(Vec::new());
    let cleaned = parts
        .iter()
        .flat_map(|mp| mp.0.iter())
        .map(|p| union(&MultiPolygon::new(vec![p.clone()]), &empty))
        .collect::<Option<Vec<_>>>()?;
    union_all(&cleaned)
}

/// Polygonal content of a geometry; points and lines are dropped.
pub fn polygonal(g: &GeoGeometry<f64>) -> MultiPolygon<f64> {
    match g {
        GeoGeometry::Polygon(p) => MultiPolygon::new(vec![p.clone()]),
        GeoGeometry::MultiPolygon(mp) => mp.clone(),
        GeoGeometry::Rect(r) => MultiPolygon::new(vec![r.to_polygon()]),
        GeoGeometry::Triangle(t) => MultiPolygon::new(vec![t.to_polygon()]),
        GeoGeometry::GeometryCollection(gc) => {
            MultiPolygon::new(gc.0.iter().flat_map(|g| polygonal(g).0).collect())
        }
        _ => MultiPolygon::new(Vec::new()),
    }
}

/// Closed polygon from an exterior ring of `(lon, lat)` pairs.
pub fn polygon_from_ring(ring: &[(f64, f64)]) -> Result<Polygon<f64>> {
    if ring.len() < 3 {
        return Err(CatalogError::invalid("a ring needs at least 3 coordinates"));
    }
    let coords: Vec<Coord<f64>> = ring.iter().map(|&(x, y)| Coord { x, y }).collect();
    Ok(Polygon::new(LineString::new(coords), Vec::new()))
}

/// Envelope of a `geo-types` geometry.
pub fn envelope_of(g: &GeoGeometry<f64>) -> Option<BBox> {
    let rect = g.bounding_rect()?;
    Some(BBox::new(rect.min().x, rect.min().y, rect.max().x, rect.max().y))
}

/// Envelope of a GeoJSON geometry.
pub fn envelope(g: &Geometry) -> Result<Option<BBox>> {
    Ok(envelope_of(&to_geo(g)?))
}

/// Center of a bbox as a point.
pub fn centroid(bbox: &BBox) -> Point<f64> {
    let (x, y) = bbox.centroid();
    Point::new(x, y)
}
