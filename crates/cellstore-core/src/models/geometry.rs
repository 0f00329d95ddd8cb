//! Canonical geometry types used across all cellstore crates.
//!
//! These types provide a bridge between GeoJSON serialization and the
//! computational geo crate types.

use serde::{Deserialize, Serialize};

use crate::error::{CellstoreError, Result};

/// Geometry type classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum GeometryType {
    #[default]
    Point,
    LineString,
    Polygon,
    MultiPoint,
    MultiLineString,
    MultiPolygon,
}

/// GeoJSON-compatible geometry representation
///
/// This enum directly maps to GeoJSON geometry types with coordinate arrays.
/// It can be serialized/deserialized as GeoJSON and converted to/from `geo` crate types.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Geometry {
    Point {
        coordinates: [f64; 2],
    },
    LineString {
        coordinates: Vec<[f64; 2]>,
    },
    Polygon {
        coordinates: Vec<Vec<[f64; 2]>>,
    },
    MultiPoint {
        coordinates: Vec<[f64; 2]>,
    },
    MultiLineString {
        coordinates: Vec<Vec<[f64; 2]>>,
    },
    MultiPolygon {
        coordinates: Vec<Vec<Vec<[f64; 2]>>>,
    },
}

impl Geometry {
    /// Create a Point geometry
    pub fn point(x: f64, y: f64) -> Self {
        Geometry::Point { coordinates: [x, y] }
    }

    /// Create a LineString geometry
    pub fn line_string(coords: Vec<[f64; 2]>) -> Self {
        Geometry::LineString { coordinates: coords }
    }

    /// Create a Polygon geometry
    pub fn polygon(rings: Vec<Vec<[f64; 2]>>) -> Self {
        Geometry::Polygon { coordinates: rings }
    }

    /// Create a MultiPolygon geometry
    pub fn multi_polygon(polygons: Vec<Vec<Vec<[f64; 2]>>>) -> Self {
        Geometry::MultiPolygon { coordinates: polygons }
    }

    /// Get the geometry type
    pub fn geometry_type(&self) -> GeometryType {
        match self {
            Geometry::Point { .. } => GeometryType::Point,
            Geometry::LineString { .. } => GeometryType::LineString,
            Geometry::Polygon { .. } => GeometryType::Polygon,
            Geometry::MultiPoint { .. } => GeometryType::MultiPoint,
            Geometry::MultiLineString { .. } => GeometryType::MultiLineString,
            Geometry::MultiPolygon { .. } => GeometryType::MultiPolygon,
        }
    }

    /// Visit every coordinate of the geometry
    pub fn for_each_coord(&self, mut f: impl FnMut([f64; 2])) {
        match self {
            Geometry::Point { coordinates } => f(*coordinates),
            Geometry::LineString { coordinates } | Geometry::MultiPoint { coordinates } => {
                coordinates.iter().copied().for_each(f)
            }
            Geometry::Polygon { coordinates } | Geometry::MultiLineString { coordinates } => {
                coordinates.iter().flatten().copied().for_each(f)
            }
            Geometry::MultiPolygon { coordinates } => {
                coordinates.iter().flatten().flatten().copied().for_each(f)
            }
        }
    }

    /// Bounding box of all coordinates, `None` for an empty geometry
    pub fn bbox(&self) -> Option<BBox> {
        let mut bounds: Option<BBox> = None;
        self.for_each_coord(|[x, y]| {
            let point = BBox { west: x, south: y, east: x, north: y };
            bounds = Some(match bounds {
                Some(b) => b.union(&point),
                None => point,
            });
        });
        bounds
    }

    /// Try to parse from a serde_json::Value (GeoJSON)
    pub fn from_geojson(value: &serde_json::Value) -> Option<Self> {
        serde_json::from_value(value.clone()).ok()
    }

    /// Convert to serde_json::Value (GeoJSON)
    pub fn to_geojson(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }
}

/// Axis-aligned bounding box in longitude/latitude degrees
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BBox {
    pub west: f64,
    pub south: f64,
    pub east: f64,
    pub north: f64,
}

impl BBox {
    /// Create a bounding box, rejecting inverted or non-finite corners
    pub fn new(west: f64, south: f64, east: f64, north: f64) -> Result<Self> {
        let corners = [west, south, east, north];
        if corners.iter().any(|c| !c.is_finite()) {
            return Err(CellstoreError::validation("bbox", "coordinates must be finite"));
        }
        if west > east || south > north {
            return Err(CellstoreError::validation(
                "bbox",
                format!("inverted box [{}, {}, {}, {}]", west, south, east, north),
            ));
        }
        Ok(Self { west, south, east, north })
    }

    /// Parse a GeoJSON-style `[west, south, east, north]` array
    pub fn from_array(bbox: [f64; 4]) -> Result<Self> {
        let [west, south, east, north] = bbox;
        Self::new(west, south, east, north)
    }

    pub fn to_array(&self) -> [f64; 4] {
        [self.west, self.south, self.east, self.north]
    }

    /// Smallest box containing both boxes
    pub fn union(&self, other: &BBox) -> BBox {
        BBox {
            west: self.west.min(other.west),
            south: self.south.min(other.south),
            east: self.east.max(other.east),
            north: self.north.max(other.north),
        }
    }

    /// Closed-interval overlap test
    pub fn intersects(&self, other: &BBox) -> bool {
        self.west <= other.east
            && self.east >= other.west
            && self.south <= other.north
            && self.north >= other.south
    }

    pub fn contains_point(&self, x: f64, y: f64) -> bool {
        x >= self.west && x <= self.east && y >= self.south && y <= self.north
    }

    /// Closed polygon ring tracing the box
    pub fn to_polygon(&self) -> Geometry {
        Geometry::polygon(vec![vec![
            [self.west, self.south],
            [self.east, self.south],
            [self.east, self.north],
            [self.west, self.north],
            [self.west, self.south],
        ]])
    }
}
