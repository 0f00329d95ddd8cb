//! Geometry models for cellstore-geo.
//!
//! This module re-exports canonical types from `cellstore-core` and provides
//! conversions to the `geo` crate for spatial predicates.

use geo::algorithm::intersects::Intersects;
use geo::{Coord, Geometry as GeoGeometry, LineString, Polygon, Rect};

// Re-export canonical types from cellstore-core
pub use cellstore_core::models::{BBox, Geometry, GeometryType};

fn to_line_string(coords: &[[f64; 2]]) -> LineString {
    LineString::new(coords.iter().map(|c| Coord { x: c[0], y: c[1] }).collect())
}

fn to_polygon(rings: &[Vec<[f64; 2]>]) -> Polygon {
    match rings.split_first() {
        Some((exterior, interiors)) => Polygon::new(
            to_line_string(exterior),
            interiors.iter().map(|ring| to_line_string(ring)).collect(),
        ),
        None => Polygon::new(LineString::new(vec![]), vec![]),
    }
}

/// Convert a canonical Geometry to a geo::Geometry
pub fn to_geo_geometry(geom: &Geometry) -> GeoGeometry {
    match geom {
        Geometry::Point { coordinates } => {
            GeoGeometry::Point(geo::Point::new(coordinates[0], coordinates[1]))
        }
        Geometry::LineString { coordinates } => {
            GeoGeometry::LineString(to_line_string(coordinates))
        }
        Geometry::Polygon { coordinates } => GeoGeometry::Polygon(to_polygon(coordinates)),
        Geometry::MultiPoint { coordinates } => GeoGeometry::MultiPoint(geo::MultiPoint::new(
            coordinates.iter().map(|c| geo::Point::new(c[0], c[1])).collect(),
        )),
        Geometry::MultiLineString { coordinates } => GeoGeometry::MultiLineString(
            geo::MultiLineString::new(coordinates.iter().map(|l| to_line_string(l)).collect()),
        ),
        Geometry::MultiPolygon { coordinates } => GeoGeometry::MultiPolygon(
            geo::MultiPolygon::new(coordinates.iter().map(|p| to_polygon(p)).collect()),
        ),
    }
}

/// Convert a bounding box to a geo::Rect
pub fn to_geo_rect(bbox: &BBox) -> Rect {
    Rect::new(
        Coord { x: bbox.west, y: bbox.south },
        Coord { x: bbox.east, y: bbox.north },
    )
}

/// Extension trait for Geometry with geo-crate operations
pub trait GeometryExt {
    /// Convert to geo::Geometry
    fn to_geo(&self) -> GeoGeometry;

    /// Whether the geometry touches or overlaps the closed box
    fn intersects_bbox(&self, bbox: &BBox) -> bool;
}

impl GeometryExt for Geometry {
    fn to_geo(&self) -> GeoGeometry {
        to_geo_geometry(self)
    }

    fn intersects_bbox(&self, bbox: &BBox) -> bool {
        intersects_rect(&self.to_geo(), bbox)
    }
}

/// Closed intersection test between an already converted geometry and a box
pub(crate) fn intersects_rect(geom: &GeoGeometry, bbox: &BBox) -> bool {
    let rect = GeoGeometry::Polygon(to_geo_rect(bbox).to_polygon());
    geom.intersects(&rect)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_polygon_with_hole_converts() {
        let geom = Geometry::polygon(vec![
            vec![[0.0, 0.0], [4.0, 0.0], [4.0, 4.0], [0.0, 4.0], [0.0, 0.0]],
            vec![[1.0, 1.0], [2.0, 1.0], [2.0, 2.0], [1.0, 2.0], [1.0, 1.0]],
        ]);
        match geom.to_geo() {
            GeoGeometry::Polygon(p) => {
                assert_eq!(p.exterior().0.len(), 5);
                assert_eq!(p.interiors().len(), 1);
            }
            other => panic!("Expected Polygon, got {:?}", other),
        }
    }

    #[test]
    fn test_intersects_bbox() {
        let line = Geometry::line_string(vec![[0.0, 0.0], [10.0, 10.0]]);
        assert!(line.intersects_bbox(&BBox::new(4.0, 4.0, 6.0, 6.0).unwrap()));
        assert!(!line.intersects_bbox(&BBox::new(6.0, 0.0, 10.0, 3.0).unwrap()));
    }

    #[test]
    fn test_bbox_intersection_includes_boundary() {
        let point = Geometry::point(1.0, 1.0);
        assert!(point.intersects_bbox(&BBox::new(0.0, 0.0, 1.0, 1.0).unwrap()));
        assert!(point.intersects_bbox(&BBox::new(1.0, 1.0, 2.0, 2.0).unwrap()));
    }

    #[test]
    fn test_box_inside_polygon_hole_does_not_intersect() {
        let ring = Geometry::polygon(vec![
            vec![[0.0, 0.0], [10.0, 0.0], [10.0, 10.0], [0.0, 10.0], [0.0, 0.0]],
            vec![[2.0, 2.0], [8.0, 2.0], [8.0, 8.0], [2.0, 8.0], [2.0, 2.0]],
        ]);
        assert!(!ring.intersects_bbox(&BBox::new(4.0, 4.0, 5.0, 5.0).unwrap()));
        assert!(ring.intersects_bbox(&BBox::new(0.5, 0.5, 1.0, 1.0).unwrap()));
    }
}
