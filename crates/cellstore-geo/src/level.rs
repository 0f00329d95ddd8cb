//! Index level selection from feature extent.

use cellstore_core::models::{BBox, IndexLevel};
use geo::{Distance, Haversine, Point};

const EARTH_RADIUS_METERS: f64 = 6_371_008.8;

/// Diagonal of the bbox extent in meters.
///
/// Width is measured along the widest parallel inside the box, so a box
/// spanning most longitudes stays wide instead of wrapping the short way
/// around the antimeridian.
pub fn bbox_diagonal_meters(bbox: &BBox) -> f64 {
    let height = Haversine.distance(Point::new(bbox.west, bbox.south), Point::new(bbox.west, bbox.north));

    let widest = if bbox.south <= 0.0 && bbox.north >= 0.0 {
        0.0
    } else {
        bbox.south.abs().min(bbox.north.abs())
    };
    let width = EARTH_RADIUS_METERS * widest.to_radians().cos() * (bbox.east - bbox.west).to_radians();

    height.hypot(width)
}

/// Pick the index level for a feature: coarse when the diagonal is longer
/// than `coarse_threshold_meters`, fine otherwise.
pub fn select_level(bbox: &BBox, coarse_threshold_meters: f64) -> IndexLevel {
    if bbox_diagonal_meters(bbox) > coarse_threshold_meters {
        IndexLevel::Coarse
    } else {
        IndexLevel::Fine
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_point_is_fine() {
        let bbox = BBox::new(115.2, -8.6, 115.2, -8.6).unwrap();
        assert_eq!(bbox_diagonal_meters(&bbox), 0.0);
        assert_eq!(select_level(&bbox, 10_000.0), IndexLevel::Fine);
    }

    #[test]
    fn test_two_km_square_is_fine() {
        // ~2km x 2km near the equator
        let bbox = BBox::new(10.0, 0.0, 10.018, 0.018).unwrap();
        let diagonal = bbox_diagonal_meters(&bbox);
        assert!(diagonal > 2_500.0 && diagonal < 3_000.0, "diagonal was {}", diagonal);
        assert_eq!(select_level(&bbox, 10_000.0), IndexLevel::Fine);
    }

    #[test]
    fn test_two_hundred_miles_is_coarse() {
        // ~320km east-west
        let bbox = BBox::new(-100.0, 40.0, -96.2, 40.5).unwrap();
        assert!(bbox_diagonal_meters(&bbox) > 300_000.0);
        assert_eq!(select_level(&bbox, 10_000.0), IndexLevel::Coarse);
    }

    #[test]
    fn test_threshold_is_exclusive() {
        let bbox = BBox::new(0.0, 0.0, 0.05, 0.05).unwrap();
        let diagonal = bbox_diagonal_meters(&bbox);
        assert_eq!(select_level(&bbox, diagonal), IndexLevel::Fine);
        assert_eq!(select_level(&bbox, diagonal - 1.0), IndexLevel::Coarse);
    }

    #[test]
    fn test_world_spanning_line_is_coarse() {
        // Corners are 0.2 degrees apart across the antimeridian
        let bbox = BBox::new(-179.9, 80.0, 179.9, 80.0).unwrap();
        assert!(bbox_diagonal_meters(&bbox) > 5_000_000.0);
        assert_eq!(select_level(&bbox, 10_000.0), IndexLevel::Coarse);
    }

    #[test]
    fn test_equator_band_is_coarse() {
        let bbox = BBox::new(-180.0, 0.0, 180.0, 0.01).unwrap();
        assert!(bbox_diagonal_meters(&bbox) > 39_000_000.0);
        assert_eq!(select_level(&bbox, 10_000.0), IndexLevel::Coarse);
    }
}
