use crate::models::Geometry;
use cellstore_core::error::{CellstoreError, Result};

/// Validation result with details
#[derive(Debug, Clone)]
pub struct ValidationResult {
    pub is_valid: bool,
    pub errors: Vec<ValidationError>,
}

/// Validation error with location details
#[derive(Debug, Clone)]
pub struct ValidationError {
    pub location: String,
    pub reason: String,
}

impl ValidationResult {
    /// Create a valid result
    pub fn valid() -> Self {
        Self { is_valid: true, errors: Vec::new() }
    }

    /// Add an error to the result
    pub fn add_error(&mut self, location: String, reason: String) {
        self.is_valid = false;
        self.errors.push(ValidationError { location, reason });
    }

    fn absorb(&mut self, prefix: &str, other: ValidationResult) {
        for error in other.errors {
            self.add_error(format!("{}.{}", prefix, error.location), error.reason);
        }
    }

    /// Convert into a `Validation` error naming the first problem
    pub fn into_result(self) -> Result<()> {
        match self.errors.into_iter().next() {
            None => Ok(()),
            Some(error) => Err(CellstoreError::validation(
                "geometry",
                format!("{}: {}", error.location, error.reason),
            )),
        }
    }
}

/// Validate a geometry before it is indexed
pub fn validate_geometry(geometry: &Geometry) -> ValidationResult {
    match geometry {
        Geometry::Point { coordinates } => validate_position("Point", coordinates),
        Geometry::LineString { coordinates } => validate_linestring("LineString", coordinates),
        Geometry::Polygon { coordinates } => validate_polygon("Polygon", coordinates),
        Geometry::MultiPoint { coordinates } => {
            let mut result = ValidationResult::valid();
            if coordinates.is_empty() {
                result.add_error("MultiPoint".to_string(), "must have at least 1 point".to_string());
            }
            for (i, position) in coordinates.iter().enumerate() {
                result.absorb(&format!("MultiPoint[{}]", i), validate_position("Point", position));
            }
            result
        }
        Geometry::MultiLineString { coordinates } => {
            let mut result = ValidationResult::valid();
            if coordinates.is_empty() {
                result.add_error(
                    "MultiLineString".to_string(),
                    "must have at least 1 line".to_string(),
                );
            }
            for (i, line) in coordinates.iter().enumerate() {
                result.absorb(
                    &format!("MultiLineString[{}]", i),
                    validate_linestring("LineString", line),
                );
            }
            result
        }
        Geometry::MultiPolygon { coordinates } => {
            let mut result = ValidationResult::valid();
            if coordinates.is_empty() {
                result.add_error(
                    "MultiPolygon".to_string(),
                    "must have at least 1 polygon".to_string(),
                );
            }
            for (i, polygon) in coordinates.iter().enumerate() {
                result.absorb(&format!("MultiPolygon[{}]", i), validate_polygon("Polygon", polygon));
            }
            result
        }
    }
}

fn validate_position(location: &str, position: &[f64; 2]) -> ValidationResult {
    let mut result = ValidationResult::valid();
    let [x, y] = *position;
    if !x.is_finite() || !y.is_finite() {
        result.add_error(format!("{}({}, {})", location, x, y), "Coordinates must be finite".into());
    } else if !(-180.0..=180.0).contains(&x) || !(-90.0..=90.0).contains(&y) {
        result.add_error(
            format!("{}({}, {})", location, x, y),
            "Longitude must be within [-180, 180] and latitude within [-90, 90]".into(),
        );
    }
    result
}

fn validate_linestring(location: &str, coords: &[[f64; 2]]) -> ValidationResult {
    let mut result = ValidationResult::valid();

    if coords.len() < 2 {
        result.add_error(
            location.to_string(),
            format!("LineString must have at least 2 points, found {}", coords.len()),
        );
        return result;
    }

    for (i, position) in coords.iter().enumerate() {
        result.absorb(&format!("{}[{}]", location, i), validate_position("Point", position));
    }

    result
}

fn validate_ring(location: &str, ring: &[[f64; 2]]) -> ValidationResult {
    let mut result = ValidationResult::valid();

    if ring.len() < 4 {
        result.add_error(
            location.to_string(),
            format!("Ring must have at least 4 points, found {}", ring.len()),
        );
    }

    // Check if closed
    if let (Some(first), Some(last)) = (ring.first(), ring.last()) {
        if first != last {
            result.add_error(
                location.to_string(),
                "Ring must be closed (first point == last point)".to_string(),
            );
        }
    }

    for (i, position) in ring.iter().enumerate() {
        result.absorb(&format!("{}[{}]", location, i), validate_position("Point", position));
    }

    result
}

fn validate_polygon(location: &str, rings: &[Vec<[f64; 2]>]) -> ValidationResult {
    let mut result = ValidationResult::valid();

    let Some((exterior, interiors)) = rings.split_first() else {
        result.add_error(location.to_string(), "Polygon must have an exterior ring".to_string());
        return result;
    };

    result.absorb(location, validate_ring("exterior", exterior));
    for (i, interior) in interiors.iter().enumerate() {
        result.absorb(location, validate_ring(&format!("interior[{}]", i), interior));
    }

    result
}
