//! Binary feature codec.
//!
//! Features are written with `bincode` through a private wire layout. Property
//! bags are arbitrary JSON, which bincode cannot describe, so they travel as
//! JSON text inside the binary frame.

use cellstore_core::error::{CellstoreError, Result};
use cellstore_core::models::{Feature, Geometry};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};

/// Encodes features to bytes and back, losslessly for every geometry type
pub trait GeometryCodec: Send + Sync {
    fn encode(&self, feature: &Feature) -> Result<Vec<u8>>;

    fn decode(&self, bytes: &[u8]) -> Result<Feature>;
}

const WIRE_VERSION: u8 = 1;

#[derive(Serialize, Deserialize)]
enum WireGeometry {
    Point([f64; 2]),
    LineString(Vec<[f64; 2]>),
    Polygon(Vec<Vec<[f64; 2]>>),
    MultiPoint(Vec<[f64; 2]>),
    MultiLineString(Vec<Vec<[f64; 2]>>),
    MultiPolygon(Vec<Vec<Vec<[f64; 2]>>>),
}

impl From<&Geometry> for WireGeometry {
    fn from(geometry: &Geometry) -> Self {
        match geometry.clone() {
            Geometry::Point { coordinates } => WireGeometry::Point(coordinates),
            Geometry::LineString { coordinates } => WireGeometry::LineString(coordinates),
            Geometry::Polygon { coordinates } => WireGeometry::Polygon(coordinates),
            Geometry::MultiPoint { coordinates } => WireGeometry::MultiPoint(coordinates),
            Geometry::MultiLineString { coordinates } => WireGeometry::MultiLineString(coordinates),
            Geometry::MultiPolygon { coordinates } => WireGeometry::MultiPolygon(coordinates),
        }
    }
}

impl From<WireGeometry> for Geometry {
    fn from(wire: WireGeometry) -> Self {
        match wire {
            WireGeometry::Point(coordinates) => Geometry::Point { coordinates },
            WireGeometry::LineString(coordinates) => Geometry::LineString { coordinates },
            WireGeometry::Polygon(coordinates) => Geometry::Polygon { coordinates },
            WireGeometry::MultiPoint(coordinates) => Geometry::MultiPoint { coordinates },
            WireGeometry::MultiLineString(coordinates) => Geometry::MultiLineString { coordinates },
            WireGeometry::MultiPolygon(coordinates) => Geometry::MultiPolygon { coordinates },
        }
    }
}

#[derive(Serialize, Deserialize)]
struct WireFeature {
    version: u8,
    id: Option<String>,
    geometry: WireGeometry,
    properties: String,
}

/// `bincode` implementation of [`GeometryCodec`]
#[derive(Debug, Clone, Copy, Default)]
pub struct BincodeCodec;

impl BincodeCodec {
    pub fn new() -> Self {
        Self
    }
}

impl GeometryCodec for BincodeCodec {
    fn encode(&self, feature: &Feature) -> Result<Vec<u8>> {
        let properties = serde_json::to_string(&feature.properties)
            .map_err(|e| CellstoreError::Serialization(format!("properties: {}", e)))?;
        let wire = WireFeature {
            version: WIRE_VERSION,
            id: feature.id.clone(),
            geometry: WireGeometry::from(&feature.geometry),
            properties,
        };
        bincode::serialize(&wire)
            .map_err(|e| CellstoreError::Serialization(format!("encode feature: {}", e)))
    }

    fn decode(&self, bytes: &[u8]) -> Result<Feature> {
        let wire: WireFeature = bincode::deserialize(bytes)
            .map_err(|e| CellstoreError::Serialization(format!("decode feature: {}", e)))?;
        if wire.version != WIRE_VERSION {
            return Err(CellstoreError::Serialization(format!(
                "unsupported payload version {}",
                wire.version
            )));
        }
        let properties: Map<String, JsonValue> = serde_json::from_str(&wire.properties)
            .map_err(|e| CellstoreError::Serialization(format!("properties: {}", e)))?;
        Ok(Feature { id: wire.id, geometry: wire.geometry.into(), properties })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    #[test]
    fn test_roundtrip_with_properties() {
        let codec = BincodeCodec::new();
        let feature = Feature::new(Geometry::polygon(vec![
            vec![[0.0, 0.0], [4.0, 0.0], [4.0, 4.0], [0.0, 0.0]],
            vec![[1.0, 1.0], [2.0, 1.0], [2.0, 2.0], [1.0, 1.0]],
        ]))
        .with_id("abc")
        .with_property("name", "plot 7")
        .with_property("tags", json!({"zoning": ["r1", "r2"], "area": 12.5, "ok": null}));

        let bytes = codec.encode(&feature).unwrap();
        assert_eq!(codec.decode(&bytes).unwrap(), feature);
    }

    #[test]
    fn test_every_geometry_type_roundtrips() {
        let codec = BincodeCodec::new();
        let geometries = vec![
            Geometry::point(1.5, -2.25),
            Geometry::line_string(vec![[0.0, 0.0], [1.0, 1.0]]),
            Geometry::MultiPoint { coordinates: vec![[0.0, 0.0], [3.0, 3.0]] },
            Geometry::MultiLineString { coordinates: vec![vec![[0.0, 0.0], [1.0, 0.5]]] },
            Geometry::multi_polygon(vec![vec![vec![
                [0.0, 0.0],
                [1.0, 0.0],
                [1.0, 1.0],
                [0.0, 0.0],
            ]]]),
        ];
        for geometry in geometries {
            let feature = Feature::new(geometry);
            let decoded = codec.decode(&codec.encode(&feature).unwrap()).unwrap();
            assert_eq!(decoded, feature);
        }
    }

    #[test]
    fn test_malformed_bytes_fail_with_serialization() {
        let codec = BincodeCodec::new();
        assert!(matches!(codec.decode(&[]), Err(CellstoreError::Serialization(_))));
        assert!(matches!(codec.decode(&[1, 0, 9, 9, 9]), Err(CellstoreError::Serialization(_))));

        let mut bytes = codec.encode(&Feature::new(Geometry::point(0.0, 0.0))).unwrap();
        bytes[0] = 42;
        assert!(matches!(codec.decode(&bytes), Err(CellstoreError::Serialization(_))));
    }

    proptest! {
        #[test]
        fn line_strings_roundtrip(
            coords in prop::collection::vec((-180.0..180.0f64, -90.0..90.0f64), 2..64),
            name in "[a-z]{0,12}",
        ) {
            let codec = BincodeCodec::new();
            let feature = Feature::new(Geometry::line_string(
                coords.into_iter().map(|(x, y)| [x, y]).collect(),
            ))
            .with_property("name", name);
            let decoded = codec.decode(&codec.encode(&feature).unwrap()).unwrap();
            prop_assert_eq!(decoded, feature);
        }
    }
}
