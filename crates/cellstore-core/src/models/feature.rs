use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};

use super::geometry::{BBox, Geometry};
use crate::error::{CellstoreError, Result};

/// Optimistic-concurrency token: microseconds since the Unix epoch
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Version(pub i64);

impl Version {
    /// A fresh version from the wall clock
    pub fn now() -> Self {
        Version(Utc::now().timestamp_micros())
    }

    /// A fresh version strictly greater than `previous`
    pub fn after(previous: Version) -> Self {
        let now = Self::now();
        if now > previous {
            now
        } else {
            Version(previous.0 + 1)
        }
    }
}

impl std::fmt::Display for Version {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A geometry plus its property bag
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Feature {
    /// Primary id, assigned by the store on insert when absent
    pub id: Option<String>,

    pub geometry: Geometry,

    #[serde(default)]
    pub properties: Map<String, JsonValue>,
}

impl Feature {
    pub fn new(geometry: Geometry) -> Self {
        Self { id: None, geometry, properties: Map::new() }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<JsonValue>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    /// Bounding box of the geometry; empty geometries cannot be indexed
    pub fn bbox(&self) -> Result<BBox> {
        self.geometry
            .bbox()
            .ok_or_else(|| CellstoreError::validation("geometry", "geometry has no coordinates"))
    }

    /// Secondary identifier declared under `property`, if any.
    ///
    /// Strings and integers are accepted; other JSON values are ignored.
    pub fn secondary_id(&self, property: &str) -> Option<String> {
        match self.properties.get(property)? {
            JsonValue::String(s) if !s.is_empty() => Some(s.clone()),
            JsonValue::Number(n) if n.is_i64() || n.is_u64() => Some(n.to_string()),
            _ => None,
        }
    }

    /// Convert from a GeoJSON feature
    pub fn from_geojson(feature: geojson::Feature) -> Result<Self> {
        let geometry = feature
            .geometry
            .ok_or_else(|| CellstoreError::validation("geometry", "feature has no geometry"))?;
        let value = serde_json::to_value(&geometry)
            .map_err(|e| CellstoreError::Serialization(e.to_string()))?;
        let geometry = Geometry::from_geojson(&value).ok_or_else(|| {
            let kind = value.get("type").and_then(JsonValue::as_str).unwrap_or("unknown");
            CellstoreError::validation("geometry", format!("unsupported geometry type: {}", kind))
        })?;

        let id = match feature.id {
            Some(geojson::feature::Id::String(s)) => Some(s),
            Some(geojson::feature::Id::Number(n)) => Some(n.to_string()),
            None => None,
        };

        Ok(Self {
            id,
            geometry,
            properties: feature.properties.unwrap_or_default(),
        })
    }

    /// Convert to a GeoJSON feature
    pub fn to_geojson(&self) -> Result<geojson::Feature> {
        let geometry = geojson::Geometry::from_json_value(self.geometry.to_geojson())
            .map_err(|e| CellstoreError::Serialization(e.to_string()))?;
        Ok(geojson::Feature {
            bbox: None,
            geometry: Some(geometry),
            id: self.id.clone().map(geojson::feature::Id::String),
            properties: Some(self.properties.clone()),
            foreign_members: None,
        })
    }
}

/// Build a GeoJSON feature collection from features
pub fn feature_collection(features: &[Feature]) -> Result<geojson::FeatureCollection> {
    let features = features.iter().map(Feature::to_geojson).collect::<Result<Vec<_>>>()?;
    Ok(geojson::FeatureCollection {
        bbox: None,
        features,
        foreign_members: None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_secondary_id_accepts_strings_and_integers() {
        let f = Feature::new(Geometry::point(0.0, 0.0)).with_property("id", "road-7");
        assert_eq!(f.secondary_id("id").as_deref(), Some("road-7"));

        let f = Feature::new(Geometry::point(0.0, 0.0)).with_property("id", 42);
        assert_eq!(f.secondary_id("id").as_deref(), Some("42"));

        let f = Feature::new(Geometry::point(0.0, 0.0)).with_property("id", json!([1, 2]));
        assert!(f.secondary_id("id").is_none());
        assert!(f.secondary_id("missing").is_none());
    }

    #[test]
    fn test_geojson_roundtrip() {
        let feature = Feature::new(Geometry::polygon(vec![vec![
            [0.0, 0.0],
            [1.0, 0.0],
            [1.0, 1.0],
            [0.0, 0.0],
        ]]))
        .with_id("abc")
        .with_property("name", "square-ish");

        let gj = feature.to_geojson().unwrap();
        let back = Feature::from_geojson(gj).unwrap();
        assert_eq!(back, feature);
    }

    #[test]
    fn test_from_geojson_requires_geometry() {
        let gj = geojson::Feature {
            bbox: None,
            geometry: None,
            id: None,
            properties: None,
            foreign_members: None,
        };
        assert!(matches!(
            Feature::from_geojson(gj),
            Err(CellstoreError::Validation { .. })
        ));
    }

    #[test]
    fn test_version_after_is_strictly_greater() {
        let far_future = Version(i64::MAX - 10);
        assert_eq!(Version::after(far_future), Version(i64::MAX - 9));

        let old = Version(1);
        assert!(Version::after(old) > old);
    }
}
