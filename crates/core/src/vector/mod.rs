//! Vector feature types and GeoJSON line output
//!
//! The delineation workflow only ever writes vector data (stream reaches and
//! outlet points); reading external vector formats is out of scope.

mod geojson;

pub use geojson::write_geojson_features;

use geo_types::Geometry;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Attribute value types
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AttributeValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
}

/// A geographic feature with geometry and attributes
#[derive(Debug, Clone)]
pub struct Feature {
    /// Feature geometry
    pub geometry: Option<Geometry<f64>>,
    /// Feature attributes, ordered for stable output
    pub properties: BTreeMap<String, AttributeValue>,
    /// Optional feature ID
    pub id: Option<i64>,
}

impl Feature {
    /// Create a new feature with geometry
    pub fn new(geometry: Geometry<f64>) -> Self {
        Self {
            geometry: Some(geometry),
            properties: BTreeMap::new(),
            id: None,
        }
    }

    /// Set an attribute
    pub fn set_property(&mut self, key: impl Into<String>, value: AttributeValue) {
        self.properties.insert(key.into(), value);
    }

    /// Get an attribute
    pub fn get_property(&self, key: &str) -> Option<&AttributeValue> {
        self.properties.get(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use geo_types::{line_string, Geometry};

    #[test]
    fn test_feature_properties() {
        let geom = Geometry::LineString(line_string![(x: 0.0, y: 0.0), (x: 1.0, y: 1.0)]);
        let mut feature = Feature::new(geom);
        feature.set_property("LINKNO", AttributeValue::Int(3));

        assert_eq!(
            feature.get_property("LINKNO"),
            Some(&AttributeValue::Int(3))
        );
        assert_eq!(feature.get_property("missing"), None);
    }
}
