//! GeoJSON serialization for vector features

use crate::error::{Error, Result};
use crate::vector::{AttributeValue, Feature};
use geo_types::Geometry;
use serde_json::{json, Map, Value};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

/// Write a FeatureCollection of line/point features as GeoJSON.
pub fn write_geojson_features<P: AsRef<Path>>(path: P, features: &[Feature]) -> Result<()> {
    let collection = json!({
        "type": "FeatureCollection",
        "features": features.iter().map(feature_to_json).collect::<Result<Vec<_>>>()?,
    });

    let file = File::create(path.as_ref())?;
    let mut writer = BufWriter::new(file);
    serde_json::to_writer_pretty(&mut writer, &collection)
        .map_err(|e| Error::Other(format!("GeoJSON encode error: {}", e)))?;
    writer.write_all(b"\n")?;
    writer.flush()?;
    Ok(())
}

fn feature_to_json(feature: &Feature) -> Result<Value> {
    let geometry = match &feature.geometry {
        Some(g) => geometry_to_json(g)?,
        None => Value::Null,
    };

    let mut properties = Map::new();
    for (key, value) in &feature.properties {
        properties.insert(key.clone(), attribute_to_json(value));
    }

    let mut obj = Map::new();
    obj.insert("type".into(), Value::String("Feature".into()));
    if let Some(id) = feature.id {
        obj.insert("id".into(), json!(id));
    }
    obj.insert("geometry".into(), geometry);
    obj.insert("properties".into(), Value::Object(properties));
    Ok(Value::Object(obj))
}

fn geometry_to_json(geometry: &Geometry<f64>) -> Result<Value> {
    match geometry {
        Geometry::Point(p) => Ok(json!({
            "type": "Point",
            "coordinates": [p.x(), p.y()],
        })),
        Geometry::LineString(line) => Ok(json!({
            "type": "LineString",
            "coordinates": line.coords().map(|c| vec![c.x, c.y]).collect::<Vec<_>>(),
        })),
        other => Err(Error::Other(format!(
            "unsupported GeoJSON geometry: {:?}",
            std::mem::discriminant(other)
        ))),
    }
}

fn attribute_to_json(value: &AttributeValue) -> Value {
    match value {
        AttributeValue::Null => Value::Null,
        AttributeValue::Bool(b) => json!(b),
        AttributeValue::Int(i) => json!(i),
        AttributeValue::Float(f) => json!(f),
        AttributeValue::String(s) => json!(s),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use geo_types::line_string;
    use tempfile::tempdir;

    #[test]
    fn test_write_line_features() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("streams.geojson");

        let geom = Geometry::LineString(line_string![
            (x: 10.0, y: 20.0),
            (x: 11.0, y: 21.0),
        ]);
        let mut feature = Feature::new(geom);
        feature.id = Some(1);
        feature.set_property("LINKNO", AttributeValue::Int(1));
        feature.set_property("ORDER", AttributeValue::Int(2));

        write_geojson_features(&path, &[feature]).unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(parsed["type"], "FeatureCollection");
        assert_eq!(parsed["features"][0]["properties"]["LINKNO"], 1);
        assert_eq!(
            parsed["features"][0]["geometry"]["coordinates"][0][0]
                .as_f64()
                .unwrap(),
            10.0
        );
    }
}
