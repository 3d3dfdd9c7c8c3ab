//! Newline-delimited GeoJSON feature source.
//!
//! Each input line is one GeoJSON Feature object. Malformed lines are
//! logged and skipped; the run continues (per-feature input errors are
//! recoverable, an unreadable file is not).

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use geo::{Coord, Geometry, LineString, MultiLineString, MultiPoint, MultiPolygon, Point, Polygon};
use serde_json::Value;

use tilefoundry_core::feature::AttrValue;
use tilefoundry_core::source::{FeatureSource, SourceFeature};
use tilefoundry_core::{Error, Result};

pub struct GeoJsonSource {
    name: String,
    reader: Option<BufReader<File>>,
}

impl GeoJsonSource {
    pub fn open(path: &Path) -> Result<Self> {
        // a missing input file is a configuration problem, not corrupt data
        let file = File::open(path)
            .map_err(|e| Error::Config(format!("cannot open {}: {}", path.display(), e)))?;
        Ok(Self {
            name: path
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_else(|| "geojson".to_string()),
            reader: Some(BufReader::new(file)),
        })
    }
}

impl FeatureSource for GeoJsonSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn read(&mut self, sink: &mut dyn FnMut(SourceFeature) -> Result<()>) -> Result<()> {
        let reader = self
            .reader
            .take()
            .ok_or_else(|| Error::Input("source already consumed".to_string()))?;
        for (line_no, line) in reader.lines().enumerate() {
            let line = line.map_err(|e| Error::Input(format!("read failed: {}", e)))?;
            if line.trim().is_empty() {
                continue;
            }
            match parse_feature(&self.name, line_no as u64 + 1, &line) {
                Ok(feature) => sink(feature)?,
                Err(reason) => {
                    log::warn!("line {}: {}; feature dropped", line_no + 1, reason);
                }
            }
        }
        Ok(())
    }
}

fn parse_feature(source: &str, line_no: u64, line: &str) -> std::result::Result<SourceFeature, String> {
    let value: Value = serde_json::from_str(line).map_err(|e| format!("invalid JSON: {}", e))?;
    let geometry = value
        .get("geometry")
        .ok_or_else(|| "missing geometry".to_string())?;
    let geometry = parse_geometry(geometry)?;

    let id = value
        .get("id")
        .and_then(Value::as_u64)
        .unwrap_or(line_no);
    let mut feature = SourceFeature::new(source, id, geometry);

    if let Some(Value::Object(properties)) = value.get("properties") {
        for (key, value) in properties {
            if let Some(attr) = to_attr(value) {
                feature.attrs.insert(key.clone(), attr);
            }
        }
    }
    Ok(feature)
}

fn to_attr(value: &Value) -> Option<AttrValue> {
    match value {
        Value::String(s) => Some(AttrValue::String(s.clone())),
        Value::Bool(b) => Some(AttrValue::Bool(*b)),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Some(AttrValue::Long(i))
            } else {
                n.as_f64().map(AttrValue::Double)
            }
        }
        _ => None,
    }
}

fn coord(value: &Value) -> std::result::Result<Coord<f64>, String> {
    let pair = value.as_array().ok_or("position is not an array")?;
    if pair.len() < 2 {
        return Err("position needs lon and lat".to_string());
    }
    Ok(Coord {
        x: pair[0].as_f64().ok_or("lon is not a number")?,
        y: pair[1].as_f64().ok_or("lat is not a number")?,
    })
}

fn line_string(value: &Value) -> std::result::Result<LineString<f64>, String> {
    let coords = value.as_array().ok_or("coordinates are not an array")?;
    Ok(LineString::new(
        coords.iter().map(coord).collect::<std::result::Result<_, _>>()?,
    ))
}

fn polygon(value: &Value) -> std::result::Result<Polygon<f64>, String> {
    let rings = value.as_array().ok_or("polygon is not an array")?;
    if rings.is_empty() {
        return Err("polygon has no rings".to_string());
    }
    let exterior = line_string(&rings[0])?;
    let holes = rings[1..]
        .iter()
        .map(line_string)
        .collect::<std::result::Result<_, _>>()?;
    Ok(Polygon::new(exterior, holes))
}

fn parse_geometry(value: &Value) -> std::result::Result<Geometry<f64>, String> {
    let kind = value
        .get("type")
        .and_then(Value::as_str)
        .ok_or("geometry has no type")?;
    let coordinates = value
        .get("coordinates")
        .ok_or("geometry has no coordinates")?;
    match kind {
        "Point" => Ok(Geometry::Point(Point(coord(coordinates)?))),
        "MultiPoint" => {
            let points = coordinates.as_array().ok_or("coordinates are not an array")?;
            Ok(Geometry::MultiPoint(MultiPoint(
                points
                    .iter()
                    .map(|p| coord(p).map(Point))
                    .collect::<std::result::Result<_, _>>()?,
            )))
        }
        "LineString" => Ok(Geometry::LineString(line_string(coordinates)?)),
        "MultiLineString" => {
            let lines = coordinates.as_array().ok_or("coordinates are not an array")?;
            Ok(Geometry::MultiLineString(MultiLineString(
                lines
                    .iter()
                    .map(line_string)
                    .collect::<std::result::Result<_, _>>()?,
            )))
        }
        "Polygon" => Ok(Geometry::Polygon(polygon(coordinates)?)),
        "MultiPolygon" => {
            let polygons = coordinates.as_array().ok_or("coordinates are not an array")?;
            Ok(Geometry::MultiPolygon(MultiPolygon(
                polygons
                    .iter()
                    .map(polygon)
                    .collect::<std::result::Result<_, _>>()?,
            )))
        }
        other => Err(format!("unsupported geometry type {:?}", other)),
    }
}
