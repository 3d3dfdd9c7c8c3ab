//! MVT (Mapbox Vector Tile) wire-format encoding.
//!
//! Builds the protobuf tile message from rendered features that already
//! carry tile-local integer coordinates:
//!
//! - **Command encoding**: geometry as packed MoveTo/LineTo/ClosePath
//!   commands with zigzag-encoded cursor deltas
//! - **Tag interning**: per-tile key and value tables, deduplicated and
//!   stable per layer
//! - **Ring roles**: exterior rings arrive with positive surveyor's-formula
//!   area, holes negative, as the spec requires
//!
//! Reference: <https://github.com/mapbox/vector-tile-spec>

use std::collections::HashMap;

use prost::Message;

use crate::codec::zigzag_encode;
use crate::feature::{AttrValue, GeometryType, RenderedFeature};
use crate::vector_tile::tile::{Feature, GeomType, Layer, Value};
use crate::vector_tile::Tile;
use crate::{Error, Result, EXTENT};

/// MVT command ids
const CMD_MOVE_TO: u32 = 1;
const CMD_LINE_TO: u32 = 2;
const CMD_CLOSE_PATH: u32 = 7;

/// Pack a command with a repeat count: `(id & 0x7) | (count << 3)`.
#[inline]
pub fn command_encode(command_id: u32, count: u32) -> u32 {
    (command_id & 0x7) | (count << 3)
}

/// Unpack a command into `(id, count)`.
#[inline]
pub fn command_decode(command: u32) -> (u32, u32) {
    (command & 0x7, command >> 3)
}

/// Encode a feature's parts into geometry commands and the wire geometry
/// type.
pub fn encode_geometry(feature: &RenderedFeature) -> (Vec<u32>, GeomType) {
    let parts = &feature.geometry;
    match feature.geometry_type {
        GeometryType::Point | GeometryType::MultiPoint => {
            let points: Vec<(i32, i32)> = parts.iter().flatten().copied().collect();
            if points.is_empty() {
                return (vec![], GeomType::Unknown);
            }
            let mut geometry = Vec::with_capacity(1 + points.len() * 2);
            geometry.push(command_encode(CMD_MOVE_TO, points.len() as u32));
            let (mut cx, mut cy) = (0i32, 0i32);
            for (x, y) in points {
                geometry.push(zigzag_encode(x - cx));
                geometry.push(zigzag_encode(y - cy));
                cx = x;
                cy = y;
            }
            (geometry, GeomType::Point)
        }
        GeometryType::Line | GeometryType::MultiLine => {
            let mut geometry = Vec::new();
            let (mut cx, mut cy) = (0i32, 0i32);
            for part in parts {
                if part.len() < 2 {
                    continue;
                }
                let (x, y) = part[0];
                geometry.push(command_encode(CMD_MOVE_TO, 1));
                geometry.push(zigzag_encode(x - cx));
                geometry.push(zigzag_encode(y - cy));
                cx = x;
                cy = y;
                geometry.push(command_encode(CMD_LINE_TO, (part.len() - 1) as u32));
                for &(x, y) in part.iter().skip(1) {
                    geometry.push(zigzag_encode(x - cx));
                    geometry.push(zigzag_encode(y - cy));
                    cx = x;
                    cy = y;
                }
            }
            (geometry, GeomType::Linestring)
        }
        GeometryType::Polygon | GeometryType::MultiPolygon => {
            let mut geometry = Vec::new();
            let (mut cx, mut cy) = (0i32, 0i32);
            for ring in parts {
                // closed ring: skip the repeated last point, ClosePath
                // returns to the start implicitly
                if ring.len() < 4 {
                    continue;
                }
                let (x, y) = ring[0];
                geometry.push(command_encode(CMD_MOVE_TO, 1));
                geometry.push(zigzag_encode(x - cx));
                geometry.push(zigzag_encode(y - cy));
                cx = x;
                cy = y;
                let line_to = ring.len() - 2;
                geometry.push(command_encode(CMD_LINE_TO, line_to as u32));
                for &(x, y) in ring.iter().skip(1).take(line_to) {
                    geometry.push(zigzag_encode(x - cx));
                    geometry.push(zigzag_encode(y - cy));
                    cx = x;
                    cy = y;
                }
                geometry.push(command_encode(CMD_CLOSE_PATH, 1));
            }
            (geometry, GeomType::Polygon)
        }
    }
}

fn to_mvt_value(value: &AttrValue) -> Value {
    match value {
        AttrValue::String(s) => Value {
            string_value: Some(s.clone()),
            ..Default::default()
        },
        AttrValue::Long(v) => Value {
            int_value: Some(*v),
            ..Default::default()
        },
        AttrValue::Double(v) => Value {
            double_value: Some(*v),
            ..Default::default()
        },
        AttrValue::Bool(v) => Value {
            bool_value: Some(*v),
            ..Default::default()
        },
    }
}

/// Builds one MVT layer, interning keys and values per tile.
pub struct LayerBuilder {
    name: String,
    extent: u32,
    features: Vec<Feature>,
    keys: Vec<String>,
    key_index: HashMap<String, u32>,
    values: Vec<Value>,
    value_index: HashMap<String, u32>,
}

impl LayerBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            extent: EXTENT,
            features: Vec::new(),
            keys: Vec::new(),
            key_index: HashMap::new(),
            values: Vec::new(),
            value_index: HashMap::new(),
        }
    }

    fn get_or_insert_key(&mut self, key: &str) -> u32 {
        if let Some(&idx) = self.key_index.get(key) {
            return idx;
        }
        let idx = self.keys.len() as u32;
        self.keys.push(key.to_string());
        self.key_index.insert(key.to_string(), idx);
        idx
    }

    fn get_or_insert_value(&mut self, value: &AttrValue) -> u32 {
        let lookup = format!("{:?}", value);
        if let Some(&idx) = self.value_index.get(&lookup) {
            return idx;
        }
        let idx = self.values.len() as u32;
        self.values.push(to_mvt_value(value));
        self.value_index.insert(lookup, idx);
        idx
    }

    /// Add one rendered feature, resolving its interned key ids through the
    /// layer's key table snapshot.
    pub fn add_feature(&mut self, feature: &RenderedFeature, layer_keys: &[String]) {
        let (geometry, geom_type) = encode_geometry(feature);
        if geometry.is_empty() {
            return;
        }

        let mut tags = Vec::with_capacity(feature.attrs.len() * 2);
        for (key_id, value) in &feature.attrs {
            let Some(key) = layer_keys.get(*key_id as usize) else {
                log::warn!("attribute key id {} missing from layer key table", key_id);
                continue;
            };
            let key_idx = self.get_or_insert_key(key);
            let value_idx = self.get_or_insert_value(value);
            tags.push(key_idx);
            tags.push(value_idx);
        }

        self.features.push(Feature {
            id: feature.id,
            tags,
            r#type: Some(geom_type as i32),
            geometry,
        });
    }

    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }

    pub fn build(self) -> Layer {
        Layer {
            version: 2,
            name: self.name,
            features: self.features,
            keys: self.keys,
            values: self.values,
            extent: Some(self.extent),
        }
    }
}

/// Builds the complete tile message from its layers.
#[derive(Default)]
pub struct TileBuilder {
    layers: Vec<Layer>,
}

impl TileBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_layer(&mut self, layer: Layer) {
        self.layers.push(layer);
    }

    /// Serialize to uncompressed protobuf bytes.
    pub fn encode(self) -> Vec<u8> {
        Tile {
            layers: self.layers,
        }
        .encode_to_vec()
    }
}

/// Decode an MVT tile from uncompressed bytes (verification only).
pub fn decode_tile(data: &[u8]) -> Result<Tile> {
    Tile::decode(data).map_err(|e| Error::Archive(format!("failed to decode tile: {}", e)))
}
