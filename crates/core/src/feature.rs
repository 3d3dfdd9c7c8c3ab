//! The compact on-disk render-feature record.
//!
//! A `RenderedFeature` is one tile-local fragment of a source feature: its
//! packed sort key, quantized geometry, interned attributes, and optional
//! wire-format id. Records spend most of their life as opaque sorted bytes,
//! so the codec keeps them small:
//!
//! - geometry coordinates are zigzag varint deltas from a running cursor
//! - attribute keys are varint indexes into a per-layer interned key table
//! - a single flag byte carries the geometry type, id presence, and the
//!   fill marker
//!
//! The sort key is serialized big-endian first so a record's order can be
//! read from its leading 8 bytes without decoding the rest.

use crate::codec::{
    decode_varint, write_varint, zigzag_decode, zigzag_encode, zigzag_encode64, zigzag_decode64,
};
use crate::sort_key::SortKey;
use crate::{Error, Result};

/// Geometry type of a rendered feature.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum GeometryType {
    Point = 1,
    Line = 2,
    Polygon = 3,
    MultiPoint = 4,
    MultiLine = 5,
    MultiPolygon = 6,
}

impl GeometryType {
    fn from_code(code: u8) -> Option<Self> {
        match code {
            1 => Some(GeometryType::Point),
            2 => Some(GeometryType::Line),
            3 => Some(GeometryType::Polygon),
            4 => Some(GeometryType::MultiPoint),
            5 => Some(GeometryType::MultiLine),
            6 => Some(GeometryType::MultiPolygon),
            _ => None,
        }
    }

    pub fn is_polygon(&self) -> bool {
        matches!(self, GeometryType::Polygon | GeometryType::MultiPolygon)
    }
}

/// An attribute value a feature can carry into the tile.
#[derive(Debug, Clone, PartialEq)]
pub enum AttrValue {
    String(String),
    Long(i64),
    Double(f64),
    Bool(bool),
}

const VALUE_STRING: u8 = 1;
const VALUE_LONG: u8 = 2;
const VALUE_DOUBLE: u8 = 3;
const VALUE_BOOL: u8 = 4;

/// One render-feature, ready to spill.
///
/// Geometry is a list of parts in tile-local integer coordinates. For lines
/// each part is a linestring; for polygons each part is a ring (exterior
/// rings first, holes following their exterior). Coordinates may run outside
/// `0..4096` by the clip buffer.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderedFeature {
    pub sort_key: SortKey,
    pub geometry_type: GeometryType,
    pub geometry: Vec<Vec<(i32, i32)>>,
    /// `(key_id, value)` pairs; `key_id` indexes the layer's interned keys
    pub attrs: Vec<(u32, AttrValue)>,
    /// Profile-supplied feature id to emit in the wire format
    pub id: Option<u64>,
    /// Set when the geometry is a polygon ring coincident with the buffered
    /// tile boundary
    pub is_fill: bool,
    /// Label grid cell this point landed in, when the emitting layer set a
    /// grid size; consumed by post-processing to rank labels per cell
    pub label_grid_cell: Option<u64>,
}

const FLAG_HAS_ID: u8 = 0x08;
const FLAG_FILL: u8 = 0x10;
const FLAG_GRID: u8 = 0x20;

impl RenderedFeature {
    /// Serialize everything after the sort key into `buf`.
    pub fn encode_value(&self, buf: &mut Vec<u8>) {
        let mut flags = self.geometry_type as u8;
        if self.id.is_some() {
            flags |= FLAG_HAS_ID;
        }
        if self.is_fill {
            flags |= FLAG_FILL;
        }
        if self.label_grid_cell.is_some() {
            flags |= FLAG_GRID;
        }
        buf.push(flags);

        if let Some(id) = self.id {
            write_varint(buf, id);
        }
        if let Some(cell) = self.label_grid_cell {
            write_varint(buf, cell);
        }

        write_varint(buf, self.geometry.len() as u64);
        let (mut cx, mut cy) = (0i32, 0i32);
        for part in &self.geometry {
            write_varint(buf, part.len() as u64);
            for &(x, y) in part {
                write_varint(buf, zigzag_encode(x - cx) as u64);
                write_varint(buf, zigzag_encode(y - cy) as u64);
                cx = x;
                cy = y;
            }
        }

        write_varint(buf, self.attrs.len() as u64);
        for (key_id, value) in &self.attrs {
            write_varint(buf, *key_id as u64);
            match value {
                AttrValue::String(s) => {
                    buf.push(VALUE_STRING);
                    write_varint(buf, s.len() as u64);
                    buf.extend_from_slice(s.as_bytes());
                }
                AttrValue::Long(v) => {
                    buf.push(VALUE_LONG);
                    write_varint(buf, zigzag_encode64(*v));
                }
                AttrValue::Double(v) => {
                    buf.push(VALUE_DOUBLE);
                    buf.extend_from_slice(&v.to_le_bytes());
                }
                AttrValue::Bool(v) => {
                    buf.push(VALUE_BOOL);
                    buf.push(u8::from(*v));
                }
            }
        }
    }

    /// Decode a record from its sort key and value bytes.
    pub fn decode(sort_key: SortKey, data: &[u8]) -> Result<Self> {
        let mut cursor = Reader::new(data);

        let flags = cursor.byte()?;
        let geometry_type = GeometryType::from_code(flags & 0x07)
            .ok_or_else(|| Error::Internal(format!("bad geometry type code {}", flags & 0x07)))?;

        let id = if flags & FLAG_HAS_ID != 0 {
            Some(cursor.varint()?)
        } else {
            None
        };
        let label_grid_cell = if flags & FLAG_GRID != 0 {
            Some(cursor.varint()?)
        } else {
            None
        };

        let num_parts = cursor.varint()? as usize;
        let mut geometry = Vec::with_capacity(num_parts);
        let (mut cx, mut cy) = (0i32, 0i32);
        for _ in 0..num_parts {
            let num_points = cursor.varint()? as usize;
            let mut part = Vec::with_capacity(num_points);
            for _ in 0..num_points {
                cx += zigzag_decode(cursor.varint()? as u32);
                cy += zigzag_decode(cursor.varint()? as u32);
                part.push((cx, cy));
            }
            geometry.push(part);
        }

        let num_attrs = cursor.varint()? as usize;
        let mut attrs = Vec::with_capacity(num_attrs);
        for _ in 0..num_attrs {
            let key_id = cursor.varint()? as u32;
            let value = match cursor.byte()? {
                VALUE_STRING => {
                    let len = cursor.varint()? as usize;
                    let bytes = cursor.bytes(len)?;
                    AttrValue::String(String::from_utf8(bytes.to_vec()).map_err(|_| {
                        Error::Internal("non-utf8 string attribute".to_string())
                    })?)
                }
                VALUE_LONG => AttrValue::Long(zigzag_decode64(cursor.varint()?)),
                VALUE_DOUBLE => AttrValue::Double(f64::from_le_bytes(
                    cursor.bytes(8)?.try_into().expect("8 bytes"),
                )),
                VALUE_BOOL => AttrValue::Bool(cursor.byte()? != 0),
                other => {
                    return Err(Error::Internal(format!("bad attribute type code {}", other)))
                }
            };
            attrs.push((key_id, value));
        }

        Ok(Self {
            sort_key,
            geometry_type,
            geometry,
            attrs,
            id,
            is_fill: flags & FLAG_FILL != 0,
            label_grid_cell,
        })
    }
}

/// Slice reader with decode-error reporting.
struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    fn byte(&mut self) -> Result<u8> {
        let b = *self
            .data
            .get(self.pos)
            .ok_or_else(|| Error::Internal("truncated record".to_string()))?;
        self.pos += 1;
        Ok(b)
    }

    fn bytes(&mut self, len: usize) -> Result<&'a [u8]> {
        let end = self.pos + len;
        let slice = self
            .data
            .get(self.pos..end)
            .ok_or_else(|| Error::Internal("truncated record".to_string()))?;
        self.pos = end;
        Ok(slice)
    }

    fn varint(&mut self) -> Result<u64> {
        let (value, consumed) = decode_varint(&self.data[self.pos..])
            .ok_or_else(|| Error::Internal("truncated varint in record".to_string()))?;
        self.pos += consumed;
        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_feature() -> RenderedFeature {
        RenderedFeature {
            sort_key: SortKey::pack(42, 1, 0, 0),
            geometry_type: GeometryType::Polygon,
            geometry: vec![vec![(0, 0), (4096, 0), (4096, 4096), (0, 4096), (0, 0)]],
            attrs: vec![
                (0, AttrValue::String("water".to_string())),
                (1, AttrValue::Long(-7)),
                (2, AttrValue::Double(2.5)),
                (3, AttrValue::Bool(true)),
            ],
            id: Some(99),
            is_fill: true,
            label_grid_cell: Some(12),
        }
    }

    #[test]
    fn test_encode_decode_round_trip() {
        let feature = sample_feature();
        let mut buf = Vec::new();
        feature.encode_value(&mut buf);

        let decoded = RenderedFeature::decode(feature.sort_key, &buf).unwrap();
        assert_eq!(decoded, feature);
    }

    #[test]
    fn test_round_trip_without_id_or_attrs() {
        let feature = RenderedFeature {
            sort_key: SortKey::pack(1, 0, 0, 0),
            geometry_type: GeometryType::Point,
            geometry: vec![vec![(2048, 2048)]],
            attrs: vec![],
            id: None,
            is_fill: false,
            label_grid_cell: None,
        };
        let mut buf = Vec::new();
        feature.encode_value(&mut buf);

        let decoded = RenderedFeature::decode(feature.sort_key, &buf).unwrap();
        assert_eq!(decoded, feature);
        assert!(decoded.id.is_none());
    }

    #[test]
    fn test_negative_coordinates_from_buffer() {
        // buffered geometry can dip below 0 and beyond the extent
        let feature = RenderedFeature {
            sort_key: SortKey::pack(1, 0, 0, 0),
            geometry_type: GeometryType::Line,
            geometry: vec![vec![(-64, -64), (4160, 4160)]],
            attrs: vec![],
            id: None,
            is_fill: false,
            label_grid_cell: None,
        };
        let mut buf = Vec::new();
        feature.encode_value(&mut buf);
        let decoded = RenderedFeature::decode(feature.sort_key, &buf).unwrap();
        assert_eq!(decoded.geometry, feature.geometry);
    }

    #[test]
    fn test_multi_part_cursor_continues_across_parts() {
        let feature = RenderedFeature {
            sort_key: SortKey::pack(1, 0, 0, 0),
            geometry_type: GeometryType::MultiLine,
            geometry: vec![vec![(0, 0), (100, 100)], vec![(200, 200), (300, 100)]],
            attrs: vec![],
            id: None,
            is_fill: false,
            label_grid_cell: None,
        };
        let mut buf = Vec::new();
        feature.encode_value(&mut buf);
        let decoded = RenderedFeature::decode(feature.sort_key, &buf).unwrap();
        assert_eq!(decoded.geometry, feature.geometry);
    }

    #[test]
    fn test_point_record_is_small() {
        let feature = RenderedFeature {
            sort_key: SortKey::pack(1, 0, 0, 0),
            geometry_type: GeometryType::Point,
            geometry: vec![vec![(2048, 2048)]],
            attrs: vec![],
            id: None,
            is_fill: false,
            label_grid_cell: None,
        };
        let mut buf = Vec::new();
        feature.encode_value(&mut buf);
        // flags + part count + point count + two 2-byte deltas + attr count
        assert!(buf.len() <= 10, "point record grew to {} bytes", buf.len());
    }

    #[test]
    fn test_decode_rejects_truncated_record() {
        let feature = sample_feature();
        let mut buf = Vec::new();
        feature.encode_value(&mut buf);
        buf.truncate(buf.len() / 2);
        assert!(RenderedFeature::decode(feature.sort_key, &buf).is_err());
    }

    #[test]
    fn test_decode_rejects_bad_geometry_code() {
        let buf = vec![0x07, 0, 0]; // geometry code 7 does not exist
        assert!(RenderedFeature::decode(SortKey::from_raw(0), &buf).is_err());
    }
}
