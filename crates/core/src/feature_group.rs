//! Grouping the sorted record stream into per-tile feature runs.
//!
//! The sorter yields records in strict sort-key order, so all records of one
//! tile are contiguous. [`FeatureGroup`] wraps that stream and yields one
//! [`TileGroup`] per tile, partitioned into layers, with the profile's
//! post-processing already applied. A recoverable geometry error from the
//! profile is logged and the original features pass through unchanged.
//!
//! Layer names and per-layer attribute keys are interned in a
//! [`LayerRegistry`] shared between the render and encode stages: render
//! workers intern while emitting, the encoder reads names back while
//! building tiles.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use xxhash_rust::xxh3::Xxh3;

use crate::external_sort::SortEntry;
use crate::feature::RenderedFeature;
use crate::profile::Profile;
use crate::sort_key::SortKey;
use crate::tile::{TileCoord, TileOrder};
use crate::{Error, Result};

/// Interned layer names and per-layer attribute key tables.
///
/// Layer ids are assigned in first-use order, which is also the order layers
/// appear within each tile (the sort key encodes the id). At most 256 layers
/// can exist; exceeding that is a programmer error.
#[derive(Debug, Default)]
pub struct LayerRegistry {
    inner: Mutex<RegistryInner>,
}

#[derive(Debug, Default)]
struct RegistryInner {
    layers: Vec<LayerEntry>,
    ids_by_name: HashMap<String, u8>,
}

#[derive(Debug)]
struct LayerEntry {
    name: String,
    keys: Vec<String>,
    key_ids: HashMap<String, u32>,
    /// MVT metadata type per key ("String", "Number", "Boolean")
    key_types: Vec<&'static str>,
}

impl LayerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Id for a layer name, interning it on first use.
    pub fn layer_id(&self, name: &str) -> u8 {
        let mut inner = self.inner.lock().expect("registry poisoned");
        if let Some(&id) = inner.ids_by_name.get(name) {
            return id;
        }
        let id = inner.layers.len();
        assert!(id <= u8::MAX as usize, "more than 256 output layers");
        inner.layers.push(LayerEntry {
            name: name.to_string(),
            keys: Vec::new(),
            key_ids: HashMap::new(),
            key_types: Vec::new(),
        });
        inner.ids_by_name.insert(name.to_string(), id as u8);
        id as u8
    }

    /// Id for an attribute key within a layer, interning on first use.
    pub fn key_id(&self, layer_id: u8, key: &str) -> u32 {
        self.key_id_for_value(layer_id, key, None)
    }

    /// Like [`Self::key_id`], additionally recording the key's metadata
    /// type from the first value seen.
    pub fn key_id_for_value(
        &self,
        layer_id: u8,
        key: &str,
        value: Option<&crate::feature::AttrValue>,
    ) -> u32 {
        use crate::feature::AttrValue;
        let type_name = match value {
            Some(AttrValue::String(_)) | None => "String",
            Some(AttrValue::Long(_)) | Some(AttrValue::Double(_)) => "Number",
            Some(AttrValue::Bool(_)) => "Boolean",
        };
        let mut inner = self.inner.lock().expect("registry poisoned");
        let layer = &mut inner.layers[layer_id as usize];
        if let Some(&id) = layer.key_ids.get(key) {
            return id;
        }
        let id = layer.keys.len() as u32;
        layer.keys.push(key.to_string());
        layer.key_ids.insert(key.to_string(), id);
        layer.key_types.push(type_name);
        id
    }

    /// `field name → MVT type` map for one layer's archive metadata.
    pub fn layer_fields(&self, layer_id: u8) -> HashMap<String, String> {
        let inner = self.inner.lock().expect("registry poisoned");
        let layer = &inner.layers[layer_id as usize];
        layer
            .keys
            .iter()
            .zip(&layer.key_types)
            .map(|(k, t)| (k.clone(), t.to_string()))
            .collect()
    }

    pub fn layer_name(&self, layer_id: u8) -> String {
        let inner = self.inner.lock().expect("registry poisoned");
        inner.layers[layer_id as usize].name.clone()
    }

    /// Snapshot of a layer's interned keys, indexed by key id.
    pub fn layer_keys(&self, layer_id: u8) -> Vec<String> {
        let inner = self.inner.lock().expect("registry poisoned");
        inner.layers[layer_id as usize].keys.clone()
    }

    pub fn layer_count(&self) -> usize {
        self.inner.lock().expect("registry poisoned").layers.len()
    }
}

/// The ordered run of render-features sharing one tile id.
#[derive(Debug, Clone)]
pub struct TileGroup {
    pub coord: TileCoord,
    pub tile_id: u32,
    pub features: Vec<RenderedFeature>,
}

impl TileGroup {
    pub fn num_features(&self) -> usize {
        self.features.len()
    }

    /// Contiguous `(layer_id, features)` runs in layer order.
    pub fn layers(&self) -> Vec<(u8, &[RenderedFeature])> {
        let mut runs = Vec::new();
        let mut start = 0;
        for i in 1..=self.features.len() {
            let boundary = i == self.features.len()
                || self.features[i].sort_key.layer_id() != self.features[start].sort_key.layer_id();
            if boundary {
                runs.push((
                    self.features[start].sort_key.layer_id(),
                    &self.features[start..i],
                ));
                start = i;
            }
        }
        runs
    }

    /// Content fingerprint over everything that feeds the encoder, excluding
    /// the tile id. Two groups with equal fingerprints encode to identical
    /// bytes, so the encoder can reuse its previous output.
    pub fn fingerprint(&self) -> u64 {
        let mut hasher = Xxh3::new();
        let mut buf = Vec::new();
        for feature in &self.features {
            // low 32 bits carry layer, sort order, and tie-break
            hasher.update(&(feature.sort_key.raw() as u32).to_le_bytes());
            buf.clear();
            feature.encode_value(&mut buf);
            hasher.update(&(buf.len() as u32).to_le_bytes());
            hasher.update(&buf);
        }
        hasher.digest()
    }

    /// Cheap memoization check against the previously encoded group.
    pub fn has_same_contents(&self, previous: Option<&TileGroup>) -> bool {
        previous.is_some_and(|prev| {
            prev.num_features() == self.num_features() && prev.fingerprint() == self.fingerprint()
        })
    }

    /// Whether this group is worth content-hashing for dedup: polygon-only
    /// groups whose every feature covers the whole tile (ocean and other
    /// fill runs repeat across huge areas).
    pub fn is_likely_duplicated(&self) -> bool {
        !self.features.is_empty()
            && self
                .features
                .iter()
                .all(|f| f.is_fill && f.geometry_type.is_polygon())
    }
}

/// Iterator adapter producing post-processed [`TileGroup`]s from the sorted
/// entry stream. Single-consumer, like the merge underneath it.
pub struct FeatureGroup<I: Iterator<Item = Result<SortEntry>>> {
    entries: I,
    pending: Option<RenderedFeature>,
    registry: Arc<LayerRegistry>,
    profile: Arc<dyn Profile>,
    order: TileOrder,
}

impl<I: Iterator<Item = Result<SortEntry>>> FeatureGroup<I> {
    pub fn new(
        entries: I,
        registry: Arc<LayerRegistry>,
        profile: Arc<dyn Profile>,
        order: TileOrder,
    ) -> Self {
        Self {
            entries,
            pending: None,
            registry,
            profile,
            order,
        }
    }

    fn next_feature(&mut self) -> Option<Result<RenderedFeature>> {
        if let Some(feature) = self.pending.take() {
            return Some(Ok(feature));
        }
        self.entries.next().map(|entry| {
            let entry = entry?;
            RenderedFeature::decode(SortKey::from_raw(entry.key), &entry.value)
        })
    }

    /// Run the profile's per-layer post-processing over a complete group.
    fn post_process(&self, group: &mut TileGroup) -> Result<()> {
        let zoom = group.coord.z;
        let mut output = Vec::with_capacity(group.features.len());
        for (layer_id, run) in group.layers() {
            let layer_name = self.registry.layer_name(layer_id);
            match self
                .profile
                .post_process_layer_features(&layer_name, zoom, run.to_vec())
            {
                Ok(processed) => output.extend(processed),
                Err(Error::Geometry(reason)) => {
                    log::warn!(
                        "post-process failed for layer {} in {}: {}; keeping original features",
                        layer_name,
                        group.coord,
                        reason
                    );
                    output.extend_from_slice(run);
                }
                Err(fatal) => return Err(fatal),
            }
        }
        group.features = output;
        Ok(())
    }
}

impl<I: Iterator<Item = Result<SortEntry>>> Iterator for FeatureGroup<I> {
    type Item = Result<TileGroup>;

    fn next(&mut self) -> Option<Self::Item> {
        let first = match self.next_feature()? {
            Ok(feature) => feature,
            Err(e) => return Some(Err(e)),
        };
        let tile_id = first.sort_key.tile_id();
        let mut group = TileGroup {
            coord: self.order.decode(tile_id),
            tile_id,
            features: vec![first],
        };

        loop {
            match self.next_feature() {
                None => break,
                Some(Err(e)) => return Some(Err(e)),
                Some(Ok(feature)) => {
                    if feature.sort_key.tile_id() == tile_id {
                        group.features.push(feature);
                    } else {
                        self.pending = Some(feature);
                        break;
                    }
                }
            }
        }

        if let Err(e) = self.post_process(&mut group) {
            return Some(Err(e));
        }
        Some(Ok(group))
    }
}

/// Keep at most `limit` features per label grid cell, preserving order.
///
/// Features without a grid cell always pass. Profiles call this from
/// `post_process_layer_features` after sorting by rank.
pub fn limit_label_grid(features: Vec<RenderedFeature>, limit: usize) -> Vec<RenderedFeature> {
    let mut counts: HashMap<u64, usize> = HashMap::new();
    features
        .into_iter()
        .filter(|f| match f.label_grid_cell {
            None => true,
            Some(cell) => {
                let count = counts.entry(cell).or_insert(0);
                *count += 1;
                *count <= limit
            }
        })
        .collect()
}
