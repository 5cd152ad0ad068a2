use itertools::Itertools;
use log::debug;
use std::collections::HashMap;

use crate::volume::{decode_index, encode_index, LabelVolume};

/// Axis-aligned voxel bounding box, inclusive on every axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BoundingBox {
    pub xmin: usize,
    pub xmax: usize,
    pub ymin: usize,
    pub ymax: usize,
    pub zmin: usize,
    pub zmax: usize,
}

impl BoundingBox {
    fn at(x: usize, y: usize, z: usize) -> BoundingBox {
        BoundingBox {
            xmin: x,
            xmax: x,
            ymin: y,
            ymax: y,
            zmin: z,
            zmax: z,
        }
    }

    fn expand(&mut self, x: usize, y: usize, z: usize) {
        self.xmin = self.xmin.min(x);
        self.xmax = self.xmax.max(x);
        self.ymin = self.ymin.min(y);
        self.ymax = self.ymax.max(y);
        self.zmin = self.zmin.min(z);
        self.zmax = self.zmax.max(z);
    }

    pub fn intersects(&self, other: &BoundingBox) -> bool {
        self.xmin <= other.xmax
            && other.xmin <= self.xmax
            && self.ymin <= other.ymax
            && other.ymin <= self.ymax
            && self.zmin <= other.zmax
            && other.zmin <= self.zmax
    }
}

/// One segmented 3D object: every voxel that carries the same label in
/// the source volume. Voxels are linear indices, sorted ascending.
#[derive(Debug, Clone, PartialEq)]
pub struct Object3D {
    pub label: u32,
    pub voxels: Vec<usize>,
    pub bbox: BoundingBox,
}

impl Object3D {
    pub fn voxel_count(&self) -> usize {
        self.voxels.len()
    }

    pub fn physical_volume(&self, voxel_volume: f64) -> f64 {
        self.voxel_count() as f64 * voxel_volume
    }
}

/// Build an object from an already-sorted voxel index list. Returns None
/// for an empty list, which has no meaningful bounding box.
pub fn object_from_voxels(
    label: u32,
    voxels: Vec<usize>,
    dims: (usize, usize, usize),
) -> Option<Object3D> {
    let mut bbox: Option<BoundingBox> = None;
    for &idx in &voxels {
        let (z, y, x) = decode_index(idx, dims);
        match bbox.as_mut() {
            Some(b) => b.expand(x, y, z),
            None => bbox = Some(BoundingBox::at(x, y, z)),
        }
    }
    bbox.map(|bbox| Object3D {
        label,
        voxels,
        bbox,
    })
}

/// All objects extracted from one label volume, ordered by label.
#[derive(Debug, Clone)]
pub struct ObjectPopulation {
    pub dims: (usize, usize, usize),
    pub objects: Vec<Object3D>,
}

impl ObjectPopulation {
    pub fn from_label_volume(vol: &LabelVolume) -> ObjectPopulation {
        let dims = vol.dims();

        let mut builders: HashMap<u32, (Vec<usize>, BoundingBox)> = HashMap::new();
        for ((z, y, x), &label) in vol.labels.indexed_iter() {
            if label == 0 {
                continue;
            }
            let idx = encode_index(z, y, x, dims);
            builders
                .entry(label)
                .and_modify(|(voxels, bbox)| {
                    voxels.push(idx);
                    bbox.expand(x, y, z);
                })
                .or_insert_with(|| (vec![idx], BoundingBox::at(x, y, z)));
        }

        // indexed_iter visits voxels in logical order, so each object's
        // index list comes out already sorted.
        let objects = builders
            .into_iter()
            .sorted_by_key(|&(label, _)| label)
            .map(|(label, (voxels, bbox))| Object3D {
                label,
                voxels,
                bbox,
            })
            .collect();

        ObjectPopulation { dims, objects }
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    pub fn get_by_label(&self, label: u32) -> Option<&Object3D> {
        self.objects.iter().find(|obj| obj.label == label)
    }

    /// Drop objects confined to a single optical section. Detections with
    /// zmin == zmax are segmentation noise, not real 3D objects.
    pub fn filter_single_slice(self) -> ObjectPopulation {
        let before = self.objects.len();
        let objects: Vec<Object3D> = self
            .objects
            .into_iter()
            .filter(|obj| obj.bbox.zmin != obj.bbox.zmax)
            .collect();
        debug!(
            "single-slice filter removed {} of {} objects",
            before - objects.len(),
            before
        );
        ObjectPopulation {
            dims: self.dims,
            objects,
        }
    }

    /// Keep objects whose physical volume lies in [vol_min, vol_max].
    pub fn filter_by_size(self, vol_min: f64, vol_max: f64, voxel_volume: f64) -> ObjectPopulation {
        let before = self.objects.len();
        let objects: Vec<Object3D> = self
            .objects
            .into_iter()
            .filter(|obj| {
                let vol = obj.physical_volume(voxel_volume);
                vol >= vol_min && vol <= vol_max
            })
            .collect();
        debug!(
            "size filter [{}, {}] removed {} of {} objects",
            vol_min,
            vol_max,
            before - objects.len(),
            before
        );
        ObjectPopulation {
            dims: self.dims,
            objects,
        }
    }

    /// Reassign labels to a dense 1-based sequence in population order,
    /// so downstream consumers can treat labels as row ids.
    pub fn reset_labels(&mut self) {
        for (i, obj) in self.objects.iter_mut().enumerate() {
            obj.label = (i + 1) as u32;
        }
    }
}
