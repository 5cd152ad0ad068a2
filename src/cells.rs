use crate::coloc::MatchTable;
use crate::population::{object_from_voxels, Object3D, ObjectPopulation};

/// The three geometric compartments measured per cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectKind {
    Cell,
    Nucleus,
    Cytoplasm,
}

impl ObjectKind {
    pub const ALL: [ObjectKind; 3] = [ObjectKind::Cell, ObjectKind::Nucleus, ObjectKind::Cytoplasm];

    fn index(self) -> usize {
        match self {
            ObjectKind::Cell => 0,
            ObjectKind::Nucleus => 1,
            ObjectKind::Cytoplasm => 2,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            ObjectKind::Cell => "cell",
            ObjectKind::Nucleus => "nucleus",
            ObjectKind::Cytoplasm => "cytoplasm",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Metric {
    Volume,
    Intensity,
}

impl Metric {
    fn index(self) -> usize {
        match self {
            Metric::Volume => 0,
            Metric::Intensity => 1,
        }
    }
}

/// Per-cell measurement table over {cell, nucleus, cytoplasm} x
/// {volume, intensity}. Entries for absent compartments stay NaN.
#[derive(Debug, Clone, PartialEq)]
pub struct Measurements {
    values: [[f64; 2]; 3],
}

impl Measurements {
    pub fn new() -> Measurements {
        Measurements {
            values: [[f64::NAN; 2]; 3],
        }
    }

    pub fn get(&self, kind: ObjectKind, metric: Metric) -> f64 {
        self.values[kind.index()][metric.index()]
    }

    pub fn set(&mut self, kind: ObjectKind, metric: Metric, value: f64) {
        self.values[kind.index()][metric.index()] = value;
    }
}

impl Default for Measurements {
    fn default() -> Measurements {
        Measurements::new()
    }
}

/// One marker channel of the phenotyping panel.
#[derive(Debug, Clone, PartialEq)]
pub struct MarkerChannel {
    pub name: String,
    /// Fraction of the nucleus volume a marker object must cover to claim it.
    pub coloc_fraction: f64,
}

/// The fixed panel variants this pipeline supports. Channel order is the
/// precedence order: when a nucleus is positive for several markers, the
/// first channel checked provides the representative cell geometry.
#[derive(Debug, Clone, PartialEq)]
pub enum MarkerPanel {
    Single(MarkerChannel),
    Dual {
        primary: MarkerChannel,
        secondary: MarkerChannel,
    },
}

impl MarkerPanel {
    pub fn channels(&self) -> Vec<&MarkerChannel> {
        match self {
            MarkerPanel::Single(ch) => vec![ch],
            MarkerPanel::Dual { primary, secondary } => vec![primary, secondary],
        }
    }

    pub fn num_flags(&self) -> usize {
        self.channels().len()
    }
}

/// A reconstructed cell, anchored on its nucleus. The full-cell object
/// and the derived cytoplasm are absent when no marker channel claimed
/// the nucleus.
#[derive(Debug, Clone)]
pub struct Cell {
    pub label: u32,
    pub nucleus: Object3D,
    pub cell: Option<Object3D>,
    pub cytoplasm: Option<Object3D>,
    /// One positivity flag per panel channel, in panel order.
    pub positive: Vec<bool>,
    pub measurements: Measurements,
}

/// Cytoplasm geometry: voxels of `cell` that are not in `nucleus`.
/// None when the difference is empty.
pub fn subtract_nucleus(
    cell: &Object3D,
    nucleus: &Object3D,
    dims: (usize, usize, usize),
) -> Option<Object3D> {
    let mut voxels = Vec::with_capacity(cell.voxel_count());
    let mut j = 0;
    for &v in &cell.voxels {
        while j < nucleus.voxels.len() && nucleus.voxels[j] < v {
            j += 1;
        }
        if j < nucleus.voxels.len() && nucleus.voxels[j] == v {
            continue;
        }
        voxels.push(v);
    }
    object_from_voxels(nucleus.label, voxels, dims)
}

/// Assemble one Cell per nucleus. `channels` pairs each marker channel's
/// filtered population with its match table, in panel precedence order.
/// Marker objects that matched no nucleus are dropped. Output cells are
/// relabeled sequentially from 1; nucleus, cell, and cytoplasm share the
/// cell's label.
pub fn assemble_cells(
    nuclei: &ObjectPopulation,
    channels: &[(&ObjectPopulation, &MatchTable)],
) -> Vec<Cell> {
    let mut cells = Vec::with_capacity(nuclei.len());

    for nucleus in &nuclei.objects {
        let positive: Vec<bool> = channels
            .iter()
            .map(|(_, table)| table.contains_key(&nucleus.label))
            .collect();

        let cell_object = channels.iter().find_map(|(pop, table)| {
            let entry = table.get(&nucleus.label)?;
            pop.get_by_label(entry.marker_label).cloned()
        });

        let cytoplasm = cell_object
            .as_ref()
            .and_then(|cell| subtract_nucleus(cell, nucleus, nuclei.dims));

        cells.push(Cell {
            label: nucleus.label,
            nucleus: nucleus.clone(),
            cell: cell_object,
            cytoplasm,
            positive,
            measurements: Measurements::new(),
        });
    }

    for (i, cell) in cells.iter_mut().enumerate() {
        let label = (i + 1) as u32;
        cell.label = label;
        cell.nucleus.label = label;
        if let Some(obj) = cell.cell.as_mut() {
            obj.label = label;
        }
        if let Some(obj) = cell.cytoplasm.as_mut() {
            obj.label = label;
        }
    }

    cells
}
