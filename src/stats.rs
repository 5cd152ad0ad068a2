use crate::cells::{Cell, Metric, ObjectKind};
use crate::coloc::MatchTable;
use crate::population::{Object3D, ObjectPopulation};
use crate::volume::IntensityVolume;

/// Mean voxel intensity of one object read from a co-registered channel.
pub fn mean_intensity(obj: &Object3D, intensity: &IntensityVolume) -> f64 {
    if obj.voxels.is_empty() {
        return f64::NAN;
    }
    let sum: f64 = obj
        .voxels
        .iter()
        .map(|&idx| intensity.value_at(idx) as f64)
        .sum();
    sum / obj.voxel_count() as f64
}

/// Record physical volumes for every compartment the cell has. Absent
/// compartments keep their NaN sentinel rather than a misleading zero.
pub fn fill_volumes(cell: &mut Cell, voxel_volume: f64) {
    cell.measurements.set(
        ObjectKind::Nucleus,
        Metric::Volume,
        cell.nucleus.physical_volume(voxel_volume),
    );
    if let Some(obj) = &cell.cell {
        cell.measurements.set(
            ObjectKind::Cell,
            Metric::Volume,
            obj.physical_volume(voxel_volume),
        );
    }
    if let Some(obj) = &cell.cytoplasm {
        cell.measurements.set(
            ObjectKind::Cytoplasm,
            Metric::Volume,
            obj.physical_volume(voxel_volume),
        );
    }
}

/// Record mean intensities for every compartment the cell has.
pub fn fill_intensities(cell: &mut Cell, intensity: &IntensityVolume) {
    cell.measurements.set(
        ObjectKind::Nucleus,
        Metric::Intensity,
        mean_intensity(&cell.nucleus, intensity),
    );
    if let Some(obj) = &cell.cell {
        cell.measurements
            .set(ObjectKind::Cell, Metric::Intensity, mean_intensity(obj, intensity));
    }
    if let Some(obj) = &cell.cytoplasm {
        cell.measurements.set(
            ObjectKind::Cytoplasm,
            Metric::Intensity,
            mean_intensity(obj, intensity),
        );
    }
}

/// Mean of one measurement across the population, skipping cells where
/// the compartment is absent (NaN). NaN on an empty population.
pub fn mean_measurement(cells: &[Cell], kind: ObjectKind, metric: Metric) -> f64 {
    let mut sum = 0.0;
    let mut n = 0usize;
    for cell in cells {
        let value = cell.measurements.get(kind, metric);
        if value.is_finite() {
            sum += value;
            n += 1;
        }
    }
    if n == 0 {
        f64::NAN
    } else {
        sum / n as f64
    }
}

/// Partition the population over the 2^k flag combinations of a k-marker
/// panel. Index 0 is all-positive, the last index all-negative; within
/// the index, earlier channels occupy higher bits.
pub fn count_by_flags(cells: &[Cell], num_flags: usize) -> Vec<usize> {
    let mut counts = vec![0usize; 1 << num_flags];
    for cell in cells {
        let mut idx = 0usize;
        for &flag in &cell.positive {
            idx = (idx << 1) | usize::from(!flag);
        }
        counts[idx] += 1;
    }
    counts
}

/// Count and mean intensity of nuclei never claimed by any marker
/// channel, for the negative-population summary row.
pub fn unmatched_nuclei_stats(
    nuclei: &ObjectPopulation,
    tables: &[&MatchTable],
    intensity: &IntensityVolume,
) -> (usize, f64) {
    let mut count = 0usize;
    let mut sum = 0.0;
    for nucleus in &nuclei.objects {
        if tables.iter().any(|t| t.contains_key(&nucleus.label)) {
            continue;
        }
        count += 1;
        sum += mean_intensity(nucleus, intensity);
    }
    if count == 0 {
        (0, f64::NAN)
    } else {
        (count, sum / count as f64)
    }
}

/// Aggregate counts and means reported once per image.
#[derive(Debug, Clone)]
pub struct ImageSummary {
    pub image_volume: f64,
    pub num_cells: usize,
    pub flag_counts: Vec<usize>,
    /// Mean volume / intensity per compartment, in `ObjectKind::ALL` order.
    pub mean_volume: [f64; 3],
    pub mean_intensity: [f64; 3],
    pub negative_nuclei: usize,
    pub negative_nuclei_mean_intensity: f64,
}

pub fn summarize_image(
    cells: &[Cell],
    nuclei: &ObjectPopulation,
    tables: &[&MatchTable],
    intensity: &IntensityVolume,
    image_volume: f64,
    num_flags: usize,
) -> ImageSummary {
    let mut mean_volume = [f64::NAN; 3];
    let mut mean_int = [f64::NAN; 3];
    for (i, kind) in ObjectKind::ALL.into_iter().enumerate() {
        mean_volume[i] = mean_measurement(cells, kind, Metric::Volume);
        mean_int[i] = mean_measurement(cells, kind, Metric::Intensity);
    }
    let (negative_nuclei, negative_nuclei_mean_intensity) =
        unmatched_nuclei_stats(nuclei, tables, intensity);

    ImageSummary {
        image_volume,
        num_cells: cells.len(),
        flag_counts: count_by_flags(cells, num_flags),
        mean_volume,
        mean_intensity: mean_int,
        negative_nuclei,
        negative_nuclei_mean_intensity,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cells::Measurements;
    use crate::population::object_from_voxels;
    use ndarray::Array3;

    const DIMS: (usize, usize, usize) = (4, 4, 4);

    fn obj(label: u32, voxels: Vec<usize>) -> Object3D {
        object_from_voxels(label, voxels, DIMS).unwrap()
    }

    fn bare_cell(label: u32, nucleus_voxels: Vec<usize>, positive: Vec<bool>) -> Cell {
        Cell {
            label,
            nucleus: obj(label, nucleus_voxels),
            cell: None,
            cytoplasm: None,
            positive,
            measurements: Measurements::new(),
        }
    }

    fn ramp_intensity() -> IntensityVolume {
        // value_at(idx) == idx
        let values = Array3::from_shape_fn(DIMS, |(z, y, x)| ((z * 4 + y) * 4 + x) as f32);
        IntensityVolume::new(values)
    }

    #[test]
    fn mean_intensity_is_arithmetic_mean() {
        let intensity = ramp_intensity();
        let o = obj(1, vec![0, 2, 10]);
        assert_eq!(mean_intensity(&o, &intensity), 4.0);
    }

    #[test]
    fn fill_volumes_leaves_absent_compartments_nan() {
        let mut cell = bare_cell(1, vec![0, 1, 2], vec![false]);
        fill_volumes(&mut cell, 2.0);
        assert_eq!(cell.measurements.get(ObjectKind::Nucleus, Metric::Volume), 6.0);
        assert!(cell.measurements.get(ObjectKind::Cell, Metric::Volume).is_nan());
        assert!(cell
            .measurements
            .get(ObjectKind::Cytoplasm, Metric::Volume)
            .is_nan());
    }

    #[test]
    fn fill_volumes_covers_present_compartments() {
        let mut cell = bare_cell(1, vec![0, 1], vec![true]);
        cell.cell = Some(obj(1, vec![0, 1, 2, 3, 4]));
        cell.cytoplasm = Some(obj(1, vec![2, 3, 4]));
        fill_volumes(&mut cell, 1.0);
        assert_eq!(cell.measurements.get(ObjectKind::Cell, Metric::Volume), 5.0);
        assert_eq!(
            cell.measurements.get(ObjectKind::Cytoplasm, Metric::Volume),
            3.0
        );
    }

    #[test]
    fn mean_measurement_skips_absent_values() {
        let mut a = bare_cell(1, vec![0, 1], vec![true]);
        a.cell = Some(obj(1, vec![0, 1, 2, 3]));
        let mut b = bare_cell(2, vec![4, 5], vec![false]);
        fill_volumes(&mut a, 1.0);
        fill_volumes(&mut b, 1.0);

        let cells = vec![a, b];
        // only one cell has a cell compartment
        assert_eq!(mean_measurement(&cells, ObjectKind::Cell, Metric::Volume), 4.0);
        assert_eq!(
            mean_measurement(&cells, ObjectKind::Nucleus, Metric::Volume),
            2.0
        );
    }

    #[test]
    fn mean_measurement_of_empty_population_is_nan() {
        assert!(mean_measurement(&[], ObjectKind::Nucleus, Metric::Volume).is_nan());
    }

    #[test]
    fn count_by_flags_partitions_exactly() {
        let cells = vec![
            bare_cell(1, vec![0], vec![true, true]),
            bare_cell(2, vec![1], vec![true, false]),
            bare_cell(3, vec![2], vec![false, true]),
            bare_cell(4, vec![3], vec![false, false]),
            bare_cell(5, vec![4], vec![true, false]),
        ];
        let counts = count_by_flags(&cells, 2);
        assert_eq!(counts, vec![1, 2, 1, 1]);
        assert_eq!(counts.iter().sum::<usize>(), cells.len());
    }

    #[test]
    fn count_by_flags_single_marker() {
        let cells = vec![
            bare_cell(1, vec![0], vec![true]),
            bare_cell(2, vec![1], vec![false]),
            bare_cell(3, vec![2], vec![false]),
        ];
        assert_eq!(count_by_flags(&cells, 1), vec![1, 2]);
    }

    #[test]
    fn unmatched_nuclei_ignore_matched_labels() {
        use crate::coloc::{MatchEntry, MatchTable};

        let nuclei = ObjectPopulation {
            dims: DIMS,
            objects: vec![obj(1, vec![0, 1]), obj(2, vec![10, 12])],
        };
        let mut table = MatchTable::new();
        table.insert(
            1,
            MatchEntry {
                marker_label: 5,
                overlap: 2,
            },
        );

        let intensity = ramp_intensity();
        let (count, mean) = unmatched_nuclei_stats(&nuclei, &[&table], &intensity);
        assert_eq!(count, 1);
        assert_eq!(mean, 11.0);

        let empty_table = MatchTable::new();
        let (count, _) = unmatched_nuclei_stats(&nuclei, &[&empty_table], &intensity);
        assert_eq!(count, 2);

        let (count, mean) = unmatched_nuclei_stats(&nuclei, &[&table, &table], &intensity);
        assert_eq!(count, 1);
        assert!(mean.is_finite());
    }

    #[test]
    fn summary_counts_match_population_size() {
        let cells = vec![
            bare_cell(1, vec![0], vec![true, false]),
            bare_cell(2, vec![1], vec![false, false]),
        ];
        let nuclei = ObjectPopulation {
            dims: DIMS,
            objects: vec![obj(1, vec![0]), obj(2, vec![1])],
        };
        let intensity = ramp_intensity();
        let summary = summarize_image(&cells, &nuclei, &[], &intensity, 64.0, 2);
        assert_eq!(summary.num_cells, 2);
        assert_eq!(summary.flag_counts.iter().sum::<usize>(), summary.num_cells);
        assert_eq!(summary.negative_nuclei, 2);
        assert_eq!(summary.image_volume, 64.0);
    }
}
