use log::debug;
use rayon::prelude::*;
use std::collections::BTreeMap;

use crate::population::{Object3D, ObjectPopulation};

/// Number of voxels shared by two objects. Bounding boxes prune the
/// common no-overlap case, otherwise both sorted index lists are merged.
pub fn pair_overlap(a: &Object3D, b: &Object3D) -> usize {
    if !a.bbox.intersects(&b.bbox) {
        return 0;
    }

    let mut count = 0;
    let (mut i, mut j) = (0, 0);
    while i < a.voxels.len() && j < b.voxels.len() {
        match a.voxels[i].cmp(&b.voxels[j]) {
            std::cmp::Ordering::Less => i += 1,
            std::cmp::Ordering::Greater => j += 1,
            std::cmp::Ordering::Equal => {
                count += 1;
                i += 1;
                j += 1;
            }
        }
    }
    count
}

/// Find the target object that `obj` overlaps best. A target qualifies
/// only if the overlap strictly exceeds `fraction` of the *target's* own
/// voxel count; among qualifying targets the largest overlap wins, with
/// ties going to the earlier object in population order.
pub fn best_match<'a>(
    obj: &Object3D,
    targets: &'a ObjectPopulation,
    fraction: f64,
) -> Option<(&'a Object3D, usize)> {
    let mut best: Option<(&Object3D, usize)> = None;
    for target in &targets.objects {
        let overlap = pair_overlap(obj, target);
        if overlap as f64 > fraction * target.voxel_count() as f64
            && best.map_or(true, |(_, best_overlap)| overlap > best_overlap)
        {
            best = Some((target, overlap));
        }
    }
    best
}

/// One accepted (nucleus, marker object) match.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MatchEntry {
    pub marker_label: u32,
    pub overlap: usize,
}

/// Explicit match table from nucleus label to the marker object claiming
/// it, replacing any in-place tagging of the geometry.
pub type MatchTable = BTreeMap<u32, MatchEntry>;

/// Match every marker object against the nuclei population. When several
/// marker objects claim the same nucleus, the pair with the largest
/// overlap volume is kept (ties: earlier marker in population order).
pub fn match_to_nuclei(
    markers: &ObjectPopulation,
    nuclei: &ObjectPopulation,
    fraction: f64,
) -> MatchTable {
    let candidates: Vec<(u32, MatchEntry)> = markers
        .objects
        .par_iter()
        .filter_map(|marker| {
            best_match(marker, nuclei, fraction).map(|(nucleus, overlap)| {
                (
                    nucleus.label,
                    MatchEntry {
                        marker_label: marker.label,
                        overlap,
                    },
                )
            })
        })
        .collect();

    let mut table = MatchTable::new();
    for (nucleus_label, entry) in candidates {
        match table.get(&nucleus_label) {
            Some(existing) if existing.overlap >= entry.overlap => {}
            _ => {
                table.insert(nucleus_label, entry);
            }
        }
    }
    debug!(
        "{} of {} marker objects matched a nucleus",
        table.len(),
        markers.len()
    );
    table
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::population::object_from_voxels;

    const DIMS: (usize, usize, usize) = (8, 8, 8);

    fn obj(label: u32, voxels: Vec<usize>) -> Object3D {
        object_from_voxels(label, voxels, DIMS).unwrap()
    }

    fn pop(objects: Vec<Object3D>) -> ObjectPopulation {
        ObjectPopulation {
            dims: DIMS,
            objects,
        }
    }

    #[test]
    fn self_overlap_equals_voxel_count() {
        let a = obj(1, vec![0, 1, 8, 64, 65]);
        assert_eq!(pair_overlap(&a, &a), a.voxel_count());
    }

    #[test]
    fn overlap_is_symmetric() {
        let a = obj(1, vec![0, 1, 2, 8, 9]);
        let b = obj(2, vec![1, 2, 3, 9, 10, 64]);
        assert_eq!(pair_overlap(&a, &b), 3);
        assert_eq!(pair_overlap(&b, &a), pair_overlap(&a, &b));
    }

    #[test]
    fn disjoint_objects_have_zero_overlap() {
        // far apart, also exercises the bbox pruning path
        let a = obj(1, vec![0, 1]);
        let b = obj(2, vec![7 * 64 + 7 * 8 + 7]);
        assert_eq!(pair_overlap(&a, &b), 0);
    }

    #[test]
    fn best_match_threshold_is_strict() {
        // marker covers exactly half of a 4-voxel nucleus
        let nucleus = obj(1, vec![0, 1, 2, 3]);
        let marker = obj(1, vec![0, 1, 8, 9, 10, 11]);
        let nuclei = pop(vec![nucleus]);

        assert!(best_match(&marker, &nuclei, 0.5).is_none());
        let (matched, overlap) = best_match(&marker, &nuclei, 0.25).unwrap();
        assert_eq!(matched.label, 1);
        assert_eq!(overlap, 2);
    }

    #[test]
    fn best_match_accepts_full_containment() {
        let nucleus = obj(1, vec![8, 9, 16, 17]);
        let marker = obj(1, (0..32).collect());
        let nuclei = pop(vec![nucleus]);
        let (_, overlap) = best_match(&marker, &nuclei, 0.25).unwrap();
        assert_eq!(overlap, 4);
    }

    #[test]
    fn best_match_prefers_largest_overlap() {
        let small = obj(1, vec![0, 1]);
        let large = obj(2, vec![2, 3, 4, 5]);
        let marker = obj(1, vec![0, 1, 2, 3, 4, 5]);
        let nuclei = pop(vec![small, large]);

        let (matched, overlap) = best_match(&marker, &nuclei, 0.5).unwrap();
        assert_eq!(matched.label, 2);
        assert_eq!(overlap, 4);
    }

    #[test]
    fn match_table_keeps_largest_claim_per_nucleus() {
        let nucleus = obj(7, vec![0, 1, 2, 3]);
        let weak = obj(1, vec![0, 1, 2, 8]);
        let strong = obj(2, vec![0, 1, 2, 3, 9]);
        let nuclei = pop(vec![nucleus]);
        let markers = pop(vec![weak, strong]);

        let table = match_to_nuclei(&markers, &nuclei, 0.5);
        assert_eq!(table.len(), 1);
        assert_eq!(
            table[&7],
            MatchEntry {
                marker_label: 2,
                overlap: 4
            }
        );
    }

    #[test]
    fn empty_populations_produce_empty_tables() {
        let nucleus = obj(1, vec![0, 1]);
        let empty = pop(vec![]);
        assert!(match_to_nuclei(&empty, &pop(vec![nucleus.clone()]), 0.5).is_empty());
        assert!(match_to_nuclei(&pop(vec![nucleus]), &empty, 0.5).is_empty());
    }
}
