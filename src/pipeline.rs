use log::info;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::cells::{assemble_cells, Cell};
use crate::coloc::{match_to_nuclei, MatchTable};
use crate::config::PipelineConfig;
use crate::population::ObjectPopulation;
use crate::segmentation::{SegmentationBackend, SegmentationError};
use crate::stats::{fill_intensities, fill_volumes, summarize_image, ImageSummary};
use crate::volume::{IntensityVolume, VolumeError};

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Segmentation(#[from] SegmentationError),

    #[error(transparent)]
    Volume(#[from] VolumeError),

    #[error("error scanning {path}: {source}")]
    Scan {
        path: String,
        source: std::io::Error,
    },
}

/// Everything produced for one image. Discarded once its report rows are
/// written; no state crosses image boundaries.
#[derive(Debug)]
pub struct ImageResult {
    pub name: String,
    pub cells: Vec<Cell>,
    pub summary: ImageSummary,
}

pub fn channel_path(dir: &Path, stem: &str, channel: &str) -> PathBuf {
    dir.join(format!("{stem}_{channel}.npy"))
}

/// Discover image stems in a directory by their nucleus-channel volume
/// (`<stem>_<channel>.npy`), sorted for a deterministic processing order.
pub fn find_images(dir: &Path, nucleus_channel: &str) -> Result<Vec<String>, PipelineError> {
    let suffix = format!("_{nucleus_channel}.npy");
    let mut stems = Vec::new();

    let entries = std::fs::read_dir(dir).map_err(|source| PipelineError::Scan {
        path: dir.display().to_string(),
        source,
    })?;
    for entry in entries {
        let entry = entry.map_err(|source| PipelineError::Scan {
            path: dir.display().to_string(),
            source,
        })?;
        let name = entry.file_name().to_string_lossy().into_owned();
        if name.ends_with(&suffix) && !name.ends_with("_labels.npy") && !name.starts_with('.') {
            stems.push(name[..name.len() - suffix.len()].to_string());
        }
    }
    stems.sort();
    Ok(stems)
}

fn detect_population(
    cfg: &PipelineConfig,
    backend: &dyn SegmentationBackend,
    path: &Path,
    nucleus: bool,
) -> Result<(ObjectPopulation, f64), PipelineError> {
    let (params, range) = if nucleus {
        (&cfg.nucleus_segmentation, cfg.nucleus_volume)
    } else {
        (&cfg.cell_segmentation, cfg.cell_volume)
    };

    let labels = backend.segment(path, params, &cfg.calibration)?;
    let image_volume = labels.physical_volume();
    let voxel_volume = cfg.calibration.voxel_volume();

    let pop = ObjectPopulation::from_label_volume(&labels);
    info!("{}: {} detections", path.display(), pop.len());
    let pop = pop.filter_single_slice();
    let mut pop = pop.filter_by_size(range.min, range.max, voxel_volume);
    pop.reset_labels();
    info!("{}: {} detections after filtering", path.display(), pop.len());

    Ok((pop, image_volume))
}

/// Run the full reconstruction for one image: segment each channel,
/// filter the populations, match marker objects to nuclei, assemble
/// cells with derived cytoplasms, and aggregate statistics. Every
/// intermediate volume is dropped before returning.
pub fn process_image(
    cfg: &PipelineConfig,
    backend: &dyn SegmentationBackend,
    dir: &Path,
    stem: &str,
) -> Result<ImageResult, PipelineError> {
    let nucleus_path = channel_path(dir, stem, &cfg.nucleus_channel);
    let (nuclei, image_volume) = detect_population(cfg, backend, &nucleus_path, true)?;
    if nuclei.is_empty() {
        info!("{stem}: no nuclei detected, image will report zero cells");
    }
    let dims = nuclei.dims;

    let mut matched: Vec<(ObjectPopulation, MatchTable)> = Vec::new();
    for channel in cfg.panel.channels() {
        let path = channel_path(dir, stem, &channel.name);
        let (pop, _) = detect_population(cfg, backend, &path, false)?;
        if pop.dims != dims {
            return Err(VolumeError::DimensionMismatch {
                path: path.display().to_string(),
                found: pop.dims,
                expected: dims,
            }
            .into());
        }
        let table = match_to_nuclei(&pop, &nuclei, channel.coloc_fraction);
        info!(
            "{stem}: {} of {} nuclei are {}-positive",
            table.len(),
            nuclei.len(),
            channel.name
        );
        matched.push((pop, table));
    }

    let channel_refs: Vec<(&ObjectPopulation, &MatchTable)> =
        matched.iter().map(|(pop, table)| (pop, table)).collect();
    let mut cells = assemble_cells(&nuclei, &channel_refs);

    let intensity_path = channel_path(dir, stem, &cfg.intensity_channel);
    let intensity = IntensityVolume::from_npy(&intensity_path)?;
    if intensity.dims() != dims {
        return Err(VolumeError::DimensionMismatch {
            path: intensity_path.display().to_string(),
            found: intensity.dims(),
            expected: dims,
        }
        .into());
    }

    let voxel_volume = cfg.calibration.voxel_volume();
    for cell in cells.iter_mut() {
        fill_volumes(cell, voxel_volume);
        fill_intensities(cell, &intensity);
    }

    let table_refs: Vec<&MatchTable> = matched.iter().map(|(_, table)| table).collect();
    let summary = summarize_image(
        &cells,
        &nuclei,
        &table_refs,
        &intensity,
        image_volume,
        cfg.panel.num_flags(),
    );

    Ok(ImageResult {
        name: stem.to_string(),
        cells,
        summary,
    })
}
