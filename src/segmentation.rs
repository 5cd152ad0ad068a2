use log::info;
use std::path::{Path, PathBuf};
use std::process::Command;
use thiserror::Error;

use crate::volume::{Calibration, LabelVolume, VolumeError};

#[derive(Debug, Error)]
pub enum SegmentationError {
    #[error("segmenter produced no label volume at {0}")]
    MissingOutput(PathBuf),

    #[error("segmenter command {program} failed with {status}")]
    Command {
        program: String,
        status: std::process::ExitStatus,
    },

    #[error("error launching segmenter command {program}: {source}")]
    Launch {
        program: String,
        source: std::io::Error,
    },

    #[error(transparent)]
    Volume(#[from] VolumeError),
}

/// Parameters forwarded to the external segmentation model. The model is
/// a black box: it maps one channel's z-stack to a 3D label volume.
#[derive(Debug, Clone)]
pub struct SegmentationParams {
    pub model: String,
    pub diameter: u32,
    pub stitch_threshold: f64,
}

/// External segmentation backend, consumed per (image, channel) pair.
/// A failure aborts only the image being processed, never the run.
pub trait SegmentationBackend {
    fn segment(
        &self,
        channel_volume: &Path,
        params: &SegmentationParams,
        calibration: &Calibration,
    ) -> Result<LabelVolume, SegmentationError>;
}

/// Sibling path for a channel volume's label file:
/// `<stem>.npy` -> `<stem>_labels.npy`.
pub fn labels_path(channel_volume: &Path) -> PathBuf {
    let stem = channel_volume
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    channel_volume.with_file_name(format!("{stem}_labels.npy"))
}

/// Backend for pre-segmented inputs: loads the sibling `*_labels.npy`
/// file instead of running a model.
pub struct PrecomputedBackend;

impl SegmentationBackend for PrecomputedBackend {
    fn segment(
        &self,
        channel_volume: &Path,
        _params: &SegmentationParams,
        calibration: &Calibration,
    ) -> Result<LabelVolume, SegmentationError> {
        let path = labels_path(channel_volume);
        if !path.exists() {
            return Err(SegmentationError::MissingOutput(path));
        }
        Ok(LabelVolume::from_npy(&path, *calibration)?)
    }
}

/// Backend that shells out to an external segmenter (the Cellpose shape:
/// a conda-env CLI). The command receives the model name, diameter,
/// stitch threshold, input path, and output path as trailing arguments
/// and must leave a `u32` npy label volume at the output path.
pub struct CommandBackend {
    pub program: String,
    pub args: Vec<String>,
}

impl SegmentationBackend for CommandBackend {
    fn segment(
        &self,
        channel_volume: &Path,
        params: &SegmentationParams,
        calibration: &Calibration,
    ) -> Result<LabelVolume, SegmentationError> {
        let output = labels_path(channel_volume);
        info!(
            "segmenting {} with model {}",
            channel_volume.display(),
            params.model
        );

        let status = Command::new(&self.program)
            .args(&self.args)
            .arg(&params.model)
            .arg(params.diameter.to_string())
            .arg(params.stitch_threshold.to_string())
            .arg(channel_volume)
            .arg(&output)
            .status()
            .map_err(|source| SegmentationError::Launch {
                program: self.program.clone(),
                source,
            })?;

        if !status.success() {
            return Err(SegmentationError::Command {
                program: self.program.clone(),
                status,
            });
        }
        if !output.exists() {
            return Err(SegmentationError::MissingOutput(output));
        }
        Ok(LabelVolume::from_npy(&output, *calibration)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array3;
    use ndarray_npy::WriteNpyExt;
    use std::fs::File;

    fn unit_calibration() -> Calibration {
        Calibration {
            pixel_width: 1.0,
            pixel_height: 1.0,
            pixel_depth: 1.0,
        }
    }

    fn params() -> SegmentationParams {
        SegmentationParams {
            model: "cyto".to_string(),
            diameter: 80,
            stitch_threshold: 0.5,
        }
    }

    #[test]
    fn labels_path_is_sibling_with_suffix() {
        assert_eq!(
            labels_path(Path::new("/data/img_DAPI.npy")),
            Path::new("/data/img_DAPI_labels.npy")
        );
    }

    #[test]
    fn precomputed_backend_loads_sibling_file() {
        let dir = tempfile::tempdir().unwrap();
        let channel = dir.path().join("img_DAPI.npy");
        File::create(&channel).unwrap();

        let labels = Array3::<u32>::from_elem((2, 2, 2), 3);
        labels
            .write_npy(File::create(dir.path().join("img_DAPI_labels.npy")).unwrap())
            .unwrap();

        let vol = PrecomputedBackend
            .segment(&channel, &params(), &unit_calibration())
            .unwrap();
        assert_eq!(vol.dims(), (2, 2, 2));
    }

    #[test]
    fn precomputed_backend_reports_missing_labels() {
        let dir = tempfile::tempdir().unwrap();
        let channel = dir.path().join("img_DAPI.npy");
        let err = PrecomputedBackend
            .segment(&channel, &params(), &unit_calibration())
            .unwrap_err();
        assert!(matches!(err, SegmentationError::MissingOutput(_)));
    }
}
