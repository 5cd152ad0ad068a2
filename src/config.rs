use itertools::Itertools;
use thiserror::Error;

use crate::cells::MarkerPanel;
use crate::segmentation::SegmentationParams;
use crate::volume::Calibration;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid {what} volume range: min {min} exceeds max {max}")]
    InvalidVolumeRange { what: &'static str, min: f64, max: f64 },

    #[error("colocalization fraction for channel {channel} must be in (0, 1], got {fraction}")]
    InvalidFraction { channel: String, fraction: f64 },

    #[error("calibration axes must be positive, got {0} x {1} x {2}")]
    InvalidCalibration(f64, f64, f64),

    #[error("channel name may not be empty")]
    EmptyChannelName,

    #[error("channel {0} is used more than once")]
    DuplicateChannel(String),
}

/// Inclusive physical-volume range for a detection filter, in µm³.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VolumeRange {
    pub min: f64,
    pub max: f64,
}

/// Immutable run configuration, validated once before any image is
/// processed. There is no mutable global state: every stage receives
/// what it needs from here.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub calibration: Calibration,
    /// Channel segmented for nuclei (DAPI in the reference panel).
    pub nucleus_channel: String,
    /// Channel measured for per-compartment intensities (ORF1p).
    pub intensity_channel: String,
    pub panel: MarkerPanel,
    pub nucleus_volume: VolumeRange,
    pub cell_volume: VolumeRange,
    pub nucleus_segmentation: SegmentationParams,
    pub cell_segmentation: SegmentationParams,
}

impl PipelineConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let cal = &self.calibration;
        if cal.pixel_width <= 0.0 || cal.pixel_height <= 0.0 || cal.pixel_depth <= 0.0 {
            return Err(ConfigError::InvalidCalibration(
                cal.pixel_width,
                cal.pixel_height,
                cal.pixel_depth,
            ));
        }

        for (what, range) in [
            ("nucleus", self.nucleus_volume),
            ("cell", self.cell_volume),
        ] {
            if range.min > range.max || range.min < 0.0 {
                return Err(ConfigError::InvalidVolumeRange {
                    what,
                    min: range.min,
                    max: range.max,
                });
            }
        }

        let mut names = vec![
            self.nucleus_channel.as_str(),
            self.intensity_channel.as_str(),
        ];
        for ch in self.panel.channels() {
            if !(ch.coloc_fraction > 0.0 && ch.coloc_fraction <= 1.0) {
                return Err(ConfigError::InvalidFraction {
                    channel: ch.name.clone(),
                    fraction: ch.coloc_fraction,
                });
            }
            names.push(ch.name.as_str());
        }

        if names.iter().any(|name| name.is_empty()) {
            return Err(ConfigError::EmptyChannelName);
        }
        if let Some(dup) = names.iter().duplicates().next() {
            return Err(ConfigError::DuplicateChannel(dup.to_string()));
        }

        Ok(())
    }
}
