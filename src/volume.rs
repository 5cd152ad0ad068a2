use ndarray::Array3;
use ndarray_npy::{ReadNpyError, ReadNpyExt};
use std::fs::File;
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum VolumeError {
    #[error("error opening {path}: {source}")]
    Open {
        path: String,
        source: std::io::Error,
    },

    #[error("error reading npy volume {path}: {source}")]
    Read {
        path: String,
        source: ReadNpyError,
    },

    #[error("volume {path} has dimensions {found:?}, expected {expected:?}")]
    DimensionMismatch {
        path: String,
        found: (usize, usize, usize),
        expected: (usize, usize, usize),
    },
}

/// Physical voxel size. Width and height are the in-plane pixel size,
/// depth is the optical section spacing, all in the same length unit (µm).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Calibration {
    pub pixel_width: f64,
    pub pixel_height: f64,
    pub pixel_depth: f64,
}

impl Calibration {
    pub fn voxel_volume(&self) -> f64 {
        self.pixel_width * self.pixel_height * self.pixel_depth
    }
}

/// A segmented 3D label field on a (z, y, x) grid. Zero is background,
/// every positive value identifies one object.
#[derive(Debug, Clone)]
pub struct LabelVolume {
    pub labels: Array3<u32>,
    pub calibration: Calibration,
}

impl LabelVolume {
    pub fn new(labels: Array3<u32>, calibration: Calibration) -> LabelVolume {
        LabelVolume {
            labels,
            calibration,
        }
    }

    /// Read a label volume from a `u32` npy file.
    pub fn from_npy(path: &Path, calibration: Calibration) -> Result<LabelVolume, VolumeError> {
        let labels = read_npy_array(path)?;
        Ok(LabelVolume::new(labels, calibration))
    }

    pub fn dims(&self) -> (usize, usize, usize) {
        self.labels.dim()
    }

    /// Physical volume of the full imaged field, occupied or not.
    pub fn physical_volume(&self) -> f64 {
        let (nz, ny, nx) = self.dims();
        (nz * ny * nx) as f64 * self.calibration.voxel_volume()
    }
}

/// A raw fluorescence channel co-registered with the label volumes,
/// used for per-object intensity measurements.
#[derive(Debug, Clone)]
pub struct IntensityVolume {
    pub values: Array3<f32>,
}

impl IntensityVolume {
    pub fn new(values: Array3<f32>) -> IntensityVolume {
        IntensityVolume { values }
    }

    pub fn from_npy(path: &Path) -> Result<IntensityVolume, VolumeError> {
        let values = read_npy_array(path)?;
        Ok(IntensityVolume::new(values))
    }

    pub fn dims(&self) -> (usize, usize, usize) {
        self.values.dim()
    }

    pub fn value_at(&self, index: usize) -> f32 {
        let (z, y, x) = decode_index(index, self.dims());
        self.values[[z, y, x]]
    }
}

fn read_npy_array<T: ndarray_npy::ReadableElement>(
    path: &Path,
) -> Result<Array3<T>, VolumeError> {
    let file = File::open(path).map_err(|source| VolumeError::Open {
        path: path.display().to_string(),
        source,
    })?;
    Array3::<T>::read_npy(file).map_err(|source| VolumeError::Read {
        path: path.display().to_string(),
        source,
    })
}

/// Linear voxel index for a (z, y, x) position on a grid with
/// dims = (nz, ny, nx). Row-major, so iterating a volume in logical
/// order produces strictly increasing indices.
pub fn encode_index(z: usize, y: usize, x: usize, dims: (usize, usize, usize)) -> usize {
    let (_nz, ny, nx) = dims;
    (z * ny + y) * nx + x
}

pub fn decode_index(index: usize, dims: (usize, usize, usize)) -> (usize, usize, usize) {
    let (_nz, ny, nx) = dims;
    let x = index % nx;
    let y = (index / nx) % ny;
    let z = index / (nx * ny);
    (z, y, x)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::arr3;
    use ndarray_npy::WriteNpyExt;

    pub fn unit_calibration() -> Calibration {
        Calibration {
            pixel_width: 1.0,
            pixel_height: 1.0,
            pixel_depth: 1.0,
        }
    }

    #[test]
    fn voxel_volume_is_product_of_axes() {
        let cal = Calibration {
            pixel_width: 0.5,
            pixel_height: 0.5,
            pixel_depth: 2.0,
        };
        assert_eq!(cal.voxel_volume(), 0.5);
    }

    #[test]
    fn index_encoding_round_trips() {
        let dims = (4, 5, 6);
        for z in 0..4 {
            for y in 0..5 {
                for x in 0..6 {
                    let idx = encode_index(z, y, x, dims);
                    assert_eq!(decode_index(idx, dims), (z, y, x));
                }
            }
        }
    }

    #[test]
    fn physical_volume_counts_every_voxel() {
        let labels = Array3::<u32>::zeros((2, 3, 4));
        let vol = LabelVolume::new(labels, unit_calibration());
        assert_eq!(vol.physical_volume(), 24.0);
    }

    #[test]
    fn npy_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("labels.npy");

        let labels = arr3(&[[[0u32, 1], [2, 0]], [[0, 1], [2, 2]]]);
        labels.write_npy(File::create(&path).unwrap()).unwrap();

        let vol = LabelVolume::from_npy(&path, unit_calibration()).unwrap();
        assert_eq!(vol.dims(), (2, 2, 2));
        assert_eq!(vol.labels[[1, 1, 0]], 2);
    }
}
