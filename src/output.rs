use flate2::write::GzEncoder;
use flate2::Compression;
use std::fs::File;
use std::io::Write;
use std::path::Path;
use thiserror::Error;

use crate::cells::{Cell, MarkerPanel, Metric, ObjectKind};
use crate::stats::ImageSummary;

#[derive(Debug, Error)]
pub enum OutputError {
    #[error("error creating {path}: {source}")]
    Create {
        path: String,
        source: std::io::Error,
    },

    #[error("error writing report: {0}")]
    Csv(#[from] csv::Error),
}

fn open_table(path: &Path) -> Result<csv::Writer<Box<dyn Write>>, OutputError> {
    let file = File::create(path).map_err(|source| OutputError::Create {
        path: path.display().to_string(),
        source,
    })?;
    let output: Box<dyn Write> = if path.extension().is_some_and(|ext| ext == "gz") {
        Box::new(GzEncoder::new(file, Compression::default()))
    } else {
        Box::new(file)
    };
    Ok(csv::WriterBuilder::new()
        .delimiter(b'\t')
        .from_writer(output))
}

/// Column names for the 2^k flag combinations, matching the index order
/// of `stats::count_by_flags`.
fn flag_combo_columns(panel: &MarkerPanel) -> Vec<String> {
    let channels = panel.channels();
    let n = channels.len();
    (0..1usize << n)
        .map(|idx| {
            let parts: Vec<String> = channels
                .iter()
                .enumerate()
                .map(|(i, ch)| {
                    let negative = (idx >> (n - 1 - i)) & 1 == 1;
                    format!("{}_{}", ch.name, if negative { "neg" } else { "pos" })
                })
                .collect();
            format!("num_{}", parts.join("_"))
        })
        .collect()
}

fn detail_measurement_columns() -> [String; 6] {
    [
        "cell_volume_um3".to_string(),
        "cell_mean_intensity".to_string(),
        "nucleus_volume_um3".to_string(),
        "nucleus_mean_intensity".to_string(),
        "cytoplasm_volume_um3".to_string(),
        "cytoplasm_mean_intensity".to_string(),
    ]
}

fn summary_measurement_columns() -> [String; 6] {
    [
        "cell_mean_volume_um3".to_string(),
        "cell_mean_intensity".to_string(),
        "nucleus_mean_volume_um3".to_string(),
        "nucleus_mean_intensity".to_string(),
        "cytoplasm_mean_volume_um3".to_string(),
        "cytoplasm_mean_intensity".to_string(),
    ]
}

/// Streaming writers for the two run-level reports: one row per cell in
/// the detail table, one row per image in the summary table. Headers are
/// written once at creation; both tables are flushed after every image so
/// partial results survive a crash.
pub struct ReportWriter {
    detail: csv::Writer<Box<dyn Write>>,
    summary: csv::Writer<Box<dyn Write>>,
}

impl ReportWriter {
    pub fn create(
        detail_path: &Path,
        summary_path: &Path,
        panel: &MarkerPanel,
    ) -> Result<ReportWriter, OutputError> {
        let mut detail = open_table(detail_path)?;
        let mut summary = open_table(summary_path)?;

        let mut header = vec!["image".to_string(), "cell_id".to_string()];
        for ch in panel.channels() {
            header.push(format!("{}_positive", ch.name));
        }
        header.extend(detail_measurement_columns());
        detail.write_record(&header)?;

        let mut header = vec![
            "image".to_string(),
            "image_volume_um3".to_string(),
            "num_cells".to_string(),
        ];
        header.extend(flag_combo_columns(panel));
        header.extend(summary_measurement_columns());
        header.push("num_negative_nuclei".to_string());
        header.push("negative_nuclei_mean_intensity".to_string());
        summary.write_record(&header)?;

        detail.flush().map_err(csv::Error::from)?;
        summary.flush().map_err(csv::Error::from)?;

        Ok(ReportWriter { detail, summary })
    }

    /// Append one image's cells and its summary row, then flush both tables.
    pub fn write_image(
        &mut self,
        image: &str,
        cells: &[Cell],
        summary: &ImageSummary,
    ) -> Result<(), OutputError> {
        for cell in cells {
            let mut row = vec![image.to_string(), cell.label.to_string()];
            for &flag in &cell.positive {
                row.push(flag.to_string());
            }
            for kind in ObjectKind::ALL {
                row.push(cell.measurements.get(kind, Metric::Volume).to_string());
                row.push(cell.measurements.get(kind, Metric::Intensity).to_string());
            }
            self.detail.write_record(&row)?;
        }

        let mut row = vec![
            image.to_string(),
            summary.image_volume.to_string(),
            summary.num_cells.to_string(),
        ];
        for &count in &summary.flag_counts {
            row.push(count.to_string());
        }
        for i in 0..ObjectKind::ALL.len() {
            row.push(summary.mean_volume[i].to_string());
            row.push(summary.mean_intensity[i].to_string());
        }
        row.push(summary.negative_nuclei.to_string());
        row.push(summary.negative_nuclei_mean_intensity.to_string());
        self.summary.write_record(&row)?;

        self.detail.flush().map_err(csv::Error::from)?;
        self.summary.flush().map_err(csv::Error::from)?;
        Ok(())
    }
}
