use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use log::{error, info};
use std::path::PathBuf;

mod cells;
mod coloc;
mod config;
mod output;
mod pipeline;
mod population;
mod segmentation;
mod stats;
mod volume;

use cells::{MarkerChannel, MarkerPanel};
use config::{PipelineConfig, VolumeRange};
use output::ReportWriter;
use pipeline::{find_images, process_image};
use segmentation::{CommandBackend, PrecomputedBackend, SegmentationBackend, SegmentationParams};
use volume::Calibration;

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Directory of per-channel z-stacks named `<image>_<channel>.npy`
    input_dir: String,

    /// Report directory, relative to the input directory unless absolute
    #[arg(long, default_value = "results")]
    output_dir: String,

    #[arg(long, default_value = "cell-metrics.tsv")]
    detail_output: String,

    #[arg(long, default_value = "image-summary.tsv")]
    summary_output: String,

    #[arg(long, default_value = "DAPI")]
    nucleus_channel: String,

    #[arg(long, default_value = "TH")]
    marker_channel: String,

    /// Second marker channel; switches to the dual-marker panel
    #[arg(long)]
    second_marker_channel: Option<String>,

    #[arg(long, default_value = "ORF1p")]
    intensity_channel: String,

    /// Fraction of a nucleus a marker object must cover to claim it
    #[arg(long, default_value_t = 0.5)]
    coloc_fraction: f64,

    /// Colocalization fraction for the second marker (defaults to --coloc-fraction)
    #[arg(long)]
    second_coloc_fraction: Option<f64>,

    #[arg(long, default_value_t = 50.0)]
    min_nucleus_volume: f64,

    #[arg(long, default_value_t = 2000.0)]
    max_nucleus_volume: f64,

    #[arg(long, default_value_t = 200.0)]
    min_cell_volume: f64,

    #[arg(long, default_value_t = 6000.0)]
    max_cell_volume: f64,

    /// In-plane pixel size in µm
    #[arg(long, default_value_t = 1.0)]
    pixel_size: f64,

    /// Optical section spacing in µm
    #[arg(long, default_value_t = 1.0)]
    pixel_depth: f64,

    #[arg(long, default_value = "cyto")]
    nucleus_model: String,

    #[arg(long, default_value_t = 80)]
    nucleus_diameter: u32,

    #[arg(long, default_value = "cyto2")]
    cell_model: String,

    #[arg(long, default_value_t = 110)]
    cell_diameter: u32,

    #[arg(long, default_value_t = 0.5)]
    stitch_threshold: f64,

    /// External segmenter command; without it, sibling `*_labels.npy`
    /// files are expected next to each channel volume
    #[arg(long)]
    segment_cmd: Option<String>,

    /// Extra arguments passed to the segmenter command (repeatable)
    #[arg(long)]
    segment_arg: Vec<String>,
}

fn config_from_args(args: &Args) -> PipelineConfig {
    let primary = MarkerChannel {
        name: args.marker_channel.clone(),
        coloc_fraction: args.coloc_fraction,
    };
    let panel = match &args.second_marker_channel {
        Some(name) => MarkerPanel::Dual {
            primary,
            secondary: MarkerChannel {
                name: name.clone(),
                coloc_fraction: args.second_coloc_fraction.unwrap_or(args.coloc_fraction),
            },
        },
        None => MarkerPanel::Single(primary),
    };

    PipelineConfig {
        calibration: Calibration {
            pixel_width: args.pixel_size,
            pixel_height: args.pixel_size,
            pixel_depth: args.pixel_depth,
        },
        nucleus_channel: args.nucleus_channel.clone(),
        intensity_channel: args.intensity_channel.clone(),
        panel,
        nucleus_volume: VolumeRange {
            min: args.min_nucleus_volume,
            max: args.max_nucleus_volume,
        },
        cell_volume: VolumeRange {
            min: args.min_cell_volume,
            max: args.max_cell_volume,
        },
        nucleus_segmentation: SegmentationParams {
            model: args.nucleus_model.clone(),
            diameter: args.nucleus_diameter,
            stitch_threshold: args.stitch_threshold,
        },
        cell_segmentation: SegmentationParams {
            model: args.cell_model.clone(),
            diameter: args.cell_diameter,
            stitch_threshold: args.stitch_threshold,
        },
    }
}

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let cfg = config_from_args(&args);
    cfg.validate()?;

    let input_dir = PathBuf::from(&args.input_dir);
    let output_dir = {
        let dir = PathBuf::from(&args.output_dir);
        if dir.is_absolute() {
            dir
        } else {
            input_dir.join(dir)
        }
    };
    std::fs::create_dir_all(&output_dir)?;

    let backend: Box<dyn SegmentationBackend> = match &args.segment_cmd {
        Some(program) => Box::new(CommandBackend {
            program: program.clone(),
            args: args.segment_arg.clone(),
        }),
        None => Box::new(PrecomputedBackend),
    };

    let stems = find_images(&input_dir, &cfg.nucleus_channel)?;
    anyhow::ensure!(
        !stems.is_empty(),
        "no *_{}.npy volumes found in {}",
        cfg.nucleus_channel,
        input_dir.display()
    );
    info!("Found {} images", stems.len());

    let mut writer = ReportWriter::create(
        &output_dir.join(&args.detail_output),
        &output_dir.join(&args.summary_output),
        &cfg.panel,
    )?;

    let progress = ProgressBar::new(stems.len() as u64).with_style(
        ProgressStyle::with_template("{msg:20} {wide_bar} {pos}/{len} [{elapsed}]")?,
    );

    let mut failures = 0usize;
    for stem in &stems {
        progress.set_message(stem.clone());
        // a failed image is reported and skipped; the run continues
        match process_image(&cfg, backend.as_ref(), &input_dir, stem) {
            Ok(result) => {
                writer.write_image(&result.name, &result.cells, &result.summary)?;
            }
            Err(err) => {
                error!("{stem}: {err}");
                failures += 1;
            }
        }
        progress.inc(1);
    }
    progress.finish_and_clear();

    info!(
        "Processed {} of {} images ({} failed)",
        stems.len() - failures,
        stems.len(),
        failures
    );
    Ok(())
}
