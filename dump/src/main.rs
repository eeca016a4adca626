//! A CLI tool for inspecting the contents of a DICOM file
//! by printing its data elements in a human readable format,
//! or for assembling a whole series directory into a volume
//! and printing its summary.
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

use clap::Parser;
use snafu::{Report, ResultExt, Whatever};
use tracing::Level;
use volscan_core::dictionary;
use volscan_core::Header;
use volscan_parser::{decode_file, DecodeOptions};
use volscan_volume::{render_projection, Axis, Loader, Progress};

/// Exit code for when an error emerged while reading the input.
const ERROR_READ: i32 = -2;

/// Dump the contents of DICOM files or assemble a series into a volume
#[derive(Debug, Parser)]
#[command(version)]
struct App {
    /// A DICOM file to dump, or a series directory with `--volume`
    path: PathBuf,
    /// Assemble the directory into a volume and print its summary
    #[arg(long)]
    volume: bool,
    /// Maximum number of data elements decoded per file
    #[arg(long, default_value_t = 150)]
    max_elements: usize,
    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

fn main() {
    run().unwrap_or_else(|e| {
        eprintln!("{}", Report::from_error(e));
        std::process::exit(ERROR_READ);
    });
}

fn run() -> Result<(), Whatever> {
    let app = App::parse();

    tracing::subscriber::set_global_default(
        tracing_subscriber::FmtSubscriber::builder()
            .with_max_level(if app.verbose {
                Level::DEBUG
            } else {
                Level::WARN
            })
            .finish(),
    )
    .whatever_context("Could not set up logging")?;

    let options = DecodeOptions {
        max_elements: app.max_elements,
        ..DecodeOptions::default()
    };

    if app.volume {
        dump_volume(&app.path, options)
    } else {
        dump_file(&app.path, &options)
    }
}

fn dump_file(path: &Path, options: &DecodeOptions) -> Result<(), Whatever> {
    let file = File::open(path)
        .with_whatever_context(|_| format!("Could not open {}", path.display()))?;
    let record = decode_file(&mut BufReader::new(file), options)
        .with_whatever_context(|_| format!("Could not decode {}", path.display()))?;

    println!("{}: {} data elements", path.display(), record.len());
    for element in record.elements() {
        let tag = element.tag();
        println!(
            "{} {} {:>8}  {:<44} {}",
            tag,
            element.vr(),
            element.length(),
            dictionary::name_of(tag),
            element.to_text(),
        );
    }
    Ok(())
}

fn dump_volume(path: &Path, options: DecodeOptions) -> Result<(), Whatever> {
    let loader = Loader::new().with_options(options);
    let threads = loader.concurrency().projection_threads;
    let volume = loader
        .load(path)
        .with_whatever_context(|_| format!("Could not assemble a volume from {}", path.display()))?;

    let meta = volume.meta();
    println!(
        "volume: {} slices of {}x{} ({} voxels)",
        volume.slices(),
        volume.width(),
        volume.height(),
        volume.len(),
    );
    println!(
        "intensity range: {} .. {} ({} bits stored, slope {}, intercept {})",
        meta.intensity_min,
        meta.intensity_max,
        meta.bits_stored,
        meta.rescale.slope,
        meta.rescale.intercept,
    );
    match meta.default_window() {
        Some(window) => println!(
            "window presets: centers {:?}, widths {:?} (default {}/{})",
            meta.window_centers, meta.window_widths, window.center, window.width,
        ),
        None => println!("window presets: none (full-range fallback)"),
    }

    let progress = Progress::new();
    for axis in [Axis::Transversal, Axis::Frontal, Axis::Sagittal] {
        let projection = render_projection(&volume, axis, None, threads, &progress);
        println!(
            "{:?}: {} images of {}x{}",
            projection.axis, projection.image_count, projection.image_width, projection.image_height,
        );
    }
    Ok(())
}
