//! Volume assembly: decoding every file of a series directory and packing
//! their pixels into one flat 3D intensity array.

use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

use snafu::{ensure, ResultExt, Snafu};
use volscan_parser::file::{decode_file, DecodeOptions, FileRecord};

use crate::partition::{partition_ranges, Progress};
use crate::windowing::{IntensityMapper, Rescale, WindowLevel};

/// An error while assembling a volume from a series directory.
///
/// Individual undecodable files are logged and skipped; only problems
/// affecting the whole series surface here.
#[derive(Debug, Snafu)]
#[non_exhaustive]
pub enum AssembleError {
    /// The series directory could not be listed.
    #[snafu(display("could not read directory {}", path.display()))]
    ReadDirectory {
        path: PathBuf,
        source: std::io::Error,
    },

    /// The directory holds no files that look like part of a series.
    #[snafu(display("no DICOM files found in {}", path.display()))]
    NoFiles { path: PathBuf },

    /// No file in the series carried a usable pixel grid.
    #[snafu(display("no file in the series could be decoded into an image"))]
    NoUsableImage,

    /// A previous load on this loader has not finished yet.
    #[snafu(display("a volume load is already in progress"))]
    Busy,
}

type Result<T, E = AssembleError> = std::result::Result<T, E>;

/// Worker thread counts for the parallel stages of the pipeline.
#[derive(Debug, Clone)]
pub struct Concurrency {
    /// Workers that unpack per-file pixel data into the volume.
    pub preprocess_threads: usize,
    /// Workers that fill one orthogonal projection's images.
    pub projection_threads: usize,
    /// Workers that fill the volumetric color buffer.
    pub volume_threads: usize,
}

impl Default for Concurrency {
    fn default() -> Self {
        Concurrency {
            preprocess_threads: 12,
            projection_threads: 6,
            volume_threads: 2,
        }
    }
}

/// Display-relevant metadata derived from the series during assembly.
#[derive(Debug, Clone, PartialEq)]
pub struct VolumeMeta {
    /// Bits stored per pixel sample.
    pub bits_stored: u16,
    /// The modality rescale transform of the series.
    pub rescale: Rescale,
    /// Lowest representable intensity (a raw sample of 0).
    pub intensity_min: f64,
    /// Highest representable intensity (`2^bits_stored * slope + intercept`).
    pub intensity_max: f64,
    /// Window center presets carried by the series; may be empty.
    pub window_centers: Vec<f64>,
    /// Window width presets carried by the series; may be empty.
    pub window_widths: Vec<f64>,
}

impl VolumeMeta {
    /// The first window preset pair carried by the series, if any.
    pub fn default_window(&self) -> Option<WindowLevel> {
        match (self.window_centers.first(), self.window_widths.first()) {
            (Some(&center), Some(&width)) => Some(WindowLevel { center, width }),
            _ => None,
        }
    }
}

/// A reconstructed intensity volume.
///
/// Voxels are stored in one flat array of signed intensities with the
/// layout `slice * width * height + x * height + y`, where `x` is the
/// column and `y` the row of the source image. The transposed x/y order
/// reflects the scan order of the source images and is relied upon by
/// the projection renderers. Once built, a volume is read-only.
#[derive(Debug)]
pub struct Volume {
    data: Vec<i32>,
    slices: usize,
    width: usize,
    height: usize,
    meta: VolumeMeta,
}

impl Volume {
    /// Number of slices (source files) in the volume.
    pub fn slices(&self) -> usize {
        self.slices
    }

    /// Width of each slice, in columns.
    pub fn width(&self) -> usize {
        self.width
    }

    /// Height of each slice, in rows.
    pub fn height(&self) -> usize {
        self.height
    }

    /// Borrow the flat intensity array.
    pub fn data(&self) -> &[i32] {
        &self.data
    }

    /// Total number of voxels.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Whether the volume holds no voxels.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Display metadata derived from the series.
    pub fn meta(&self) -> &VolumeMeta {
        &self.meta
    }

    /// Read the intensity at slice `slice`, column `x`, row `y`.
    #[inline]
    pub fn voxel(&self, slice: usize, x: usize, y: usize) -> i32 {
        self.data[slice * self.width * self.height + x * self.height + y]
    }

    /// Build an intensity mapper for this volume, preferring the given
    /// window over the series' own presets.
    pub fn mapper(&self, window: Option<WindowLevel>) -> IntensityMapper {
        IntensityMapper::new(
            window.or_else(|| self.meta.default_window()),
            self.meta.rescale,
            self.meta.bits_stored,
        )
    }
}

/// The mask selecting the significant bits of a raw pixel sample:
/// everything above the high bit is padding or overlay data and must be
/// stripped before the rescale transform.
pub fn sample_mask(high_bit: u16) -> u32 {
    if high_bit >= 31 {
        u32::MAX
    } else {
        !(u32::MAX << (high_bit + 1))
    }
}

/// List the series files in a directory: files ending in `.dcm` (in any
/// case) or without an extension, in name order.
pub fn scan_directory(path: &Path) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    let entries = std::fs::read_dir(path).context(ReadDirectorySnafu { path })?;
    for entry in entries {
        let entry = entry.context(ReadDirectorySnafu { path })?;
        let file_path = entry.path();
        if !file_path.is_file() {
            continue;
        }
        let wanted = match file_path.extension().and_then(|e| e.to_str()) {
            None => true,
            Some(ext) => ext.eq_ignore_ascii_case("dcm"),
        };
        if wanted {
            files.push(file_path);
        }
    }
    files.sort();
    ensure!(!files.is_empty(), NoFilesSnafu { path });
    Ok(files)
}

/// Loads series directories into volumes.
///
/// A loader runs one load at a time: starting a second load while one is
/// in flight is refused with [`AssembleError::Busy`] rather than queued.
/// The shared [`Progress`] may be polled from another thread while a
/// load runs.
#[derive(Debug, Default)]
pub struct Loader {
    options: DecodeOptions,
    concurrency: Concurrency,
    progress: Arc<Progress>,
    working: AtomicBool,
}

impl Loader {
    /// Create a loader with default decode options and thread counts.
    pub fn new() -> Self {
        Loader::default()
    }

    /// Replace the file decode options.
    pub fn with_options(mut self, options: DecodeOptions) -> Self {
        self.options = options;
        self
    }

    /// Replace the worker thread counts.
    pub fn with_concurrency(mut self, concurrency: Concurrency) -> Self {
        self.concurrency = concurrency;
        self
    }

    /// The worker thread counts in use.
    pub fn concurrency(&self) -> &Concurrency {
        &self.concurrency
    }

    /// A handle to the shared progress counters.
    pub fn progress(&self) -> Arc<Progress> {
        Arc::clone(&self.progress)
    }

    /// Whether a load is currently in flight.
    pub fn is_working(&self) -> bool {
        self.working.load(Ordering::Acquire)
    }

    /// Load every DICOM file in the given directory into a volume.
    pub fn load(&self, directory: &Path) -> Result<Volume> {
        ensure!(!self.working.swap(true, Ordering::AcqRel), BusySnafu);
        let result = self.load_inner(directory);
        self.working.store(false, Ordering::Release);
        result
    }

    fn load_inner(&self, directory: &Path) -> Result<Volume> {
        let files = scan_directory(directory)?;
        let count = files.len();
        tracing::info!(count, directory = %directory.display(), "loading series");

        let mut records: Vec<Option<FileRecord>> = Vec::with_capacity(count);
        records.resize_with(count, || None);
        let mut one_based = false;

        for path in &files {
            let record = match File::open(path) {
                Ok(file) => {
                    match decode_file(&mut BufReader::new(file), &self.options) {
                        Ok(record) => record,
                        Err(error) => {
                            tracing::warn!(
                                path = %path.display(),
                                %error,
                                "skipping undecodable file"
                            );
                            continue;
                        }
                    }
                }
                Err(error) => {
                    tracing::warn!(path = %path.display(), %error, "skipping unreadable file");
                    continue;
                }
            };

            let mut number = i64::from(record.image_number());
            if !one_based && number == count as i64 {
                // a number one past the valid zero-based range: this
                // series counts its slices from 1
                records.rotate_left(1);
                one_based = true;
            }
            if one_based {
                number -= 1;
            }
            if (0..count as i64).contains(&number) {
                records[number as usize] = Some(record);
            } else {
                tracing::warn!(
                    path = %path.display(),
                    number,
                    "image number out of range, ignoring file"
                );
            }
        }

        // series geometry and display metadata come from the first
        // usable file; all files of a series share one pixel grid
        let first = records
            .iter()
            .flatten()
            .find(|r| r.rows() > 0 && r.columns() > 0)
            .ok_or(AssembleError::NoUsableImage)?;
        let width = usize::from(first.columns());
        let height = usize::from(first.rows());
        let bits_stored = first.bits_stored();
        let rescale = Rescale::new(first.rescale_slope(), first.rescale_intercept());
        let meta = VolumeMeta {
            bits_stored,
            rescale,
            intensity_min: rescale.intercept,
            intensity_max: 2f64.powi(i32::from(bits_stored)) * rescale.slope
                + rescale.intercept,
            window_centers: first.window_centers().to_vec(),
            window_widths: first.window_widths().to_vec(),
        };

        let slice_len = width * height;
        let mut data = vec![0i32; count * slice_len];

        let ranges = partition_ranges(count, self.concurrency.preprocess_threads);
        self.progress.begin(count, ranges.len());
        thread::scope(|scope| {
            let mut records_tail = records.as_mut_slice();
            let mut data_tail = data.as_mut_slice();
            for range in &ranges {
                let (records_head, rest) = records_tail.split_at_mut(range.len());
                records_tail = rest;
                let (data_head, rest) = data_tail.split_at_mut(range.len() * slice_len);
                data_tail = rest;
                let progress = &self.progress;
                scope.spawn(move || {
                    extract_slices(records_head, data_head, width, height, progress);
                    progress.worker_done();
                });
            }
        });

        Ok(Volume {
            data,
            slices: count,
            width,
            height,
            meta,
        })
    }
}

/// Unpack the pixel data of one partition of the series into the
/// corresponding disjoint region of the flat intensity array.
fn extract_slices(
    records: &mut [Option<FileRecord>],
    data: &mut [i32],
    width: usize,
    height: usize,
    progress: &Progress,
) {
    let slice_len = width * height;
    for (index, slot) in records.iter_mut().enumerate() {
        if let Some(record) = slot {
            let out = &mut data[index * slice_len..(index + 1) * slice_len];
            fill_slice(record, out, width, height);
        }
        progress.unit_done();
    }
}

/// Unpack one file's pixel buffer into its slice of the volume,
/// applying the significant-bit mask and the rescale transform.
///
/// A file missing any required attribute leaves its slice zero-filled.
fn fill_slice(record: &mut FileRecord, out: &mut [i32], width: usize, height: usize) {
    if !record.has_pixel_grid() {
        tracing::warn!(
            number = record.image_number(),
            "file is missing image attributes, leaving its slice empty"
        );
        return;
    }
    if usize::from(record.columns()) != width || usize::from(record.rows()) != height {
        tracing::warn!(
            number = record.image_number(),
            "file dimensions deviate from the series, leaving its slice empty"
        );
        return;
    }
    let bytes_per_sample = usize::from(record.bits_allocated() / 8);
    if !(1..=4).contains(&bytes_per_sample) {
        tracing::warn!(
            bits_allocated = record.bits_allocated(),
            "unsupported sample size, leaving its slice empty"
        );
        return;
    }

    let rescale = Rescale::new(record.rescale_slope(), record.rescale_intercept());
    let mask = sample_mask(record.high_bit());
    let element = match record.take_pixel_data() {
        Some(element) => element,
        None => return,
    };
    let bytes = element.into_data();

    let samples = bytes.chunks_exact(bytes_per_sample).take(width * height);
    for (pixel, chunk) in samples.enumerate() {
        let mut raw = 0u32;
        for (index, byte) in chunk.iter().enumerate() {
            raw |= u32::from(*byte) << (8 * index);
        }
        let intensity = rescale.apply(f64::from(raw & mask)) as i32;
        let x = pixel % width;
        let y = pixel / width;
        out[x * height + y] = intensity;
    }
}
