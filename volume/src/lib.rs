#![deny(trivial_numeric_casts, unsafe_code)]
#![warn(missing_docs, missing_debug_implementations, unused_qualifications)]

//! Volume reconstruction and intensity windowing for DICOM image series.
//!
//! A [`Loader`] decodes every file of a series directory (via
//! `volscan-parser`), resolves the slice numbering, and unpacks the
//! per-file pixel buffers into one flat signed intensity array — the
//! [`Volume`]. The windowing engine then maps intensities to 8-bit
//! greyscale and alpha values, producing RGBA8 buffers for the three
//! orthogonal projections and for the volume itself, ready for an
//! external display layer to upload as textures.
//!
//! All parallel stages follow one scheme: contiguous disjoint partitions
//! of the index space, one blocking worker thread per partition, and a
//! pollable pair of atomic progress counters as the only shared state.

pub mod assemble;
pub mod partition;
pub mod projection;
pub mod windowing;

pub use assemble::{
    sample_mask, scan_directory, AssembleError, Concurrency, Loader, Volume, VolumeMeta,
};
pub use partition::{partition_ranges, Progress};
pub use projection::{render_projection, render_volume_colors, Axis, ProjectionSet, Rgba8};
pub use windowing::{
    alpha_transfer, full_range_linear, window_level_linear, IntensityMapper, Rescale, WindowLevel,
};
