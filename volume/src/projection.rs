//! Orthogonal projections and the volumetric color fill: turning the
//! intensity volume into RGBA8 pixel buffers for display.

use std::thread;

use crate::assemble::Volume;
use crate::partition::{partition_ranges, Progress};
use crate::windowing::{alpha_transfer, IntensityMapper, WindowLevel};

/// An 8-bit RGBA color, laid out the way texture uploads expect.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Rgba8 {
    /// red
    pub r: u8,
    /// green
    pub g: u8,
    /// blue
    pub b: u8,
    /// alpha
    pub a: u8,
}

impl Rgba8 {
    /// Fully transparent black.
    pub const TRANSPARENT: Rgba8 = Rgba8 {
        r: 0,
        g: 0,
        b: 0,
        a: 0,
    };

    /// An opaque grey pixel.
    #[inline]
    pub fn grey(value: u8) -> Self {
        Rgba8 {
            r: value,
            g: value,
            b: value,
            a: 255,
        }
    }

    /// A grey pixel with its alpha derived by the transfer function,
    /// fading near-background values to transparent.
    #[inline]
    pub fn grey_with_transfer(value: u8) -> Self {
        Rgba8 {
            r: value,
            g: value,
            b: value,
            a: alpha_transfer(value),
        }
    }
}

/// The three orthogonal viewing directions through the volume.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Axis {
    /// Native slice order: one image per source file.
    Transversal,
    /// One image per row, swept across the slices.
    Frontal,
    /// One image per column, swept across the slices.
    Sagittal,
}

/// All images of one orthogonal projection, concatenated in index order.
#[derive(Debug)]
pub struct ProjectionSet {
    /// The viewing direction.
    pub axis: Axis,
    /// Width of each image, in pixels.
    pub image_width: usize,
    /// Height of each image, in pixels.
    pub image_height: usize,
    /// Number of images along the projection's index range.
    pub image_count: usize,
    /// The concatenated image pixels, row-major per image.
    pub pixels: Vec<Rgba8>,
}

impl ProjectionSet {
    /// Borrow one image of the set.
    pub fn image(&self, index: usize) -> &[Rgba8] {
        let len = self.image_width * self.image_height;
        &self.pixels[index * len..(index + 1) * len]
    }
}

/// Image dimensions and count of a projection over the given volume.
fn projection_dims(volume: &Volume, axis: Axis) -> (usize, usize, usize) {
    match axis {
        Axis::Transversal => (volume.width(), volume.height(), volume.slices()),
        Axis::Frontal => (volume.width(), volume.slices(), volume.height()),
        Axis::Sagittal => (volume.height(), volume.slices(), volume.width()),
    }
}

/// Render every image of one orthogonal projection.
///
/// The projection's index range is split into disjoint partitions, one
/// worker thread per partition, each filling its own region of the
/// output buffer; the shared progress counts finished images.
pub fn render_projection(
    volume: &Volume,
    axis: Axis,
    window: Option<WindowLevel>,
    threads: usize,
    progress: &Progress,
) -> ProjectionSet {
    let mapper = volume.mapper(window);
    let (image_width, image_height, image_count) = projection_dims(volume, axis);
    let image_len = image_width * image_height;
    let mut pixels = vec![Rgba8::TRANSPARENT; image_len * image_count];

    let ranges = partition_ranges(image_count, threads);
    progress.begin(image_count, ranges.len());
    thread::scope(|scope| {
        let mut tail = pixels.as_mut_slice();
        for range in &ranges {
            let (head, rest) = tail.split_at_mut(range.len() * image_len);
            tail = rest;
            let start = range.start;
            scope.spawn(move || {
                for (offset, image) in head.chunks_mut(image_len).enumerate() {
                    fill_image(volume, axis, &mapper, start + offset, image, image_width);
                    progress.unit_done();
                }
                progress.worker_done();
            });
        }
    });

    ProjectionSet {
        axis,
        image_width,
        image_height,
        image_count,
        pixels,
    }
}

fn fill_image(
    volume: &Volume,
    axis: Axis,
    mapper: &IntensityMapper,
    index: usize,
    image: &mut [Rgba8],
    image_width: usize,
) {
    match axis {
        Axis::Transversal => {
            for y in 0..volume.height() {
                for x in 0..volume.width() {
                    image[y * image_width + x] = Rgba8::grey(mapper.grey(volume.voxel(index, x, y)));
                }
            }
        }
        Axis::Frontal => {
            for slice in 0..volume.slices() {
                for x in 0..volume.width() {
                    image[slice * image_width + x] =
                        Rgba8::grey(mapper.grey(volume.voxel(slice, x, index)));
                }
            }
        }
        Axis::Sagittal => {
            for slice in 0..volume.slices() {
                for y in 0..volume.height() {
                    image[slice * image_width + y] =
                        Rgba8::grey(mapper.grey(volume.voxel(slice, index, y)));
                }
            }
        }
    }
}

/// Render the volumetric color buffer: one RGBA pixel per voxel, in the
/// same flat layout as the intensity array, with alpha derived by the
/// transfer function so that empty space renders transparent.
pub fn render_volume_colors(
    volume: &Volume,
    window: Option<WindowLevel>,
    threads: usize,
    progress: &Progress,
) -> Vec<Rgba8> {
    let mapper = volume.mapper(window);
    let slice_len = volume.width() * volume.height();
    let mut colors = vec![Rgba8::TRANSPARENT; volume.len()];

    let ranges = partition_ranges(volume.slices(), threads);
    progress.begin(volume.slices(), ranges.len());
    thread::scope(|scope| {
        let mut tail = colors.as_mut_slice();
        let mut offset = 0;
        for range in &ranges {
            let len = range.len() * slice_len;
            let (head, rest) = tail.split_at_mut(len);
            tail = rest;
            let source = &volume.data()[offset..offset + len];
            offset += len;
            scope.spawn(move || {
                let slices = head.chunks_mut(slice_len).zip(source.chunks(slice_len));
                for (out_slice, in_slice) in slices {
                    for (out, &intensity) in out_slice.iter_mut().zip(in_slice) {
                        *out = Rgba8::grey_with_transfer(mapper.grey(intensity));
                    }
                    progress.unit_done();
                }
                progress.worker_done();
            });
        }
    });

    colors
}
