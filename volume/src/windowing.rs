//! Intensity windowing: mapping rescaled voxel intensities to 8-bit
//! greyscale and alpha values for display.

/// Description of a modality rescale function,
/// defined by a _rescale slope_ and _rescale intercept_.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct Rescale {
    /// the rescale slope
    pub slope: f64,
    /// the rescale intercept
    pub intercept: f64,
}

impl Rescale {
    /// Create a new rescale function.
    #[inline]
    pub fn new(slope: f64, intercept: f64) -> Self {
        Rescale { slope, intercept }
    }

    /// Apply the rescale function to a value.
    #[inline]
    pub fn apply(&self, value: f64) -> f64 {
        self.slope * value + self.intercept
    }
}

impl Default for Rescale {
    fn default() -> Self {
        Rescale::new(1.0, 0.0)
    }
}

/// The parameters of one display window: which intensity sub-range maps
/// to the visible greyscale ramp.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct WindowLevel {
    /// The window center.
    pub center: f64,
    /// The window width. Should be at least 1.
    pub width: f64,
}

/// Map a rescaled intensity to 8-bit greyscale through a window level.
///
/// Intensities at or below `center - 0.5 - (width-1)/2` map to 0,
/// intensities above `center - 0.5 + (width-1)/2` map to 255, and the
/// range in between maps linearly.
pub fn window_level_linear(value: f64, window: WindowLevel) -> u8 {
    let WindowLevel { center, width } = window;
    let min = center - 0.5 - (width - 1.0) / 2.0;
    let max = center - 0.5 + (width - 1.0) / 2.0;

    if value <= min {
        0
    } else if value > max {
        255
    } else {
        (((value - (center - 0.5)) / (width - 1.0) + 0.5) * 255.0).round() as u8
    }
}

/// Map a rescaled intensity to 8-bit greyscale by scaling the full
/// representable intensity range, for files that carry no window of
/// their own.
///
/// The representable range runs from the rescale intercept (a raw sample
/// of 0) up to `2^bits_stored * slope + intercept`. The output is clamped
/// to `0..=255` so that out-of-range intensities cannot wrap.
pub fn full_range_linear(value: f64, rescale: Rescale, bits_stored: u16) -> u8 {
    let old_max = 2f64.powi(i32::from(bits_stored)) * rescale.slope + rescale.intercept;
    let range = old_max - rescale.intercept;
    if range == 0.0 {
        return 0;
    }
    (((value - rescale.intercept) * 255.0 / range).round()).clamp(0.0, 255.0) as u8
}

/// Derive a voxel's alpha from its greyscale intensity, fading
/// near-background voxels to transparent so that empty space does not
/// occlude the volumetric rendering.
pub fn alpha_transfer(grey: u8) -> u8 {
    if grey < 15 {
        0
    } else {
        ((240 * (u32::from(grey) - 15)) / 255).min(255) as u8
    }
}

/// Maps raw volume intensities to display values, with the window
/// resolved in priority order: an explicit caller-supplied window first,
/// then the window embedded in the series, then full-range scaling.
#[derive(Debug, Copy, Clone)]
pub struct IntensityMapper {
    window: Option<WindowLevel>,
    rescale: Rescale,
    bits_stored: u16,
}

impl IntensityMapper {
    /// Create a mapper from an already-resolved window (or none),
    /// the series rescale transform, and its stored sample depth.
    pub fn new(window: Option<WindowLevel>, rescale: Rescale, bits_stored: u16) -> Self {
        IntensityMapper {
            window,
            rescale,
            bits_stored,
        }
    }

    /// The window this mapper applies, if any.
    pub fn window(&self) -> Option<WindowLevel> {
        self.window
    }

    /// Map one intensity to 8-bit greyscale.
    pub fn grey(&self, intensity: i32) -> u8 {
        match self.window {
            Some(window) => window_level_linear(f64::from(intensity), window),
            None => full_range_linear(f64::from(intensity), self.rescale, self.bits_stored),
        }
    }
}
