// image.rs — Runtime-sized, channel-interleaved image container.
//
// MEMORY LAYOUT
// ─────────────
// Row-major, channels interleaved, no row padding:
//
//   index(y, x, c) = (y * width + x) * channels + c
//
//   RGB, width = 3:
//     data index:  0  1  2 | 3  4  5 | 6  7  8 | 9 ...
//     sample:      R  G  B | R  G  B | R  G  B | R ...
//     pixel:       (0,0)   | (1,0)   | (2,0)   | (0,1)
//
// This is the only representation that crosses the filter boundary. Device
// buffers are a flat copy of `as_slice()` (converted to f32), so the compute
// kernel uses exactly the same index formula. There is no row stride:
// convolution kernels read a tightly packed buffer.
//
// NEW RUST CONCEPTS:
// - Trait with associated consts (`Pixel::KIND`) — a per-type constant the
//   compiler resolves statically, used to tag images as integer or real.
// - Enum wrapping generic structs (`ImageData`) — one runtime type that can
//   hold either `Image<u8>` or `Image<f32>` without a trait object.

use std::fmt;

// ---------------------------------------------------------------------------
// Pixel Trait
// ---------------------------------------------------------------------------

/// Sample representation tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleKind {
    /// 8-bit unsigned integer samples in [0, 255].
    U8,
    /// 32-bit real-valued samples, unbounded.
    F32,
}

/// Trait for types that can serve as samples in an Image.
pub trait Pixel: Copy + Default + Send + Sync + PartialOrd + 'static {
    const KIND: SampleKind;

    /// Convert this sample to f32 (raw value, not normalized).
    fn to_f32(self) -> f32;

    /// Construct a sample from an f32 value (with appropriate clamping/rounding).
    fn from_f32(v: f32) -> Self;
}

impl Pixel for u8 {
    const KIND: SampleKind = SampleKind::U8;

    #[inline]
    fn to_f32(self) -> f32 {
        // Raw cast: u8 42 → 42.0. Convolution weights sum to 1, so the
        // accumulated value stays in the same [0, 255] range.
        self as f32
    }

    #[inline]
    fn from_f32(v: f32) -> Self {
        // Clamp first: `as u8` on an out-of-range float saturates, but NaN
        // would map to 0 silently.
        v.clamp(0.0, 255.0).round() as u8
    }
}

impl Pixel for f32 {
    const KIND: SampleKind = SampleKind::F32;

    #[inline]
    fn to_f32(self) -> f32 {
        self
    }

    #[inline]
    fn from_f32(v: f32) -> Self {
        v
    }
}

// ---------------------------------------------------------------------------
// Image<T>
// ---------------------------------------------------------------------------

/// A height × width × channels grid of samples, channel-interleaved.
///
/// `channels` is 1 (grayscale) or 3 (RGB).
pub struct Image<T: Pixel> {
    /// Sample data. Length = height * width * channels.
    data: Vec<T>,
    width: usize,
    height: usize,
    channels: usize,
}

// Manual Clone: documents that this is a deep copy of heap data.
impl<T: Pixel> Clone for Image<T> {
    fn clone(&self) -> Self {
        Image {
            data: self.data.clone(),
            width: self.width,
            height: self.height,
            channels: self.channels,
        }
    }
}

impl<T: Pixel> Image<T> {
    /// Create a zero-initialized image.
    ///
    /// # Panics
    /// Panics if `channels` is not 1 or 3.
    pub fn new(width: usize, height: usize, channels: usize) -> Self {
        assert_channels(channels);
        Image {
            data: vec![T::default(); width * height * channels],
            width,
            height,
            channels,
        }
    }

    /// Create an image from an existing interleaved sample vector.
    ///
    /// # Panics
    /// Panics if `channels` is not 1 or 3, or if
    /// `data.len() != width * height * channels`.
    pub fn from_vec(width: usize, height: usize, channels: usize, data: Vec<T>) -> Self {
        assert_channels(channels);
        assert_eq!(
            data.len(),
            width * height * channels,
            "data length ({}) must equal width * height * channels ({})",
            data.len(),
            width * height * channels,
        );
        Image { data, width, height, channels }
    }

    /// Create an image where every pixel holds the same sample tuple.
    /// `value.len()` determines the channel count.
    pub fn filled(width: usize, height: usize, value: &[T]) -> Self {
        assert_channels(value.len());
        let mut data = Vec::with_capacity(width * height * value.len());
        for _ in 0..width * height {
            data.extend_from_slice(value);
        }
        Image { data, width, height, channels: value.len() }
    }

    #[inline]
    pub fn width(&self) -> usize {
        self.width
    }

    #[inline]
    pub fn height(&self) -> usize {
        self.height
    }

    #[inline]
    pub fn channels(&self) -> usize {
        self.channels
    }

    /// Total sample count (width * height * channels).
    #[inline]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// True when the image has no pixels.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Flat index of sample (x, y, c).
    #[inline]
    pub fn index_of(&self, x: usize, y: usize, c: usize) -> usize {
        (y * self.width + x) * self.channels + c
    }

    /// Get the sample at column x, row y, channel c.
    ///
    /// # Panics
    /// Panics if (x, y, c) is out of bounds.
    #[inline]
    pub fn get(&self, x: usize, y: usize, c: usize) -> T {
        self.bounds_check(x, y, c);
        self.data[self.index_of(x, y, c)]
    }

    /// Set the sample at column x, row y, channel c.
    #[inline]
    pub fn set(&mut self, x: usize, y: usize, c: usize, value: T) {
        self.bounds_check(x, y, c);
        let idx = self.index_of(x, y, c);
        self.data[idx] = value;
    }

    /// All channels of one pixel.
    #[inline]
    pub fn pixel(&self, x: usize, y: usize) -> &[T] {
        self.bounds_check(x, y, 0);
        let start = self.index_of(x, y, 0);
        &self.data[start..start + self.channels]
    }

    /// Iterate over all pixels as `(x, y, samples)` tuples.
    pub fn pixels(&self) -> impl Iterator<Item = (usize, usize, &[T])> + '_ {
        self.data
            .chunks_exact(self.channels)
            .enumerate()
            .map(move |(i, px)| (i % self.width.max(1), i / self.width.max(1), px))
    }

    /// Access the underlying interleaved data.
    pub fn as_slice(&self) -> &[T] {
        &self.data
    }

    /// Mutable access to the underlying interleaved data.
    pub fn as_mut_slice(&mut self) -> &mut [T] {
        &mut self.data
    }

    /// Consume the image and return its sample vector.
    pub fn into_vec(self) -> Vec<T> {
        self.data
    }

    #[inline]
    fn bounds_check(&self, x: usize, y: usize, c: usize) {
        assert!(
            x < self.width && y < self.height && c < self.channels,
            "sample ({x},{y},{c}) out of bounds for image {}×{}×{}",
            self.width,
            self.height,
            self.channels,
        );
    }
}

fn assert_channels(channels: usize) {
    assert!(
        channels == 1 || channels == 3,
        "channel count must be 1 or 3 (got {channels})"
    );
}

// Debug formatting — useful for small images in tests.
impl<T: Pixel + fmt::Debug> fmt::Debug for Image<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "Image<{}> {{ {}×{}×{} }}",
            std::any::type_name::<T>(),
            self.width,
            self.height,
            self.channels,
        )?;
        for y in 0..self.height.min(8) {
            write!(f, "  row {y}: [")?;
            for x in 0..self.width.min(8) {
                if x > 0 {
                    write!(f, ", ")?;
                }
                write!(f, "{:?}", self.pixel(x, y))?;
            }
            if self.width > 8 {
                write!(f, ", ...")?;
            }
            writeln!(f, "]")?;
        }
        if self.height > 8 {
            writeln!(f, "  ...")?;
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// ImageData — the filter boundary type
// ---------------------------------------------------------------------------

/// An image as accepted and returned by filters.
///
/// Integer-sampled images are converted to f32 for the device and converted
/// back (clamped, rounded) on the way out. Real-valued images pass through
/// untouched.
#[derive(Debug, Clone)]
pub enum ImageData {
    U8(Image<u8>),
    F32(Image<f32>),
}

impl ImageData {
    pub fn width(&self) -> usize {
        match self {
            ImageData::U8(img) => img.width(),
            ImageData::F32(img) => img.width(),
        }
    }

    pub fn height(&self) -> usize {
        match self {
            ImageData::U8(img) => img.height(),
            ImageData::F32(img) => img.height(),
        }
    }

    pub fn channels(&self) -> usize {
        match self {
            ImageData::U8(img) => img.channels(),
            ImageData::F32(img) => img.channels(),
        }
    }

    pub fn kind(&self) -> SampleKind {
        match self {
            ImageData::U8(_) => SampleKind::U8,
            ImageData::F32(_) => SampleKind::F32,
        }
    }

    /// Total sample count.
    pub fn len(&self) -> usize {
        match self {
            ImageData::U8(img) => img.len(),
            ImageData::F32(img) => img.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn as_u8(&self) -> Option<&Image<u8>> {
        match self {
            ImageData::U8(img) => Some(img),
            ImageData::F32(_) => None,
        }
    }

    pub fn as_f32(&self) -> Option<&Image<f32>> {
        match self {
            ImageData::F32(img) => Some(img),
            ImageData::U8(_) => None,
        }
    }
}

impl From<Image<u8>> for ImageData {
    fn from(img: Image<u8>) -> Self {
        ImageData::U8(img)
    }
}

impl From<Image<f32>> for ImageData {
    fn from(img: Image<f32>) -> Self {
        ImageData::F32(img)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
