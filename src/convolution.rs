// convolution.rs — Full 2D convolution, CPU reference.
//
// This is the authoritative definition of one unit of work of the compute
// kernel. The host accelerator calls `convolve_pixel` directly; the WGSL
// shader (shaders/gaussian_blur.wgsl) is a line-for-line port and every GPU
// result is validated against `convolve_valid`.
//
// UNIT OF WORK
// One pixel (x, y). The unit loops over every channel and, per channel, over
// the full K×K neighbourhood. Channels and taps are not parallelised.
//
// BORDER HANDLING: valid-only.
// Taps that land outside [0, W) × [0, H) are skipped. The remaining weights
// are NOT renormalised, so pixels within r of the border receive a sum over
// fewer than K² taps and fade towards zero. For a uniform image of value V
// the interior stays V while edges and corners drop below V.
//
// ACCUMULATION ORDER
// ky outer, kx inner, f32 accumulator — the same order as the shader, which
// keeps host results bit-identical across launch configurations.

use crate::image::{Image, Pixel};
use crate::kernel::ConvKernel;

/// Image extent as seen by the compute kernel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Extent {
    pub width: usize,
    pub height: usize,
    pub channels: usize,
}

impl Extent {
    /// Samples covered (width * height * channels).
    pub fn len(&self) -> usize {
        self.width * self.height * self.channels
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Compute one unit of work: all channels of output pixel (x, y).
///
/// `input` is the interleaved f32 image, `weights` the row-major K×K kernel,
/// `out` the `channels`-long destination for this pixel.
#[inline]
pub fn convolve_pixel(
    input: &[f32],
    extent: Extent,
    weights: &[f32],
    kernel_size: usize,
    x: usize,
    y: usize,
    out: &mut [f32],
) {
    let w = extent.width as isize;
    let h = extent.height as isize;
    let ch = extent.channels;
    let r = (kernel_size / 2) as isize;
    let k = kernel_size as isize;

    for (c, dst) in out.iter_mut().enumerate().take(ch) {
        let mut sum = 0.0f32;
        for ky in -r..=r {
            let yy = y as isize + ky;
            if yy < 0 || yy >= h {
                continue;
            }
            for kx in -r..=r {
                let xx = x as isize + kx;
                if xx < 0 || xx >= w {
                    continue;
                }
                let pixel_idx = (yy * w + xx) as usize * ch + c;
                let weight_idx = ((ky + r) * k + (kx + r)) as usize;
                sum += input[pixel_idx] * weights[weight_idx];
            }
        }
        *dst = sum;
    }
}

/// Convolve a whole interleaved f32 buffer, one pixel at a time.
///
/// # Panics
/// Panics if `input.len() != extent.len()`.
pub fn convolve_valid(input: &[f32], extent: Extent, kernel: &ConvKernel) -> Vec<f32> {
    assert_eq!(
        input.len(),
        extent.len(),
        "input length ({}) must equal width * height * channels ({})",
        input.len(),
        extent.len(),
    );
    let mut output = vec![0.0f32; input.len()];
    if extent.is_empty() {
        return output;
    }
    for (i, px) in output.chunks_exact_mut(extent.channels).enumerate() {
        let x = i % extent.width;
        let y = i / extent.width;
        convolve_pixel(input, extent, kernel.as_slice(), kernel.size(), x, y, px);
    }
    output
}

/// Convenience wrapper over `convolve_valid` for typed images.
///
/// Returns `Image<f32>` regardless of input sample type, because the
/// accumulation is in f32.
pub fn convolve_image<T: Pixel>(src: &Image<T>, kernel: &ConvKernel) -> Image<f32> {
    let extent = Extent {
        width: src.width(),
        height: src.height(),
        channels: src.channels(),
    };
    let input: Vec<f32> = src.as_slice().iter().map(|&v| v.to_f32()).collect();
    let out = convolve_valid(&input, extent, kernel);
    Image::from_vec(src.width(), src.height(), src.channels(), out)
}
