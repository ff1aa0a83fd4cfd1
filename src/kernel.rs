// kernel.rs — 2D convolution weight matrices.
//
// A `ConvKernel` is a square, odd-sided matrix of f32 weights stored
// row-major. Tap (kx, ky), with kx, ky ∈ [-r, r], lives at
//
//   (ky + r) * size + (kx + r)
//
// which is the exact layout uploaded to the device.
//
// NORMALIZATION
// The Gaussian generator divides by the sum of all entries, so no leading
// 1/(2πσ²) constant is needed. A non-positive (or non-finite) sum means the
// inputs were degenerate; the matrix is then returned unnormalized instead of
// failing. Rejecting σ ≤ 0 is the caller's job (see `GaussianBlur`).

/// A square convolution weight matrix with odd side length.
#[derive(Debug, Clone, PartialEq)]
pub struct ConvKernel {
    size: usize,
    weights: Vec<f32>,
}

impl ConvKernel {
    /// Wrap an existing row-major weight vector.
    ///
    /// # Panics
    /// Panics if `size` is even or `weights.len() != size * size`.
    pub fn from_weights(size: usize, weights: Vec<f32>) -> Self {
        assert!(size % 2 == 1, "kernel size must be odd (got {size})");
        assert_eq!(
            weights.len(),
            size * size,
            "weight count ({}) must equal size² ({})",
            weights.len(),
            size * size,
        );
        ConvKernel { size, weights }
    }

    /// The 1×1 matrix [1.0]. Convolving with it returns the input unchanged;
    /// filters with no convolution semantics hand this to `process`.
    pub fn identity() -> Self {
        ConvKernel { size: 1, weights: vec![1.0] }
    }

    /// Side length K.
    #[inline]
    pub fn size(&self) -> usize {
        self.size
    }

    /// Radius r = (K - 1) / 2.
    #[inline]
    pub fn radius(&self) -> usize {
        self.size / 2
    }

    /// Weight at offset (kx, ky) from the centre.
    ///
    /// # Panics
    /// Panics if either offset exceeds the radius.
    #[inline]
    pub fn at(&self, kx: isize, ky: isize) -> f32 {
        let r = self.radius() as isize;
        assert!(
            kx.abs() <= r && ky.abs() <= r,
            "tap ({kx},{ky}) outside radius {r}"
        );
        self.weights[((ky + r) as usize) * self.size + (kx + r) as usize]
    }

    /// Flattened row-major weights.
    pub fn as_slice(&self) -> &[f32] {
        &self.weights
    }

    pub fn sum(&self) -> f32 {
        self.weights.iter().sum()
    }
}

/// Round an even size up to the next odd one. Odd sizes pass through.
#[inline]
pub fn odd_size(size: usize) -> usize {
    if size % 2 == 0 {
        size + 1
    } else {
        size
    }
}

/// Build a normalized K×K Gaussian weight matrix.
///
/// An even `size` is incremented by one. Each entry is
/// `exp(-(x² + y²) / (2σ²))` for its offset (x, y) from the centre, then the
/// whole matrix is divided by its sum (skipped if the sum is not positive).
///
/// # Examples
/// ```
/// let k = rudolf_filters::kernel::gaussian_kernel(4, 1.0);
/// assert_eq!(k.size(), 5);
/// assert!((k.sum() - 1.0).abs() < 1e-5);
/// ```
pub fn gaussian_kernel(size: usize, sigma: f32) -> ConvKernel {
    let size = odd_size(size);
    let r = (size / 2) as isize;
    let two_sigma_sq = 2.0 * sigma * sigma;

    let mut weights = Vec::with_capacity(size * size);
    for i in 0..size as isize {
        for j in 0..size as isize {
            let y = (i - r) as f32;
            let x = (j - r) as f32;
            weights.push((-(x * x + y * y) / two_sigma_sq).exp());
        }
    }

    let sum: f32 = weights.iter().sum();
    if sum > 0.0 && sum.is_finite() {
        weights.iter_mut().for_each(|w| *w /= sum);
    }
    ConvKernel { size, weights }
}
