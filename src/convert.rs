// convert.rs — Sample conversions at the host/device boundary.
//
// Device buffers are always f32. On the way in, integer samples are widened
// with a raw cast (u8 42 → f32 42.0, NOT normalized to [0, 1]). On the way
// out, results for integer-sampled inputs are clamped to [0, 255] and
// rounded back to u8; real-valued results pass through untouched.

use crate::image::{Image, ImageData, Pixel};

/// Widen any image to a flat f32 sample vector, preserving raw values.
pub fn to_f32_samples<T: Pixel>(src: &Image<T>) -> Vec<f32> {
    src.as_slice().iter().map(|&v| v.to_f32()).collect()
}

/// Flatten an `ImageData` into the f32 staging vector uploaded to the device.
pub fn image_data_to_f32(src: &ImageData) -> Vec<f32> {
    match src {
        ImageData::U8(img) => to_f32_samples(img),
        // Already real-valued; a plain copy keeps the caller's image untouched.
        ImageData::F32(img) => img.as_slice().to_vec(),
    }
}

/// Narrow raw f32 samples to u8: clamp to [0, 255], then round.
pub fn f32_to_u8_samples(src: &[f32]) -> Vec<u8> {
    src.iter().map(|&v| u8::from_f32(v)).collect()
}

/// Rebuild an image of the same shape and sample kind as `like` from device
/// output samples.
///
/// # Panics
/// Panics if `samples.len()` does not match the shape of `like`.
pub fn samples_like(like: &ImageData, samples: Vec<f32>) -> ImageData {
    let (w, h, c) = (like.width(), like.height(), like.channels());
    match like {
        ImageData::U8(_) => ImageData::U8(Image::from_vec(w, h, c, f32_to_u8_samples(&samples))),
        ImageData::F32(_) => ImageData::F32(Image::from_vec(w, h, c, samples)),
    }
}

/// Generic conversion between any two Pixel types via f32 as intermediate.
///
/// NOTE ON GENERICS:
/// S (source) and D (destination) are both `Pixel`. The compiler emits one
/// specialised copy per concrete (S, D) pair — no runtime dispatch.
pub fn convert_image<S: Pixel, D: Pixel>(src: &Image<S>) -> Image<D> {
    let data = src.as_slice().iter().map(|&v| D::from_f32(v.to_f32())).collect();
    Image::from_vec(src.width(), src.height(), src.channels(), data)
}
