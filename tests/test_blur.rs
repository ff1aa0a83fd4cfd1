// tests/test_blur.rs — End-to-end Gaussian blur on the host accelerator.
//
// The host backend runs everywhere, so these cover the full façade path:
// kernel generation → staging → launch → readback → conversion.

use std::sync::Arc;

use rudolf_filters::accel::host::HostAccelerator;
use rudolf_filters::accel::Accelerator;
use rudolf_filters::blur::GaussianBlur;
use rudolf_filters::filter::{Filter, FilterParams};
use rudolf_filters::image::{Image, ImageData};
use rudolf_filters::kernel::ConvKernel;
use rudolf_filters::launch::{BlockShape, LaunchConfig};

fn blur() -> GaussianBlur<HostAccelerator> {
    GaussianBlur::new(Arc::new(HostAccelerator::new()))
}

fn launch_for(block: BlockShape, img: &ImageData) -> LaunchConfig {
    LaunchConfig::covering(block, img.width(), img.height())
}

fn kernel(size: usize, sigma: f64) -> ConvKernel {
    blur()
        .generate_kernel(size, &FilterParams::new().with("sigma", sigma))
        .unwrap()
}

fn textured_rgb(w: usize, h: usize) -> Image<u8> {
    let mut img = Image::new(w, h, 3);
    for y in 0..h {
        for x in 0..w {
            for c in 0..3 {
                img.set(x, y, c, ((x * 31 + y * 17 + c * 89) % 256) as u8);
            }
        }
    }
    img
}

#[test]
fn identity_kernel_returns_input() {
    let f = blur();
    let src: ImageData = textured_rgb(23, 11).into();
    let out = f
        .process(&src, &ConvKernel::identity(), &launch_for(BlockShape::square(8), &src))
        .unwrap();
    assert_eq!(out.image.as_u8().unwrap().as_slice(), src.as_u8().unwrap().as_slice());
    assert_eq!(f.accelerator().live_allocations(), 0);
}

#[test]
fn uniform_image_darkens_only_at_borders() {
    let f = blur();
    let v = 100.0f32;
    let src: ImageData = Image::filled(20, 14, &[v]).into();
    let k = kernel(5, 1.5);
    let out = f.process(&src, &k, &launch_for(BlockShape::square(16), &src)).unwrap();
    let img = out.image.as_f32().unwrap();

    for y in 0..14 {
        for x in 0..20 {
            let got = img.get(x, y, 0);
            let interior = (2..18).contains(&x) && (2..12).contains(&y);
            if interior {
                assert!((got - v).abs() < 1e-3, "interior ({x},{y}) = {got}");
            } else {
                assert!(got < v - 1e-3, "border ({x},{y}) = {got} not darkened");
            }
        }
    }
    // Corners lose taps on two sides.
    assert!(img.get(0, 0, 0) < img.get(0, 7, 0));
}

#[test]
fn output_is_identical_across_launch_configs() {
    let f = blur();
    let src: ImageData = textured_rgb(45, 29).into();
    let k = kernel(7, 2.0);
    let blocks = [
        BlockShape::square(8),
        BlockShape::square(16),
        BlockShape::square(32),
        BlockShape::new(7, 3, 1),
        BlockShape::new(64, 1, 1),
    ];
    let reference = f.process(&src, &k, &launch_for(blocks[0], &src)).unwrap();
    for block in blocks {
        for _ in 0..2 {
            let out = f.process(&src, &k, &launch_for(block, &src)).unwrap();
            assert_eq!(
                out.image.as_u8().unwrap().as_slice(),
                reference.image.as_u8().unwrap().as_slice(),
                "block {block}"
            );
        }
    }
}

#[test]
fn impulse_response_is_the_kernel() {
    let f = blur();
    let mut img = Image::<f32>::new(4, 4, 1);
    img.set(2, 2, 0, 100.0);
    let src: ImageData = img.into();
    let k = kernel(3, 1.0);
    let out = f.process(&src, &k, &launch_for(BlockShape::square(8), &src)).unwrap();
    let out = out.image.as_f32().unwrap();

    for y in 0..4isize {
        for x in 0..4isize {
            let (dx, dy) = (x - 2, y - 2);
            let expected = if dx.abs() <= 1 && dy.abs() <= 1 {
                k.at(dx, dy) * 100.0
            } else {
                0.0
            };
            let got = out.get(x as usize, y as usize, 0);
            assert!((got - expected).abs() < 1e-4, "({x},{y}): {got} vs {expected}");
        }
    }
    assert!((out.get(2, 2, 0) - k.at(0, 0) * 100.0).abs() < 1e-4);
}

#[test]
fn constant_rgb_interior_is_preserved() {
    let f = blur();
    let src: ImageData = Image::filled(16, 16, &[10u8, 20, 30]).into();
    let k = kernel(5, 1.0);
    let out = f.process(&src, &k, &launch_for(BlockShape::square(16), &src)).unwrap();
    let img = out.image.as_u8().unwrap();

    assert_eq!((img.width(), img.height(), img.channels()), (16, 16, 3));
    for y in 2..14 {
        for x in 2..14 {
            assert_eq!(img.pixel(x, y), &[10, 20, 30], "({x},{y})");
        }
    }
    // No channel bleed: every channel keeps its own ordering at the corner.
    let corner = img.pixel(0, 0);
    assert!(corner[0] < 10 && corner[1] < 20 && corner[2] < 30);
    assert!(corner[0] < corner[1] && corner[1] < corner[2]);
}

#[test]
fn u8_results_are_clamped() {
    let f = blur();
    let src: ImageData = Image::filled(6, 6, &[200u8]).into();
    // Weights sum to 2: interior would be 400 before clamping.
    let k = ConvKernel::from_weights(3, vec![0.0, 0.0, 0.0, 0.0, 2.0, 0.0, 0.0, 0.0, 0.0]);
    let out = f.process(&src, &k, &launch_for(BlockShape::square(8), &src)).unwrap();
    assert!(out.image.as_u8().unwrap().as_slice().iter().all(|&v| v == 255));
}

#[test]
fn kernel_larger_than_image() {
    let f = blur();
    let src: ImageData = Image::filled(3, 2, &[50.0f32]).into();
    let k = kernel(9, 3.0);
    let out = f.process(&src, &k, &launch_for(BlockShape::square(8), &src)).unwrap();
    let img = out.image.as_f32().unwrap();
    assert!(img.as_slice().iter().all(|&v| v > 0.0 && v < 50.0));
}

#[test]
fn oversized_block_is_a_device_error() {
    use rudolf_filters::accel::DeviceError;
    use rudolf_filters::filter::FilterError;

    let f = blur();
    let src: ImageData = Image::<f32>::new(4, 4, 1).into();
    for block in [BlockShape::new(65536, 65536, 1), BlockShape::new(1024, 1024, 1)] {
        let err = f
            .process(&src, &ConvKernel::identity(), &launch_for(block, &src))
            .unwrap_err();
        assert!(
            matches!(
                err,
                FilterError::Device(
                    DeviceError::BlockTooLarge { .. } | DeviceError::BlockDimensionTooLarge { .. }
                )
            ),
            "block {block}: {err}"
        );
    }
    assert_eq!(f.accelerator().live_allocations(), 0);
}
