// blur.rs — Gaussian blur filter.
//
// The façade over the engine: validates what the accelerator cannot, builds
// the kernel, hands image + kernel + launch to the memory manager and
// converts the result back to the caller's sample kind.
//
//   ImageData ──to f32──▶ run_convolution ──samples──▶ samples_like ──▶ ImageData
//                         (alloc, upload, timed launch, download, free)
//
// Borders follow the valid-only policy of the convolution kernel: edge and
// corner pixels darken because out-of-image taps are dropped without
// renormalising the remaining weights.

use std::sync::Arc;

use crate::accel::Accelerator;
use crate::convert::{image_data_to_f32, samples_like};
use crate::convolution::Extent;
use crate::filter::{
    Filter, FilterError, FilterOutput, FilterParams, FilterResult, ParamDescriptor, ParamKind,
    ParamSpec, ParamValue,
};
use crate::image::ImageData;
use crate::kernel::{gaussian_kernel, odd_size, ConvKernel};
use crate::launch::{BlockShape, LaunchConfig, NamedLaunchConfig};
use crate::memory::run_convolution;

/// Default standard deviation when the caller does not pass `sigma`.
pub const DEFAULT_SIGMA: f64 = 1.0;
/// Default kernel side advertised by the parameter descriptor.
pub const DEFAULT_KERNEL_SIZE: i64 = 5;
/// Largest kernel side accepted by `generate_kernel` and `process`.
pub const MAX_KERNEL_SIZE: usize = 255;

/// 2D Gaussian blur running on any accelerator.
pub struct GaussianBlur<A: Accelerator> {
    accel: Arc<A>,
}

impl<A: Accelerator> GaussianBlur<A> {
    pub fn new(accel: Arc<A>) -> Self {
        GaussianBlur { accel }
    }

    pub fn accelerator(&self) -> &A {
        &self.accel
    }
}

fn validate_image(image: &ImageData) -> FilterResult<Extent> {
    let extent = Extent {
        width: image.width(),
        height: image.height(),
        channels: image.channels(),
    };
    if extent.width == 0 || extent.height == 0 {
        return Err(FilterError::InvalidImage(format!(
            "image is empty ({}×{})",
            extent.width, extent.height
        )));
    }
    if !matches!(extent.channels, 1 | 3) {
        return Err(FilterError::InvalidImage(format!(
            "{} channels, expected 1 or 3",
            extent.channels
        )));
    }
    if image.len() != extent.len() {
        return Err(FilterError::InvalidImage(format!(
            "{} samples for a {}×{}×{} image",
            image.len(),
            extent.width,
            extent.height,
            extent.channels
        )));
    }
    Ok(extent)
}

fn validate_kernel_size(size: usize) -> FilterResult<()> {
    if size > MAX_KERNEL_SIZE {
        return Err(FilterError::InvalidParameter {
            name: "kernel_size".into(),
            reason: format!("{size} exceeds the supported maximum of {MAX_KERNEL_SIZE}"),
        });
    }
    Ok(())
}

fn validate_launch(launch: &LaunchConfig, extent: Extent) -> FilterResult<()> {
    let b = launch.block;
    if b.x == 0 || b.y == 0 || b.z == 0 {
        return Err(FilterError::InvalidLaunch(format!("block {b} has a zero dimension")));
    }
    if !launch.covers(extent.width, extent.height) {
        return Err(FilterError::InvalidLaunch(format!(
            "{launch} covers {}×{} units, image is {}×{}",
            u64::from(b.x) * u64::from(launch.grid.x),
            u64::from(b.y) * u64::from(launch.grid.y),
            extent.width,
            extent.height
        )));
    }
    Ok(())
}

impl<A> Filter for GaussianBlur<A>
where
    A: Accelerator + Send + Sync,
{
    fn name(&self) -> &str {
        "blur"
    }

    fn description(&self) -> &str {
        "Gaussian blur: full 2D convolution with a normalized Gaussian kernel, valid-only borders"
    }

    fn generate_kernel(&self, size: usize, params: &FilterParams) -> FilterResult<ConvKernel> {
        let sigma = params.float("sigma")?.unwrap_or(DEFAULT_SIGMA);
        if !sigma.is_finite() || sigma <= 0.0 {
            return Err(FilterError::InvalidParameter {
                name: "sigma".into(),
                reason: format!("must be a positive finite number, got {sigma}"),
            });
        }
        validate_kernel_size(odd_size(size))?;
        Ok(gaussian_kernel(size, sigma as f32))
    }

    fn process(
        &self,
        image: &ImageData,
        kernel: &ConvKernel,
        launch: &LaunchConfig,
    ) -> FilterResult<FilterOutput> {
        let extent = validate_image(image)?;
        validate_kernel_size(kernel.size())?;
        validate_launch(launch, extent)?;

        let samples = image_data_to_f32(image);
        let run = run_convolution(self.accel.as_ref(), &samples, extent, kernel, launch)?;
        Ok(FilterOutput {
            image: samples_like(image, run.samples),
            elapsed: run.elapsed,
        })
    }

    fn recommended_launch_configs(&self) -> Vec<NamedLaunchConfig> {
        [8, 16, 32]
            .into_iter()
            .map(|n| NamedLaunchConfig::new(format!("{n}x{n}"), BlockShape::square(n)))
            .collect()
    }

    fn parameter_descriptor(&self) -> ParamDescriptor {
        ParamDescriptor::new()
            .param(
                "kernel_size",
                ParamSpec {
                    kind: ParamKind::Int,
                    default: ParamValue::Int(DEFAULT_KERNEL_SIZE),
                    min: Some(ParamValue::Int(3)),
                    max: Some(ParamValue::Int(31)),
                    step: Some(ParamValue::Int(2)),
                    description: "Side length of the square kernel (odd; even values are bumped up)"
                        .into(),
                },
            )
            .param(
                "sigma",
                ParamSpec {
                    kind: ParamKind::Float,
                    default: ParamValue::Float(DEFAULT_SIGMA),
                    min: Some(ParamValue::Float(0.1)),
                    max: Some(ParamValue::Float(10.0)),
                    step: Some(ParamValue::Float(0.1)),
                    description: "Standard deviation of the Gaussian".into(),
                },
            )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::accel::host::HostAccelerator;
    use crate::image::Image;

    fn blur() -> GaussianBlur<HostAccelerator> {
        GaussianBlur::new(Arc::new(HostAccelerator::new()))
    }

    #[test]
    fn test_sigma_defaults_to_one() {
        let k = blur().generate_kernel(5, &FilterParams::new()).unwrap();
        assert_eq!(k, gaussian_kernel(5, 1.0));
    }

    #[test]
    fn test_even_size_is_bumped() {
        let k = blur().generate_kernel(4, &FilterParams::new().with("sigma", 2.0)).unwrap();
        assert_eq!(k.size(), 5);
    }

    #[test]
    fn test_rejects_bad_sigma() {
        for sigma in [0.0, -1.0, f64::NAN, f64::INFINITY] {
            let err = blur()
                .generate_kernel(5, &FilterParams::new().with("sigma", sigma))
                .unwrap_err();
            assert!(
                matches!(err, FilterError::InvalidParameter { ref name, .. } if name == "sigma"),
                "sigma {sigma}: {err}"
            );
        }
    }

    #[test]
    fn test_rejects_oversized_kernel() {
        let f = blur();
        assert_eq!(f.generate_kernel(MAX_KERNEL_SIZE, &FilterParams::new()).unwrap().size(), 255);
        // 256 is bumped to 257 before the bound is checked.
        for size in [MAX_KERNEL_SIZE + 1, 10_000] {
            let err = f.generate_kernel(size, &FilterParams::new()).unwrap_err();
            assert!(
                matches!(err, FilterError::InvalidParameter { ref name, .. } if name == "kernel_size"),
                "size {size}: {err}"
            );
        }

        let n = MAX_KERNEL_SIZE + 2;
        let kernel = ConvKernel::from_weights(n, vec![0.0; n * n]);
        let img: ImageData = Image::<f32>::new(4, 4, 1).into();
        let launch = LaunchConfig::covering(BlockShape::square(8), 4, 4);
        let err = f.process(&img, &kernel, &launch).unwrap_err();
        assert!(matches!(err, FilterError::InvalidParameter { ref name, .. } if name == "kernel_size"));
        assert_eq!(f.accelerator().live_allocations(), 0);
    }

    #[test]
    fn test_rejects_empty_image() {
        let img: ImageData = Image::<u8>::new(0, 4, 1).into();
        let launch = LaunchConfig::covering(BlockShape::square(8), 0, 4);
        let err = blur().process(&img, &ConvKernel::identity(), &launch).unwrap_err();
        assert!(matches!(err, FilterError::InvalidImage(_)));
    }

    #[test]
    fn test_rejects_uncovering_grid() {
        let img: ImageData = Image::<f32>::new(20, 20, 1).into();
        let launch = LaunchConfig::covering(BlockShape::square(8), 8, 8);
        let err = blur().process(&img, &ConvKernel::identity(), &launch).unwrap_err();
        assert!(matches!(err, FilterError::InvalidLaunch(_)), "{err}");
    }

    #[test]
    fn test_rejects_zero_block() {
        let img: ImageData = Image::<f32>::new(4, 4, 1).into();
        let mut launch = LaunchConfig::covering(BlockShape::square(8), 4, 4);
        launch.block.z = 0;
        let err = blur().process(&img, &ConvKernel::identity(), &launch).unwrap_err();
        assert!(matches!(err, FilterError::InvalidLaunch(_)));
    }

    #[test]
    fn test_device_errors_pass_through() {
        let f = GaussianBlur::new(Arc::new(HostAccelerator::with_memory_limit(64)));
        let img: ImageData = Image::<f32>::new(16, 16, 1).into();
        let launch = LaunchConfig::covering(BlockShape::square(8), 16, 16);
        let err = f.process(&img, &ConvKernel::identity(), &launch).unwrap_err();
        assert!(matches!(err, FilterError::Device(_)));
        assert_eq!(f.accelerator().live_allocations(), 0);
    }

    #[test]
    fn test_recommended_configs() {
        let names: Vec<_> = blur().recommended_launch_configs().into_iter().map(|c| c.name).collect();
        assert_eq!(names, vec!["8x8", "16x16", "32x32"]);
    }

    #[test]
    fn test_descriptor_defaults() {
        let d = blur().parameter_descriptor();
        assert_eq!(d.names().collect::<Vec<_>>(), vec!["kernel_size", "sigma"]);
        let ks = d.get("kernel_size").unwrap();
        assert_eq!(ks.default, ParamValue::Int(5));
        assert_eq!(ks.min, Some(ParamValue::Int(3)));
        assert_eq!(ks.max, Some(ParamValue::Int(31)));
        let sigma = d.get("sigma").unwrap();
        assert_eq!(sigma.default, ParamValue::Float(1.0));
        assert_eq!(sigma.max, Some(ParamValue::Float(10.0)));
    }
}
