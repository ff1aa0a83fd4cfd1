// memory.rs — Staging, launch and readback for one convolution pass.
//
// One call = one complete device round trip:
//
//   1. alloc   input  (W·H·C f32)   ┐
//   2. alloc   output (W·H·C f32)   │ DeviceBuffer guards, dropped in
//   3. alloc   weights (K·K f32)    ┘ reverse order on every exit path
//   4. upload  image, weights
//   5. marker  ── launch ── marker  (only the launch is timed)
//   6. download output into a fresh host Vec
//
// Any `?` between 1 and 6 drops the guards acquired so far, so a failed
// allocation, transfer, launch or timing step never leaks device memory.
// Buffers are never reused across calls.

use std::time::Duration;

use crate::accel::{Accelerator, ConvolutionArgs, DeviceBuffer, DeviceResult, DeviceTimer};
use crate::convolution::Extent;
use crate::kernel::ConvKernel;
use crate::launch::LaunchConfig;

/// Output samples of one pass plus the elapsed device time of the launch.
#[derive(Debug, Clone)]
pub struct ConvolutionRun {
    pub samples: Vec<f32>,
    pub elapsed: Duration,
}

/// Run the convolution kernel on `accel` for an interleaved f32 image.
///
/// `samples.len()` must equal `extent.len()`; the backend reports a
/// `SizeMismatch` otherwise.
pub fn run_convolution<A: Accelerator>(
    accel: &A,
    samples: &[f32],
    extent: Extent,
    kernel: &ConvKernel,
    launch: &LaunchConfig,
) -> DeviceResult<ConvolutionRun> {
    let mut input = DeviceBuffer::alloc(accel, "input image", extent.len())?;
    let mut output = DeviceBuffer::alloc(accel, "output image", extent.len())?;
    let mut weights = DeviceBuffer::alloc(accel, "kernel weights", kernel.as_slice().len())?;

    input.upload(samples)?;
    weights.upload(kernel.as_slice())?;

    let timer = DeviceTimer::start(accel)?;
    accel.launch_convolution(
        launch,
        ConvolutionArgs {
            input: input.raw(),
            output: output.raw_mut(),
            weights: weights.raw(),
            extent,
            kernel_size: kernel.size(),
        },
    )?;
    let elapsed = timer.stop()?;

    let samples = output.download()?;
    log::debug!(
        "[{}] convolution {}×{}×{} k={} {} in {:.3} ms",
        accel.name(),
        extent.width,
        extent.height,
        extent.channels,
        kernel.size(),
        launch,
        elapsed.as_secs_f64() * 1e3,
    );
    Ok(ConvolutionRun { samples, elapsed })
}
