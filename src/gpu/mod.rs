// gpu/mod.rs — wgpu backend for the convolution engine.
//
// `GpuDevice` implements `Accelerator` on a Vulkan adapter:
//
//   alloc / free        → STORAGE buffers          (buffer.rs)
//   copy_to_device/host → write_buffer / staging   (buffer.rs)
//   launch_convolution  → gaussian_blur.wgsl       (blur.rs)
//   markers             → timestamp queries        (timer.rs)
//
// The CPU reference in `convolution.rs` stays authoritative: every GPU test
// compares against it.

pub mod blur;
pub mod buffer;
pub mod device;
pub mod timer;

use std::time::Duration;

pub use buffer::GpuBuffer;
pub use device::{AdapterInfo, DeviceProfile, GpuDevice};
pub use timer::GpuMarker;

use crate::accel::{Accelerator, ConvolutionArgs, DeviceResult};
use crate::launch::LaunchConfig;

impl Accelerator for GpuDevice {
    type Buffer = GpuBuffer;
    type Marker = GpuMarker;

    fn name(&self) -> &str {
        &self.adapter_info.name
    }

    fn alloc(&self, label: &'static str, len: usize) -> DeviceResult<GpuBuffer> {
        self.alloc_storage(label, len)
    }

    fn free(&self, buffer: &mut GpuBuffer) {
        self.free_storage(buffer);
    }

    fn copy_to_device(&self, dst: &mut GpuBuffer, src: &[f32]) -> DeviceResult<()> {
        self.upload(dst, src)
    }

    fn copy_to_host(&self, src: &GpuBuffer, dst: &mut [f32]) -> DeviceResult<()> {
        self.readback(src, dst)
    }

    fn launch_convolution(
        &self,
        launch: &LaunchConfig,
        args: ConvolutionArgs<'_, GpuBuffer>,
    ) -> DeviceResult<()> {
        self.dispatch_convolution(launch, args)
    }

    fn record_marker(&self) -> DeviceResult<GpuMarker> {
        self.marker()
    }

    fn elapsed(&self, start: &GpuMarker, end: &GpuMarker) -> DeviceResult<Duration> {
        self.marker_interval(start, end)
    }

    fn live_allocations(&self) -> usize {
        self.live_buffers()
    }
}

// dzn (the D3D12-to-Vulkan layer on WSL2) crashes during process exit once a
// Vulkan device has been created. GPU tests therefore run their body in a
// child `cargo test` process that prints "GPU_TEST_OK"; the parent checks
// the output, never the exit status.
#[cfg(test)]
pub(crate) fn run_gpu_test_in_subprocess(test_name: &str) -> String {
    let output = std::process::Command::new("cargo")
        .args([
            "test", "--lib", "--",
            test_name, "--exact", "--ignored", "--nocapture",
        ])
        .output()
        .unwrap_or_else(|e| panic!("failed to spawn subprocess for {test_name}: {e}"));
    let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
    let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
    print!("{stdout}");
    eprint!("{stderr}");
    stdout + &stderr
}
