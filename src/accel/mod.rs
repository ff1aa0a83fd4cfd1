// accel/mod.rs — The accelerator seam.
//
// Everything the memory manager needs from a parallel backend goes through
// the `Accelerator` trait: allocate and free device regions, copy f32 data
// across the host/device boundary, launch the convolution kernel with a
// (block, grid) decomposition, and record timing markers.
//
// Two implementations ship with the crate:
//   - `gpu::GpuDevice`         — wgpu compute on a Vulkan adapter.
//   - `host::HostAccelerator`  — CPU emulation of the launch grid on rayon.
//
// RELEASE DISCIPLINE
// ──────────────────
// Raw `alloc`/`free` are paired by `DeviceBuffer`, an owning guard whose
// `Drop` frees the region. Every early return (`?`) in the memory manager
// therefore releases whatever was already allocated, in reverse order of
// acquisition, without any cleanup code at the call site.
//
// TIMING
// ──────
// `DeviceTimer::start` records a marker, `stop` records a second one and
// asks the backend for the elapsed time between them. Backends resolve the
// interval on the device timeline when they can (GPU timestamp queries) and
// after a full queue synchronisation otherwise.
//
// NEW RUST CONCEPTS:
// - Associated types (`type Buffer`, `type Marker`) — each backend picks its
//   own handle types; the memory manager stays generic over them.
// - `impl Drop` — deterministic destructor. Runs when the guard goes out of
//   scope, including during `?` propagation and panics.

pub mod host;

use std::time::Duration;

use thiserror::Error;

use crate::convolution::Extent;
use crate::launch::{BlockShape, LaunchConfig};

/// Result alias for accelerator operations.
pub type DeviceResult<T> = std::result::Result<T, DeviceError>;

/// Errors raised by accelerator backends.
#[derive(Debug, Error)]
pub enum DeviceError {
    /// No usable adapter. On WSL2: check that Vulkan is installed and
    /// `vulkaninfo` shows a real GPU.
    #[error(
        "no suitable Vulkan adapter found (only CPU/software renderers visible). \
         On WSL2: ensure Vulkan is installed and `vulkaninfo` lists a real GPU."
    )]
    NoSuitableAdapter,

    /// wgpu device request failed (driver issue, unsupported limits, etc.).
    #[error("device request failed: {0}")]
    DeviceRequest(#[from] wgpu::RequestDeviceError),

    /// Block has more units of work than the device allows per block.
    #[error("block {block} has {total} units, device limit is {max}")]
    BlockTooLarge { block: BlockShape, total: u32, max: u32 },

    /// One block dimension exceeds the device's per-axis limit.
    #[error("block {block}: {axis} dimension exceeds device limit of {max}")]
    BlockDimensionTooLarge { block: BlockShape, axis: char, max: u32 },

    /// A block dimension is zero.
    #[error("block {0} has a zero dimension")]
    EmptyBlock(BlockShape),

    /// The grid exceeds the device's per-dimension dispatch limit.
    #[error("grid dimension {size} exceeds device limit of {max}")]
    GridTooLarge { size: u32, max: u32 },

    /// Allocation refused: not enough device memory.
    #[error("out of device memory allocating {label} ({bytes} bytes)")]
    OutOfMemory { label: &'static str, bytes: u64 },

    /// Allocation larger than a single buffer may be on this device.
    #[error("{label}: {bytes} bytes exceeds the device buffer limit of {max} bytes")]
    BufferTooLarge { label: &'static str, bytes: u64, max: u64 },

    /// Host and device extents disagree during a copy.
    #[error("{op} {label}: host has {host} samples, device buffer has {device}")]
    SizeMismatch {
        op: &'static str,
        label: &'static str,
        host: usize,
        device: usize,
    },

    /// A copy was attempted on a buffer that has already been freed.
    #[error("{op} {label}: buffer already released")]
    Released { op: &'static str, label: &'static str },

    /// Device rejected a host↔device transfer.
    #[error("{op} {label} failed: {reason}")]
    Transfer {
        op: &'static str,
        label: &'static str,
        reason: String,
    },

    /// Mapping a readback buffer failed.
    #[error("mapping {label} for readback failed: {source}")]
    Map {
        label: &'static str,
        #[source]
        source: wgpu::BufferAsyncError,
    },

    /// The compute kernel could not be launched.
    #[error("kernel launch failed: {0}")]
    Launch(String),

    /// Timing markers could not be recorded or resolved.
    #[error("timing failed: {0}")]
    Timing(String),
}

/// Arguments of one convolution launch. Buffers hold interleaved f32
/// samples (`input`, `output`) and the row-major K×K weights.
pub struct ConvolutionArgs<'a, B> {
    pub input: &'a B,
    pub output: &'a mut B,
    pub weights: &'a B,
    pub extent: Extent,
    pub kernel_size: usize,
}

/// A parallel compute backend that can run the convolution kernel.
pub trait Accelerator {
    /// Device-resident f32 region.
    type Buffer;
    /// Timing marker recorded on the device timeline.
    type Marker;

    /// Human-readable backend name for logs and reports.
    fn name(&self) -> &str;

    /// Allocate a zero-initialised region of `len` f32 samples.
    fn alloc(&self, label: &'static str, len: usize) -> DeviceResult<Self::Buffer>;

    /// Release a region. Idempotent: a released handle is inert and a second
    /// call does nothing.
    fn free(&self, buffer: &mut Self::Buffer);

    /// Host → device copy. `src.len()` must equal the buffer length.
    fn copy_to_device(&self, dst: &mut Self::Buffer, src: &[f32]) -> DeviceResult<()>;

    /// Device → host copy. `dst.len()` must equal the buffer length.
    /// Blocks until all previously launched work has completed.
    fn copy_to_host(&self, src: &Self::Buffer, dst: &mut [f32]) -> DeviceResult<()>;

    /// Launch the convolution kernel over `launch.grid` blocks of
    /// `launch.block` units. May return before the work completes.
    fn launch_convolution(
        &self,
        launch: &LaunchConfig,
        args: ConvolutionArgs<'_, Self::Buffer>,
    ) -> DeviceResult<()>;

    /// Record a timing marker after all previously submitted work.
    fn record_marker(&self) -> DeviceResult<Self::Marker>;

    /// Elapsed device time between two markers. Synchronises on `end`.
    fn elapsed(&self, start: &Self::Marker, end: &Self::Marker) -> DeviceResult<Duration>;

    /// Number of regions currently allocated and not yet freed.
    fn live_allocations(&self) -> usize;
}

// ---------------------------------------------------------------------------
// DeviceBuffer — scoped acquisition with guaranteed release
// ---------------------------------------------------------------------------

/// An owning handle to one device region. Freed exactly once, on drop.
pub struct DeviceBuffer<'a, A: Accelerator> {
    accel: &'a A,
    buffer: A::Buffer,
    label: &'static str,
    len: usize,
}

impl<'a, A: Accelerator> DeviceBuffer<'a, A> {
    /// Allocate `len` f32 samples on `accel`.
    pub fn alloc(accel: &'a A, label: &'static str, len: usize) -> DeviceResult<Self> {
        let buffer = accel.alloc(label, len)?;
        log::trace!("[{}] alloc {label}: {len} samples", accel.name());
        Ok(DeviceBuffer { accel, buffer, label, len })
    }

    /// Allocate and fill from a host slice in one step.
    pub fn from_host(accel: &'a A, label: &'static str, src: &[f32]) -> DeviceResult<Self> {
        let mut buf = Self::alloc(accel, label, src.len())?;
        // On failure `buf` drops here and the region is released.
        buf.upload(src)?;
        Ok(buf)
    }

    pub fn upload(&mut self, src: &[f32]) -> DeviceResult<()> {
        self.accel.copy_to_device(&mut self.buffer, src)
    }

    /// Copy the region into a freshly allocated host vector.
    pub fn download(&self) -> DeviceResult<Vec<f32>> {
        let mut host = vec![0.0f32; self.len];
        self.accel.copy_to_host(&self.buffer, &mut host)?;
        Ok(host)
    }

    pub fn raw(&self) -> &A::Buffer {
        &self.buffer
    }

    pub fn raw_mut(&mut self) -> &mut A::Buffer {
        &mut self.buffer
    }

    pub fn label(&self) -> &'static str {
        self.label
    }

    /// Length in f32 samples.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

impl<A: Accelerator> Drop for DeviceBuffer<'_, A> {
    fn drop(&mut self) {
        self.accel.free(&mut self.buffer);
        log::trace!("[{}] free {}", self.accel.name(), self.label);
    }
}

// ---------------------------------------------------------------------------
// DeviceTimer
// ---------------------------------------------------------------------------

/// Start/stop timer on the device timeline. Wrap only the kernel launch
/// so transfers stay out of the measurement.
pub struct DeviceTimer<'a, A: Accelerator> {
    accel: &'a A,
    start: A::Marker,
}

impl<'a, A: Accelerator> DeviceTimer<'a, A> {
    pub fn start(accel: &'a A) -> DeviceResult<Self> {
        let start = accel.record_marker()?;
        Ok(DeviceTimer { accel, start })
    }

    /// Record the end marker and resolve the elapsed time. Blocks until the
    /// work submitted since `start` has finished.
    pub fn stop(self) -> DeviceResult<Duration> {
        let end = self.accel.record_marker()?;
        self.accel.elapsed(&self.start, &end)
    }
}
