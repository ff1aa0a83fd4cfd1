// accel/host.rs — CPU accelerator that emulates the launch grid.
//
// Every device concept maps onto host memory:
//   buffer  → Vec<f32> owned by a `HostBuffer`
//   launch  → the (block, grid) decomposition executed on rayon
//   marker  → `Instant` (launches are synchronous, so no queue to drain)
//
// EXECUTION MODEL
// ───────────────
// The output is split into bands of `block.y` image rows — exactly the rows
// covered by one row of blocks. Bands are processed in parallel; inside a
// band, blocks run left to right and each unit (tx, ty) computes pixel
//
//   x = bx * block.x + tx,  y = by * block.y + ty
//
// skipping units outside the image, just like the shader guard. Each unit
// writes only its own pixel, and each band is a disjoint `&mut` slice, so no
// locking is needed. The kernel indexes only x and y: units with z > 0 would
// recompute identical values, so only the z = 0 plane is executed.
//
// MEMORY LIMIT
// ────────────
// `with_memory_limit` caps total live bytes, mirroring the way the GPU
// `DeviceProfile::RaspberryPi` caps limits to surface constrained-device
// failures (here: `OutOfMemory`) on a development machine.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use rayon::prelude::*;

use super::{Accelerator, ConvolutionArgs, DeviceError, DeviceResult};
use crate::convolution::convolve_pixel;
use crate::launch::LaunchConfig;

/// Units-per-block ceiling for the host backend, matching the common
/// 1024-invocation limit of discrete GPUs.
pub const MAX_UNITS_PER_BLOCK: u32 = 1024;
/// Per-axis block ceiling (x, y). z is capped at 64 as on most GPUs.
pub const MAX_BLOCK_DIM_XY: u32 = 1024;
pub const MAX_BLOCK_DIM_Z: u32 = 64;

/// Host-memory region standing in for a device buffer.
#[derive(Debug)]
pub struct HostBuffer {
    id: u64,
    label: &'static str,
    data: Vec<f32>,
    released: bool,
}

impl HostBuffer {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn is_released(&self) -> bool {
        self.released
    }
}

/// CPU backend. Cheap to create; safe to share across threads.
#[derive(Debug, Default)]
pub struct HostAccelerator {
    memory_limit: Option<usize>,
    used_bytes: AtomicUsize,
    live: AtomicUsize,
    next_id: AtomicU64,
}

impl HostAccelerator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Refuse allocations that would take live memory above `bytes`.
    pub fn with_memory_limit(bytes: usize) -> Self {
        HostAccelerator {
            memory_limit: Some(bytes),
            ..Self::default()
        }
    }

    pub fn memory_limit(&self) -> Option<usize> {
        self.memory_limit
    }

    /// Bytes currently held by live buffers.
    pub fn used_bytes(&self) -> usize {
        self.used_bytes.load(Ordering::SeqCst)
    }

    fn check_live(op: &'static str, buf: &HostBuffer) -> DeviceResult<()> {
        if buf.released {
            return Err(DeviceError::Released { op, label: buf.label });
        }
        Ok(())
    }
}

impl Accelerator for HostAccelerator {
    type Buffer = HostBuffer;
    type Marker = Instant;

    fn name(&self) -> &str {
        "host"
    }

    fn alloc(&self, label: &'static str, len: usize) -> DeviceResult<HostBuffer> {
        let bytes = len * std::mem::size_of::<f32>();
        let reserved = self.used_bytes.fetch_add(bytes, Ordering::SeqCst) + bytes;
        if let Some(limit) = self.memory_limit {
            if reserved > limit {
                self.used_bytes.fetch_sub(bytes, Ordering::SeqCst);
                return Err(DeviceError::OutOfMemory { label, bytes: bytes as u64 });
            }
        }
        self.live.fetch_add(1, Ordering::SeqCst);
        Ok(HostBuffer {
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            label,
            data: vec![0.0; len],
            released: false,
        })
    }

    fn free(&self, buffer: &mut HostBuffer) {
        if buffer.released {
            return;
        }
        let bytes = buffer.data.len() * std::mem::size_of::<f32>();
        buffer.data = Vec::new();
        buffer.released = true;
        self.used_bytes.fetch_sub(bytes, Ordering::SeqCst);
        self.live.fetch_sub(1, Ordering::SeqCst);
    }

    fn copy_to_device(&self, dst: &mut HostBuffer, src: &[f32]) -> DeviceResult<()> {
        Self::check_live("upload", dst)?;
        if dst.data.len() != src.len() {
            return Err(DeviceError::SizeMismatch {
                op: "upload",
                label: dst.label,
                host: src.len(),
                device: dst.data.len(),
            });
        }
        dst.data.copy_from_slice(src);
        Ok(())
    }

    fn copy_to_host(&self, src: &HostBuffer, dst: &mut [f32]) -> DeviceResult<()> {
        Self::check_live("download", src)?;
        if src.data.len() != dst.len() {
            return Err(DeviceError::SizeMismatch {
                op: "download",
                label: src.label,
                host: dst.len(),
                device: src.data.len(),
            });
        }
        dst.copy_from_slice(&src.data);
        Ok(())
    }

    fn launch_convolution(
        &self,
        launch: &LaunchConfig,
        args: ConvolutionArgs<'_, HostBuffer>,
    ) -> DeviceResult<()> {
        let block = launch.block;
        if block.x == 0 || block.y == 0 || block.z == 0 {
            return Err(DeviceError::EmptyBlock(block));
        }
        let per_axis = [
            ('x', block.x, MAX_BLOCK_DIM_XY),
            ('y', block.y, MAX_BLOCK_DIM_XY),
            ('z', block.z, MAX_BLOCK_DIM_Z),
        ];
        for (axis, size, max) in per_axis {
            if size > max {
                return Err(DeviceError::BlockDimensionTooLarge { block, axis, max });
            }
        }
        if block.total() > MAX_UNITS_PER_BLOCK {
            return Err(DeviceError::BlockTooLarge {
                block,
                total: block.total(),
                max: MAX_UNITS_PER_BLOCK,
            });
        }
        Self::check_live("launch", args.input)?;
        Self::check_live("launch", args.output)?;
        Self::check_live("launch", args.weights)?;

        let extent = args.extent;
        if args.input.data.len() != extent.len() || args.output.data.len() != extent.len() {
            return Err(DeviceError::Launch(format!(
                "image buffers hold {}/{} samples, extent needs {}",
                args.input.data.len(),
                args.output.data.len(),
                extent.len()
            )));
        }
        if args.weights.data.len() != args.kernel_size * args.kernel_size {
            return Err(DeviceError::Launch(format!(
                "weight buffer holds {} taps, kernel size {} needs {}",
                args.weights.data.len(),
                args.kernel_size,
                args.kernel_size * args.kernel_size
            )));
        }
        if extent.is_empty() {
            return Ok(());
        }

        let (w, h, ch) = (extent.width, extent.height, extent.channels);
        let (bw, bh) = (block.x as usize, block.y as usize);
        let (grid_x, grid_y) = (launch.grid.x as usize, launch.grid.y as usize);
        let input = args.input.data.as_slice();
        let weights = args.weights.data.as_slice();
        let kernel_size = args.kernel_size;

        args.output
            .data
            .par_chunks_mut(bh * w * ch)
            .enumerate()
            .filter(|(by, _)| *by < grid_y)
            .for_each(|(by, band)| {
                for bx in 0..grid_x {
                    // Remaining blocks of the row lie entirely past the image.
                    if bx * bw >= w {
                        break;
                    }
                    for ty in 0..bh {
                        let y = by * bh + ty;
                        if y >= h {
                            break;
                        }
                        for tx in 0..bw {
                            let x = bx * bw + tx;
                            if x >= w {
                                break;
                            }
                            let local = (ty * w + x) * ch;
                            convolve_pixel(
                                input,
                                extent,
                                weights,
                                kernel_size,
                                x,
                                y,
                                &mut band[local..local + ch],
                            );
                        }
                    }
                }
            });
        Ok(())
    }

    fn record_marker(&self) -> DeviceResult<Instant> {
        Ok(Instant::now())
    }

    fn elapsed(&self, start: &Instant, end: &Instant) -> DeviceResult<Duration> {
        Ok(end.saturating_duration_since(*start))
    }

    fn live_allocations(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::convolution::{convolve_valid, Extent};
    use crate::kernel::gaussian_kernel;
    use crate::launch::{BlockShape, GridShape};

    fn ramp(n: usize) -> Vec<f32> {
        (0..n).map(|i| ((i * 37) % 251) as f32).collect()
    }

    fn run(
        accel: &HostAccelerator,
        input: &[f32],
        extent: Extent,
        weights: &[f32],
        ksize: usize,
        launch: LaunchConfig,
    ) -> Vec<f32> {
        let mut i = accel.alloc("in", input.len()).unwrap();
        let mut o = accel.alloc("out", input.len()).unwrap();
        let mut k = accel.alloc("k", weights.len()).unwrap();
        accel.copy_to_device(&mut i, input).unwrap();
        accel.copy_to_device(&mut k, weights).unwrap();
        accel
            .launch_convolution(
                &launch,
                ConvolutionArgs { input: &i, output: &mut o, weights: &k, extent, kernel_size: ksize },
            )
            .unwrap();
        let mut out = vec![0.0; input.len()];
        accel.copy_to_host(&o, &mut out).unwrap();
        for b in [&mut i, &mut o, &mut k] {
            accel.free(b);
        }
        out
    }

    #[test]
    fn test_matches_reference_for_all_blocks() {
        let accel = HostAccelerator::new();
        let extent = Extent { width: 37, height: 21, channels: 3 };
        let input = ramp(extent.len());
        let kernel = gaussian_kernel(5, 1.2);
        let reference = convolve_valid(&input, extent, &kernel);

        for block in [BlockShape::square(8), BlockShape::square(16), BlockShape::new(5, 3, 1)] {
            let launch = LaunchConfig::covering(block, extent.width, extent.height);
            let out = run(&accel, &input, extent, kernel.as_slice(), kernel.size(), launch);
            // Same accumulation order → bit-identical.
            assert_eq!(out, reference, "block {block} differs from reference");
        }
        assert_eq!(accel.live_allocations(), 0);
    }

    #[test]
    fn test_short_grid_leaves_pixels_untouched() {
        let accel = HostAccelerator::new();
        let extent = Extent { width: 16, height: 16, channels: 1 };
        let input = vec![1.0; extent.len()];
        let launch = LaunchConfig { block: BlockShape::square(8), grid: GridShape { x: 1, y: 1 } };
        let out = run(&accel, &input, extent, &[1.0], 1, launch);
        assert_eq!(out[0], 1.0);
        assert_eq!(out[7 * 16 + 7], 1.0);
        // Outside the single 8×8 block nothing is written.
        assert_eq!(out[8], 0.0);
        assert_eq!(out[15 * 16 + 15], 0.0);
    }

    #[test]
    fn test_memory_limit() {
        let accel = HostAccelerator::with_memory_limit(64);
        let mut a = accel.alloc("a", 10).unwrap(); // 40 bytes
        let err = accel.alloc("b", 10).unwrap_err();
        assert!(matches!(err, DeviceError::OutOfMemory { label: "b", bytes: 40 }));
        assert_eq!(accel.used_bytes(), 40);
        accel.free(&mut a);
        assert_eq!(accel.used_bytes(), 0);
        assert!(accel.alloc("c", 16).is_ok());
    }

    #[test]
    fn test_free_is_idempotent() {
        let accel = HostAccelerator::new();
        let mut a = accel.alloc("a", 4).unwrap();
        accel.free(&mut a);
        accel.free(&mut a);
        assert!(a.is_released());
        assert_eq!(accel.live_allocations(), 0);
        let err = accel.copy_to_host(&a, &mut [0.0; 4]).unwrap_err();
        assert!(matches!(err, DeviceError::Released { op: "download", .. }));
    }

    #[test]
    fn test_block_too_large() {
        let accel = HostAccelerator::new();
        let extent = Extent { width: 4, height: 4, channels: 1 };
        let mut i = accel.alloc("in", 16).unwrap();
        let mut o = accel.alloc("out", 16).unwrap();
        let mut k = accel.alloc("k", 1).unwrap();
        let mut launch_with = |block: BlockShape| {
            let launch = LaunchConfig::covering(block, 4, 4);
            accel
                .launch_convolution(
                    &launch,
                    ConvolutionArgs { input: &i, output: &mut o, weights: &k, extent, kernel_size: 1 },
                )
                .unwrap_err()
        };

        let err = launch_with(BlockShape::square(64));
        assert!(matches!(err, DeviceError::BlockTooLarge { total: 4096, max: 1024, .. }));
        // An oversized axis is reported before the product is formed.
        let err = launch_with(BlockShape::new(65536, 65536, 1));
        assert!(matches!(err, DeviceError::BlockDimensionTooLarge { axis: 'x', .. }), "{err}");
        let err = launch_with(BlockShape::new(1, 1, 65));
        assert!(matches!(err, DeviceError::BlockDimensionTooLarge { axis: 'z', max: 64, .. }));

        for b in [&mut i, &mut o, &mut k] {
            accel.free(b);
        }
        assert_eq!(accel.live_allocations(), 0);
    }

    #[test]
    fn test_huge_overshooting_grid_finishes() {
        let accel = HostAccelerator::new();
        let extent = Extent { width: 6, height: 5, channels: 1 };
        let input = ramp(extent.len());
        let launch = LaunchConfig {
            block: BlockShape::square(4),
            grid: GridShape { x: u32::MAX, y: 2 },
        };
        let out = run(&accel, &input, extent, &[1.0], 1, launch);
        assert_eq!(out, input);
        assert_eq!(accel.live_allocations(), 0);
    }
}
