// gpu/device.rs — wgpu device abstraction.
//
// Responsibilities:
//   - Enumerate Vulkan adapters and select the first non-CPU one.
//   - Expose a `DeviceProfile` for simulating hardware limits on a
//     development machine (e.g., cap invocations to match Raspberry Pi).
//   - Validate block shapes against the active limits before a pipeline is
//     built for them.
//   - Enable GPU timestamp queries when the adapter supports them.
//
// ADAPTER SELECTION:
// wgpu's default `request_adapter` uses power preference heuristics that
// may grab llvmpipe/softpipe on WSL2 (where the software renderer appears
// as a valid Vulkan device). We enumerate explicitly and prefer real
// hardware.
//
// DEVICE LIMITS:
// `Native` requests the adapter's own limits, so 32×32 blocks work on GPUs
// that allow 1024 invocations. `RaspberryPi` requests *lower* limits than
// the hardware supports; wgpu validates every dispatch against the
// requested limits, so violations that would crash on RPi are caught at
// dev time on the laptop.
//
// NEW RUST CONCEPTS:
// - `pollster::block_on` — runs an async fn to completion on the current
//   thread. wgpu's device/adapter API is async because on WebGPU it maps
//   to JS Promises, but for native Vulkan we just block.
// - `AtomicUsize` — lock-free counter shared by `&self` methods; tracks live
//   device buffers without requiring `&mut self`.

use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};

use serde::Deserialize;

use crate::accel::{DeviceError, DeviceResult};
use crate::gpu::blur::ConvolutionPipelines;
use crate::launch::BlockShape;

/// Hardware profile controlling device limits.
///
/// Use `Native` for best performance on your development machine.
/// Use `RaspberryPi` to simulate RPi 4/5 constraints — wgpu will reject
/// any dispatch that exceeds the RPi's actual Vulkan limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceProfile {
    /// Use the adapter's actual hardware limits. No artificial caps.
    #[default]
    Native,
    /// Simulate Raspberry Pi 4/5 (Broadcom VideoCore VI/VII, V3DV Vulkan).
    /// Caps `max_compute_invocations_per_workgroup` to 256, matching the
    /// device report from RPi's V3DV driver.
    RaspberryPi,
}

impl fmt::Display for DeviceProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceProfile::Native => write!(f, "Native"),
            DeviceProfile::RaspberryPi => write!(f, "RaspberryPi (simulated limits)"),
        }
    }
}

/// Cached adapter information for logging and debugging.
#[derive(Debug, Clone)]
pub struct AdapterInfo {
    pub name: String,
    pub vendor: u32,
    pub device: u32,
    pub device_type: wgpu::DeviceType,
    pub backend: wgpu::Backend,
}

impl fmt::Display for AdapterInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({:?}, {:?})", self.name, self.backend, self.device_type)
    }
}

/// The GPU context: adapter, device, queue, limits and compiled pipelines.
///
/// Hold one `GpuDevice` for the lifetime of the application — it is
/// expensive to create (Vulkan instance + device initialization).
///
/// # Field drop order
/// Rust drops struct fields in declaration order (top → bottom).
/// `_instance` is declared last so the `wgpu::Instance` outlives `device`
/// and `queue`. This prevents a crash in dzn (the D3D12-to-Vulkan layer on
/// WSL2) that occurs when the Vulkan instance is destroyed while
/// device-level objects still hold back-references to it.
pub struct GpuDevice {
    pub(crate) pipelines: ConvolutionPipelines,
    pub device: wgpu::Device,
    pub queue: wgpu::Queue,
    pub profile: DeviceProfile,
    pub adapter_info: AdapterInfo,
    /// Limits the device was created with; every launch is checked against them.
    pub limits: wgpu::Limits,
    /// True when `TIMESTAMP_QUERY | TIMESTAMP_QUERY_INSIDE_ENCODERS` is enabled.
    pub timestamps: bool,
    pub(crate) live_buffers: AtomicUsize,
    /// Keeps the `wgpu::Instance` alive until `device` and `queue` are
    /// dropped. Never access this field directly.
    _instance: wgpu::Instance,
}

impl GpuDevice {
    /// Create a `GpuDevice` on the best Vulkan adapter with
    /// `DeviceProfile::Native` limits.
    ///
    /// # Errors
    /// Returns `Err` if no suitable adapter is found or the device
    /// request fails.
    pub fn new() -> DeviceResult<Self> {
        Self::new_with_profile(DeviceProfile::Native)
    }

    /// Create a `GpuDevice` with an explicit hardware profile.
    pub fn new_with_profile(profile: DeviceProfile) -> DeviceResult<Self> {
        pollster::block_on(Self::init_async(profile))
    }

    async fn init_async(profile: DeviceProfile) -> DeviceResult<Self> {
        // Validation layer in debug builds for shader error feedback.
        // ALLOW_UNDERLYING_NONCOMPLIANT_ADAPTER lets wgpu enumerate dzn on
        // WSL2, which declares itself non-conformant but runs compute fine.
        let flags = if cfg!(debug_assertions) {
            wgpu::InstanceFlags::VALIDATION
                | wgpu::InstanceFlags::ALLOW_UNDERLYING_NONCOMPLIANT_ADAPTER
        } else {
            wgpu::InstanceFlags::ALLOW_UNDERLYING_NONCOMPLIANT_ADAPTER
        };

        let instance = wgpu::Instance::new(wgpu::InstanceDescriptor {
            backends: wgpu::Backends::VULKAN,
            flags,
            ..Default::default()
        });

        // Tiered selection:
        //   1. DiscreteGpu / IntegratedGpu / VirtualGpu / Other (dzn).
        //   2. Last resort: whatever exists, even Cpu (llvmpipe).
        let all_adapters: Vec<wgpu::Adapter> =
            instance.enumerate_adapters(wgpu::Backends::VULKAN);

        if all_adapters.is_empty() {
            return Err(DeviceError::NoSuitableAdapter);
        }

        for a in &all_adapters {
            let info = a.get_info();
            log::info!(
                "[rudolf-filters] Vulkan adapter: {} ({:?}, {:?})",
                info.name,
                info.backend,
                info.device_type
            );
        }

        let adapter = all_adapters
            .into_iter()
            .find(|a| {
                matches!(
                    a.get_info().device_type,
                    wgpu::DeviceType::DiscreteGpu
                        | wgpu::DeviceType::IntegratedGpu
                        | wgpu::DeviceType::VirtualGpu
                        | wgpu::DeviceType::Other
                )
            })
            .or_else(|| {
                instance
                    .enumerate_adapters(wgpu::Backends::VULKAN)
                    .into_iter()
                    .next()
            })
            .ok_or(DeviceError::NoSuitableAdapter)?;

        let raw_info = adapter.get_info();
        let adapter_info = AdapterInfo {
            name: raw_info.name.clone(),
            vendor: raw_info.vendor,
            device: raw_info.device,
            device_type: raw_info.device_type,
            backend: raw_info.backend,
        };

        // Auto-detect RPi when the caller passed Native but the adapter is V3D.
        let profile = match profile {
            DeviceProfile::Native if raw_info.name.to_ascii_lowercase().contains("v3d") => {
                log::info!("[rudolf-filters] V3D adapter detected — using RaspberryPi profile");
                DeviceProfile::RaspberryPi
            }
            other => other,
        };

        let limits = limits_for_profile(profile, adapter.limits());

        let wanted = wgpu::Features::TIMESTAMP_QUERY
            | wgpu::Features::TIMESTAMP_QUERY_INSIDE_ENCODERS;
        let features = adapter.features() & wanted;
        let timestamps = features.contains(wanted);
        if !timestamps {
            log::warn!(
                "[rudolf-filters] {} lacks timestamp queries; timing falls back to queue-synchronised host markers",
                adapter_info.name
            );
        }

        let (device, queue): (wgpu::Device, wgpu::Queue) = adapter
            .request_device(
                &wgpu::DeviceDescriptor {
                    label: Some("rudolf-filters"),
                    required_features: features,
                    required_limits: limits.clone(),
                    memory_hints: wgpu::MemoryHints::default(),
                },
                None,
            )
            .await?;

        let pipelines = ConvolutionPipelines::new(&device);

        log::info!(
            "[rudolf-filters] using {} with profile {}",
            adapter_info,
            profile
        );

        Ok(GpuDevice {
            pipelines,
            device,
            queue,
            profile,
            adapter_info,
            limits,
            timestamps,
            live_buffers: AtomicUsize::new(0),
            _instance: instance,
        })
    }

    /// Check a block shape against the device limits.
    pub fn validate_block(&self, block: BlockShape) -> DeviceResult<()> {
        validate_block_against(&self.limits, block)
    }

    /// Number of device buffers allocated and not yet freed.
    pub fn live_buffers(&self) -> usize {
        self.live_buffers.load(Ordering::SeqCst)
    }
}

impl fmt::Display for GpuDevice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "GpuDevice {{ adapter: {}, profile: {}, max block: {} }}",
            self.adapter_info, self.profile, self.limits.max_compute_invocations_per_workgroup
        )
    }
}

// ============================================================
// Limits helpers
// ============================================================

/// Build wgpu limits for the given profile from the adapter's limits.
fn limits_for_profile(profile: DeviceProfile, adapter: wgpu::Limits) -> wgpu::Limits {
    match profile {
        DeviceProfile::Native => adapter,

        DeviceProfile::RaspberryPi => wgpu::Limits {
            // VideoCore VI/VII: vulkaninfo reports 256 max invocations.
            max_compute_invocations_per_workgroup: 256,
            // V3DV also caps individual workgroup dimensions at 256.
            max_compute_workgroup_size_x: 256,
            max_compute_workgroup_size_y: 256,
            max_compute_workgroup_size_z: 64,
            // Conservative storage buffer size: 128 MiB. RPi 4 shares its
            // 4 GiB RAM with the CPU.
            max_storage_buffer_binding_size: 128 << 20,
            max_buffer_size: 128 << 20,
            ..wgpu::Limits::default()
        },
    }
}

/// Validate a block shape against a set of limits.
pub(crate) fn validate_block_against(limits: &wgpu::Limits, block: BlockShape) -> DeviceResult<()> {
    if block.x == 0 || block.y == 0 || block.z == 0 {
        return Err(DeviceError::EmptyBlock(block));
    }
    let per_axis = [
        ('x', block.x, limits.max_compute_workgroup_size_x),
        ('y', block.y, limits.max_compute_workgroup_size_y),
        ('z', block.z, limits.max_compute_workgroup_size_z),
    ];
    for (axis, size, max) in per_axis {
        if size > max {
            return Err(DeviceError::BlockDimensionTooLarge { block, axis, max });
        }
    }
    let total = block.total();
    let max = limits.max_compute_invocations_per_workgroup;
    if total > max {
        return Err(DeviceError::BlockTooLarge { block, total, max });
    }
    Ok(())
}

// ============================================================
// Tests
// ============================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::run_gpu_test_in_subprocess;

    // NOTE: Tests that require an actual GPU are behind `#[ignore]` so that
    // `cargo test` passes in CI without Vulkan. Run with:
    //   cargo test -- --include-ignored

    #[test]
    fn test_rpi_limits_cap_invocations() {
        let limits = limits_for_profile(DeviceProfile::RaspberryPi, wgpu::Limits::default());
        assert_eq!(limits.max_compute_invocations_per_workgroup, 256);
        assert_eq!(limits.max_compute_workgroup_size_x, 256);
        assert_eq!(limits.max_compute_workgroup_size_y, 256);
    }

    #[test]
    fn test_native_limits_are_adapter_limits() {
        let adapter = wgpu::Limits {
            max_compute_invocations_per_workgroup: 1024,
            ..wgpu::Limits::default()
        };
        let limits = limits_for_profile(DeviceProfile::Native, adapter.clone());
        assert_eq!(limits, adapter);
    }

    #[test]
    fn test_validate_block_rpi() {
        let limits = limits_for_profile(DeviceProfile::RaspberryPi, wgpu::Limits::default());
        assert!(validate_block_against(&limits, BlockShape::square(8)).is_ok());
        assert!(validate_block_against(&limits, BlockShape::square(16)).is_ok());
        let err = validate_block_against(&limits, BlockShape::square(32)).unwrap_err();
        assert!(matches!(err, DeviceError::BlockTooLarge { total: 1024, max: 256, .. }));
    }

    #[test]
    fn test_validate_block_axis_and_zero() {
        let limits = wgpu::Limits::default();
        let err = validate_block_against(&limits, BlockShape::new(1, 1, 128)).unwrap_err();
        assert!(matches!(err, DeviceError::BlockDimensionTooLarge { axis: 'z', .. }));
        let err = validate_block_against(&limits, BlockShape::new(8, 0, 1)).unwrap_err();
        assert!(matches!(err, DeviceError::EmptyBlock(_)));
    }

    #[test]
    fn test_profile_deserializes() {
        let p: DeviceProfile = serde_json::from_str("\"raspberry_pi\"").unwrap();
        assert_eq!(p, DeviceProfile::RaspberryPi);
    }

    // ---- GPU integration tests (subprocess isolation) -----------------------
    //
    // dzn on WSL2 crashes with SIGSEGV during process exit when a Vulkan
    // device has been created. Each GPU test therefore runs in a child
    // process that prints "GPU_TEST_OK" after its assertions; the parent
    // only checks for the token, not the exit status.

    #[test]
    #[ignore = "GPU integration: run via outer subprocess wrapper"]
    fn inner_gpu_device_init_native() {
        let gpu = GpuDevice::new().expect("should initialise a Vulkan device");
        println!("{gpu}");
        assert_eq!(gpu.live_buffers(), 0);
        println!("GPU_TEST_OK");
    }

    #[test]
    #[ignore = "GPU integration: run via outer subprocess wrapper"]
    fn inner_gpu_device_init_rpi_profile() {
        let gpu = GpuDevice::new_with_profile(DeviceProfile::RaspberryPi)
            .expect("RPi profile should work on any Vulkan device");
        assert_eq!(gpu.profile, DeviceProfile::RaspberryPi);
        assert!(gpu.validate_block(BlockShape::square(16)).is_ok());
        assert!(gpu.validate_block(BlockShape::square(32)).is_err());
        println!("GPU_TEST_OK");
    }

    #[test]
    #[ignore = "requires a real Vulkan GPU"]
    fn test_gpu_device_init_native() {
        let out = run_gpu_test_in_subprocess("gpu::device::tests::inner_gpu_device_init_native");
        assert!(out.contains("GPU_TEST_OK"), "inner test did not print GPU_TEST_OK:\n{out}");
    }

    #[test]
    #[ignore = "requires a real Vulkan GPU"]
    fn test_gpu_device_init_rpi_profile() {
        let out = run_gpu_test_in_subprocess("gpu::device::tests::inner_gpu_device_init_rpi_profile");
        assert!(out.contains("GPU_TEST_OK"), "inner test did not print GPU_TEST_OK:\n{out}");
    }
}
