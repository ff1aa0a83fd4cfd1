// gpu/blur.rs — Compute pipelines and dispatch for the convolution kernel.
//
// The shader in `shaders/gaussian_blur.wgsl` computes one output pixel per
// invocation. Its workgroup size IS the block shape of a launch, and naga
// cannot take `override` expressions inside @workgroup_size(), so every
// distinct block shape needs its own compiled pipeline. They are built on
// first use and cached:
//
//   launch(block = 16×16×1) ─┬─ cache hit  → reuse pipeline
//                            └─ cache miss → bake {{WG_*}} into WGSL,
//                                            compile, insert
//
// The bind group layout is shared by every pipeline and created once.
//
// BINDINGS (must match the @group(0) declarations in the shader)
//   0  input    storage, read
//   1  output   storage, read_write
//   2  weights  storage, read
//   3  params   uniform BlurParams
//
// NEW RUST CONCEPTS:
// - `Mutex<HashMap<..>>` behind `&self` — interior mutability so the cache
//   can grow while `GpuDevice` is shared immutably.
// - `Arc<wgpu::ComputePipeline>` — the pipeline is cloned out of the map so
//   the lock is released before the dispatch is recorded.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use wgpu::util::DeviceExt;

use crate::accel::{ConvolutionArgs, DeviceError, DeviceResult};
use crate::gpu::buffer::GpuBuffer;
use crate::gpu::device::GpuDevice;
use crate::launch::{BlockShape, LaunchConfig};

/// Kernel parameters uploaded as a uniform buffer.
///
/// Layout must match `BlurParams` in `gaussian_blur.wgsl`:
///   offset  0: width       (u32)
///   offset  4: height      (u32)
///   offset  8: channels    (u32)
///   offset 12: kernel_size (u32)
///   total:  16 bytes
#[repr(C)]
#[derive(Copy, Clone, Debug, PartialEq, Eq, bytemuck::Pod, bytemuck::Zeroable)]
pub(crate) struct BlurParams {
    width: u32,
    height: u32,
    channels: u32,
    kernel_size: u32,
}

impl BlurParams {
    fn new(args: &ConvolutionArgs<'_, GpuBuffer>) -> DeviceResult<Self> {
        let narrow = |v: usize, what: &str| {
            u32::try_from(v).map_err(|_| DeviceError::Launch(format!("{what} {v} does not fit in u32")))
        };
        Ok(BlurParams {
            width: narrow(args.extent.width, "width")?,
            height: narrow(args.extent.height, "height")?,
            channels: narrow(args.extent.channels, "channels")?,
            kernel_size: narrow(args.kernel_size, "kernel size")?,
        })
    }
}

/// Bake a block shape into the shader template.
fn shader_source(block: BlockShape) -> String {
    include_str!("../shaders/gaussian_blur.wgsl")
        .replace("{{WG_X}}", &block.x.to_string())
        .replace("{{WG_Y}}", &block.y.to_string())
        .replace("{{WG_Z}}", &block.z.to_string())
}

/// Shared bind group layout plus one compiled pipeline per block shape.
pub struct ConvolutionPipelines {
    bgl: wgpu::BindGroupLayout,
    layout: wgpu::PipelineLayout,
    cache: Mutex<HashMap<BlockShape, Arc<wgpu::ComputePipeline>>>,
}

fn storage_entry(binding: u32, read_only: bool) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::COMPUTE,
        ty: wgpu::BindingType::Buffer {
            ty: wgpu::BufferBindingType::Storage { read_only },
            has_dynamic_offset: false,
            min_binding_size: None,
        },
        count: None,
    }
}

impl ConvolutionPipelines {
    pub fn new(device: &wgpu::Device) -> Self {
        let bgl = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("gaussian_blur BGL"),
            entries: &[
                storage_entry(0, true),
                storage_entry(1, false),
                storage_entry(2, true),
                wgpu::BindGroupLayoutEntry {
                    binding: 3,
                    visibility: wgpu::ShaderStages::COMPUTE,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Uniform,
                        has_dynamic_offset: false,
                        min_binding_size: None,
                    },
                    count: None,
                },
            ],
        });
        let layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("gaussian_blur pipeline layout"),
            bind_group_layouts: &[&bgl],
            push_constant_ranges: &[],
        });
        ConvolutionPipelines { bgl, layout, cache: Mutex::new(HashMap::new()) }
    }

    /// Number of block shapes compiled so far.
    pub fn compiled(&self) -> usize {
        self.cache.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Fetch the pipeline for `block`, compiling it on first use.
    fn get_or_compile(
        &self,
        device: &wgpu::Device,
        block: BlockShape,
    ) -> DeviceResult<Arc<wgpu::ComputePipeline>> {
        let mut cache = self.cache.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(p) = cache.get(&block) {
            return Ok(Arc::clone(p));
        }

        device.push_error_scope(wgpu::ErrorFilter::Validation);
        let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("gaussian_blur.wgsl"),
            source: wgpu::ShaderSource::Wgsl(shader_source(block).into()),
        });
        let pipeline = device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
            label: Some("gaussian_blur"),
            layout: Some(&self.layout),
            module: &shader,
            entry_point: "gaussian_blur",
            compilation_options: wgpu::PipelineCompilationOptions::default(),
            cache: None,
        });
        if let Some(err) = pollster::block_on(device.pop_error_scope()) {
            return Err(DeviceError::Launch(format!("pipeline for block {block}: {err}")));
        }

        log::debug!("[rudolf-filters] compiled gaussian_blur pipeline for block {block}");
        let pipeline = Arc::new(pipeline);
        cache.insert(block, Arc::clone(&pipeline));
        Ok(pipeline)
    }
}

impl GpuDevice {
    /// Record and submit one convolution dispatch. Returns once the work is
    /// queued; completion is observed by the next readback or timing marker.
    pub(crate) fn dispatch_convolution(
        &self,
        launch: &LaunchConfig,
        args: ConvolutionArgs<'_, GpuBuffer>,
    ) -> DeviceResult<()> {
        self.validate_block(launch.block)?;
        let max_groups = self.limits.max_compute_workgroups_per_dimension;
        for size in [launch.grid.x, launch.grid.y] {
            if size > max_groups {
                return Err(DeviceError::GridTooLarge { size, max: max_groups });
            }
        }
        args.input.check_live("launch")?;
        args.output.check_live("launch")?;
        args.weights.check_live("launch")?;

        let samples = args.extent.len();
        let taps = args.kernel_size * args.kernel_size;
        for (buf, want) in [(args.input, samples), (&*args.output, samples), (args.weights, taps)] {
            if buf.len != want {
                return Err(DeviceError::SizeMismatch {
                    op: "launch",
                    label: buf.label,
                    host: want,
                    device: buf.len,
                });
            }
        }
        if args.extent.is_empty() {
            return Ok(());
        }

        let params = BlurParams::new(&args)?;
        let pipeline = self.pipelines.get_or_compile(&self.device, launch.block)?;

        self.device.push_error_scope(wgpu::ErrorFilter::Validation);
        let params_buf = self.device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("BlurParams"),
            contents: bytemuck::bytes_of(&params),
            usage: wgpu::BufferUsages::UNIFORM,
        });
        let bind_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("gaussian_blur bind group"),
            layout: &self.pipelines.bgl,
            entries: &[
                wgpu::BindGroupEntry { binding: 0, resource: args.input.buffer.as_entire_binding() },
                wgpu::BindGroupEntry { binding: 1, resource: args.output.buffer.as_entire_binding() },
                wgpu::BindGroupEntry { binding: 2, resource: args.weights.buffer.as_entire_binding() },
                wgpu::BindGroupEntry { binding: 3, resource: params_buf.as_entire_binding() },
            ],
        });

        let mut encoder = self.device.create_command_encoder(
            &wgpu::CommandEncoderDescriptor { label: Some("gaussian_blur") },
        );
        {
            let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some("gaussian_blur"),
                timestamp_writes: None,
            });
            pass.set_pipeline(&pipeline);
            pass.set_bind_group(0, &bind_group, &[]);
            pass.dispatch_workgroups(launch.grid.x, launch.grid.y, 1);
        }
        self.queue.submit(std::iter::once(encoder.finish()));

        if let Some(err) = pollster::block_on(self.device.pop_error_scope()) {
            return Err(DeviceError::Launch(err.to_string()));
        }
        Ok(())
    }
}
