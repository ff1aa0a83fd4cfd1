// rudolf-filters: Gaussian blur on a parallel accelerator
// Filter plugins over a wgpu/Vulkan device, with a rayon host fallback
//
// Layers, bottom-up:
//   image, convert, kernel, launch, convolution  — host-side data + reference
//   accel (+ host), gpu                          — accelerator backends
//   memory                                       — one staged, timed device pass
//   filter, blur, registry, engine               — plugin façade + context

pub mod image;
pub mod convert;
pub mod kernel;
pub mod launch;
pub mod convolution;
pub mod accel;
pub mod gpu;
pub mod memory;
pub mod filter;
pub mod blur;
pub mod registry;
pub mod engine;

pub use accel::{Accelerator, DeviceError, DeviceResult};
pub use blur::GaussianBlur;
pub use engine::{BackendKind, Engine, EngineConfig};
pub use filter::{Filter, FilterError, FilterOutput, FilterParams, FilterResult, ParamDescriptor};
pub use image::{Image, ImageData};
pub use kernel::{gaussian_kernel, ConvKernel};
pub use launch::{BlockShape, LaunchConfig, NamedLaunchConfig};
pub use registry::FilterRegistry;
