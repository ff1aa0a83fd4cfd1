// engine.rs — Process-wide accelerator context.
//
// `Engine::startup` is the single place an accelerator is created. Every
// registered filter shares it through an `Arc`. `Engine::shutdown` tears
// down in a fixed order:
//
//   filters (drop their Arc clones) → accelerator
//
// Field order in `Engine` encodes the same order for the implicit drop path.
//
// BACKEND SELECTION
//   Gpu   — wgpu device or error.
//   Host  — rayon CPU emulation, never fails.
//   Auto  — Gpu, falling back to Host with a warning when no adapter or
//           device is available.

use std::sync::Arc;

use serde::Deserialize;

use crate::accel::host::HostAccelerator;
use crate::accel::{Accelerator, DeviceResult};
use crate::blur::GaussianBlur;
use crate::filter::Filter;
use crate::gpu::{DeviceProfile, GpuDevice};
use crate::registry::FilterRegistry;

/// Which accelerator `Engine::startup` builds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    #[default]
    Auto,
    Gpu,
    Host,
}

/// Engine configuration. Every field has a default, so `{}` is a valid
/// JSON configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub backend: BackendKind,
    /// Device limits profile for the GPU backend.
    pub profile: DeviceProfile,
    /// Byte cap on live host-accelerator buffers.
    pub host_memory_limit: Option<usize>,
}

impl EngineConfig {
    pub fn from_json(s: &str) -> serde_json::Result<Self> {
        serde_json::from_str(s)
    }

    pub fn host() -> Self {
        EngineConfig { backend: BackendKind::Host, ..Self::default() }
    }
}

enum Backend {
    Gpu(Arc<GpuDevice>),
    Host(Arc<HostAccelerator>),
}

impl Backend {
    fn name(&self) -> &str {
        match self {
            Backend::Gpu(g) => g.name(),
            Backend::Host(h) => h.name(),
        }
    }

    fn live_allocations(&self) -> usize {
        match self {
            Backend::Gpu(g) => g.live_allocations(),
            Backend::Host(h) => h.live_allocations(),
        }
    }

    fn register_filters(&self, registry: &mut FilterRegistry) {
        match self {
            Backend::Gpu(g) => registry.register(Box::new(GaussianBlur::new(Arc::clone(g)))),
            Backend::Host(h) => registry.register(Box::new(GaussianBlur::new(Arc::clone(h)))),
        };
    }
}

/// The accelerator context plus the filters bound to it.
pub struct Engine {
    registry: FilterRegistry,
    backend: Backend,
}

impl Engine {
    /// Build the accelerator and register the built-in filters.
    ///
    /// # Errors
    /// Only `BackendKind::Gpu` can fail (no adapter, device request).
    pub fn startup(config: &EngineConfig) -> DeviceResult<Self> {
        let backend = match config.backend {
            BackendKind::Gpu => Backend::Gpu(Arc::new(GpuDevice::new_with_profile(config.profile)?)),
            BackendKind::Host => Backend::Host(Arc::new(host_accelerator(config))),
            BackendKind::Auto => match GpuDevice::new_with_profile(config.profile) {
                Ok(gpu) => Backend::Gpu(Arc::new(gpu)),
                Err(e) => {
                    log::warn!("[rudolf-filters] GPU unavailable ({e}); falling back to host accelerator");
                    Backend::Host(Arc::new(host_accelerator(config)))
                }
            },
        };

        let mut registry = FilterRegistry::new();
        backend.register_filters(&mut registry);
        log::info!(
            "[rudolf-filters] engine started on {} with filters [{}]",
            backend.name(),
            registry.names().collect::<Vec<_>>().join(", ")
        );
        Ok(Engine { registry, backend })
    }

    pub fn registry(&self) -> &FilterRegistry {
        &self.registry
    }

    pub fn filter(&self, name: &str) -> Option<&dyn Filter> {
        self.registry.get(name)
    }

    pub fn backend_name(&self) -> &str {
        self.backend.name()
    }

    pub fn is_gpu(&self) -> bool {
        matches!(self.backend, Backend::Gpu(_))
    }

    /// Device regions currently allocated on the engine's accelerator.
    pub fn live_allocations(&self) -> usize {
        self.backend.live_allocations()
    }

    /// Release filters, then the accelerator.
    pub fn shutdown(self) {
        let Engine { registry, backend } = self;
        drop(registry);
        let live = backend.live_allocations();
        if live > 0 {
            log::warn!("[rudolf-filters] shutdown with {live} device buffers still allocated");
        }
        log::info!("[rudolf-filters] engine on {} shut down", backend.name());
        drop(backend);
    }
}

fn host_accelerator(config: &EngineConfig) -> HostAccelerator {
    match config.host_memory_limit {
        Some(bytes) => HostAccelerator::with_memory_limit(bytes),
        None => HostAccelerator::new(),
    }
}
