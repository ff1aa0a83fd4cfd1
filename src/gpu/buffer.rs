// gpu/buffer.rs — Storage buffers and host↔device transfers.
//
// Every device region is a STORAGE buffer of f32 samples with COPY_DST (for
// uploads) and COPY_SRC (for readback). Readback goes through a transient
// MAP_READ staging buffer:
//
//   storage ──copy_buffer_to_buffer──▶ staging ──map_async──▶ host Vec
//
// OUT-OF-MEMORY DETECTION
// wgpu reports allocation failure asynchronously through the error-scope
// mechanism rather than as a return value. Each allocation is wrapped in an
// `OutOfMemory` scope and a `Validation` scope; popping them turns a device
// error into a `DeviceError` instead of wgpu's default panic handler.

use std::sync::atomic::Ordering;

use crate::accel::{DeviceError, DeviceResult};
use crate::gpu::device::GpuDevice;

const F32_BYTES: u64 = std::mem::size_of::<f32>() as u64;

/// A device-resident f32 region.
#[derive(Debug)]
pub struct GpuBuffer {
    pub(crate) buffer: wgpu::Buffer,
    pub(crate) label: &'static str,
    /// Length in f32 samples.
    pub(crate) len: usize,
    pub(crate) released: bool,
}

impl GpuBuffer {
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn is_released(&self) -> bool {
        self.released
    }

    pub(crate) fn check_live(&self, op: &'static str) -> DeviceResult<()> {
        if self.released {
            return Err(DeviceError::Released { op, label: self.label });
        }
        Ok(())
    }
}

/// Byte size of a region holding `len` samples. wgpu rejects zero-sized
/// storage bindings, so an empty region still occupies one sample.
fn byte_size(len: usize) -> u64 {
    (len.max(1) as u64) * F32_BYTES
}

impl GpuDevice {
    pub(crate) fn alloc_storage(&self, label: &'static str, len: usize) -> DeviceResult<GpuBuffer> {
        let bytes = byte_size(len);
        let max = self.limits.max_buffer_size.min(self.limits.max_storage_buffer_binding_size as u64);
        if bytes > max {
            return Err(DeviceError::BufferTooLarge { label, bytes, max });
        }

        self.device.push_error_scope(wgpu::ErrorFilter::OutOfMemory);
        self.device.push_error_scope(wgpu::ErrorFilter::Validation);
        let buffer = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some(label),
            size: bytes,
            usage: wgpu::BufferUsages::STORAGE
                | wgpu::BufferUsages::COPY_DST
                | wgpu::BufferUsages::COPY_SRC,
            mapped_at_creation: false,
        });
        let validation = pollster::block_on(self.device.pop_error_scope());
        let oom = pollster::block_on(self.device.pop_error_scope());

        if oom.is_some() {
            buffer.destroy();
            return Err(DeviceError::OutOfMemory { label, bytes });
        }
        if let Some(err) = validation {
            buffer.destroy();
            return Err(DeviceError::Transfer { op: "alloc", label, reason: err.to_string() });
        }

        self.live_buffers.fetch_add(1, Ordering::SeqCst);
        Ok(GpuBuffer { buffer, label, len, released: false })
    }

    pub(crate) fn free_storage(&self, buf: &mut GpuBuffer) {
        if buf.released {
            return;
        }
        buf.buffer.destroy();
        buf.released = true;
        self.live_buffers.fetch_sub(1, Ordering::SeqCst);
    }

    pub(crate) fn upload(&self, dst: &GpuBuffer, src: &[f32]) -> DeviceResult<()> {
        dst.check_live("upload")?;
        if src.len() != dst.len {
            return Err(DeviceError::SizeMismatch {
                op: "upload",
                label: dst.label,
                host: src.len(),
                device: dst.len,
            });
        }
        if src.is_empty() {
            return Ok(());
        }
        self.device.push_error_scope(wgpu::ErrorFilter::Validation);
        self.queue.write_buffer(&dst.buffer, 0, bytemuck::cast_slice(src));
        if let Some(err) = pollster::block_on(self.device.pop_error_scope()) {
            return Err(DeviceError::Transfer { op: "upload", label: dst.label, reason: err.to_string() });
        }
        Ok(())
    }

    /// Copy a storage buffer back to host memory.
    ///
    /// **Synchronous** — submits a copy and waits for the queue to drain,
    /// so it also waits for any kernel launched before it.
    pub(crate) fn readback(&self, src: &GpuBuffer, dst: &mut [f32]) -> DeviceResult<()> {
        src.check_live("download")?;
        if dst.len() != src.len {
            return Err(DeviceError::SizeMismatch {
                op: "download",
                label: src.label,
                host: dst.len(),
                device: src.len,
            });
        }
        if dst.is_empty() {
            return Ok(());
        }
        let size = src.len as u64 * F32_BYTES;

        self.device.push_error_scope(wgpu::ErrorFilter::Validation);
        let staging = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("readback staging"),
            size,
            usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        let mut encoder = self.device.create_command_encoder(
            &wgpu::CommandEncoderDescriptor { label: Some("readback") },
        );
        encoder.copy_buffer_to_buffer(&src.buffer, 0, &staging, 0, size);
        self.queue.submit(std::iter::once(encoder.finish()));
        if let Some(err) = pollster::block_on(self.device.pop_error_scope()) {
            return Err(DeviceError::Transfer { op: "download", label: src.label, reason: err.to_string() });
        }

        let slice = staging.slice(..);
        let (tx, rx) = std::sync::mpsc::channel();
        slice.map_async(wgpu::MapMode::Read, move |r| {
            // The receiver outlives the poll below; a send failure only means
            // the caller already gave up.
            let _ = tx.send(r);
        });
        self.device.poll(wgpu::Maintain::Wait);
        rx.recv()
            .map_err(|_| DeviceError::Transfer {
                op: "download",
                label: src.label,
                reason: "map callback never fired".into(),
            })?
            .map_err(|source| DeviceError::Map { label: src.label, source })?;

        {
            let mapped = slice.get_mapped_range();
            dst.copy_from_slice(bytemuck::cast_slice(&mapped));
        }
        staging.unmap();
        Ok(())
    }
}
