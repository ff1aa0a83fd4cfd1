// gpu/timer.rs — Device-timeline timing markers.
//
// With TIMESTAMP_QUERY_INSIDE_ENCODERS a marker is a one-slot query set
// written by its own command buffer, so it lands on the queue between the
// work submitted before and after it. Resolving two markers:
//
//   start qs ─resolve─▶ [0..8)    ┐ query-resolve buffer
//   end   qs ─resolve─▶ [256..264)┘ (offsets 256-aligned)
//        └──copy──▶ MAP_READ staging ──map──▶ (end − start) × period ns
//
// Without the feature, a marker drains the queue (`Maintain::Wait`) and
// records a host `Instant`. The interval then covers only work that ran
// between the two synchronisation points, which for a single launch is the
// kernel plus submission overhead.

use std::time::{Duration, Instant};

use crate::accel::{DeviceError, DeviceResult};
use crate::gpu::device::GpuDevice;

/// A point on the device timeline.
#[derive(Debug)]
pub enum GpuMarker {
    Timestamp(wgpu::QuerySet),
    Host(Instant),
}

const RESOLVE_STRIDE: u64 = wgpu::QUERY_RESOLVE_BUFFER_ALIGNMENT;

impl GpuDevice {
    pub(crate) fn marker(&self) -> DeviceResult<GpuMarker> {
        if !self.timestamps {
            self.device.poll(wgpu::Maintain::Wait);
            return Ok(GpuMarker::Host(Instant::now()));
        }

        let set = self.device.create_query_set(&wgpu::QuerySetDescriptor {
            label: Some("timing marker"),
            ty: wgpu::QueryType::Timestamp,
            count: 1,
        });
        let mut encoder = self.device.create_command_encoder(
            &wgpu::CommandEncoderDescriptor { label: Some("timing marker") },
        );
        encoder.write_timestamp(&set, 0);
        self.queue.submit(std::iter::once(encoder.finish()));
        Ok(GpuMarker::Timestamp(set))
    }

    pub(crate) fn marker_interval(&self, start: &GpuMarker, end: &GpuMarker) -> DeviceResult<Duration> {
        match (start, end) {
            (GpuMarker::Host(a), GpuMarker::Host(b)) => Ok(b.saturating_duration_since(*a)),
            (GpuMarker::Timestamp(a), GpuMarker::Timestamp(b)) => self.resolve_timestamps(a, b),
            _ => Err(DeviceError::Timing("markers come from different timing modes".into())),
        }
    }

    fn resolve_timestamps(&self, start: &wgpu::QuerySet, end: &wgpu::QuerySet) -> DeviceResult<Duration> {
        let resolve = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("timestamp resolve"),
            size: RESOLVE_STRIDE + 8,
            usage: wgpu::BufferUsages::QUERY_RESOLVE | wgpu::BufferUsages::COPY_SRC,
            mapped_at_creation: false,
        });
        let staging = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("timestamp staging"),
            size: RESOLVE_STRIDE + 8,
            usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let mut encoder = self.device.create_command_encoder(
            &wgpu::CommandEncoderDescriptor { label: Some("timestamp resolve") },
        );
        encoder.resolve_query_set(start, 0..1, &resolve, 0);
        encoder.resolve_query_set(end, 0..1, &resolve, RESOLVE_STRIDE);
        encoder.copy_buffer_to_buffer(&resolve, 0, &staging, 0, RESOLVE_STRIDE + 8);
        self.queue.submit(std::iter::once(encoder.finish()));

        let slice = staging.slice(..);
        let (tx, rx) = std::sync::mpsc::channel();
        slice.map_async(wgpu::MapMode::Read, move |r| {
            let _ = tx.send(r);
        });
        self.device.poll(wgpu::Maintain::Wait);
        rx.recv()
            .map_err(|_| DeviceError::Timing("timestamp map callback never fired".into()))?
            .map_err(|e| DeviceError::Timing(e.to_string()))?;

        let (t0, t1) = {
            let mapped = slice.get_mapped_range();
            let stride = RESOLVE_STRIDE as usize;
            let t0: u64 = bytemuck::pod_read_unaligned(&mapped[0..8]);
            let t1: u64 = bytemuck::pod_read_unaligned(&mapped[stride..stride + 8]);
            (t0, t1)
        };
        staging.unmap();

        let ticks = t1.saturating_sub(t0);
        let nanos = ticks as f64 * f64::from(self.queue.get_timestamp_period());
        Ok(Duration::from_nanos(nanos.round() as u64))
    }
}
