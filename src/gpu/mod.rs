// SPDX-License-Identifier: GPL-3.0-only

//! GPU runtime facade (C1): device/queue creation, a pipeline cache keyed by
//! kernel name, and the texture/buffer allocation + dispatch helpers every
//! other component builds on.
//!
//! Pipeline state used to be cached behind module-level singletons; here it
//! is carried in an explicit [`GpuContext`] value threaded by reference
//! through the orchestrator and every downstream component (§9).

pub mod helpers;

use crate::errors::ErrorKind;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tracing::{debug, info};

pub use wgpu;

/// Information about the selected GPU adapter, kept for diagnostics/logging.
#[derive(Debug, Clone)]
pub struct GpuDeviceInfo {
    pub adapter_name: String,
    pub backend: wgpu::Backend,
}

/// A cached compute pipeline plus the bind group layout it was built with,
/// so callers can create bind groups without re-deriving the layout.
pub struct CachedPipeline {
    pub pipeline: Arc<wgpu::ComputePipeline>,
    pub bind_group_layout: Arc<wgpu::BindGroupLayout>,
}

/// Process-lived GPU state: device, queue, and a pipeline cache keyed by
/// kernel name. Constructed once and threaded by reference through the
/// orchestrator; everything else (textures, buffers) is burst-scoped.
pub struct GpuContext {
    pub device: Arc<wgpu::Device>,
    pub queue: Arc<wgpu::Queue>,
    pub info: GpuDeviceInfo,
    pipelines: Mutex<HashMap<&'static str, Arc<CachedPipeline>>>,
}

impl GpuContext {
    /// Create a GPU context for compute work, requesting a high-performance
    /// adapter with the default backend set.
    pub async fn new() -> Result<Self, ErrorKind> {
        info!("creating GPU context for HDR+ core");

        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor::default());

        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::HighPerformance,
                compatible_surface: None,
                force_fallback_adapter: false,
            })
            .await
            .map_err(|e| ErrorKind::Pipeline(format!("no suitable GPU adapter: {e}")))?;

        let adapter_info = adapter.get_info();
        info!(adapter = %adapter_info.name, backend = ?adapter_info.backend, "GPU adapter selected");

        let (device, queue) = adapter
            .request_device(&wgpu::DeviceDescriptor {
                label: Some("hdrplus-core"),
                required_features: wgpu::Features::empty(),
                required_limits: adapter.limits(),
                memory_hints: wgpu::MemoryHints::Performance,
                ..Default::default()
            })
            .await?;

        Ok(Self {
            device: Arc::new(device),
            queue: Arc::new(queue),
            info: GpuDeviceInfo {
                adapter_name: adapter_info.name,
                backend: adapter_info.backend,
            },
            pipelines: Mutex::new(HashMap::new()),
        })
    }

    /// Fetch a cached compute pipeline by kernel name, building and caching
    /// it on first use. Pipeline-creation failure is fatal and surfaced as
    /// `ErrorKind::Pipeline` (§4.1).
    pub fn pipeline_for(
        &self,
        kernel_name: &'static str,
        build: impl FnOnce(&wgpu::Device) -> Result<CachedPipeline, ErrorKind>,
    ) -> Result<Arc<CachedPipeline>, ErrorKind> {
        let mut cache = self
            .pipelines
            .lock()
            .map_err(|_| ErrorKind::Internal("pipeline cache lock poisoned".into()))?;

        if let Some(cached) = cache.get(kernel_name) {
            return Ok(Arc::clone(cached));
        }

        debug!(kernel = kernel_name, "compiling compute pipeline");
        let built = Arc::new(build(&self.device)?);
        cache.insert(kernel_name, Arc::clone(&built));
        Ok(built)
    }

    /// Allocate a single-channel or RGBA float32 2-D texture.
    pub fn alloc_texture(
        &self,
        label: &str,
        width: u32,
        height: u32,
        format: wgpu::TextureFormat,
        usage: wgpu::TextureUsages,
    ) -> Result<wgpu::Texture, ErrorKind> {
        if width == 0 || height == 0 {
            return Err(ErrorKind::Internal(format!(
                "attempted to allocate zero-sized texture {width}x{height}"
            )));
        }
        Ok(self.device.create_texture(&wgpu::TextureDescriptor {
            label: Some(label),
            size: wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format,
            usage,
            view_formats: &[],
        }))
    }

    /// Allocate a storage buffer sized for `n` `f32` elements.
    pub fn alloc_f32_buffer(
        &self,
        label: &str,
        n: usize,
        usage: wgpu::BufferUsages,
    ) -> wgpu::Buffer {
        self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some(label),
            size: (n * std::mem::size_of::<f32>()) as u64,
            usage,
            mapped_at_creation: false,
        })
    }

    /// Submit an encoded command list and block until the GPU has finished.
    pub fn submit_and_wait(&self, encoder: wgpu::CommandEncoder) -> Result<(), ErrorKind> {
        self.queue.submit(Some(encoder.finish()));
        self.device
            .poll(wgpu::PollType::wait_indefinitely())
            .map_err(|e| ErrorKind::DeviceLost(e.to_string()))?;
        Ok(())
    }

    /// Read a storage buffer back to the host as `f32`s. Maps the buffer
    /// asynchronously and drives the future to completion by polling the
    /// device, the same async-to-sync bridge this codebase uses elsewhere
    /// via `pollster`.
    pub fn read_f32_buffer(&self, buffer: &wgpu::Buffer, len: usize) -> Result<Vec<f32>, ErrorKind> {
        let (tx, rx) = futures::channel::oneshot::channel();
        let slice = buffer.slice(..);
        slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = tx.send(result);
        });
        self.device
            .poll(wgpu::PollType::wait_indefinitely())
            .map_err(|e| ErrorKind::DeviceLost(e.to_string()))?;

        pollster::block_on(rx)
            .map_err(|_| ErrorKind::Internal("buffer map channel dropped".into()))?
            .map_err(|e| ErrorKind::Internal(format!("buffer map failed: {e:?}")))?;

        let data = slice.get_mapped_range();
        let floats: Vec<f32> = bytemuck::cast_slice(&data)[..len].to_vec();
        drop(data);
        buffer.unmap();
        Ok(floats)
    }
}

/// Compute the number of workgroups needed to cover `total_threads` given a
/// workgroup's thread count along one dimension (§4.1: "dispatch sizes are
/// computed from a target threads-per-grid and the pipeline's reported max
/// threads per group").
pub fn dispatch_size(total_threads: u32, threads_per_group: u32) -> u32 {
    total_threads.div_ceil(threads_per_group)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dispatch_size_rounds_up() {
        assert_eq!(dispatch_size(64, 8), 8);
        assert_eq!(dispatch_size(65, 8), 9);
        assert_eq!(dispatch_size(1, 8), 1);
    }

    #[test]
    fn create_gpu_context_or_skip() {
        match pollster::block_on(GpuContext::new()) {
            Ok(ctx) => {
                assert!(!ctx.info.adapter_name.is_empty());
            }
            Err(e) => {
                println!("skipping test (no GPU): {e}");
            }
        }
    }
}
