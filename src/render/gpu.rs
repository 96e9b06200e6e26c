//! Device and queue acquisition.

use anyhow::{anyhow, Result};
use std::sync::Arc;
use tracing::info;
use winit::window::Window;

/// An open device and its queue, shared by everything that touches the GPU.
///
/// wgpu handles are internally reference counted, so the context is cheap to
/// clone out of and needs no lifetime plumbing.
pub struct GpuContext {
    pub device: wgpu::Device,
    pub queue: wgpu::Queue,
    pub adapter: wgpu::Adapter,
}

impl GpuContext {
    /// Opens a device for presenting to `window` and returns the surface the
    /// adapter was selected against.
    pub fn for_window(window: Arc<Window>) -> Result<(Self, wgpu::Surface<'static>)> {
        let instance = new_instance();
        let surface = instance.create_surface(window)?;
        let context = request(&instance, Some(&surface), wgpu::Limits::default())?;
        Ok((context, surface))
    }

    /// Opens a device with no surface, for offscreen compositing.
    pub fn headless() -> Result<Self> {
        let instance = new_instance();
        request(&instance, None, wgpu::Limits::downlevel_defaults())
    }
}

fn new_instance() -> wgpu::Instance {
    wgpu::Instance::new(&wgpu::InstanceDescriptor {
        backends: wgpu::Backends::all(),
        ..Default::default()
    })
}

fn request(
    instance: &wgpu::Instance,
    compatible_surface: Option<&wgpu::Surface<'_>>,
    required_limits: wgpu::Limits,
) -> Result<GpuContext> {
    let adapter = pollster::block_on(instance.request_adapter(&wgpu::RequestAdapterOptions {
        power_preference: wgpu::PowerPreference::HighPerformance,
        compatible_surface,
        force_fallback_adapter: false,
    }))
    .map_err(|_| anyhow!("No suitable GPU adapter found"))?;

    let adapter_info = adapter.get_info();
    info!(
        "Using adapter {} ({:?})",
        adapter_info.name, adapter_info.backend
    );

    let (device, queue) = pollster::block_on(adapter.request_device(&wgpu::DeviceDescriptor {
        label: Some("Greenroom Device"),
        required_features: wgpu::Features::empty(),
        required_limits,
        memory_hints: wgpu::MemoryHints::Performance,
        ..Default::default()
    }))?;

    Ok(GpuContext {
        device,
        queue,
        adapter,
    })
}
