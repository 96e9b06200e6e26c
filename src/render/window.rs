//! Window presentation of the composited stage.

use super::compositor::Compositor;
use super::gpu::GpuContext;
use crate::frame::VideoFrame;
use crate::keying::{KeyingParams, ShaderSet};
use anyhow::Result;
use std::sync::Arc;
use winit::dpi::PhysicalSize;
use winit::window::Window;

/// Owns the swapchain for one window and the compositor drawing into it.
pub struct StageWindow {
    surface: wgpu::Surface<'static>,
    gpu: GpuContext,
    config: wgpu::SurfaceConfiguration,
    compositor: Compositor,
}

impl StageWindow {
    pub fn new(
        window: Arc<Window>,
        backdrop: Option<&VideoFrame>,
        params: KeyingParams,
    ) -> Result<Self> {
        let size = window.inner_size();
        let (gpu, surface) = GpuContext::for_window(window)?;

        let surface_caps = surface.get_capabilities(&gpu.adapter);
        // Prefer a non-sRGB surface so color values pass through unconverted:
        // the keying constants are calibrated for gamma-encoded RGB and the
        // textures are Rgba8Unorm end to end.
        let surface_format = surface_caps
            .formats
            .iter()
            .find(|f| !f.is_srgb())
            .copied()
            .unwrap_or(surface_caps.formats[0]);

        let config = wgpu::SurfaceConfiguration {
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
            format: surface_format,
            width: size.width.max(1),
            height: size.height.max(1),
            present_mode: wgpu::PresentMode::AutoVsync,
            alpha_mode: surface_caps.alpha_modes[0],
            view_formats: vec![],
            desired_maximum_frame_latency: 2,
        };
        surface.configure(&gpu.device, &config);

        let shaders = ShaderSet::compile(&gpu.device)?;
        let compositor = Compositor::new(&gpu, &shaders, surface_format, backdrop, params)?;

        Ok(Self {
            surface,
            gpu,
            config,
            compositor,
        })
    }

    /// Reconfigures the swapchain after a window resize. Zero-sized updates
    /// from a minimized window are ignored.
    pub fn resize(&mut self, new_size: PhysicalSize<u32>) {
        if new_size.width == 0 || new_size.height == 0 {
            return;
        }
        self.config.width = new_size.width;
        self.config.height = new_size.height;
        self.surface.configure(&self.gpu.device, &self.config);
    }

    pub fn upload_frame(&mut self, frame: &VideoFrame) {
        self.compositor.upload_frame(frame);
    }

    pub fn set_keying_params(&mut self, params: KeyingParams) {
        self.compositor.set_keying_params(params);
    }

    /// Draws the stage into the next swapchain image and presents it.
    pub fn render(&mut self) -> Result<()> {
        let output = self.surface.get_current_texture()?;
        let view = output
            .texture
            .create_view(&wgpu::TextureViewDescriptor::default());
        let aspect = self.config.width as f32 / self.config.height.max(1) as f32;
        self.compositor.render(&view, aspect);
        output.present();
        Ok(())
    }
}
