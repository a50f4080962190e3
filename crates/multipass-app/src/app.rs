use std::sync::Arc;

use anyhow::{Context, Result};
use multipass_core::diagnostics::{FilteredSink, LogSink};
use multipass_core::presets::demo_pipeline;
use multipass_core::{
    DiagnosticSink, FrameOutcome, LifecycleState, MultipassRenderer, ResizeOutcome, Viewport,
};
use multipass_gpu::{GpuContext, GpuInit, PresentSurface, ShaderLibrary, WgpuBackend};
use winit::window::Window;

use crate::config::AppConfig;

/// The window plus the renderer drawing into it.
pub struct App {
    window: Arc<Window>,
    renderer: MultipassRenderer<WgpuBackend>,
}

impl App {
    /// Initialise wgpu for `window`. The window is wrapped in `Arc` so the
    /// surface can hold a `'static` reference to it.
    pub fn new(window: Arc<Window>, config: &AppConfig) -> Result<Self> {
        let size = window.inner_size();
        let viewport = Viewport::new(size.width, size.height);
        let init = GpuInit::default();

        let instance = wgpu::Instance::new(wgpu::InstanceDescriptor {
            backends: wgpu::Backends::all(),
            ..Default::default()
        });
        let surface = instance
            .create_surface(Arc::clone(&window))
            .context("failed to create wgpu surface")?;

        let gpu = pollster::block_on(GpuContext::for_surface(instance, &surface, &init))?;
        let surface_config = gpu.configure_surface(&surface, viewport, &init)?;

        let sink: Arc<dyn DiagnosticSink> = Arc::new(FilteredSink::with_default_filters(LogSink));
        gpu.forward_uncaptured_errors(Arc::clone(&sink));

        let library = match &config.shader_dir {
            Some(dir) => ShaderLibrary::new().with_dir(dir),
            None => ShaderLibrary::new(),
        };
        let backend = WgpuBackend::new(
            gpu,
            Some(PresentSurface {
                surface,
                config: surface_config,
            }),
            library,
        );

        Ok(Self {
            window,
            renderer: MultipassRenderer::new(backend, demo_pipeline(), viewport, sink),
        })
    }

    pub fn load(&mut self) -> multipass_core::error::Result<()> {
        self.renderer.on_load()
    }

    pub fn render(&mut self) -> multipass_core::error::Result<FrameOutcome> {
        self.renderer.on_frame()
    }

    pub fn resize(&mut self, width: u32, height: u32) -> multipass_core::error::Result<ResizeOutcome> {
        self.renderer.on_resize(width, height)
    }

    pub fn close(&mut self) {
        self.renderer.on_close();
    }

    pub fn state(&self) -> LifecycleState {
        self.renderer.state()
    }

    pub fn is_running(&self) -> bool {
        matches!(
            self.renderer.state(),
            LifecycleState::Initialized | LifecycleState::Running
        )
    }

    pub fn sink(&self) -> &dyn DiagnosticSink {
        self.renderer.sink().as_ref()
    }

    pub fn request_redraw(&self) {
        self.window.request_redraw();
    }
}
