use std::sync::Arc;

use anyhow::{Context, Result};
use multipass_core::diagnostics::{Diagnostic, DiagnosticSink, DiagnosticSource, Severity};
use multipass_core::Viewport;
use wgpu::{Adapter, Device, Instance, Queue};

/// Initialization parameters for the GPU layer.
#[derive(Debug, Clone)]
pub struct GpuInit {
    /// Prefer an sRGB surface format. Off by default: the blit copies target
    /// bytes unchanged, and an sRGB surface would re-encode them.
    pub prefer_srgb: bool,

    /// Present mode (swap behavior).
    pub present_mode: wgpu::PresentMode,

    pub power_preference: wgpu::PowerPreference,

    /// Limits requested from the adapter/device.
    pub required_limits: wgpu::Limits,

    /// Hint; support depends on platform/backend.
    pub desired_maximum_frame_latency: u32,
}

impl Default for GpuInit {
    fn default() -> Self {
        Self {
            prefer_srgb: false,
            present_mode: wgpu::PresentMode::Fifo,
            power_preference: wgpu::PowerPreference::HighPerformance,
            required_limits: wgpu::Limits::default(),
            desired_maximum_frame_latency: 2,
        }
    }
}

pub struct GpuContext {
    pub instance: Instance,
    pub adapter: Adapter,
    pub device: Device,
    pub queue: Queue,
}

impl GpuContext {
    /// A GPU context with no surface. Frames are rendered but never shown.
    pub async fn new_headless(init: &GpuInit) -> Result<Self> {
        let instance = Instance::default();
        Self::request(instance, None, init).await
    }

    /// A GPU context whose adapter can present to `surface`.
    pub async fn for_surface(
        instance: Instance,
        surface: &wgpu::Surface<'_>,
        init: &GpuInit,
    ) -> Result<Self> {
        Self::request(instance, Some(surface), init).await
    }

    async fn request(
        instance: Instance,
        compatible_surface: Option<&wgpu::Surface<'_>>,
        init: &GpuInit,
    ) -> Result<Self> {
        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: init.power_preference,
                compatible_surface,
                force_fallback_adapter: false,
            })
            .await
            .context("no suitable GPU adapter found")?;

        log::info!("GPU adapter: {}", adapter.get_info().name);

        let (device, queue) = adapter
            .request_device(
                &wgpu::DeviceDescriptor {
                    label: Some("multipass device"),
                    required_features: wgpu::Features::empty(),
                    required_limits: init.required_limits.clone(),
                    memory_hints: Default::default(),
                },
                None,
            )
            .await
            .context("failed to create GPU device")?;

        Ok(Self {
            instance,
            adapter,
            device,
            queue,
        })
    }

    /// Routes errors no error scope captured into `sink`.
    pub fn forward_uncaptured_errors(&self, sink: Arc<dyn DiagnosticSink>) {
        self.device.on_uncaptured_error(Box::new(move |err: wgpu::Error| {
            sink.report(&driver_diagnostic(&err));
        }));
    }

    /// Builds and applies the surface configuration for `size`.
    pub fn configure_surface(
        &self,
        surface: &wgpu::Surface<'_>,
        size: Viewport,
        init: &GpuInit,
    ) -> Result<wgpu::SurfaceConfiguration> {
        let caps = surface.get_capabilities(&self.adapter);
        let format = choose_surface_format(&caps, init.prefer_srgb)
            .context("surface reports no supported formats")?;
        let alpha_mode = caps
            .alpha_modes
            .first()
            .copied()
            .unwrap_or(wgpu::CompositeAlphaMode::Auto);

        let config = wgpu::SurfaceConfiguration {
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
            format,
            width: size.width.max(1),
            height: size.height.max(1),
            present_mode: init.present_mode,
            alpha_mode,
            view_formats: vec![],
            desired_maximum_frame_latency: init.desired_maximum_frame_latency,
        };
        surface.configure(&self.device, &config);
        log::info!(
            "surface configured: {}×{} {:?} {:?}",
            config.width,
            config.height,
            format,
            init.present_mode
        );
        Ok(config)
    }
}

pub(crate) fn driver_diagnostic(err: &wgpu::Error) -> Diagnostic {
    let severity = match err {
        wgpu::Error::OutOfMemory { .. } => Severity::High,
        wgpu::Error::Validation { .. } => Severity::High,
        _ => Severity::Medium,
    };
    Diagnostic::new(severity, DiagnosticSource::Api, 0, err.to_string())
}

pub(crate) fn choose_surface_format(
    caps: &wgpu::SurfaceCapabilities,
    prefer_srgb: bool,
) -> Option<wgpu::TextureFormat> {
    caps.formats
        .iter()
        .copied()
        .find(|f| f.is_srgb() == prefer_srgb)
        .or_else(|| caps.formats.first().copied())
}
