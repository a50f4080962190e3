use std::collections::{BTreeMap, HashMap};

use multipass_core::backend::{
    BlitFilter, BufferHandle, ClearColor, RenderBackend, ShaderHandle, SurfaceStatus, TargetDesc,
    TargetFormat, TargetHandles, TextureHandle,
};
use multipass_core::error::{BackendError, UniformError};
use multipass_core::{UniformValue, Viewport};
use wgpu::util::DeviceExt;

use crate::blit::{clamp_sampler, BlitPipeline};
use crate::context::GpuContext;
use crate::reflect::{parse_and_validate, ShaderLayout, UniformType};
use crate::shaders::{ShaderLibrary, FRAGMENT_ENTRY, VERTEX_ENTRY};

const TARGET_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba8Unorm;

/// A window surface plus its active configuration.
pub struct PresentSurface {
    pub surface: wgpu::Surface<'static>,
    pub config: wgpu::SurfaceConfiguration,
}

struct GpuTarget {
    texture: wgpu::Texture,
    view: wgpu::TextureView,
}

struct GpuShader {
    layout: ShaderLayout,
    pipeline: wgpu::RenderPipeline,
    uniform_bgl: wgpu::BindGroupLayout,
    texture_bgl: wgpu::BindGroupLayout,
    /// CPU copy of the uniform block, uploaded on every draw.
    staging: Vec<u8>,
    /// Texture unit → bound target texture.
    textures: BTreeMap<u32, TextureHandle>,
}

/// [`RenderBackend`] on wgpu.
///
/// Every pass becomes one render pass in a single per-frame command encoder;
/// the queue's in-order execution provides the pass ordering. Without a
/// [`PresentSurface`] frames are rendered but the blit is skipped.
pub struct WgpuBackend {
    gpu: GpuContext,
    surface: Option<PresentSurface>,
    library: ShaderLibrary,
    blit: Option<BlitPipeline>,
    sampler: wgpu::Sampler,
    /// 1×1 transparent texture for units no input binds.
    fallback: wgpu::TextureView,

    targets: HashMap<u32, GpuTarget>,
    shaders: HashMap<u32, GpuShader>,
    next_id: u32,
    geometry: Option<ShaderHandle>,

    encoder: Option<wgpu::CommandEncoder>,
    frame: Option<wgpu::SurfaceTexture>,
    bound: Option<BufferHandle>,
    pending_clear: Option<wgpu::Color>,
}

impl WgpuBackend {
    pub fn new(gpu: GpuContext, surface: Option<PresentSurface>, library: ShaderLibrary) -> Self {
        let device = &gpu.device;
        let blit = surface
            .as_ref()
            .map(|s| BlitPipeline::new(device, s.config.format));
        let sampler = clamp_sampler(device, "target_sampler", wgpu::FilterMode::Linear);

        let fallback = device
            .create_texture(&wgpu::TextureDescriptor {
                label: Some("unbound_texture"),
                size: wgpu::Extent3d {
                    width: 1,
                    height: 1,
                    depth_or_array_layers: 1,
                },
                mip_level_count: 1,
                sample_count: 1,
                dimension: wgpu::TextureDimension::D2,
                format: TARGET_FORMAT,
                usage: wgpu::TextureUsages::TEXTURE_BINDING,
                view_formats: &[],
            })
            .create_view(&wgpu::TextureViewDescriptor::default());

        Self {
            gpu,
            surface,
            library,
            blit,
            sampler,
            fallback,
            targets: HashMap::new(),
            shaders: HashMap::new(),
            next_id: 1,
            geometry: None,
            encoder: None,
            frame: None,
            bound: None,
            pending_clear: None,
        }
    }

    pub fn device(&self) -> &wgpu::Device {
        &self.gpu.device
    }

    pub fn surface_config(&self) -> Option<&wgpu::SurfaceConfiguration> {
        self.surface.as_ref().map(|s| &s.config)
    }

    fn next_id(&mut self) -> u32 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    /// Encodes a clear requested since the last bind that no draw consumed.
    fn flush_clear(&mut self) {
        let Some(color) = self.pending_clear.take() else {
            return;
        };
        let Some(target) = self.bound.and_then(|b| self.targets.get(&b.0)) else {
            return;
        };
        let encoder = frame_encoder(&mut self.encoder, &self.gpu.device);
        begin_color_pass(encoder, "clear-pass", &target.view, wgpu::LoadOp::Clear(color));
    }

    fn build_shader(
        &self,
        vertex: &str,
        fragment: &str,
    ) -> Result<GpuShader, BackendError> {
        let vs_source = self.library.resolve(vertex)?;
        let fs_source = self.library.resolve(fragment)?;
        parse_and_validate(vertex, &vs_source)?;
        let layout = ShaderLayout::reflect(&parse_and_validate(fragment, &fs_source)?);

        let device = &self.gpu.device;
        device.push_error_scope(wgpu::ErrorFilter::Validation);

        let vs = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some(vertex),
            source: wgpu::ShaderSource::Wgsl(vs_source),
        });
        let fs = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some(fragment),
            source: wgpu::ShaderSource::Wgsl(fs_source),
        });

        let uniform_entries: Vec<_> = layout
            .has_uniform_block()
            .then(|| wgpu::BindGroupLayoutEntry {
                binding: 0,
                visibility: wgpu::ShaderStages::FRAGMENT,
                ty: wgpu::BindingType::Buffer {
                    ty: wgpu::BufferBindingType::Uniform,
                    has_dynamic_offset: false,
                    min_binding_size: None,
                },
                count: None,
            })
            .into_iter()
            .collect();
        let uniform_bgl = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("uniform_bgl"),
            entries: &uniform_entries,
        });

        let texture_entries: Vec<_> = layout
            .textures
            .iter()
            .flat_map(|slot| {
                [
                    wgpu::BindGroupLayoutEntry {
                        binding: slot.binding,
                        visibility: wgpu::ShaderStages::FRAGMENT,
                        ty: wgpu::BindingType::Texture {
                            sample_type: wgpu::TextureSampleType::Float { filterable: true },
                            view_dimension: wgpu::TextureViewDimension::D2,
                            multisampled: false,
                        },
                        count: None,
                    },
                    wgpu::BindGroupLayoutEntry {
                        binding: slot.sampler_binding(),
                        visibility: wgpu::ShaderStages::FRAGMENT,
                        ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
                        count: None,
                    },
                ]
            })
            .collect();
        let texture_bgl = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("texture_bgl"),
            entries: &texture_entries,
        });

        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some(fragment),
            bind_group_layouts: &[&uniform_bgl, &texture_bgl],
            push_constant_ranges: &[],
        });

        let pipeline = device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some(fragment),
            layout: Some(&pipeline_layout),
            vertex: wgpu::VertexState {
                module: &vs,
                entry_point: VERTEX_ENTRY,
                buffers: &[],
                compilation_options: Default::default(),
            },
            fragment: Some(wgpu::FragmentState {
                module: &fs,
                entry_point: FRAGMENT_ENTRY,
                targets: &[Some(wgpu::ColorTargetState {
                    format: TARGET_FORMAT,
                    blend: None,
                    write_mask: wgpu::ColorWrites::ALL,
                })],
                compilation_options: Default::default(),
            }),
            primitive: wgpu::PrimitiveState {
                topology: wgpu::PrimitiveTopology::TriangleList,
                ..Default::default()
            },
            depth_stencil: None,
            multisample: wgpu::MultisampleState::default(),
            multiview: None,
            cache: None,
        });

        if let Some(err) = pollster::block_on(device.pop_error_scope()) {
            return Err(BackendError::Compile {
                name: format!("{vertex} + {fragment}"),
                reason: err.to_string(),
            });
        }

        let staging = vec![0u8; layout.uniform_size as usize];
        Ok(GpuShader {
            layout,
            pipeline,
            uniform_bgl,
            texture_bgl,
            staging,
            textures: BTreeMap::new(),
        })
    }
}

impl RenderBackend for WgpuBackend {
    fn create_target(&mut self, desc: &TargetDesc) -> Result<TargetHandles, BackendError> {
        let max = self.gpu.device.limits().max_texture_dimension_2d;
        if desc.width == 0 || desc.height == 0 || desc.width > max || desc.height > max {
            return Err(BackendError::Incomplete(format!(
                "{}x{} is outside 1..={max}",
                desc.width, desc.height
            )));
        }
        if desc.depth_stencil {
            return Err(BackendError::Incomplete(
                "depth/stencil attachments are not supported".into(),
            ));
        }
        let format = match desc.format {
            TargetFormat::Rgba8Unorm => TARGET_FORMAT,
        };

        let device = &self.gpu.device;
        device.push_error_scope(wgpu::ErrorFilter::OutOfMemory);
        device.push_error_scope(wgpu::ErrorFilter::Validation);

        let texture = device.create_texture(&wgpu::TextureDescriptor {
            label: Some("render_target"),
            size: wgpu::Extent3d {
                width: desc.width,
                height: desc.height,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format,
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::TEXTURE_BINDING,
            view_formats: &[],
        });

        let validation = pollster::block_on(device.pop_error_scope());
        let out_of_memory = pollster::block_on(device.pop_error_scope());
        if let Some(err) = validation.or(out_of_memory) {
            texture.destroy();
            return Err(BackendError::Incomplete(err.to_string()));
        }

        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        let id = self.next_id();
        self.targets.insert(id, GpuTarget { texture, view });

        Ok(TargetHandles {
            buffer: BufferHandle(id),
            texture: TextureHandle(id),
        })
    }

    fn destroy_target(&mut self, target: TargetHandles) {
        if self.bound == Some(target.buffer) {
            self.pending_clear = None;
            self.bound = None;
        }
        if let Some(t) = self.targets.remove(&target.buffer.0) {
            t.texture.destroy();
        }
    }

    fn load_shader(&mut self, vertex: &str, fragment: &str) -> Result<ShaderHandle, BackendError> {
        let shader = self.build_shader(vertex, fragment)?;
        log::debug!(
            "loaded {vertex} + {fragment}: {} uniforms, {} textures",
            shader.layout.uniforms.len(),
            shader.layout.textures.len()
        );
        let id = self.next_id();
        self.shaders.insert(id, shader);
        Ok(ShaderHandle(id))
    }

    fn dispose_shader(&mut self, shader: ShaderHandle) {
        self.shaders.remove(&shader.0);
        if self.geometry == Some(shader) {
            self.geometry = None;
        }
    }

    fn has_uniform(&self, shader: ShaderHandle, name: &str) -> bool {
        self.shaders
            .get(&shader.0)
            .is_some_and(|s| s.layout.uniform(name).is_some())
    }

    fn set_uniform_scalar(
        &mut self,
        shader: ShaderHandle,
        name: &str,
        value: UniformValue,
    ) -> Result<(), UniformError> {
        let state = self
            .shaders
            .get_mut(&shader.0)
            .ok_or(UniformError::UnknownShader)?;
        let slot = state
            .layout
            .uniform(name)
            .ok_or_else(|| UniformError::Missing {
                name: name.to_string(),
            })?;

        let offset = slot.offset as usize;
        match (slot.ty, value) {
            (UniformType::F32, UniformValue::Float(v)) => {
                state.staging[offset..offset + 4].copy_from_slice(bytemuck::bytes_of(&v));
            }
            (UniformType::Vec2F32, UniformValue::Vec2(v)) => {
                let v = v.to_array();
                state.staging[offset..offset + 8].copy_from_slice(bytemuck::bytes_of(&v));
            }
            (ty, value) => {
                return Err(UniformError::TypeMismatch {
                    name: name.to_string(),
                    expected: ty.type_name(),
                    found: value.type_name(),
                })
            }
        }
        Ok(())
    }

    fn set_uniform_texture(
        &mut self,
        shader: ShaderHandle,
        name: &str,
        texture: TextureHandle,
        unit: u32,
    ) -> Result<(), UniformError> {
        let state = self
            .shaders
            .get_mut(&shader.0)
            .ok_or(UniformError::UnknownShader)?;
        let slot = state
            .layout
            .texture(name)
            .ok_or_else(|| UniformError::Missing {
                name: name.to_string(),
            })?;
        if slot.unit() != unit {
            return Err(UniformError::UnitMismatch {
                name: name.to_string(),
                unit,
                expected_unit: slot.unit(),
            });
        }
        state.textures.insert(unit, texture);
        Ok(())
    }

    fn prepare_geometry(&mut self, shader: ShaderHandle) {
        // The triangle comes from vertex_index; there is no buffer to upload.
        self.geometry = Some(shader);
        log::debug!("full-screen triangle ready");
    }

    fn begin_frame(&mut self, _viewport: Viewport) -> SurfaceStatus {
        if let Some(present) = &self.surface {
            match present.surface.get_current_texture() {
                Ok(frame) => self.frame = Some(frame),
                Err(wgpu::SurfaceError::Lost | wgpu::SurfaceError::Outdated) => {
                    present.surface.configure(&self.gpu.device, &present.config);
                    return SurfaceStatus::SkipFrame;
                }
                Err(wgpu::SurfaceError::OutOfMemory) => return SurfaceStatus::Fatal,
                Err(err) => {
                    log::warn!("surface error: {err:?}");
                    return SurfaceStatus::SkipFrame;
                }
            }
        }
        self.encoder = Some(self.gpu.device.create_command_encoder(
            &wgpu::CommandEncoderDescriptor {
                label: Some("multipass frame encoder"),
            },
        ));
        SurfaceStatus::Ready
    }

    fn bind_draw_target(&mut self, buffer: BufferHandle) {
        self.flush_clear();
        self.bound = Some(buffer);
    }

    fn clear(&mut self, color: ClearColor) {
        self.pending_clear = Some(wgpu::Color {
            r: f64::from(color.r),
            g: f64::from(color.g),
            b: f64::from(color.b),
            a: f64::from(color.a),
        });
    }

    fn draw_fullscreen(&mut self, shader: ShaderHandle) {
        if self.geometry.is_none() {
            log::warn!("draw before full-screen geometry was prepared");
            return;
        }
        let Some(target) = self.bound.and_then(|b| self.targets.get(&b.0)) else {
            log::warn!("draw with no live target bound");
            return;
        };
        let Some(state) = self.shaders.get(&shader.0) else {
            log::warn!("draw with unknown shader {shader:?}");
            return;
        };
        let device = &self.gpu.device;

        let uniform_buffer = state.layout.has_uniform_block().then(|| {
            device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some("pass_uniforms"),
                contents: &state.staging,
                usage: wgpu::BufferUsages::UNIFORM,
            })
        });
        let uniform_entries: Vec<_> = uniform_buffer
            .iter()
            .map(|buffer| wgpu::BindGroupEntry {
                binding: 0,
                resource: buffer.as_entire_binding(),
            })
            .collect();
        let uniform_bg = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("uniform_bg"),
            layout: &state.uniform_bgl,
            entries: &uniform_entries,
        });

        let mut texture_entries = Vec::with_capacity(state.layout.textures.len() * 2);
        for slot in &state.layout.textures {
            let view = state
                .textures
                .get(&slot.unit())
                .and_then(|t| self.targets.get(&t.0))
                .map_or(&self.fallback, |t| &t.view);
            texture_entries.push(wgpu::BindGroupEntry {
                binding: slot.binding,
                resource: wgpu::BindingResource::TextureView(view),
            });
            texture_entries.push(wgpu::BindGroupEntry {
                binding: slot.sampler_binding(),
                resource: wgpu::BindingResource::Sampler(&self.sampler),
            });
        }
        let texture_bg = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("texture_bg"),
            layout: &state.texture_bgl,
            entries: &texture_entries,
        });

        let load = match self.pending_clear.take() {
            Some(color) => wgpu::LoadOp::Clear(color),
            None => wgpu::LoadOp::Load,
        };
        let encoder = frame_encoder(&mut self.encoder, device);
        let mut rpass = begin_color_pass(encoder, "pass", &target.view, load);
        rpass.set_pipeline(&state.pipeline);
        rpass.set_bind_group(0, &uniform_bg, &[]);
        rpass.set_bind_group(1, &texture_bg, &[]);
        rpass.draw(0..3, 0..1);
    }

    fn blit_to_surface(&mut self, source: BufferHandle, viewport: Viewport, filter: BlitFilter) {
        self.flush_clear();
        let (Some(frame), Some(blit)) = (&self.frame, &self.blit) else {
            return;
        };
        let Some(target) = self.targets.get(&source.0) else {
            log::warn!("blit from released target {source:?}");
            return;
        };

        let dest = frame
            .texture
            .create_view(&wgpu::TextureViewDescriptor::default());
        let viewport = Viewport::new(
            viewport.width.min(frame.texture.width()),
            viewport.height.min(frame.texture.height()),
        );
        let encoder = frame_encoder(&mut self.encoder, &self.gpu.device);
        blit.encode(&self.gpu.device, encoder, &target.view, &dest, viewport, filter);
    }

    fn present(&mut self) {
        self.flush_clear();
        self.bound = None;
        if let Some(encoder) = self.encoder.take() {
            self.gpu.queue.submit(std::iter::once(encoder.finish()));
        }
        if let Some(frame) = self.frame.take() {
            frame.present();
        }
    }

    fn resize_surface(&mut self, viewport: Viewport) {
        if viewport.is_empty() {
            return;
        }
        self.frame = None;
        if let Some(present) = &mut self.surface {
            present.config.width = viewport.width;
            present.config.height = viewport.height;
            present.surface.configure(&self.gpu.device, &present.config);
            log::debug!("surface reconfigured to {}×{}", viewport.width, viewport.height);
        }
    }
}

fn frame_encoder<'a>(
    slot: &'a mut Option<wgpu::CommandEncoder>,
    device: &wgpu::Device,
) -> &'a mut wgpu::CommandEncoder {
    slot.get_or_insert_with(|| {
        device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("multipass frame encoder"),
        })
    })
}

/// Opens a render pass writing only `view`.
fn begin_color_pass<'e>(
    encoder: &'e mut wgpu::CommandEncoder,
    label: &str,
    view: &wgpu::TextureView,
    load: wgpu::LoadOp<wgpu::Color>,
) -> wgpu::RenderPass<'e> {
    encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
        label: Some(label),
        color_attachments: &[Some(wgpu::RenderPassColorAttachment {
            view,
            resolve_target: None,
            ops: wgpu::Operations {
                load,
                store: wgpu::StoreOp::Store,
            },
        })],
        depth_stencil_attachment: None,
        timestamp_writes: None,
        occlusion_query_set: None,
    })
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use multipass_core::diagnostics::CollectingSink;
    use multipass_core::presets::demo_pipeline;
    use multipass_core::{FrameInputs, FrameOutcome, LifecycleState, MultipassRenderer, Severity};

    use super::*;
    use crate::context::GpuInit;

    /// `None` on machines without any adapter; those skip the test.
    fn headless() -> Option<WgpuBackend> {
        let gpu = pollster::block_on(GpuContext::new_headless(&GpuInit::default())).ok()?;
        Some(WgpuBackend::new(gpu, None, ShaderLibrary::new()))
    }

    #[test]
    fn demo_pipeline_runs_headless() {
        let Some(backend) = headless() else {
            return;
        };
        let sink = Arc::new(CollectingSink::new());
        let mut renderer =
            MultipassRenderer::new(backend, demo_pipeline(), Viewport::new(96, 54), sink.clone());

        renderer.on_load().unwrap();
        let inputs = FrameInputs::new(0.0, Viewport::new(96, 54));
        assert_eq!(renderer.render_with(&inputs).unwrap(), FrameOutcome::Presented);
        renderer.on_resize(64, 36).unwrap();
        assert_eq!(renderer.state(), LifecycleState::Running);

        renderer.on_close();
        assert!(sink.entries().iter().all(|d| d.severity != Severity::High));
    }

    #[test]
    fn oversized_targets_are_incomplete() {
        let Some(mut backend) = headless() else {
            return;
        };
        let max = backend.device().limits().max_texture_dimension_2d;
        let err = backend
            .create_target(&TargetDesc::color(max + 1, 4))
            .unwrap_err();
        assert!(matches!(err, BackendError::Incomplete(_)));
    }

    #[test]
    fn unknown_stage_names_fail_to_load() {
        let Some(mut backend) = headless() else {
            return;
        };
        let err = backend.load_shader("passthrough", "pass9-missing").unwrap_err();
        assert_eq!(err, BackendError::UnknownSource("pass9-missing".into()));
    }

    #[test]
    fn uniform_writes_are_type_checked() {
        let Some(mut backend) = headless() else {
            return;
        };
        let shader = backend.load_shader("passthrough", "pass1-plasma").unwrap();
        assert!(backend.has_uniform(shader, "time"));
        backend
            .set_uniform_scalar(shader, "time", UniformValue::Float(1.5))
            .unwrap();
        let err = backend
            .set_uniform_scalar(shader, "resolution", UniformValue::Float(960.0))
            .unwrap_err();
        assert!(matches!(err, UniformError::TypeMismatch { .. }));
    }
}
