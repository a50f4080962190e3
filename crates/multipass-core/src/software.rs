//! CPU implementation of [`RenderBackend`].
//!
//! Fragment stages are Rust closures registered by name; every draw runs the
//! closure once per pixel of the bound target. Each backend call is also
//! appended to a [`Command`] log so tests can check ordering, and target
//! allocation can be made to fail on demand.

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::Arc;

use glam::{Vec2, Vec4};

use crate::backend::{
    BlitFilter, BufferHandle, ClearColor, RenderBackend, ShaderHandle, SurfaceStatus, TargetDesc,
    TargetHandles, TextureHandle,
};
use crate::error::{BackendError, UniformError};
use crate::{UniformValue, Viewport};

pub const PASSTHROUGH_VERTEX: &str = "passthrough";

// ---------------------------------------------------------------------------
// Fragment programs
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UniformKind {
    Float,
    Vec2,
}

impl UniformKind {
    fn type_name(self) -> &'static str {
        match self {
            UniformKind::Float => "f32",
            UniformKind::Vec2 => "vec2<f32>",
        }
    }

    fn accepts(self, value: &UniformValue) -> bool {
        matches!(
            (self, value),
            (UniformKind::Float, UniformValue::Float(_)) | (UniformKind::Vec2, UniformValue::Vec2(_))
        )
    }
}

type ShadeFn = dyn Fn(&FragmentContext<'_>) -> Vec4 + Send + Sync;

/// A fragment stage: the uniforms and texture slots it exposes plus the
/// per-pixel function.
#[derive(Clone)]
pub struct FragmentProgram {
    uniforms: Vec<(String, UniformKind)>,
    textures: Vec<(String, u32)>,
    shade: Arc<ShadeFn>,
}

impl FragmentProgram {
    pub fn new<F>(shade: F) -> Self
    where
        F: Fn(&FragmentContext<'_>) -> Vec4 + Send + Sync + 'static,
    {
        Self {
            uniforms: Vec::new(),
            textures: Vec::new(),
            shade: Arc::new(shade),
        }
    }

    pub fn float(mut self, name: &str) -> Self {
        self.uniforms.push((name.to_string(), UniformKind::Float));
        self
    }

    pub fn vec2(mut self, name: &str) -> Self {
        self.uniforms.push((name.to_string(), UniformKind::Vec2));
        self
    }

    pub fn texture(mut self, name: &str, unit: u32) -> Self {
        self.textures.push((name.to_string(), unit));
        self
    }

    fn uniform_kind(&self, name: &str) -> Option<UniformKind> {
        self.uniforms.iter().find(|(n, _)| n == name).map(|(_, k)| *k)
    }

    fn texture_unit(&self, name: &str) -> Option<u32> {
        self.textures.iter().find(|(n, _)| n == name).map(|(_, u)| *u)
    }
}

/// Per-pixel view handed to a [`FragmentProgram`].
pub struct FragmentContext<'a> {
    /// Pixel center in target pixels, origin top-left.
    pub frag_coord: Vec2,
    /// `frag_coord / target size`.
    pub uv: Vec2,
    values: &'a HashMap<String, UniformValue>,
    units: &'a BTreeMap<u32, &'a Image>,
}

impl FragmentContext<'_> {
    pub fn uniform(&self, name: &str) -> Option<UniformValue> {
        self.values.get(name).copied()
    }

    /// Unset or mistyped uniforms read as zero, like an unset GPU uniform.
    pub fn float(&self, name: &str) -> f32 {
        match self.uniform(name) {
            Some(UniformValue::Float(v)) => v,
            _ => 0.0,
        }
    }

    pub fn vec2(&self, name: &str) -> Vec2 {
        match self.uniform(name) {
            Some(UniformValue::Vec2(v)) => v,
            _ => Vec2::ZERO,
        }
    }

    /// Bilinear, clamp-to-edge sample of the texture on `unit`. Unbound units
    /// read as transparent black.
    pub fn sample(&self, unit: u32, uv: Vec2) -> Vec4 {
        match self.units.get(&unit) {
            Some(image) => image.sample_linear(uv),
            None => Vec4::ZERO,
        }
    }
}

// ---------------------------------------------------------------------------
// Images
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct Image {
    pub width: u32,
    pub height: u32,
    pub pixels: Vec<[u8; 4]>,
}

impl Image {
    fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            pixels: vec![[0; 4]; width as usize * height as usize],
        }
    }

    fn fill(&mut self, color: [u8; 4]) {
        self.pixels.fill(color);
    }

    pub fn pixel(&self, x: u32, y: u32) -> [u8; 4] {
        self.pixels[(y * self.width + x) as usize]
    }

    fn fetch(&self, x: i64, y: i64) -> Vec4 {
        let x = x.clamp(0, self.width as i64 - 1) as u32;
        let y = y.clamp(0, self.height as i64 - 1) as u32;
        unpack(self.pixel(x, y))
    }

    fn sample_nearest(&self, uv: Vec2) -> Vec4 {
        let x = (uv.x * self.width as f32).floor() as i64;
        let y = (uv.y * self.height as f32).floor() as i64;
        self.fetch(x, y)
    }

    fn sample_linear(&self, uv: Vec2) -> Vec4 {
        if self.pixels.is_empty() {
            return Vec4::ZERO;
        }
        let x = uv.x * self.width as f32 - 0.5;
        let y = uv.y * self.height as f32 - 0.5;
        let (x0, y0) = (x.floor(), y.floor());
        let (fx, fy) = (x - x0, y - y0);
        let (ix, iy) = (x0 as i64, y0 as i64);

        let top = self.fetch(ix, iy).lerp(self.fetch(ix + 1, iy), fx);
        let bottom = self.fetch(ix, iy + 1).lerp(self.fetch(ix + 1, iy + 1), fx);
        top.lerp(bottom, fy)
    }
}

fn unpack(px: [u8; 4]) -> Vec4 {
    Vec4::new(px[0] as f32, px[1] as f32, px[2] as f32, px[3] as f32) / 255.0
}

/// Quantizes a color to 8-bit RGBA the way a unorm target stores it.
pub fn pack(color: Vec4) -> [u8; 4] {
    let c = (color.clamp(Vec4::ZERO, Vec4::ONE) * 255.0).round();
    [c.x as u8, c.y as u8, c.z as u8, c.w as u8]
}

// ---------------------------------------------------------------------------
// Command log
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    CreateTarget(BufferHandle),
    DestroyTarget(BufferHandle),
    LoadShader(ShaderHandle),
    DisposeShader(ShaderHandle),
    PrepareGeometry(ShaderHandle),
    BeginFrame(Viewport),
    BindTarget(BufferHandle),
    Clear(BufferHandle),
    SetScalar {
        shader: ShaderHandle,
        name: String,
    },
    SetTexture {
        shader: ShaderHandle,
        name: String,
        texture: TextureHandle,
        unit: u32,
    },
    Draw {
        shader: ShaderHandle,
        target: BufferHandle,
    },
    Blit {
        source: BufferHandle,
    },
    Present,
    ResizeSurface(Viewport),
}

struct ShaderState {
    program: FragmentProgram,
    values: HashMap<String, UniformValue>,
    textures: BTreeMap<u32, TextureHandle>,
}

// ---------------------------------------------------------------------------
// SoftwareBackend
// ---------------------------------------------------------------------------

pub struct SoftwareBackend {
    vertex_stages: HashSet<String>,
    programs: HashMap<String, FragmentProgram>,

    images: HashMap<u32, Image>,
    next_target: u32,
    create_calls: usize,
    fail_at: Option<usize>,

    shaders: HashMap<u32, ShaderState>,
    next_shader: u32,
    geometry: Option<ShaderHandle>,

    bound: Option<BufferHandle>,
    surface: Image,
    pending_status: VecDeque<SurfaceStatus>,
    frames_presented: u64,
    commands: Vec<Command>,
}

impl SoftwareBackend {
    /// A backend that knows the `passthrough` vertex stage and no fragment stages.
    pub fn new() -> Self {
        Self {
            vertex_stages: HashSet::from([PASSTHROUGH_VERTEX.to_string()]),
            programs: HashMap::new(),
            images: HashMap::new(),
            next_target: 1,
            create_calls: 0,
            fail_at: None,
            shaders: HashMap::new(),
            next_shader: 1,
            geometry: None,
            bound: None,
            surface: Image::new(0, 0),
            pending_status: VecDeque::new(),
            frames_presented: 0,
            commands: Vec::new(),
        }
    }

    pub fn with_program(mut self, name: &str, program: FragmentProgram) -> Self {
        self.programs.insert(name.to_string(), program);
        self
    }

    pub fn with_vertex_stage(mut self, name: &str) -> Self {
        self.vertex_stages.insert(name.to_string());
        self
    }

    /// Makes the `n`th `create_target` call (0-based, counted over the
    /// backend's lifetime) report an incomplete buffer.
    pub fn fail_target_allocation_at(mut self, n: usize) -> Self {
        self.fail_at = Some(n);
        self
    }

    /// Status returned by the next `begin_frame` instead of `Ready`.
    pub fn queue_surface_status(&mut self, status: SurfaceStatus) {
        self.pending_status.push_back(status);
    }

    pub fn commands(&self) -> &[Command] {
        &self.commands
    }

    pub fn clear_commands(&mut self) {
        self.commands.clear();
    }

    pub fn live_targets(&self) -> usize {
        self.images.len()
    }

    pub fn live_shaders(&self) -> usize {
        self.shaders.len()
    }

    pub fn frames_presented(&self) -> u64 {
        self.frames_presented
    }

    pub fn target_size(&self, buffer: BufferHandle) -> Option<(u32, u32)> {
        self.images.get(&buffer.0).map(|i| (i.width, i.height))
    }

    pub fn target_image(&self, buffer: BufferHandle) -> Option<&Image> {
        self.images.get(&buffer.0)
    }

    pub fn surface(&self) -> &Image {
        &self.surface
    }

    fn shader_mut(&mut self, shader: ShaderHandle) -> Result<&mut ShaderState, UniformError> {
        self.shaders
            .get_mut(&shader.0)
            .ok_or(UniformError::UnknownShader)
    }
}

impl Default for SoftwareBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl RenderBackend for SoftwareBackend {
    fn create_target(&mut self, desc: &TargetDesc) -> Result<TargetHandles, BackendError> {
        let call = self.create_calls;
        self.create_calls += 1;

        if self.fail_at == Some(call) {
            return Err(BackendError::Incomplete(
                "FramebufferIncompleteAttachment".into(),
            ));
        }
        if desc.width == 0 || desc.height == 0 {
            return Err(BackendError::Incomplete(
                "FramebufferIncompleteMissingAttachment".into(),
            ));
        }

        let id = self.next_target;
        self.next_target += 1;
        self.images.insert(id, Image::new(desc.width, desc.height));

        let handles = TargetHandles {
            buffer: BufferHandle(id),
            texture: TextureHandle(id),
        };
        self.commands.push(Command::CreateTarget(handles.buffer));
        Ok(handles)
    }

    fn destroy_target(&mut self, target: TargetHandles) {
        self.images.remove(&target.buffer.0);
        if self.bound == Some(target.buffer) {
            self.bound = None;
        }
        self.commands.push(Command::DestroyTarget(target.buffer));
    }

    fn load_shader(&mut self, vertex: &str, fragment: &str) -> Result<ShaderHandle, BackendError> {
        if !self.vertex_stages.contains(vertex) {
            return Err(BackendError::UnknownSource(vertex.to_string()));
        }
        let program = self
            .programs
            .get(fragment)
            .cloned()
            .ok_or_else(|| BackendError::UnknownSource(fragment.to_string()))?;

        let handle = ShaderHandle(self.next_shader);
        self.next_shader += 1;
        self.shaders.insert(
            handle.0,
            ShaderState {
                program,
                values: HashMap::new(),
                textures: BTreeMap::new(),
            },
        );
        self.commands.push(Command::LoadShader(handle));
        Ok(handle)
    }

    fn dispose_shader(&mut self, shader: ShaderHandle) {
        self.shaders.remove(&shader.0);
        self.commands.push(Command::DisposeShader(shader));
    }

    fn has_uniform(&self, shader: ShaderHandle, name: &str) -> bool {
        self.shaders
            .get(&shader.0)
            .is_some_and(|s| s.program.uniform_kind(name).is_some())
    }

    fn set_uniform_scalar(
        &mut self,
        shader: ShaderHandle,
        name: &str,
        value: UniformValue,
    ) -> Result<(), UniformError> {
        let state = self.shader_mut(shader)?;
        let kind = state
            .program
            .uniform_kind(name)
            .ok_or_else(|| UniformError::Missing {
                name: name.to_string(),
            })?;
        if !kind.accepts(&value) {
            return Err(UniformError::TypeMismatch {
                name: name.to_string(),
                expected: kind.type_name(),
                found: value.type_name(),
            });
        }
        state.values.insert(name.to_string(), value);
        self.commands.push(Command::SetScalar {
            shader,
            name: name.to_string(),
        });
        Ok(())
    }

    fn set_uniform_texture(
        &mut self,
        shader: ShaderHandle,
        name: &str,
        texture: TextureHandle,
        unit: u32,
    ) -> Result<(), UniformError> {
        let state = self.shader_mut(shader)?;
        let expected_unit = state
            .program
            .texture_unit(name)
            .ok_or_else(|| UniformError::Missing {
                name: name.to_string(),
            })?;
        if expected_unit != unit {
            return Err(UniformError::UnitMismatch {
                name: name.to_string(),
                unit,
                expected_unit,
            });
        }
        state.textures.insert(unit, texture);
        self.commands.push(Command::SetTexture {
            shader,
            name: name.to_string(),
            texture,
            unit,
        });
        Ok(())
    }

    fn prepare_geometry(&mut self, shader: ShaderHandle) {
        self.geometry = Some(shader);
        self.commands.push(Command::PrepareGeometry(shader));
    }

    fn begin_frame(&mut self, viewport: Viewport) -> SurfaceStatus {
        self.commands.push(Command::BeginFrame(viewport));
        self.pending_status.pop_front().unwrap_or(SurfaceStatus::Ready)
    }

    fn bind_draw_target(&mut self, buffer: BufferHandle) {
        self.bound = Some(buffer);
        self.commands.push(Command::BindTarget(buffer));
    }

    fn clear(&mut self, color: ClearColor) {
        let Some(buffer) = self.bound else {
            log::warn!("clear with no draw target bound");
            return;
        };
        if let Some(image) = self.images.get_mut(&buffer.0) {
            image.fill(pack(Vec4::new(color.r, color.g, color.b, color.a)));
        }
        self.commands.push(Command::Clear(buffer));
    }

    fn draw_fullscreen(&mut self, shader: ShaderHandle) {
        if self.geometry.is_none() {
            log::warn!("draw before full-screen geometry was prepared");
            return;
        }
        let Some(target) = self.bound else {
            log::warn!("draw with no draw target bound");
            return;
        };
        let Some(state) = self.shaders.get(&shader.0) else {
            log::warn!("draw with unknown shader {shader:?}");
            return;
        };
        // Taken out of the map so inputs can be borrowed while it is written.
        let Some(mut output) = self.images.remove(&target.0) else {
            log::warn!("draw into released target {target:?}");
            return;
        };

        let units: BTreeMap<u32, &Image> = state
            .textures
            .iter()
            .filter_map(|(unit, tex)| self.images.get(&tex.0).map(|img| (*unit, img)))
            .collect();

        let size = Vec2::new(output.width as f32, output.height as f32);
        for y in 0..output.height {
            for x in 0..output.width {
                let frag_coord = Vec2::new(x as f32 + 0.5, y as f32 + 0.5);
                let ctx = FragmentContext {
                    frag_coord,
                    uv: frag_coord / size,
                    values: &state.values,
                    units: &units,
                };
                output.pixels[(y * output.width + x) as usize] = pack((state.program.shade)(&ctx));
            }
        }

        self.images.insert(target.0, output);
        self.commands.push(Command::Draw { shader, target });
    }

    fn blit_to_surface(&mut self, source: BufferHandle, viewport: Viewport, filter: BlitFilter) {
        if self.surface.width != viewport.width || self.surface.height != viewport.height {
            self.surface = Image::new(viewport.width, viewport.height);
        }
        let Some(image) = self.images.get(&source.0) else {
            log::warn!("blit from released target {source:?}");
            return;
        };

        let size = viewport.as_vec2();
        for y in 0..self.surface.height {
            for x in 0..self.surface.width {
                let uv = Vec2::new(x as f32 + 0.5, y as f32 + 0.5) / size;
                let color = match filter {
                    BlitFilter::Linear => image.sample_linear(uv),
                    BlitFilter::Nearest => image.sample_nearest(uv),
                };
                self.surface.pixels[(y * self.surface.width + x) as usize] = pack(color);
            }
        }
        self.commands.push(Command::Blit { source });
    }

    fn present(&mut self) {
        self.frames_presented += 1;
        self.commands.push(Command::Present);
    }

    fn resize_surface(&mut self, viewport: Viewport) {
        self.surface = Image::new(viewport.width, viewport.height);
        self.commands.push(Command::ResizeSurface(viewport));
    }
}
