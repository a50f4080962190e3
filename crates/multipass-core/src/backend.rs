//! The graphics collaborator the orchestration layer drives.
//!
//! [`RenderBackend`] folds two external collaborators into one trait: the
//! shader-resource owner (load, set uniforms, dispose) and the handful of
//! draw primitives a multipass frame needs. The core never compiles shader
//! text or touches a graphics API directly; `multipass-gpu` implements this
//! trait on top of wgpu and [`crate::software`] implements it on the CPU.

use crate::error::{BackendError, UniformError};
use crate::{UniformValue, Viewport};

// ---------------------------------------------------------------------------
// Handles
// ---------------------------------------------------------------------------

/// Opaque handle to a draw destination (the "framebuffer" half of a target).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BufferHandle(pub u32);

/// Opaque handle to the sampled texture backing a target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TextureHandle(pub u32);

/// Opaque handle to a linked vertex + fragment program.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ShaderHandle(pub u32);

// ---------------------------------------------------------------------------
// Descriptors
// ---------------------------------------------------------------------------

/// Pixel storage of an offscreen target. Only 8-bit RGBA is used.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetFormat {
    Rgba8Unorm,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WrapMode {
    ClampToEdge,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterMode {
    Linear,
}

/// Everything a backend needs to build one render target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TargetDesc {
    pub width: u32,
    pub height: u32,
    pub format: TargetFormat,
    pub wrap: WrapMode,
    pub min_filter: FilterMode,
    pub mag_filter: FilterMode,
    /// Targets never carry depth or stencil attachments.
    pub depth_stencil: bool,
}

impl TargetDesc {
    pub fn color(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            format: TargetFormat::Rgba8Unorm,
            wrap: WrapMode::ClampToEdge,
            min_filter: FilterMode::Linear,
            mag_filter: FilterMode::Linear,
            depth_stencil: false,
        }
    }
}

/// Buffer + texture pair returned by [`RenderBackend::create_target`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TargetHandles {
    pub buffer: BufferHandle,
    pub texture: TextureHandle,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClearColor {
    pub r: f32,
    pub g: f32,
    pub b: f32,
    pub a: f32,
}

impl ClearColor {
    pub const BLACK: ClearColor = ClearColor {
        r: 0.0,
        g: 0.0,
        b: 0.0,
        a: 1.0,
    };
}

impl Default for ClearColor {
    fn default() -> Self {
        Self::BLACK
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BlitFilter {
    Nearest,
    #[default]
    Linear,
}

/// Outcome of acquiring the visible surface for a new frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SurfaceStatus {
    Ready,
    /// Transient problem (lost, outdated, timed out); try again next tick.
    SkipFrame,
    /// Unrecoverable (commonly out of memory).
    Fatal,
}

// ---------------------------------------------------------------------------
// RenderBackend
// ---------------------------------------------------------------------------

pub trait RenderBackend {
    /// Builds one offscreen color target. Returns `BackendError::Incomplete`
    /// when the result cannot be rendered into.
    fn create_target(&mut self, desc: &TargetDesc) -> Result<TargetHandles, BackendError>;

    fn destroy_target(&mut self, target: TargetHandles);

    /// Loads and links a vertex + fragment stage pair, identified by source name.
    fn load_shader(&mut self, vertex: &str, fragment: &str) -> Result<ShaderHandle, BackendError>;

    fn dispose_shader(&mut self, shader: ShaderHandle);

    /// Whether the shader exposes a scalar uniform called `name`.
    fn has_uniform(&self, shader: ShaderHandle, name: &str) -> bool;

    fn set_uniform_scalar(
        &mut self,
        shader: ShaderHandle,
        name: &str,
        value: UniformValue,
    ) -> Result<(), UniformError>;

    fn set_uniform_texture(
        &mut self,
        shader: ShaderHandle,
        name: &str,
        texture: TextureHandle,
        unit: u32,
    ) -> Result<(), UniformError>;

    /// Supplies the shared full-screen geometry once, using `shader`'s vertex
    /// stage as the layout reference. Every pass shares that vertex stage.
    fn prepare_geometry(&mut self, shader: ShaderHandle);

    fn begin_frame(&mut self, viewport: Viewport) -> SurfaceStatus;

    /// Makes `buffer` the active draw destination.
    fn bind_draw_target(&mut self, buffer: BufferHandle);

    /// Clears the color buffer of the active draw destination.
    fn clear(&mut self, color: ClearColor);

    fn draw_fullscreen(&mut self, shader: ShaderHandle);

    /// Copies `source` onto the visible surface at 1:1 scale.
    fn blit_to_surface(&mut self, source: BufferHandle, viewport: Viewport, filter: BlitFilter);

    fn present(&mut self);

    fn resize_surface(&mut self, viewport: Viewport);
}
