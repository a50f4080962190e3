pub mod backend;
pub mod clock;
pub mod diagnostics;
pub mod error;
pub mod fatal;
pub mod frame_loop;
pub mod lifecycle;
pub mod pass;
pub mod pipeline;
pub mod presets;
pub mod resize;
pub mod software;
pub mod target_pool;

pub use backend::{
    BlitFilter, BufferHandle, ClearColor, RenderBackend, ShaderHandle, SurfaceStatus,
    TextureHandle,
};
pub use diagnostics::{Diagnostic, DiagnosticSink, DiagnosticSource, Severity};
pub use error::{MultipassError, TargetAllocationError, UniformError};
pub use frame_loop::{FrameLoop, FrameOutcome};
pub use lifecycle::{LifecycleState, MultipassRenderer};
pub use pass::{PassDesc, PipelineSpec, UniformSource};
pub use pipeline::PassPipeline;
pub use resize::{ResizeOutcome, SurfaceResizeHandler};
pub use target_pool::{RenderTarget, RenderTargetPool};

use std::sync::Arc;

use glam::Vec2;

// ---------------------------------------------------------------------------
// Per-frame inputs shared by every pass
// ---------------------------------------------------------------------------

/// Implicit inputs pushed into every pass that exposes a matching uniform.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameInputs {
    /// Seconds since the first frame.
    pub time: f32,
    /// Surface size in pixels.
    pub resolution: Vec2,
    pub frame_index: u64,
}

impl FrameInputs {
    pub fn new(time: f32, viewport: Viewport) -> Self {
        Self {
            time,
            resolution: viewport.as_vec2(),
            frame_index: 0,
        }
    }
}

/// Value of a non-texture uniform.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum UniformValue {
    Float(f32),
    Vec2(Vec2),
}

impl UniformValue {
    pub fn type_name(&self) -> &'static str {
        match self {
            UniformValue::Float(_) => "f32",
            UniformValue::Vec2(_) => "vec2<f32>",
        }
    }
}

/// Drawable surface size in physical pixels. Also the size of every render target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Viewport {
    pub width: u32,
    pub height: u32,
}

impl Viewport {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    pub fn as_vec2(&self) -> Vec2 {
        Vec2::new(self.width as f32, self.height as f32)
    }
}

// ---------------------------------------------------------------------------
// RenderContext: the owned window/GPU state
// ---------------------------------------------------------------------------

/// Everything the frame loop and the resize handler mutate, owned in one place.
///
/// Only [`frame_loop::FrameLoop`] and [`resize::SurfaceResizeHandler`] touch
/// `pool`, and both take the context by `&mut`, so a reallocation can never
/// overlap a pass that is still reading the old targets.
pub struct RenderContext<B: RenderBackend> {
    pub backend: B,
    pub pool: RenderTargetPool,
    pub viewport: Viewport,
    pub sink: Arc<dyn DiagnosticSink>,
}

impl<B: RenderBackend> RenderContext<B> {
    pub fn new(backend: B, viewport: Viewport, sink: Arc<dyn DiagnosticSink>) -> Self {
        Self {
            backend,
            pool: RenderTargetPool::empty(),
            viewport,
            sink,
        }
    }
}
