//! wgpu implementation of the multipass [`RenderBackend`](multipass_core::RenderBackend).

pub mod backend;
pub mod blit;
pub mod context;
pub mod reflect;
pub mod shaders;

pub use backend::{PresentSurface, WgpuBackend};
pub use context::{GpuContext, GpuInit};
pub use shaders::ShaderLibrary;
