//! Error types for the multipass renderer.
//!
//! Only [`TargetAllocationError`] is fatal. Uniform problems are
//! [`UniformError`]s that the pipeline turns into [`UniformBindingWarning`]
//! diagnostics and then keeps rendering.

use thiserror::Error;

use crate::lifecycle::LifecycleState;

/// Failure reported by a [`RenderBackend`](crate::RenderBackend) implementation.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum BackendError {
    #[error("incomplete render target: {0}")]
    Incomplete(String),

    #[error("unknown shader source `{0}`")]
    UnknownSource(String),

    #[error("shader `{name}` failed to compile: {reason}")]
    Compile { name: String, reason: String },
}

/// An offscreen buffer was incomplete after construction.
///
/// There is no degraded mode for this; see [`crate::fatal`].
#[derive(Debug, Clone, PartialEq, Error)]
#[error("error creating render target {index} ({width}x{height}): {source}")]
pub struct TargetAllocationError {
    pub index: usize,
    pub width: u32,
    pub height: u32,
    #[source]
    pub source: BackendError,
}

/// Structural problems found in a pass list before any shader is loaded.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PipelineError {
    #[error("pipeline declares no render targets")]
    NoTargets,

    #[error("pipeline declares no passes")]
    EmptyPipeline,

    #[error("pass `{pass}` references target {index} but only {count} exist")]
    TargetOutOfRange {
        pass: String,
        index: usize,
        count: usize,
    },

    #[error("final target {index} is out of range ({count} targets)")]
    FinalTargetOutOfRange { index: usize, count: usize },

    #[error("pass `{pass}` reads target {target} while writing to it")]
    SelfReferencingPass { pass: String, target: usize },

    #[error("pass `{pass}` binds two inputs to texture unit {unit}")]
    DuplicateTextureUnit { pass: String, unit: u32 },
}

/// Top-level error type for the orchestration layer.
#[derive(Debug, Error)]
pub enum MultipassError {
    #[error(transparent)]
    TargetAllocation(#[from] TargetAllocationError),

    #[error("invalid pipeline: {0}")]
    InvalidPipeline(#[from] PipelineError),

    #[error("failed to load shaders for pass `{pass}`: {source}")]
    ShaderLoad {
        pass: String,
        #[source]
        source: BackendError,
    },

    #[error("pipeline needs {required} render targets but the pool holds {available}")]
    PipelineMismatch { required: usize, available: usize },

    #[error("`{operation}` is not valid in state {state:?}")]
    InvalidState {
        operation: &'static str,
        state: LifecycleState,
    },
}

impl MultipassError {
    /// True for errors that must end the process.
    pub fn is_fatal(&self) -> bool {
        matches!(self, MultipassError::TargetAllocation(_))
    }
}

/// A uniform or texture binding the active shader does not accept.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum UniformError {
    #[error("shader has no uniform named `{name}`")]
    Missing { name: String },

    #[error("uniform `{name}` is {expected}, got {found}")]
    TypeMismatch {
        name: String,
        expected: &'static str,
        found: &'static str,
    },

    #[error("texture `{name}` lives on unit {expected_unit}, not unit {unit}")]
    UnitMismatch {
        name: String,
        unit: u32,
        expected_unit: u32,
    },

    #[error("unknown shader handle")]
    UnknownShader,
}

/// A [`UniformError`] tagged with the pass that hit it.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("pass `{pass}`: {error}")]
pub struct UniformBindingWarning {
    pub pass: String,
    pub error: UniformError,
}

pub type Result<T> = std::result::Result<T, MultipassError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_allocation_failures_are_fatal() {
        let alloc = MultipassError::from(TargetAllocationError {
            index: 1,
            width: 4,
            height: 4,
            source: BackendError::Incomplete("missing attachment".into()),
        });
        assert!(alloc.is_fatal());

        let mismatch = MultipassError::PipelineMismatch {
            required: 3,
            available: 2,
        };
        assert!(!mismatch.is_fatal());
    }

    #[test]
    fn allocation_error_names_the_target() {
        let err = TargetAllocationError {
            index: 2,
            width: 960,
            height: 540,
            source: BackendError::Incomplete("FramebufferIncompleteAttachment".into()),
        };
        let msg = err.to_string();
        assert!(msg.contains("target 2"), "{msg}");
        assert!(msg.contains("960x540"), "{msg}");
    }

    #[test]
    fn warning_mentions_pass_and_uniform() {
        let warning = UniformBindingWarning {
            pass: "pass3-sobel".into(),
            error: UniformError::Missing {
                name: "input9".into(),
            },
        };
        let msg = warning.to_string();
        assert!(msg.contains("pass3-sobel"));
        assert!(msg.contains("input9"));
    }
}
