use crate::backend::ClearColor;
use crate::error::PipelineError;
use crate::{FrameInputs, UniformValue};

/// Uniform names that are filled in for every pass whose shader exposes them.
pub const RESOLUTION_UNIFORM: &str = "resolution";
pub const TIME_UNIFORM: &str = "time";

// ---------------------------------------------------------------------------
// Uniform declarations
// ---------------------------------------------------------------------------

/// Produces the value of a declared scalar uniform each frame.
#[derive(Debug, Clone, Copy)]
pub enum UniformSource {
    Time,
    Resolution,
    FrameIndex,
    Constant(UniformValue),
    Computed(fn(&FrameInputs) -> UniformValue),
}

impl UniformSource {
    pub fn evaluate(&self, inputs: &FrameInputs) -> UniformValue {
        match self {
            UniformSource::Time => UniformValue::Float(inputs.time),
            UniformSource::Resolution => UniformValue::Vec2(inputs.resolution),
            UniformSource::FrameIndex => UniformValue::Float(inputs.frame_index as f32),
            UniformSource::Constant(v) => *v,
            UniformSource::Computed(f) => f(inputs),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ScalarUniform {
    pub name: String,
    pub source: UniformSource,
}

/// Binds a pool target's texture to a texture unit under a uniform name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextureInput {
    pub unit: u32,
    pub target: usize,
    pub uniform: String,
}

// ---------------------------------------------------------------------------
// PassDesc
// ---------------------------------------------------------------------------

/// One shader invocation: reads zero or more targets, writes exactly one.
#[derive(Debug, Clone)]
pub struct PassDesc {
    pub name: String,
    /// Vertex stage source name, resolved by the backend.
    pub vertex: String,
    /// Fragment stage source name, resolved by the backend.
    pub fragment: String,
    pub output: usize,
    pub inputs: Vec<TextureInput>,
    pub uniforms: Vec<ScalarUniform>,
}

impl PassDesc {
    /// A pass named after its fragment stage.
    pub fn new(vertex: impl Into<String>, fragment: impl Into<String>, output: usize) -> Self {
        let fragment = fragment.into();
        Self {
            name: fragment.clone(),
            vertex: vertex.into(),
            fragment,
            output,
            inputs: Vec::new(),
            uniforms: Vec::new(),
        }
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Sample `target` on texture `unit` through the sampler uniform `uniform`.
    pub fn read(mut self, uniform: impl Into<String>, target: usize, unit: u32) -> Self {
        self.inputs.push(TextureInput {
            unit,
            target,
            uniform: uniform.into(),
        });
        self
    }

    pub fn uniform(mut self, name: impl Into<String>, source: UniformSource) -> Self {
        self.uniforms.push(ScalarUniform {
            name: name.into(),
            source,
        });
        self
    }

    /// Whether `name` is explicitly declared (implicit uniforms are skipped for it).
    pub fn declares(&self, name: &str) -> bool {
        self.uniforms.iter().any(|u| u.name == name)
    }

    /// Every target index this pass touches.
    pub fn targets(&self) -> impl Iterator<Item = usize> + '_ {
        std::iter::once(self.output).chain(self.inputs.iter().map(|i| i.target))
    }
}

// ---------------------------------------------------------------------------
// PipelineSpec
// ---------------------------------------------------------------------------

/// The whole fixed pass graph. Pass order is execution order.
#[derive(Debug, Clone)]
pub struct PipelineSpec {
    pub target_count: usize,
    /// Target blitted to the visible surface after the last pass.
    pub final_target: usize,
    pub clear_color: ClearColor,
    pub passes: Vec<PassDesc>,
}

/// A read of a target that no earlier pass in the same frame wrote.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StaleRead {
    pub pass: String,
    pub target: usize,
}

impl PipelineSpec {
    pub fn new(target_count: usize, final_target: usize) -> Self {
        Self {
            target_count,
            final_target,
            clear_color: ClearColor::BLACK,
            passes: Vec::new(),
        }
    }

    pub fn pass(mut self, pass: PassDesc) -> Self {
        self.passes.push(pass);
        self
    }

    pub fn clear_color(mut self, color: ClearColor) -> Self {
        self.clear_color = color;
        self
    }

    /// Structural check of the pass list against `target_count`.
    pub fn validate(&self) -> Result<(), PipelineError> {
        if self.target_count == 0 {
            return Err(PipelineError::NoTargets);
        }
        if self.passes.is_empty() {
            return Err(PipelineError::EmptyPipeline);
        }
        if self.final_target >= self.target_count {
            return Err(PipelineError::FinalTargetOutOfRange {
                index: self.final_target,
                count: self.target_count,
            });
        }

        for pass in &self.passes {
            if let Some(index) = pass.targets().find(|&t| t >= self.target_count) {
                return Err(PipelineError::TargetOutOfRange {
                    pass: pass.name.clone(),
                    index,
                    count: self.target_count,
                });
            }

            if pass.inputs.iter().any(|i| i.target == pass.output) {
                return Err(PipelineError::SelfReferencingPass {
                    pass: pass.name.clone(),
                    target: pass.output,
                });
            }

            for (n, input) in pass.inputs.iter().enumerate() {
                if pass.inputs[..n].iter().any(|other| other.unit == input.unit) {
                    return Err(PipelineError::DuplicateTextureUnit {
                        pass: pass.name.clone(),
                        unit: input.unit,
                    });
                }
            }
        }

        Ok(())
    }

    /// Reads that see the previous frame's contents (legal; feedback effects
    /// rely on it, but it is usually a pass-ordering mistake).
    pub fn stale_reads(&self) -> Vec<StaleRead> {
        let mut written = vec![false; self.target_count];
        let mut stale = Vec::new();

        for pass in &self.passes {
            for input in &pass.inputs {
                if !written.get(input.target).copied().unwrap_or(false) {
                    stale.push(StaleRead {
                        pass: pass.name.clone(),
                        target: input.target,
                    });
                }
            }
            if let Some(slot) = written.get_mut(pass.output) {
                *slot = true;
            }
        }

        stale
    }

    /// Smallest pool size that satisfies every index in the pass list.
    pub fn required_targets(&self) -> usize {
        self.passes
            .iter()
            .flat_map(|p| p.targets())
            .chain(std::iter::once(self.final_target))
            .max()
            .map_or(0, |max| max + 1)
    }
}
