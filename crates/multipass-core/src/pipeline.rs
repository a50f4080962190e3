use std::collections::HashSet;

use crate::backend::{ClearColor, RenderBackend, ShaderHandle};
use crate::diagnostics::{
    Diagnostic, DiagnosticSink, DiagnosticSource, Severity, STALE_READ_NOTICE_ID,
    UNIFORM_BINDING_WARNING_ID,
};
use crate::error::{MultipassError, Result, UniformBindingWarning, UniformError};
use crate::pass::{PassDesc, PipelineSpec, RESOLUTION_UNIFORM, TIME_UNIFORM};
use crate::target_pool::RenderTargetPool;
use crate::{FrameInputs, UniformValue};

/// A [`PassDesc`] with its loaded shader.
#[derive(Debug)]
pub struct Pass {
    pub desc: PassDesc,
    pub shader: ShaderHandle,
}

/// Ordered list of passes, built once at startup.
///
/// The pass list is immutable after [`build`](Self::build); only the pool
/// handed to [`execute`](Self::execute) changes between frames.
#[derive(Debug)]
pub struct PassPipeline {
    passes: Vec<Pass>,
    target_count: usize,
    final_target: usize,
    required_targets: usize,
    clear_color: ClearColor,
    /// (pass index, uniform name) pairs already reported, so a broken binding
    /// warns once instead of every frame.
    reported: HashSet<(usize, String)>,
}

impl PassPipeline {
    /// Validates `spec`, then loads every shader pair in declaration order.
    ///
    /// If any shader fails to load, the ones already loaded are disposed again.
    pub fn build<B: RenderBackend + ?Sized>(
        backend: &mut B,
        spec: &PipelineSpec,
        sink: &dyn DiagnosticSink,
    ) -> Result<Self> {
        spec.validate()?;

        for stale in spec.stale_reads() {
            sink.report(&Diagnostic::new(
                Severity::Notification,
                DiagnosticSource::Pipeline,
                STALE_READ_NOTICE_ID,
                format!(
                    "pass `{}` reads target {} before any pass writes it; it sees the previous frame",
                    stale.pass, stale.target
                ),
            ));
        }

        let mut passes: Vec<Pass> = Vec::with_capacity(spec.passes.len());
        for desc in &spec.passes {
            match backend.load_shader(&desc.vertex, &desc.fragment) {
                Ok(shader) => passes.push(Pass {
                    desc: desc.clone(),
                    shader,
                }),
                Err(source) => {
                    for pass in passes.drain(..) {
                        backend.dispose_shader(pass.shader);
                    }
                    return Err(MultipassError::ShaderLoad {
                        pass: desc.name.clone(),
                        source,
                    });
                }
            }
        }

        // Every pass shares the vertex stage, so one reference is enough.
        if let Some(first) = passes.first() {
            backend.prepare_geometry(first.shader);
        }

        log::info!(
            "pass pipeline built: {} passes over {} targets, final target {}",
            passes.len(),
            spec.target_count,
            spec.final_target
        );

        Ok(Self {
            passes,
            target_count: spec.target_count,
            final_target: spec.final_target,
            required_targets: spec.required_targets(),
            clear_color: spec.clear_color,
            reported: HashSet::new(),
        })
    }

    /// Runs every pass in order against `pool`.
    ///
    /// Uniform and texture binding failures are reported through `sink` and
    /// the pass is still drawn. A pool smaller than the pass list needs is a
    /// [`MultipassError::PipelineMismatch`] and nothing is drawn.
    pub fn execute<B: RenderBackend + ?Sized>(
        &mut self,
        backend: &mut B,
        pool: &RenderTargetPool,
        inputs: &FrameInputs,
        sink: &dyn DiagnosticSink,
    ) -> Result<()> {
        if pool.len() < self.required_targets {
            return Err(MultipassError::PipelineMismatch {
                required: self.required_targets,
                available: pool.len(),
            });
        }

        let implicit = [
            (RESOLUTION_UNIFORM, UniformValue::Vec2(inputs.resolution)),
            (TIME_UNIFORM, UniformValue::Float(inputs.time)),
        ];

        for (index, pass) in self.passes.iter().enumerate() {
            let Some(output) = pool.get(pass.desc.output) else {
                continue;
            };
            backend.bind_draw_target(output.buffer);
            backend.clear(self.clear_color);

            for input in &pass.desc.inputs {
                let Some(target) = pool.get(input.target) else {
                    continue;
                };
                let bound =
                    backend.set_uniform_texture(pass.shader, &input.uniform, target.texture, input.unit);
                if let Err(error) = bound {
                    warn_once(&mut self.reported, sink, index, pass, &input.uniform, error);
                }
            }

            for (name, value) in implicit {
                if pass.desc.declares(name) || !backend.has_uniform(pass.shader, name) {
                    continue;
                }
                if let Err(error) = backend.set_uniform_scalar(pass.shader, name, value) {
                    warn_once(&mut self.reported, sink, index, pass, name, error);
                }
            }

            for uniform in &pass.desc.uniforms {
                let value = uniform.source.evaluate(inputs);
                if let Err(error) = backend.set_uniform_scalar(pass.shader, &uniform.name, value) {
                    warn_once(&mut self.reported, sink, index, pass, &uniform.name, error);
                }
            }

            backend.draw_fullscreen(pass.shader);
        }

        Ok(())
    }

    /// Disposes every shader. Safe to call more than once.
    pub fn dispose<B: RenderBackend + ?Sized>(&mut self, backend: &mut B) {
        if self.passes.is_empty() {
            return;
        }
        log::debug!("disposing {} pass shaders", self.passes.len());
        for pass in self.passes.drain(..) {
            backend.dispose_shader(pass.shader);
        }
    }

    pub fn passes(&self) -> &[Pass] {
        &self.passes
    }

    pub fn len(&self) -> usize {
        self.passes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.passes.is_empty()
    }

    /// Target count the pipeline was declared with.
    pub fn target_count(&self) -> usize {
        self.target_count
    }

    pub fn final_target(&self) -> usize {
        self.final_target
    }

    /// Smallest pool this pipeline can execute against.
    pub fn required_targets(&self) -> usize {
        self.required_targets
    }
}

fn warn_once(
    reported: &mut HashSet<(usize, String)>,
    sink: &dyn DiagnosticSink,
    index: usize,
    pass: &Pass,
    uniform: &str,
    error: UniformError,
) {
    if !reported.insert((index, uniform.to_string())) {
        return;
    }
    let warning = UniformBindingWarning {
        pass: pass.desc.name.clone(),
        error,
    };
    sink.report(&Diagnostic::new(
        Severity::Medium,
        DiagnosticSource::Pipeline,
        UNIFORM_BINDING_WARNING_ID,
        warning.to_string(),
    ));
}
