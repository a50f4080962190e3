//! Whole-system state machine and the callbacks a windowing layer drives.
//!
//! ```text
//! Uninitialized → Initialized → Running ⇄ Resizing → Running → Terminated
//! ```

use std::sync::Arc;
use std::time::Instant;

use crate::backend::RenderBackend;
use crate::diagnostics::DiagnosticSink;
use crate::error::{MultipassError, Result};
use crate::frame_loop::{FrameLoop, FrameOutcome};
use crate::pass::PipelineSpec;
use crate::pipeline::PassPipeline;
use crate::resize::{ResizeOutcome, SurfaceResizeHandler};
use crate::target_pool::RenderTargetPool;
use crate::{FrameInputs, RenderContext, Viewport};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Uninitialized,
    Initialized,
    Running,
    /// Only observable while a resize is in progress.
    Resizing,
    Terminated,
}

/// Owns the render context, the pipeline and the frame loop, and implements
/// the `on_load` / `on_frame` / `on_resize` / `on_close` callbacks.
///
/// Every callback takes `&mut self`, so a resize can never run while a frame
/// is executing.
pub struct MultipassRenderer<B: RenderBackend> {
    state: LifecycleState,
    ctx: RenderContext<B>,
    spec: PipelineSpec,
    pipeline: Option<PassPipeline>,
    frame_loop: FrameLoop,
}

impl<B: RenderBackend> MultipassRenderer<B> {
    pub fn new(
        backend: B,
        spec: PipelineSpec,
        viewport: Viewport,
        sink: Arc<dyn DiagnosticSink>,
    ) -> Self {
        Self {
            state: LifecycleState::Uninitialized,
            ctx: RenderContext::new(backend, viewport, sink),
            spec,
            pipeline: None,
            frame_loop: FrameLoop::new(),
        }
    }

    /// Allocates the target pool and builds the pipeline.
    ///
    /// Any failure leaves the renderer `Terminated` with nothing allocated.
    pub fn on_load(&mut self) -> Result<()> {
        self.expect_state("on_load", &[LifecycleState::Uninitialized])?;

        // A window can report 0×0 before it is shown; targets and the
        // resolution uniform both use the clamped size until a real resize.
        let Viewport { width, height } = self.ctx.viewport;
        self.ctx.viewport = Viewport::new(width.max(1), height.max(1));
        let allocated = RenderTargetPool::allocate(
            &mut self.ctx.backend,
            self.spec.target_count,
            self.ctx.viewport.width,
            self.ctx.viewport.height,
        );
        self.ctx.pool = match allocated {
            Ok(pool) => pool,
            Err(err) => return Err(self.terminate_with(err.into())),
        };

        match PassPipeline::build(&mut self.ctx.backend, &self.spec, self.ctx.sink.as_ref()) {
            Ok(pipeline) => self.pipeline = Some(pipeline),
            Err(err) => return Err(self.terminate_with(err)),
        }

        self.transition(LifecycleState::Initialized);
        Ok(())
    }

    /// Renders one frame at the current wall-clock time.
    pub fn on_frame(&mut self) -> Result<FrameOutcome> {
        self.on_frame_at(Instant::now())
    }

    /// [`on_frame`](Self::on_frame) with the clock sampled at `now`.
    pub fn on_frame_at(&mut self, now: Instant) -> Result<FrameOutcome> {
        self.begin_frame("on_frame")?;
        let pipeline = self.pipeline.as_mut().ok_or(MultipassError::InvalidState {
            operation: "on_frame",
            state: self.state,
        })?;
        self.frame_loop.tick_at(&mut self.ctx, pipeline, now)
    }

    /// Renders one frame for explicit inputs, bypassing the clock.
    pub fn render_with(&mut self, inputs: &FrameInputs) -> Result<FrameOutcome> {
        self.begin_frame("render_with")?;
        let pipeline = self.pipeline.as_mut().ok_or(MultipassError::InvalidState {
            operation: "render_with",
            state: self.state,
        })?;
        FrameLoop::render(&mut self.ctx, pipeline, inputs)
    }

    /// Rebuilds the pool at the new surface size.
    ///
    /// Before `on_load` this only records the size. An allocation failure
    /// leaves the renderer `Terminated`.
    pub fn on_resize(&mut self, width: u32, height: u32) -> Result<ResizeOutcome> {
        match self.state {
            LifecycleState::Uninitialized => {
                if width > 0 && height > 0 {
                    self.ctx.viewport = Viewport::new(width, height);
                }
                return Ok(ResizeOutcome::Deferred);
            }
            LifecycleState::Initialized | LifecycleState::Running => {}
            state => {
                return Err(MultipassError::InvalidState {
                    operation: "on_resize",
                    state,
                })
            }
        }

        let Some(pipeline) = self.pipeline.take() else {
            return Err(MultipassError::InvalidState {
                operation: "on_resize",
                state: self.state,
            });
        };

        self.transition(LifecycleState::Resizing);
        let resized = SurfaceResizeHandler::handle(&mut self.ctx, &pipeline, width, height);
        self.pipeline = Some(pipeline);

        match resized {
            Ok(outcome) => {
                self.transition(LifecycleState::Running);
                Ok(outcome)
            }
            Err(err) if err.is_fatal() => Err(self.terminate_with(err)),
            Err(err) => {
                self.transition(LifecycleState::Running);
                Err(err)
            }
        }
    }

    /// Releases the pool and every shader. Only the first call does anything.
    pub fn on_close(&mut self) {
        if self.state == LifecycleState::Terminated {
            return;
        }
        self.release_all();
        self.transition(LifecycleState::Terminated);
    }

    pub fn state(&self) -> LifecycleState {
        self.state
    }

    pub fn context(&self) -> &RenderContext<B> {
        &self.ctx
    }

    pub fn backend(&self) -> &B {
        &self.ctx.backend
    }

    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.ctx.backend
    }

    pub fn pipeline(&self) -> Option<&PassPipeline> {
        self.pipeline.as_ref()
    }

    pub fn sink(&self) -> &Arc<dyn DiagnosticSink> {
        &self.ctx.sink
    }

    fn begin_frame(&mut self, operation: &'static str) -> Result<()> {
        self.expect_state(
            operation,
            &[LifecycleState::Initialized, LifecycleState::Running],
        )?;
        if self.state == LifecycleState::Initialized {
            self.transition(LifecycleState::Running);
        }
        Ok(())
    }

    fn expect_state(&self, operation: &'static str, allowed: &[LifecycleState]) -> Result<()> {
        if allowed.contains(&self.state) {
            Ok(())
        } else {
            Err(MultipassError::InvalidState {
                operation,
                state: self.state,
            })
        }
    }

    fn transition(&mut self, next: LifecycleState) {
        log::debug!("lifecycle {:?} -> {:?}", self.state, next);
        if next == LifecycleState::Terminated || self.state == LifecycleState::Uninitialized {
            log::info!("renderer {next:?}");
        }
        self.state = next;
    }

    fn release_all(&mut self) {
        if let Some(mut pipeline) = self.pipeline.take() {
            pipeline.dispose(&mut self.ctx.backend);
        }
        self.ctx.pool.release(&mut self.ctx.backend);
    }

    /// Releases everything and moves to `Terminated`, so no pass can run
    /// against a broken pool.
    fn terminate_with(&mut self, err: MultipassError) -> MultipassError {
        log::error!("{err}");
        self.release_all();
        self.transition(LifecycleState::Terminated);
        err
    }
}

impl<B: RenderBackend> Drop for MultipassRenderer<B> {
    fn drop(&mut self) {
        self.on_close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Vec4;

    use crate::diagnostics::CollectingSink;
    use crate::pass::PassDesc;
    use crate::software::{Command, FragmentProgram, SoftwareBackend, PASSTHROUGH_VERTEX};

    fn backend() -> SoftwareBackend {
        SoftwareBackend::new()
            .with_program("a", FragmentProgram::new(|_| Vec4::new(1.0, 0.0, 0.0, 1.0)))
            .with_program(
                "b",
                FragmentProgram::new(|ctx| ctx.sample(0, ctx.uv)).texture("input0", 0),
            )
    }

    fn spec() -> PipelineSpec {
        PipelineSpec::new(2, 1)
            .pass(PassDesc::new(PASSTHROUGH_VERTEX, "a", 0))
            .pass(PassDesc::new(PASSTHROUGH_VERTEX, "b", 1).read("input0", 0, 0))
    }

    fn renderer(backend: SoftwareBackend) -> MultipassRenderer<SoftwareBackend> {
        MultipassRenderer::new(
            backend,
            spec(),
            Viewport::new(8, 8),
            Arc::new(CollectingSink::new()),
        )
    }

    fn count(backend: &SoftwareBackend, pred: impl Fn(&Command) -> bool) -> usize {
        backend.commands().iter().filter(|c| pred(c)).count()
    }

    #[test]
    fn walks_the_full_lifecycle() {
        let mut r = renderer(backend());
        assert_eq!(r.state(), LifecycleState::Uninitialized);

        r.on_load().unwrap();
        assert_eq!(r.state(), LifecycleState::Initialized);

        assert_eq!(r.on_frame().unwrap(), FrameOutcome::Presented);
        assert_eq!(r.state(), LifecycleState::Running);

        assert_eq!(r.on_resize(16, 8).unwrap(), ResizeOutcome::Reallocated);
        assert_eq!(r.state(), LifecycleState::Running);
        assert_eq!(r.context().viewport, Viewport::new(16, 8));

        r.on_frame().unwrap();
        r.on_close();
        assert_eq!(r.state(), LifecycleState::Terminated);
        assert_eq!(r.backend().live_targets(), 0);
        assert_eq!(r.backend().live_shaders(), 0);
    }

    #[test]
    fn close_releases_exactly_once() {
        let mut r = renderer(backend());
        r.on_load().unwrap();
        r.on_close();
        r.on_close();

        let b = r.backend();
        assert_eq!(count(b, |c| matches!(c, Command::DestroyTarget(_))), 2);
        assert_eq!(count(b, |c| matches!(c, Command::DisposeShader(_))), 2);
    }

    #[test]
    fn frames_are_rejected_outside_running_states() {
        let mut r = renderer(backend());
        assert!(matches!(
            r.on_frame(),
            Err(MultipassError::InvalidState {
                state: LifecycleState::Uninitialized,
                ..
            })
        ));
        r.on_load().unwrap();
        r.on_close();
        assert!(matches!(
            r.on_frame(),
            Err(MultipassError::InvalidState {
                state: LifecycleState::Terminated,
                ..
            })
        ));
        assert!(r.on_load().is_err());
    }

    #[test]
    fn resize_before_load_sets_the_initial_size() {
        let mut r = renderer(backend());
        assert_eq!(r.on_resize(32, 16).unwrap(), ResizeOutcome::Deferred);
        r.on_load().unwrap();
        let pool = &r.context().pool;
        assert_eq!(pool.dimensions(), Viewport::new(32, 16));
    }

    #[test]
    fn zero_sized_window_loads_at_one_pixel() {
        let mut r = MultipassRenderer::new(
            backend(),
            spec(),
            Viewport::new(0, 0),
            Arc::new(CollectingSink::new()),
        );
        r.on_load().unwrap();
        assert_eq!(r.context().viewport, Viewport::new(1, 1));
        assert_eq!(r.context().pool.dimensions(), r.context().viewport);

        assert_eq!(r.on_frame().unwrap(), FrameOutcome::Presented);
        let surface = r.backend().surface();
        assert_eq!((surface.width, surface.height), (1, 1));
        assert_eq!(surface.pixel(0, 0), [255, 0, 0, 255]);

        assert_eq!(r.on_resize(16, 8).unwrap(), ResizeOutcome::Reallocated);
        assert_eq!(r.context().pool.dimensions(), Viewport::new(16, 8));
    }

    #[test]
    fn allocation_failure_on_load_terminates_without_drawing() {
        let mut r = renderer(backend().fail_target_allocation_at(1));
        let err = r.on_load().unwrap_err();
        assert!(err.is_fatal());
        assert_eq!(r.state(), LifecycleState::Terminated);
        assert!(r.on_frame().is_err());

        let b = r.backend();
        assert_eq!(b.live_targets(), 0);
        assert_eq!(count(b, |c| matches!(c, Command::LoadShader(_))), 0);
        assert_eq!(count(b, |c| matches!(c, Command::Draw { .. })), 0);
    }

    #[test]
    fn allocation_failure_on_resize_terminates_without_drawing() {
        let mut r = renderer(backend().fail_target_allocation_at(3));
        r.on_load().unwrap();
        r.on_frame().unwrap();
        r.backend_mut().clear_commands();

        let err = r.on_resize(64, 64).unwrap_err();
        assert!(err.is_fatal());
        assert_eq!(r.state(), LifecycleState::Terminated);
        assert!(r.on_frame().is_err());

        let b = r.backend();
        assert_eq!(b.live_targets(), 0);
        assert_eq!(b.live_shaders(), 0);
        assert_eq!(count(b, |c| matches!(c, Command::Draw { .. })), 0);
    }

    #[test]
    fn shader_failure_on_load_releases_the_pool() {
        let spec = PipelineSpec::new(2, 1)
            .pass(PassDesc::new(PASSTHROUGH_VERTEX, "a", 0))
            .pass(PassDesc::new(PASSTHROUGH_VERTEX, "nope", 1));
        let mut r = MultipassRenderer::new(
            backend(),
            spec,
            Viewport::new(4, 4),
            Arc::new(CollectingSink::new()),
        );

        let err = r.on_load().unwrap_err();
        assert!(matches!(err, MultipassError::ShaderLoad { .. }));
        assert!(!err.is_fatal());
        assert_eq!(r.state(), LifecycleState::Terminated);
        assert_eq!(r.backend().live_targets(), 0);
    }
}
