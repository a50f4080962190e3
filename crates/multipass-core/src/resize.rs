use crate::backend::RenderBackend;
use crate::error::{MultipassError, Result};
use crate::pipeline::PassPipeline;
use crate::{RenderContext, Viewport};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResizeOutcome {
    /// Pool rebuilt at the new size.
    Reallocated,
    /// Same size as the current pool; nothing to do.
    Unchanged,
    /// Zero-area surface (minimised window). Ignored until a real size arrives.
    Deferred,
}

/// Rebuilds the target pool at a new surface size.
///
/// Called between frames with exclusive access to the [`RenderContext`], so
/// no pass can be reading the old targets while they are replaced.
pub struct SurfaceResizeHandler;

impl SurfaceResizeHandler {
    pub fn handle<B: RenderBackend>(
        ctx: &mut RenderContext<B>,
        pipeline: &PassPipeline,
        width: u32,
        height: u32,
    ) -> Result<ResizeOutcome> {
        let size = Viewport::new(width, height);
        if size.is_empty() {
            log::debug!("ignoring resize to {width}x{height}");
            return Ok(ResizeOutcome::Deferred);
        }
        if size == ctx.viewport && !ctx.pool.is_empty() && ctx.pool.dimensions() == size {
            return Ok(ResizeOutcome::Unchanged);
        }

        // An empty pool only happens after a failed reallocation; fall back
        // to the declared count.
        let count = if ctx.pool.is_empty() {
            pipeline.target_count()
        } else {
            ctx.pool.len()
        };

        ctx.pool.reallocate(&mut ctx.backend, count, width, height)?;
        ctx.viewport = size;
        ctx.backend.resize_surface(size);

        if ctx.pool.len() < pipeline.required_targets() {
            return Err(MultipassError::PipelineMismatch {
                required: pipeline.required_targets(),
                available: ctx.pool.len(),
            });
        }

        log::debug!("surface resized to {width}x{height}, {count} targets reallocated");
        Ok(ResizeOutcome::Reallocated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use glam::Vec4;

    use crate::diagnostics::CollectingSink;
    use crate::frame_loop::FrameLoop;
    use crate::pass::{PassDesc, PipelineSpec};
    use crate::software::{Command, FragmentProgram, SoftwareBackend, PASSTHROUGH_VERTEX};
    use crate::target_pool::RenderTargetPool;
    use crate::FrameInputs;

    fn setup(count: usize, w: u32, h: u32) -> (RenderContext<SoftwareBackend>, PassPipeline) {
        setup_with(SoftwareBackend::new(), count, w, h)
    }

    fn setup_with(
        backend: SoftwareBackend,
        count: usize,
        w: u32,
        h: u32,
    ) -> (RenderContext<SoftwareBackend>, PassPipeline) {
        let gradient = FragmentProgram::new(|ctx| Vec4::new(ctx.uv.x, ctx.uv.y, 0.0, 1.0));
        let copy = FragmentProgram::new(|ctx| ctx.sample(0, ctx.uv)).texture("input0", 0);
        let mut backend = backend
            .with_program("gradient", gradient)
            .with_program("copy", copy);
        let spec = PipelineSpec::new(count, 1)
            .pass(PassDesc::new(PASSTHROUGH_VERTEX, "gradient", 0))
            .pass(PassDesc::new(PASSTHROUGH_VERTEX, "copy", 1).read("input0", 0, 0));
        let sink = Arc::new(CollectingSink::new());
        let pipeline = PassPipeline::build(&mut backend, &spec, sink.as_ref()).unwrap();
        let mut ctx = RenderContext::new(backend, Viewport::new(w, h), sink);
        ctx.pool = RenderTargetPool::allocate(&mut ctx.backend, count, w, h).unwrap();
        (ctx, pipeline)
    }

    #[test]
    fn resize_then_frame_leaves_every_target_at_new_size() {
        let (mut ctx, mut pipeline) = setup(3, 96, 54);
        let outcome = SurfaceResizeHandler::handle(&mut ctx, &pipeline, 64, 36).unwrap();
        assert_eq!(outcome, ResizeOutcome::Reallocated);

        FrameLoop::new().tick(&mut ctx, &mut pipeline).unwrap();

        assert_eq!(ctx.pool.len(), 3);
        assert_eq!(ctx.viewport, Viewport::new(64, 36));
        for t in ctx.pool.iter() {
            assert_eq!((t.width, t.height), (64, 36));
            assert_eq!(ctx.backend.target_size(t.buffer), Some((64, 36)));
        }
        assert_eq!(ctx.backend.live_targets(), 3);
        assert_eq!(ctx.backend.surface().width, 64);
    }

    #[test]
    fn roles_survive_reallocation() {
        let (mut ctx, mut pipeline) = setup(2, 4, 4);
        let inputs = FrameInputs::new(0.0, Viewport::new(8, 8));

        SurfaceResizeHandler::handle(&mut ctx, &pipeline, 8, 8).unwrap();
        FrameLoop::render(&mut ctx, &mut pipeline, &inputs).unwrap();

        let gradient = ctx.backend.target_image(ctx.pool.get(0).unwrap().buffer).unwrap();
        let copied = ctx.backend.target_image(ctx.pool.get(1).unwrap().buffer).unwrap();
        assert_eq!(gradient.pixels, copied.pixels);
    }

    #[test]
    fn zero_size_is_deferred_and_keeps_the_pool() {
        let (mut ctx, pipeline) = setup(2, 16, 16);
        ctx.backend.clear_commands();

        for (w, h) in [(0, 0), (0, 10), (10, 0)] {
            let outcome = SurfaceResizeHandler::handle(&mut ctx, &pipeline, w, h).unwrap();
            assert_eq!(outcome, ResizeOutcome::Deferred);
        }
        assert!(ctx.backend.commands().is_empty());
        assert_eq!(ctx.pool.dimensions(), Viewport::new(16, 16));
    }

    #[test]
    fn same_size_is_a_no_op() {
        let (mut ctx, pipeline) = setup(2, 16, 16);
        ctx.backend.clear_commands();
        let outcome = SurfaceResizeHandler::handle(&mut ctx, &pipeline, 16, 16).unwrap();
        assert_eq!(outcome, ResizeOutcome::Unchanged);
        assert!(ctx.backend.commands().is_empty());
    }

    #[test]
    fn old_targets_are_destroyed_before_new_ones_exist() {
        let (mut ctx, pipeline) = setup(2, 16, 16);
        ctx.backend.clear_commands();
        SurfaceResizeHandler::handle(&mut ctx, &pipeline, 32, 32).unwrap();

        let commands = ctx.backend.commands();
        let last_destroy = commands
            .iter()
            .rposition(|c| matches!(c, Command::DestroyTarget(_)))
            .unwrap();
        let first_create = commands
            .iter()
            .position(|c| matches!(c, Command::CreateTarget(_)))
            .unwrap();
        assert!(last_destroy < first_create);
        assert_eq!(
            commands.last(),
            Some(&Command::ResizeSurface(Viewport::new(32, 32)))
        );
    }

    #[test]
    fn allocation_failure_propagates_with_an_empty_pool() {
        // Calls 0 and 1 build the initial pool; call 3 is the second target of
        // the reallocation.
        let (mut ctx, pipeline) = setup_with(
            SoftwareBackend::new().fail_target_allocation_at(3),
            2,
            16,
            16,
        );
        let err = SurfaceResizeHandler::handle(&mut ctx, &pipeline, 32, 32).unwrap_err();
        assert!(err.is_fatal());
        assert!(ctx.pool.is_empty());
        assert_eq!(ctx.backend.live_targets(), 0);
    }

    #[test]
    fn shrunken_pool_is_a_mismatch() {
        // Pool deliberately built smaller than the pass list needs.
        let (mut ctx, pipeline) = setup(2, 16, 16);
        ctx.pool.release(&mut ctx.backend);
        ctx.pool = RenderTargetPool::allocate(&mut ctx.backend, 1, 16, 16).unwrap();

        let err = SurfaceResizeHandler::handle(&mut ctx, &pipeline, 32, 32).unwrap_err();
        assert!(matches!(
            err,
            MultipassError::PipelineMismatch {
                required: 2,
                available: 1
            }
        ));
    }
}
