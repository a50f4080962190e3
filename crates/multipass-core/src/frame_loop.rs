use std::time::Instant;

use crate::backend::{BlitFilter, RenderBackend, SurfaceStatus};
use crate::clock::{Clock, FrameTime};
use crate::error::{MultipassError, Result};
use crate::pipeline::PassPipeline;
use crate::{FrameInputs, RenderContext};

// ---------------------------------------------------------------------------
// Simple FPS counter, logs once per second
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq)]
struct FpsReport {
    fps: f32,
    /// Longest frame time seen since the previous report, in seconds.
    slowest_dt: f32,
}

#[derive(Debug)]
struct FpsCounter {
    frames: u32,
    slowest_dt: f32,
    last_report: Option<Instant>,
}

impl FpsCounter {
    fn new() -> Self {
        Self {
            frames: 0,
            slowest_dt: 0.0,
            last_report: None,
        }
    }

    /// Counts a frame that took `dt` seconds. Returns a report once a full
    /// second has passed since the last one.
    fn tick(&mut self, now: Instant, dt: f32) -> Option<FpsReport> {
        self.frames += 1;
        self.slowest_dt = self.slowest_dt.max(dt);
        let last = *self.last_report.get_or_insert(now);
        let elapsed = now.saturating_duration_since(last).as_secs_f32();
        if elapsed >= 1.0 {
            let report = FpsReport {
                fps: self.frames as f32 / elapsed,
                slowest_dt: self.slowest_dt,
            };
            self.frames = 0;
            self.slowest_dt = 0.0;
            self.last_report = Some(now);
            Some(report)
        } else {
            None
        }
    }
}

// ---------------------------------------------------------------------------
// FrameLoop
// ---------------------------------------------------------------------------

/// What happened to one tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameOutcome {
    /// Every pass ran and the final target reached the surface.
    Presented,
    /// The surface was not available this tick. Nothing was drawn.
    Skipped,
    /// The surface can no longer be used; stop scheduling frames.
    SurfaceFailed,
}

/// One iteration: sample the clock, run the passes, blit the final target,
/// present. No fixed timestep; every pass is a function of elapsed time.
#[derive(Debug)]
pub struct FrameLoop {
    clock: Clock,
    fps: FpsCounter,
}

impl FrameLoop {
    pub fn new() -> Self {
        Self {
            clock: Clock::new(),
            fps: FpsCounter::new(),
        }
    }

    pub fn tick<B: RenderBackend>(
        &mut self,
        ctx: &mut RenderContext<B>,
        pipeline: &mut PassPipeline,
    ) -> Result<FrameOutcome> {
        self.tick_at(ctx, pipeline, Instant::now())
    }

    /// [`tick`](Self::tick) with the clock sampled at `now`.
    pub fn tick_at<B: RenderBackend>(
        &mut self,
        ctx: &mut RenderContext<B>,
        pipeline: &mut PassPipeline,
        now: Instant,
    ) -> Result<FrameOutcome> {
        let time = self.clock.tick_at(now);
        let inputs = frame_inputs(time, ctx);
        let outcome = Self::render(ctx, pipeline, &inputs)?;

        if outcome == FrameOutcome::Presented {
            if let Some(report) = self.fps.tick(now, time.dt) {
                log::debug!(
                    "FPS: {:.1}  slowest {:.1}ms  t={:.2}s  frame {}  {}x{}",
                    report.fps,
                    report.slowest_dt * 1000.0,
                    time.elapsed,
                    time.frame_index,
                    ctx.viewport.width,
                    ctx.viewport.height
                );
            }
        }
        Ok(outcome)
    }

    /// Renders one frame for explicit inputs, bypassing the clock.
    pub fn render<B: RenderBackend>(
        ctx: &mut RenderContext<B>,
        pipeline: &mut PassPipeline,
        inputs: &FrameInputs,
    ) -> Result<FrameOutcome> {
        match ctx.backend.begin_frame(ctx.viewport) {
            SurfaceStatus::Ready => {}
            SurfaceStatus::SkipFrame => {
                log::debug!("surface unavailable, skipping frame");
                return Ok(FrameOutcome::Skipped);
            }
            SurfaceStatus::Fatal => {
                log::error!("surface failed irrecoverably");
                return Ok(FrameOutcome::SurfaceFailed);
            }
        }

        pipeline.execute(&mut ctx.backend, &ctx.pool, inputs, ctx.sink.as_ref())?;

        let final_target = ctx.pool.get(pipeline.final_target()).ok_or(
            MultipassError::PipelineMismatch {
                required: pipeline.final_target() + 1,
                available: ctx.pool.len(),
            },
        )?;
        ctx.backend
            .blit_to_surface(final_target.buffer, ctx.viewport, BlitFilter::Linear);
        ctx.backend.present();

        Ok(FrameOutcome::Presented)
    }
}

impl Default for FrameLoop {
    fn default() -> Self {
        Self::new()
    }
}

fn frame_inputs<B: RenderBackend>(time: FrameTime, ctx: &RenderContext<B>) -> FrameInputs {
    FrameInputs {
        time: time.elapsed,
        resolution: ctx.viewport.as_vec2(),
        frame_index: time.frame_index,
    }
}
