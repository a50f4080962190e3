use crate::backend::ClearColor;
use crate::pass::{PassDesc, PipelineSpec};

/// Vertex stage shared by every demo pass.
pub const PASSTHROUGH: &str = "passthrough";

/// The demo chain over three targets:
///
/// | pass             | writes | reads                      |
/// |------------------|--------|----------------------------|
/// | pass1-plasma     | 0      | none                       |
/// | pass2-desaturate | 1      | 0 as `input0`              |
/// | pass3-sobel      | 2      | 1 as `input1`              |
/// | pass4-clouds     | 1      | 2 as `input2`              |
/// | pass5-colorize   | 2      | 0 as `input0`, 1 as `input1` |
///
/// Target 2 is shown. `resolution` and `time` are implicit, so no pass
/// declares scalars.
pub fn demo_pipeline() -> PipelineSpec {
    PipelineSpec::new(3, 2)
        .clear_color(ClearColor::BLACK)
        .pass(PassDesc::new(PASSTHROUGH, "pass1-plasma", 0))
        .pass(PassDesc::new(PASSTHROUGH, "pass2-desaturate", 1).read("input0", 0, 0))
        .pass(PassDesc::new(PASSTHROUGH, "pass3-sobel", 2).read("input1", 1, 0))
        .pass(PassDesc::new(PASSTHROUGH, "pass4-clouds", 1).read("input2", 2, 0))
        .pass(
            PassDesc::new(PASSTHROUGH, "pass5-colorize", 2)
                .read("input0", 0, 0)
                .read("input1", 1, 1),
        )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use glam::Vec4;

    use crate::diagnostics::CollectingSink;
    use crate::frame_loop::FrameOutcome;
    use crate::software::{Command, FragmentProgram, SoftwareBackend};
    use crate::{FrameInputs, LifecycleState, MultipassRenderer, Viewport};

    #[test]
    fn demo_has_five_passes_over_three_targets() {
        let spec = demo_pipeline();
        assert_eq!(spec.passes.len(), 5);
        assert_eq!(spec.target_count, 3);
        assert_eq!(spec.final_target, 2);
        assert_eq!(spec.required_targets(), 3);
        assert!(spec.passes.iter().all(|p| p.vertex == PASSTHROUGH));
    }

    #[test]
    fn demo_is_valid_and_reads_nothing_stale() {
        let spec = demo_pipeline();
        assert_eq!(spec.validate(), Ok(()));
        assert!(spec.stale_reads().is_empty());
    }

    #[test]
    fn demo_pass_names_are_unique() {
        let spec = demo_pipeline();
        let mut seen = std::collections::HashSet::new();
        for pass in &spec.passes {
            assert!(seen.insert(pass.name.as_str()), "duplicate pass: {}", pass.name);
        }
    }

    #[test]
    fn demo_outputs_follow_the_chain() {
        let outputs: Vec<_> = demo_pipeline().passes.iter().map(|p| p.output).collect();
        assert_eq!(outputs, vec![0, 1, 2, 1, 2]);
    }

    // --- five-pass scenario on the CPU backend -----------------------------------

    /// Deterministic stand-ins. Inputs are flat colors, so bilinear sampling
    /// returns them exactly and every stage can be worked out by hand.
    fn scenario_backend() -> SoftwareBackend {
        SoftwareBackend::new()
            .with_program(
                "p1",
                FragmentProgram::new(|ctx| {
                    let res = ctx.vec2("resolution");
                    Vec4::new(ctx.float("time"), res.x / 1000.0, res.y / 1000.0, 1.0)
                })
                .float("time")
                .vec2("resolution"),
            )
            .with_program(
                "p2",
                FragmentProgram::new(|ctx| {
                    let c = ctx.sample(0, ctx.uv);
                    let l = (c.x + c.y + c.z) / 3.0;
                    Vec4::new(l, l, l, 1.0)
                })
                .texture("input0", 0),
            )
            .with_program(
                "p3",
                FragmentProgram::new(|ctx| {
                    let c = ctx.sample(0, ctx.uv);
                    Vec4::new(1.0 - c.x, 1.0 - c.y, 1.0 - c.z, 1.0)
                })
                .texture("input1", 0),
            )
            .with_program(
                "p4",
                FragmentProgram::new(|ctx| {
                    let a = ctx.sample(0, ctx.uv);
                    let e = ctx.sample(1, ctx.uv);
                    Vec4::new(e.x * 2.0, a.z, 0.0, 1.0)
                })
                .texture("input0", 0)
                .texture("input2", 1),
            )
            .with_program(
                "p5",
                FragmentProgram::new(|ctx| {
                    let a = ctx.sample(0, ctx.uv);
                    let m = ctx.sample(1, ctx.uv);
                    Vec4::new(m.x, a.y, m.y, 1.0)
                })
                .texture("input0", 0)
                .texture("input1", 1),
            )
    }

    fn scenario_spec() -> PipelineSpec {
        PipelineSpec::new(3, 2)
            .pass(PassDesc::new(PASSTHROUGH, "p1", 0))
            .pass(PassDesc::new(PASSTHROUGH, "p2", 1).read("input0", 0, 0))
            .pass(PassDesc::new(PASSTHROUGH, "p3", 2).read("input1", 1, 0))
            .pass(
                PassDesc::new(PASSTHROUGH, "p4", 1)
                    .read("input0", 0, 0)
                    .read("input2", 2, 1),
            )
            .pass(
                PassDesc::new(PASSTHROUGH, "p5", 2)
                    .read("input0", 0, 0)
                    .read("input1", 1, 1),
            )
    }

    #[test]
    fn five_pass_scenario_produces_the_expected_frame() {
        let viewport = Viewport::new(960, 540);
        let sink = Arc::new(CollectingSink::new());
        let mut r = MultipassRenderer::new(scenario_backend(), scenario_spec(), viewport, sink.clone());
        r.on_load().unwrap();

        let inputs = FrameInputs::new(0.0, viewport);
        assert_eq!(r.render_with(&inputs).unwrap(), FrameOutcome::Presented);
        assert_eq!(r.state(), LifecycleState::Running);

        // p1 = (0, 0.96, 0.54)        -> [0, 245, 138]
        // p2 = mean(p1)               -> [128; 3]
        // p3 = 1 - p2                 -> [127; 3]
        // p4 = (2 * p3.r, p1.b, 0)    -> [254, 138, 0]
        // p5 = (p4.r, p1.g, p4.g)     -> [254, 245, 138]
        let pool = &r.context().pool;
        let target = |i: usize| r.backend().target_image(pool.get(i).unwrap().buffer).unwrap();
        assert_eq!(target(0).pixel(17, 300), [0, 245, 138, 255]);
        assert_eq!(target(1).pixel(959, 0), [254, 138, 0, 255]);

        let surface = r.backend().surface();
        assert_eq!((surface.width, surface.height), (960, 540));
        assert!(surface.pixels.iter().all(|p| *p == [254, 245, 138, 255]));
        assert!(sink.entries().is_empty(), "{:?}", sink.entries());
    }

    #[test]
    fn repeated_execution_is_bit_identical() {
        let viewport = Viewport::new(64, 48);
        let mut r = MultipassRenderer::new(
            scenario_backend(),
            scenario_spec(),
            viewport,
            Arc::new(CollectingSink::new()),
        );
        r.on_load().unwrap();
        let inputs = FrameInputs::new(0.25, viewport);

        let snapshot = |r: &MultipassRenderer<SoftwareBackend>| {
            let mut images: Vec<_> = r
                .context()
                .pool
                .iter()
                .map(|t| r.backend().target_image(t.buffer).unwrap().clone())
                .collect();
            images.push(r.backend().surface().clone());
            images
        };

        r.render_with(&inputs).unwrap();
        let first = snapshot(&r);
        r.render_with(&inputs).unwrap();
        assert_eq!(first, snapshot(&r));

        let draws = r
            .backend()
            .commands()
            .iter()
            .filter(|c| matches!(c, Command::Draw { .. }))
            .count();
        assert_eq!(draws, 10);
    }
}
