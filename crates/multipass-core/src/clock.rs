use std::time::{Duration, Instant};

/// Timing snapshot produced once per frame.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct FrameTime {
    /// Seconds since the first frame. Zero on the first frame.
    pub elapsed: f32,

    /// Seconds since the previous frame.
    pub dt: f32,

    /// Monotonic frame counter, starting at 0.
    pub frame_index: u64,
}

/// Monotonic clock measuring wall-clock time since the first frame.
///
/// The effect is a pure function of elapsed time, so there is no fixed
/// timestep and no clamping of `elapsed`. Only `dt` is clamped, and only for
/// logging and FPS reporting.
#[derive(Debug, Clone)]
pub struct Clock {
    start: Option<Instant>,
    last: Option<Instant>,
    frame_index: u64,
    dt_max: Duration,
}

impl Clock {
    pub fn new() -> Self {
        Self {
            start: None,
            last: None,
            frame_index: 0,
            dt_max: Duration::from_millis(250),
        }
    }

    /// Samples the clock at `now`. The first call anchors time zero.
    pub fn tick_at(&mut self, now: Instant) -> FrameTime {
        let start = *self.start.get_or_insert(now);
        let last = self.last.replace(now).unwrap_or(now);

        let dt = now.saturating_duration_since(last).min(self.dt_max);
        let elapsed = now.saturating_duration_since(start);

        let ft = FrameTime {
            elapsed: elapsed.as_secs_f32(),
            dt: dt.as_secs_f32(),
            frame_index: self.frame_index,
        };
        self.frame_index = self.frame_index.wrapping_add(1);
        ft
    }
}

impl Default for Clock {
    fn default() -> Self {
        Self::new()
    }
}
