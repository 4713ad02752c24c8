// crates/engine_core/src/engine_loop.rs

use std::time::{Duration, Instant};

use crate::renderer::FrameTime;

/// Longest frame delta handed to the simulation. Larger gaps (dragging the
/// window, a breakpoint) are clamped.
pub const MAX_FRAME_DELTA: f32 = 0.25;

/// Frame timer producing the (delta, total) pair consumed by
/// [`crate::renderer::Renderer::tick`].
pub struct FrameClock {
    last_frame_time: Instant,
    total: f32,
    paused: bool,
    frames: u64,
    fps_window: Duration,
    fps_frames: u32,
    fps: f32,
}

impl Default for FrameClock {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameClock {
    pub fn new() -> Self {
        Self::starting_at(Instant::now())
    }

    fn starting_at(now: Instant) -> Self {
        Self {
            last_frame_time: now,
            total: 0.0,
            paused: false,
            frames: 0,
            fps_window: Duration::ZERO,
            fps_frames: 0,
            fps: 0.0,
        }
    }

    pub fn tick(&mut self) -> FrameTime {
        self.tick_at(Instant::now())
    }

    fn tick_at(&mut self, now: Instant) -> FrameTime {
        let elapsed = now.saturating_duration_since(self.last_frame_time);
        self.last_frame_time = now;

        self.fps_window += elapsed;
        self.fps_frames += 1;
        if self.fps_window >= Duration::from_secs(1) {
            self.fps = self.fps_frames as f32 / self.fps_window.as_secs_f32();
            self.fps_window = Duration::ZERO;
            self.fps_frames = 0;
        }

        let delta = if self.paused {
            0.0
        } else {
            elapsed.as_secs_f32().min(MAX_FRAME_DELTA)
        };
        self.total += delta;
        self.frames += 1;
        FrameTime {
            delta,
            total: self.total,
        }
    }

    /// While paused, ticks report a zero delta and total time stands still.
    pub fn set_paused(&mut self, paused: bool) {
        self.paused = paused;
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    pub fn total(&self) -> f32 {
        self.total
    }

    pub fn frames(&self) -> u64 {
        self.frames
    }

    /// Frames per second over the last full one-second window.
    pub fn fps(&self) -> f32 {
        self.fps
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delta_is_clamped() {
        let start = Instant::now();
        let mut clock = FrameClock::starting_at(start);
        let t = clock.tick_at(start + Duration::from_secs(3));
        assert_eq!(t.delta, MAX_FRAME_DELTA);
        assert_eq!(t.total, MAX_FRAME_DELTA);
    }

    #[test]
    fn total_accumulates_deltas() {
        let start = Instant::now();
        let mut clock = FrameClock::starting_at(start);
        clock.tick_at(start + Duration::from_millis(100));
        let t = clock.tick_at(start + Duration::from_millis(150));
        assert!((t.delta - 0.05).abs() < 1e-6);
        assert!((t.total - 0.15).abs() < 1e-6);
        assert_eq!(clock.frames(), 2);
    }

    #[test]
    fn paused_clock_stands_still() {
        let start = Instant::now();
        let mut clock = FrameClock::starting_at(start);
        clock.set_paused(true);
        let t = clock.tick_at(start + Duration::from_millis(100));
        assert_eq!(t.delta, 0.0);
        assert_eq!(clock.total(), 0.0);
    }

    #[test]
    fn fps_over_one_second() {
        let start = Instant::now();
        let mut clock = FrameClock::starting_at(start);
        for i in 1..=20 {
            clock.tick_at(start + Duration::from_millis(50 * i));
        }
        assert!((clock.fps() - 20.0).abs() < 1e-3);
    }
}
