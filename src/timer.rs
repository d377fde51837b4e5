use std::time::{Duration, Instant};

/// Offline animation frame: an index on a fixed time raster. Solvers advance
/// to the END of a given frame, sub-stepping as their CFL bound requires.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Frame {
    pub index: usize,
    pub time_interval: f64,
}

impl Frame {
    pub fn new(index: usize, time_interval: f64) -> Self {
        Frame { index, time_interval }
    }

    pub fn with_fps(fps: f64) -> Self {
        Frame {
            index: 0,
            time_interval: 1.0 / fps,
        }
    }

    /// Start of this frame on the simulation clock.
    pub fn begin_time(&self) -> f64 {
        self.index as f64 * self.time_interval
    }

    pub fn end_time(&self) -> f64 {
        (self.index + 1) as f64 * self.time_interval
    }

    pub fn advance(&mut self) {
        self.index += 1;
    }

    pub fn advanced(&self, delta: usize) -> Frame {
        Frame {
            index: self.index + delta,
            time_interval: self.time_interval,
        }
    }
}

// There are two clocks here:
// * real time
//      that's the watch on your wrist; only used for progress reporting
// * simulation time
//      frame index times frame interval, advanced in CFL-bounded sub-steps
pub struct Timer {
    started: Instant,
    timestamp_last_frame: Instant,
    last_frame_duration: Duration,
    num_frames: usize,
}

impl Timer {
    pub fn new() -> Timer {
        let now = Instant::now();
        Timer {
            started: now,
            timestamp_last_frame: now,
            last_frame_duration: Duration::from_millis(0),
            num_frames: 0,
        }
    }

    pub fn on_frame_finished(&mut self) {
        self.last_frame_duration = self.timestamp_last_frame.elapsed();
        self.timestamp_last_frame = Instant::now();
        self.num_frames += 1;
    }

    // Duration of the previous frame's computation.
    pub fn frame_duration(&self) -> Duration {
        self.last_frame_duration
    }

    pub fn total_elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    pub fn average_frame_duration(&self) -> Duration {
        if self.num_frames == 0 {
            Duration::from_millis(0)
        } else {
            self.started.elapsed() / self.num_frames as u32
        }
    }
}

impl Default for Timer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_time_raster() {
        let mut frame = Frame::with_fps(60.0);
        assert_eq!(frame.begin_time(), 0.0);
        assert!((frame.end_time() - 1.0 / 60.0).abs() < 1e-12);
        frame.advance();
        assert_eq!(frame.index, 1);
        assert!((frame.begin_time() - 1.0 / 60.0).abs() < 1e-12);
        assert_eq!(frame.advanced(10).index, 11);
    }
}
