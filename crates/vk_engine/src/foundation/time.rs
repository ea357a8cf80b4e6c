//! Time management utilities

use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// Source of monotonic time
pub trait Clock {
    /// Current instant
    fn now(&self) -> Instant;
}

/// Wall clock backed by [`Instant::now`]
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

impl<C: Clock + ?Sized> Clock for &C {
    fn now(&self) -> Instant {
        (**self).now()
    }
}

/// Frame-rate sampler
///
/// Frames are counted in fixed windows (250 ms by default). Each elapsed window pushes its
/// count into a bounded history; when the history fills, its sum becomes the reported rate
/// and the history starts over. With the defaults that is a one-second sum refreshed once
/// per second.
pub struct FpsCounter<C: Clock = SystemClock> {
    clock: C,
    window: Duration,
    capacity: usize,
    window_start: Option<Instant>,
    frames_in_window: u32,
    history: VecDeque<u32>,
    last_fps: u32,
}

impl FpsCounter<SystemClock> {
    /// Counter over the system clock
    pub fn new() -> Self {
        Self::with_clock(SystemClock)
    }
}

impl Default for FpsCounter<SystemClock> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C: Clock> FpsCounter<C> {
    /// Default sampling window
    pub const DEFAULT_WINDOW: Duration = Duration::from_millis(250);
    /// Default number of windows summed per report
    pub const DEFAULT_CAPACITY: usize = 4;

    /// Counter over an injected clock
    pub fn with_clock(clock: C) -> Self {
        Self::with_settings(clock, Self::DEFAULT_WINDOW, Self::DEFAULT_CAPACITY)
    }

    /// Counter with a custom window length and history size
    pub fn with_settings(clock: C, window: Duration, capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            clock,
            window,
            capacity,
            window_start: None,
            frames_in_window: 0,
            history: VecDeque::with_capacity(capacity),
            last_fps: 0,
        }
    }

    /// Record one frame
    ///
    /// Returns the new rate when this tick completed a report.
    pub fn tick(&mut self) -> Option<u32> {
        let now = self.clock.now();
        let start = *self.window_start.get_or_insert(now);

        if now.duration_since(start) >= self.window {
            self.history.push_back(self.frames_in_window);
            self.frames_in_window = 0;
            self.window_start = Some(now);
        } else {
            self.frames_in_window += 1;
        }

        if self.history.len() >= self.capacity {
            self.last_fps = self.history.drain(..).sum();
            return Some(self.last_fps);
        }
        None
    }

    /// Most recently reported rate
    pub const fn fps(&self) -> u32 {
        self.last_fps
    }

    /// Windows recorded since the last report
    pub fn pending_windows(&self) -> usize {
        self.history.len()
    }
}

/// Simple stopwatch for measuring elapsed time
pub struct Stopwatch {
    start_time: Option<Instant>,
    elapsed: Duration,
}

impl Default for Stopwatch {
    fn default() -> Self {
        Self::new()
    }
}

impl Stopwatch {
    /// Create a new stopped stopwatch
    pub const fn new() -> Self {
        Self {
            start_time: None,
            elapsed: Duration::ZERO,
        }
    }

    /// Create a new stopwatch and start it immediately
    pub fn start_new() -> Self {
        let mut stopwatch = Self::new();
        stopwatch.start();
        stopwatch
    }

    /// Start the stopwatch
    pub fn start(&mut self) {
        self.start_time = Some(Instant::now());
    }

    /// Stop the stopwatch and accumulate elapsed time
    pub fn stop(&mut self) {
        if let Some(start) = self.start_time.take() {
            self.elapsed += start.elapsed();
        }
    }

    /// Total elapsed time, including a running interval
    pub fn elapsed(&self) -> Duration {
        self.elapsed + self.start_time.map_or(Duration::ZERO, |start| start.elapsed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    struct ManualClock {
        now: Cell<Instant>,
    }

    impl ManualClock {
        fn new() -> Self {
            Self { now: Cell::new(Instant::now()) }
        }

        fn advance(&self, by: Duration) {
            self.now.set(self.now.get() + by);
        }
    }

    impl Clock for ManualClock {
        fn now(&self) -> Instant {
            self.now.get()
        }
    }

    /// Run `frames` ticks spaced evenly across one 250 ms window, then cross into the next.
    fn run_window(counter: &mut FpsCounter<&ManualClock>, clock: &ManualClock, frames: u32) -> Option<u32> {
        for _ in 0..frames {
            clock.advance(Duration::from_millis(1));
            assert_eq!(counter.tick(), None);
        }
        clock.advance(Duration::from_millis(250));
        counter.tick()
    }

    #[test]
    fn test_reports_sum_after_four_windows() {
        let clock = ManualClock::new();
        let mut counter = FpsCounter::with_clock(&clock);
        counter.tick();

        assert_eq!(run_window(&mut counter, &clock, 10), None);
        assert_eq!(run_window(&mut counter, &clock, 20), None);
        assert_eq!(run_window(&mut counter, &clock, 30), None);
        assert_eq!(counter.pending_windows(), 3);

        // The opening tick counts toward the first window.
        assert_eq!(run_window(&mut counter, &clock, 40), Some(101));
        assert_eq!(counter.fps(), 101);
        assert_eq!(counter.pending_windows(), 0);
    }

    #[test]
    fn test_history_is_bounded_by_capacity() {
        let clock = ManualClock::new();
        let mut counter = FpsCounter::with_settings(&clock, Duration::from_millis(100), 2);
        counter.tick();

        for _ in 0..10 {
            clock.advance(Duration::from_millis(100));
            counter.tick();
            assert!(counter.pending_windows() < 2);
        }
        assert_eq!(counter.fps(), 0);
    }

    #[test]
    fn test_no_report_before_first_window_closes() {
        let clock = ManualClock::new();
        let mut counter = FpsCounter::with_clock(&clock);
        for _ in 0..1000 {
            clock.advance(Duration::from_micros(100));
            assert_eq!(counter.tick(), None);
        }
        assert_eq!(counter.fps(), 0);
    }

    #[test]
    fn test_stopwatch_accumulates() {
        let mut stopwatch = Stopwatch::new();
        assert_eq!(stopwatch.elapsed(), Duration::ZERO);
        stopwatch.start();
        stopwatch.stop();
        let first = stopwatch.elapsed();
        stopwatch.stop();
        assert_eq!(stopwatch.elapsed(), first);
    }
}
