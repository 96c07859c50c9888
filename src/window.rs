//! Sliding window manager for real-time PPI stream processing, grounded on
//! `app/signal/windowing.py`.
//!
//! Maintains a time-based sliding window of PPI samples and emits complete
//! windows at configurable step intervals. Emission fires a single-owner
//! callback slot per the observer-wiring design note (§9) rather than
//! returning the window inline, so the orchestrator can register it once at
//! construction time.

use std::collections::VecDeque;

use crate::config::SignalConfig;
use crate::types::WindowData;

struct BufferedSample {
    timestamp: f64,
    ppi_ms: u16,
}

type WindowCallback = Box<dyn FnMut(WindowData) + Send>;

pub struct SlidingWindow {
    window_size_sec: f64,
    window_step_sec: f64,
    buffer: VecDeque<BufferedSample>,
    last_emit_time: f64,
    on_window: Option<WindowCallback>,
}

impl SlidingWindow {
    pub fn new(config: &SignalConfig) -> Self {
        Self {
            window_size_sec: config.window_size_sec,
            window_step_sec: config.window_step_sec,
            buffer: VecDeque::new(),
            last_emit_time: 0.0,
            on_window: None,
        }
    }

    pub fn on_window(&mut self, callback: impl FnMut(WindowData) + Send + 'static) {
        self.on_window = Some(Box::new(callback));
    }

    /// Add a batch of PPI samples (ordered newest-last by arrival convention)
    /// anchored at wall-clock `now`. Timestamps are reconstructed backward
    /// from `now` by subtracting each interval.
    ///
    /// `wall_clock_now` drives the emission-cadence gate and is passed in
    /// rather than read from `SystemTime::now()` so the emission logic stays
    /// deterministic and testable.
    pub fn add_samples(&mut self, ppi_ms: &[u16], now: f64, wall_clock_now: f64) {
        let mut t = now;
        let mut batch = Vec::with_capacity(ppi_ms.len());
        for &ppi in ppi_ms.iter().rev() {
            batch.push(BufferedSample {
                timestamp: t,
                ppi_ms: ppi,
            });
            t -= ppi as f64 / 1000.0;
        }
        for sample in batch.into_iter().rev() {
            self.buffer.push_back(sample);
        }

        self.evict_old();
        self.try_emit(wall_clock_now);
    }

    fn evict_old(&mut self) {
        let Some(tail) = self.buffer.back() else {
            return;
        };
        let cutoff = tail.timestamp - self.window_size_sec;
        while matches!(self.buffer.front(), Some(head) if head.timestamp < cutoff) {
            self.buffer.pop_front();
        }
    }

    fn try_emit(&mut self, wall_clock_now: f64) {
        if wall_clock_now - self.last_emit_time < self.window_step_sec {
            return;
        }
        let (Some(head), Some(tail)) = (self.buffer.front(), self.buffer.back()) else {
            return;
        };

        let span = tail.timestamp - head.timestamp;
        let min_fill = if self.last_emit_time == 0.0 { 0.33 } else { 0.60 };
        if span < self.window_size_sec * min_fill {
            return;
        }

        let window = WindowData {
            ppi_ms: self.buffer.iter().map(|s| s.ppi_ms as f64).collect(),
            timestamps: self.buffer.iter().map(|s| s.timestamp).collect(),
            window_start: head.timestamp,
            window_end: tail.timestamp,
            sample_count: self.buffer.len(),
        };

        self.last_emit_time = wall_clock_now;
        if let Some(callback) = &mut self.on_window {
            callback(window);
        }
    }

    pub fn reset(&mut self) {
        self.buffer.clear();
        self.last_emit_time = 0.0;
    }

    pub fn buffer_duration_sec(&self) -> f64 {
        match (self.buffer.front(), self.buffer.back()) {
            (Some(head), Some(tail)) if self.buffer.len() >= 2 => tail.timestamp - head.timestamp,
            _ => 0.0,
        }
    }

    pub fn sample_count(&self) -> usize {
        self.buffer.len()
    }
}
