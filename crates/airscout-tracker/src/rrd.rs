// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! Rolling-rate records.
//!
//! A [`RollingRate`] is a dense per-second counter ring over a bounded
//! window. Dense means every second in the window has a frame; gaps between
//! observations are filled with explicit zero frames so rate math never has
//! to guess at silence.

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// Default window for packet-rate records, seconds.
pub const DEFAULT_RRD_WINDOW: usize = 60;

/// Dense per-second counter ring.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RollingRate {
    window: usize,
    // oldest -> newest
    frames: VecDeque<(u64, u64)>,
}

impl RollingRate {
    /// Create a ring covering `window` seconds. A zero window is clamped
    /// to 1.
    pub fn new(window: usize) -> Self {
        let window = window.max(1);
        Self {
            window,
            frames: VecDeque::with_capacity(window),
        }
    }

    pub fn window(&self) -> usize {
        self.window
    }

    /// Count `n` events at second `ts`.
    ///
    /// Seconds between the newest frame and `ts` are filled with zero
    /// frames. Out-of-order timestamps land on the newest frame rather than
    /// rewriting history.
    pub fn record(&mut self, ts: u64, n: u64) {
        match self.frames.back_mut() {
            None => self.frames.push_back((ts, n)),
            Some((newest, count)) if ts <= *newest => *count += n,
            Some((newest, _)) => {
                let newest = *newest;
                for missing in (newest + 1)..ts {
                    self.push_frame(missing, 0);
                }
                self.push_frame(ts, n);
            }
        }
        self.trim();
    }

    /// Total events in the window ending at `now`.
    pub fn total(&self, now: u64) -> u64 {
        let start = now.saturating_sub(self.window as u64 - 1);
        self.frames
            .iter()
            .filter(|(ts, _)| *ts >= start && *ts <= now)
            .map(|(_, count)| count)
            .sum()
    }

    /// Events counted in the most recent second.
    pub fn last_second(&self) -> u64 {
        self.frames.back().map(|(_, count)| *count).unwrap_or(0)
    }

    /// Average events per second over the window ending at `now`.
    pub fn rate(&self, now: u64) -> f64 {
        self.total(now) as f64 / self.window as f64
    }

    /// Frames oldest to newest, for serialization and HTTP snapshots.
    pub fn frames(&self) -> impl Iterator<Item = (u64, u64)> + '_ {
        self.frames.iter().copied()
    }

    fn push_frame(&mut self, ts: u64, n: u64) {
        self.frames.push_back((ts, n));
        self.trim();
    }

    fn trim(&mut self) {
        while self.frames.len() > self.window {
            self.frames.pop_front();
        }
    }
}

impl Default for RollingRate {
    fn default() -> Self {
        Self::new(DEFAULT_RRD_WINDOW)
    }
}
