// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Runtime tuning.

/// Executor configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Readiness events handled per reactor turn.
    pub max_events: usize,
    /// Units polled before the reactor gets a turn, so a busy set of units
    /// cannot starve descriptor readiness.
    pub tick_budget: usize,
    /// Panic when every unit is blocked and nothing can wake one. Turn off
    /// if units are woken from other threads.
    pub detect_deadlock: bool,
}

impl Config {
    pub fn max_events(mut self, n: usize) -> Self {
        self.max_events = n.max(1);
        self
    }

    pub fn tick_budget(mut self, n: usize) -> Self {
        self.tick_budget = n.max(1);
        self
    }

    pub fn detect_deadlock(mut self, on: bool) -> Self {
        self.detect_deadlock = on;
        self
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_events: 64,
            tick_budget: 61,
            detect_deadlock: true,
        }
    }
}
