// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! Dual-interval dispatch throttling
//!
//! Evaluation and visualization each have their own minimum gap between
//! dispatches. A zero interval disables throttling for that kind. Timestamps
//! advance after every attempted dispatch, successful or not, so a failing
//! engine is retried at most once per interval.

use std::time::{Duration, Instant};

use caumon_config::ThrottleConfig;

/// Minimum gap between dispatches of each kind
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ThrottleSettings {
    pub eval_interval: Duration,
    pub visualize_interval: Duration,
}

impl ThrottleSettings {
    pub fn from_millis(eval_interval_ms: u64, visualize_interval_ms: u64) -> Self {
        Self {
            eval_interval: Duration::from_millis(eval_interval_ms),
            visualize_interval: Duration::from_millis(visualize_interval_ms),
        }
    }

    pub fn from_config(config: &ThrottleConfig) -> Self {
        Self::from_millis(config.eval_interval_ms, config.visualize_interval_ms)
    }
}

impl Default for ThrottleSettings {
    fn default() -> Self {
        Self::from_config(&ThrottleConfig::default())
    }
}

/// What an arrival is allowed to dispatch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DispatchDecision {
    pub need_eval: bool,
    pub need_visualize: bool,
}

impl DispatchDecision {
    pub fn is_idle(&self) -> bool {
        !self.need_eval && !self.need_visualize
    }
}

/// Per-session throttle state
#[derive(Debug, Clone)]
pub struct DispatchThrottler {
    settings: ThrottleSettings,
    last_eval: Option<Instant>,
    last_visualize: Option<Instant>,
    has_eval_result: bool,
}

impl DispatchThrottler {
    pub fn new(settings: ThrottleSettings) -> Self {
        Self {
            settings,
            last_eval: None,
            last_visualize: None,
            has_eval_result: false,
        }
    }

    pub fn settings(&self) -> ThrottleSettings {
        self.settings
    }

    /// Decide what a data arrival at `now` may dispatch
    ///
    /// Pure query; record the attempt with [`record_eval`](Self::record_eval)
    /// and [`record_visualize`](Self::record_visualize).
    pub fn on_arrival(&self, now: Instant) -> DispatchDecision {
        DispatchDecision {
            need_eval: is_due(self.settings.eval_interval, self.last_eval, now),
            need_visualize: is_due(self.settings.visualize_interval, self.last_visualize, now),
        }
    }

    /// Whether an evaluation has to run for `decision`
    ///
    /// Visualization needs results to draw; if none exist yet an evaluation
    /// runs first even when its own interval has not elapsed.
    pub fn eval_required(&self, decision: DispatchDecision) -> bool {
        decision.need_eval || (decision.need_visualize && !self.has_eval_result)
    }

    pub fn record_eval(&mut self, now: Instant, succeeded: bool) {
        self.last_eval = Some(now);
        if succeeded {
            self.has_eval_result = true;
        }
    }

    pub fn record_visualize(&mut self, now: Instant) {
        self.last_visualize = Some(now);
    }

    pub fn has_eval_result(&self) -> bool {
        self.has_eval_result
    }
}

fn is_due(interval: Duration, last: Option<Instant>, now: Instant) -> bool {
    if interval.is_zero() {
        return true;
    }
    match last {
        Some(last) => now.saturating_duration_since(last) >= interval,
        None => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ms(value: u64) -> Duration {
        Duration::from_millis(value)
    }

    #[test]
    fn test_first_arrival_dispatches_both() {
        let throttler = DispatchThrottler::new(ThrottleSettings::from_millis(1000, 3000));
        let decision = throttler.on_arrival(Instant::now());
        assert!(decision.need_eval);
        assert!(decision.need_visualize);
    }

    #[test]
    fn test_eval_interval_boundary() {
        let mut throttler = DispatchThrottler::new(ThrottleSettings::from_millis(1000, 3000));
        let t0 = Instant::now();
        throttler.record_eval(t0, true);

        assert!(!throttler.on_arrival(t0 + ms(500)).need_eval);
        assert!(throttler.on_arrival(t0 + ms(1001)).need_eval);
    }

    #[test]
    fn test_zero_interval_always_dispatches() {
        let mut throttler = DispatchThrottler::new(ThrottleSettings::from_millis(0, 0));
        let t0 = Instant::now();
        throttler.record_eval(t0, true);
        throttler.record_visualize(t0);

        let decision = throttler.on_arrival(t0);
        assert!(decision.need_eval);
        assert!(decision.need_visualize);
    }

    #[test]
    fn test_intervals_are_independent() {
        let mut throttler = DispatchThrottler::new(ThrottleSettings::from_millis(1000, 3000));
        let t0 = Instant::now();
        throttler.record_eval(t0, true);
        throttler.record_visualize(t0);

        let decision = throttler.on_arrival(t0 + ms(1500));
        assert!(decision.need_eval);
        assert!(!decision.need_visualize);

        let decision = throttler.on_arrival(t0 + ms(3000));
        assert!(decision.need_visualize);
    }

    #[test]
    fn test_visualize_without_results_forces_eval() {
        let mut throttler = DispatchThrottler::new(ThrottleSettings::from_millis(10_000, 0));
        let t0 = Instant::now();
        throttler.record_eval(t0, false);

        let decision = throttler.on_arrival(t0 + ms(10));
        assert!(!decision.need_eval);
        assert!(decision.need_visualize);
        assert!(throttler.eval_required(decision));

        throttler.record_eval(t0 + ms(10), true);
        let decision = throttler.on_arrival(t0 + ms(20));
        assert!(!throttler.eval_required(decision));
    }

    #[test]
    fn test_failed_eval_still_advances_timestamp() {
        let mut throttler = DispatchThrottler::new(ThrottleSettings::from_millis(1000, 3000));
        let t0 = Instant::now();
        throttler.record_eval(t0, false);

        assert!(!throttler.has_eval_result());
        assert!(!throttler.on_arrival(t0 + ms(100)).need_eval);
    }

    #[test]
    fn test_idle_decision() {
        assert!(DispatchDecision::default().is_idle());
        assert!(!DispatchDecision {
            need_eval: false,
            need_visualize: true
        }
        .is_idle());
    }
}
