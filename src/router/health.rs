//! Per-model call and failure accounting.
//!
//! Success rate drives automatic model selection; a recent failure puts a
//! model into cooldown so requests are steered elsewhere for a while.

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::sync::{Arc, Mutex};

use crate::clock::Clock;

/// Counters for one model. `fails <= calls` always holds.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HealthStats {
    pub model_id: String,
    pub calls: u64,
    pub fails: u64,
    pub last_failure_at: Option<DateTime<Utc>>,
}

impl HealthStats {
    fn success_rate(&self) -> Option<f64> {
        (self.calls > 0).then(|| (self.calls - self.fails) as f64 / self.calls as f64)
    }

    fn in_cooldown(&self, now: DateTime<Utc>, cooldown: Duration) -> bool {
        self.last_failure_at
            .is_some_and(|failed_at| now - failed_at < cooldown)
    }
}

/// Process-wide health table, in first-recorded order.
pub struct HealthTracker {
    models: Mutex<Vec<HealthStats>>,
    cooldown: Duration,
    default_model: String,
    clock: Arc<dyn Clock>,
}

impl HealthTracker {
    pub fn new(default_model: impl Into<String>, cooldown: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            models: Mutex::new(Vec::new()),
            cooldown,
            default_model: default_model.into(),
            clock,
        }
    }

    pub fn default_model(&self) -> &str {
        &self.default_model
    }

    /// Count one call against a model, creating its entry on first use.
    pub fn record_outcome(&self, model_id: &str, success: bool) {
        let now = self.clock.now();
        let mut models = self.models.lock().unwrap_or_else(|e| e.into_inner());

        let idx = match models.iter().position(|m| m.model_id == model_id) {
            Some(idx) => idx,
            None => {
                models.push(HealthStats {
                    model_id: model_id.to_string(),
                    calls: 0,
                    fails: 0,
                    last_failure_at: None,
                });
                models.len() - 1
            }
        };

        let stats = &mut models[idx];
        stats.calls += 1;
        if !success {
            stats.fails += 1;
            stats.last_failure_at = Some(now);
            tracing::warn!(
                model = %model_id,
                calls = stats.calls,
                fails = stats.fails,
                "Model call failed, entering cooldown"
            );
        }
    }

    /// Model with the best success rate outside cooldown.
    ///
    /// Models with no calls are not candidates. Ties go to the model recorded
    /// first. Falls back to the configured default when nothing qualifies.
    pub fn select_best(&self) -> String {
        let now = self.clock.now();
        let models = self.models.lock().unwrap_or_else(|e| e.into_inner());

        let mut best: Option<(&HealthStats, f64)> = None;
        for stats in models.iter().filter(|m| !m.in_cooldown(now, self.cooldown)) {
            let Some(rate) = stats.success_rate() else {
                continue;
            };
            if best.map_or(true, |(_, best_rate)| rate > best_rate) {
                best = Some((stats, rate));
            }
        }

        match best {
            Some((stats, rate)) => {
                tracing::debug!(model = %stats.model_id, success_rate = rate, "Selected best model");
                stats.model_id.clone()
            }
            None => {
                tracing::debug!(model = %self.default_model, "No healthy model, using default");
                self.default_model.clone()
            }
        }
    }

    /// Tracked and not in cooldown.
    pub fn is_available(&self, model_id: &str) -> bool {
        let now = self.clock.now();
        self.models
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .find(|m| m.model_id == model_id)
            .is_some_and(|m| !m.in_cooldown(now, self.cooldown))
    }

    /// Keep an explicitly requested, available model; otherwise pick the best.
    pub fn resolve(&self, requested: Option<&str>) -> String {
        match requested {
            Some(model) if !model.is_empty() && model != "auto" && self.is_available(model) => {
                model.to_string()
            }
            _ => {
                let chosen = self.select_best();
                tracing::info!(
                    requested = requested.unwrap_or("auto"),
                    model = %chosen,
                    "Resolved model"
                );
                chosen
            }
        }
    }

    pub fn snapshot(&self) -> Vec<HealthStats> {
        self.models
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    fn tracker(clock: Arc<ManualClock>) -> HealthTracker {
        HealthTracker::new("fallback", Duration::seconds(300), clock)
    }

    fn record(t: &HealthTracker, model: &str, calls: u64, fails: u64) {
        for i in 0..calls {
            t.record_outcome(model, i >= fails);
        }
    }

    #[test]
    fn test_record_outcome_counts() {
        let clock = Arc::new(ManualClock::at_epoch());
        let t = tracker(clock.clone());
        t.record_outcome("m1", true);
        t.record_outcome("m1", false);

        let snap = t.snapshot();
        assert_eq!(snap.len(), 1);
        assert_eq!(snap[0].calls, 2);
        assert_eq!(snap[0].fails, 1);
        assert_eq!(snap[0].last_failure_at, Some(clock.now()));
    }

    #[test]
    fn test_select_best_by_success_rate() {
        let clock = Arc::new(ManualClock::at_epoch());
        let t = tracker(clock.clone());
        record(&t, "m1", 10, 1);
        record(&t, "m2", 5, 4);
        // Both failed just now; wait out the cooldown
        clock.advance(Duration::seconds(301));
        assert_eq!(t.select_best(), "m1");
    }

    #[test]
    fn test_select_best_skips_cooldown() {
        let clock = Arc::new(ManualClock::at_epoch());
        let t = tracker(clock.clone());
        record(&t, "good", 100, 1);
        record(&t, "worse", 10, 2);
        clock.advance(Duration::seconds(400));
        t.record_outcome("good", false);

        assert_eq!(t.select_best(), "worse");
        clock.advance(Duration::seconds(301));
        assert_eq!(t.select_best(), "good");
    }

    #[test]
    fn test_select_best_default_when_all_cooling_down() {
        let clock = Arc::new(ManualClock::at_epoch());
        let t = tracker(clock);
        record(&t, "m1", 3, 1);
        record(&t, "m2", 3, 1);
        assert_eq!(t.select_best(), "fallback");
    }

    #[test]
    fn test_select_best_tie_goes_to_first() {
        let clock = Arc::new(ManualClock::at_epoch());
        let t = tracker(clock);
        record(&t, "first", 4, 0);
        record(&t, "second", 2, 0);
        assert_eq!(t.select_best(), "first");
    }

    #[test]
    fn test_resolve() {
        let clock = Arc::new(ManualClock::at_epoch());
        let t = tracker(clock);
        record(&t, "m1", 2, 0);
        record(&t, "m2", 2, 1);

        assert_eq!(t.resolve(Some("m2")), "m1", "cooling down");
        assert_eq!(t.resolve(Some("m1")), "m1");
        assert_eq!(t.resolve(Some("auto")), "m1");
        assert_eq!(t.resolve(Some("never-seen")), "m1");
        assert_eq!(t.resolve(None), "m1");
    }

    #[test]
    fn test_empty_tracker_uses_default() {
        let t = tracker(Arc::new(ManualClock::at_epoch()));
        assert_eq!(t.select_best(), "fallback");
        assert!(!t.is_available("fallback"));
    }
}
