use std::time::{Duration, Instant};

use crate::domain::utils::statistics::ANALYTICS_TARGET;

/// Decides when the root should start a rebalance.
#[derive(Debug, Clone)]
pub struct ImbalanceDetector {
    threshold: f64,
    cooldown: Duration,
    last_trigger: Instant,
}

impl ImbalanceDetector {
    /// `started` is when the node began running; no rebalance fires within one cooldown of it.
    pub fn new(threshold: f64, cooldown: Duration, started: Instant) -> Self {
        ImbalanceDetector { threshold, cooldown, last_trigger: started }
    }

    /// True if some load deviates from the mean of `loads` by more than the threshold and the
    /// cooldown since the last trigger has passed. A positive answer restarts the cooldown.
    pub fn check(&mut self, loads: &[f64], now: Instant) -> bool {
        if loads.is_empty() || now.saturating_duration_since(self.last_trigger) < self.cooldown {
            return false;
        }

        let average = loads.iter().sum::<f64>() / loads.len() as f64;
        let imbalanced = loads.iter().any(|load| (load - average).abs() > self.threshold);

        if imbalanced {
            self.last_trigger = now;
            tracing::info!(target: ANALYTICS_TARGET, average_load = average, subtrees = loads.len(), "Imbalance detected");
        }
        imbalanced
    }
}
