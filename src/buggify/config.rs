//! Per-fault probabilities

use super::faults;
use std::collections::HashMap;

#[derive(Debug, Clone, PartialEq)]
pub struct FaultConfig {
    pub enabled: bool,
    /// Applied to every configured probability, then clamped to [0, 1]
    pub global_multiplier: f64,
    probabilities: HashMap<String, f64>,
}

impl Default for FaultConfig {
    fn default() -> Self {
        Self::disabled()
    }
}

impl FaultConfig {
    /// Enabled, with no per-fault probabilities set
    pub fn new() -> Self {
        FaultConfig {
            enabled: true,
            global_multiplier: 1.0,
            probabilities: HashMap::new(),
        }
    }

    pub fn disabled() -> Self {
        FaultConfig {
            enabled: false,
            ..Self::new()
        }
    }

    /// Occasional failures; the write path should absorb nearly all of them
    pub fn moderate() -> Self {
        Self::new()
            .with(faults::store::GET_UNAVAILABLE, 0.01)
            .with(faults::store::PUT_UNAVAILABLE, 0.01)
            .with(faults::store::DELETE_UNAVAILABLE, 0.01)
            .with(faults::store::SCAN_UNAVAILABLE, 0.01)
            .with(faults::store::APPLY_UNAVAILABLE, 0.01)
            .with(faults::replication::DELTA_DROP, 0.01)
            .with(faults::replication::DELTA_DUPLICATE, 0.02)
            .with(faults::replication::DELTA_REORDER, 0.05)
    }

    /// High fault rates that regularly exhaust the retry budget
    pub fn chaos() -> Self {
        Self::new()
            .with(faults::store::GET_UNAVAILABLE, 0.10)
            .with(faults::store::PUT_UNAVAILABLE, 0.20)
            .with(faults::store::DELETE_UNAVAILABLE, 0.20)
            .with(faults::store::SCAN_UNAVAILABLE, 0.10)
            .with(faults::store::APPLY_UNAVAILABLE, 0.10)
            .with(faults::replication::DELTA_DROP, 0.10)
            .with(faults::replication::DELTA_DUPLICATE, 0.10)
            .with(faults::replication::DELTA_REORDER, 0.25)
    }

    pub fn with(mut self, fault_id: &str, probability: f64) -> Self {
        debug_assert!(
            (0.0..=1.0).contains(&probability),
            "Precondition: probability must be within [0, 1]"
        );
        self.probabilities.insert(fault_id.to_string(), probability);
        self
    }

    /// Effective probability for `fault_id`; zero when disabled or unset
    pub fn get(&self, fault_id: &str) -> f64 {
        if !self.enabled {
            return 0.0;
        }
        let base = self.probabilities.get(fault_id).copied().unwrap_or(0.0);
        (base * self.global_multiplier).clamp(0.0, 1.0)
    }
}
