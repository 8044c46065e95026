//! Fault injection
//!
//! Every decision point that can fail in production (a store call, a delta
//! batch in transit) is a named injection site. Whether a site fires is
//! decided by a seeded RNG, so a failing simulation seed replays the same
//! faults in the same places.
//!
//! ```ignore
//! if buggify!(&mut rng, faults::store::PUT_UNAVAILABLE) {
//!     return Err(StoreError::Unavailable("injected".into()));
//! }
//! ```
//!
//! Configuration and statistics are per thread. Simulations drive the store
//! from a single-threaded runtime, which keeps them deterministic.

pub mod faults;
pub mod config;

pub use config::FaultConfig;
pub use faults::ALL_FAULTS;

use crate::io::Rng;
use std::cell::RefCell;
use std::collections::HashMap;

/// Check and trigger counters per fault site
#[derive(Debug, Clone, Default)]
pub struct BuggifyStats {
    pub checks: HashMap<String, u64>,
    pub triggers: HashMap<String, u64>,
}

impl BuggifyStats {
    pub fn new() -> Self {
        Self::default()
    }

    fn count(map: &mut HashMap<String, u64>, fault_id: &str) {
        match map.get_mut(fault_id) {
            Some(n) => *n += 1,
            None => {
                map.insert(fault_id.to_string(), 1);
            }
        }
    }

    pub fn triggered(&self, fault_id: &str) -> u64 {
        self.triggers.get(fault_id).copied().unwrap_or(0)
    }

    pub fn total_triggers(&self) -> u64 {
        self.triggers.values().sum()
    }

    /// One line per checked site: `site: triggers/checks`
    pub fn summary(&self) -> String {
        let mut sites: Vec<_> = self.checks.iter().collect();
        sites.sort();
        let mut out = String::from("fault injection:");
        for (fault_id, checks) in sites {
            out.push_str(&format!("\n  {}: {}/{}", fault_id, self.triggered(fault_id), checks));
        }
        out
    }
}

#[derive(Debug, Default)]
struct BuggifyContext {
    config: FaultConfig,
    stats: BuggifyStats,
    suppressed: bool,
}

thread_local! {
    static CONTEXT: RefCell<BuggifyContext> = RefCell::new(BuggifyContext::default());
}

/// Install `config` for the current thread
pub fn set_config(config: FaultConfig) {
    CONTEXT.with(|ctx| ctx.borrow_mut().config = config);
}

pub fn get_stats() -> BuggifyStats {
    CONTEXT.with(|ctx| ctx.borrow().stats.clone())
}

pub fn reset_stats() {
    CONTEXT.with(|ctx| ctx.borrow_mut().stats = BuggifyStats::new());
}

/// Guard that disables injection on this thread while alive
pub struct BuggifySuppressor {
    previous: bool,
}

impl BuggifySuppressor {
    pub fn new() -> Self {
        let previous = CONTEXT.with(|ctx| std::mem::replace(&mut ctx.borrow_mut().suppressed, true));
        BuggifySuppressor { previous }
    }
}

impl Default for BuggifySuppressor {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for BuggifySuppressor {
    fn drop(&mut self) {
        let previous = self.previous;
        CONTEXT.with(|ctx| ctx.borrow_mut().suppressed = previous);
    }
}

fn roll<R: Rng>(rng: &mut R, fault_id: &str, probability: Option<f64>) -> bool {
    CONTEXT.with(|ctx| {
        let mut ctx = ctx.borrow_mut();
        BuggifyStats::count(&mut ctx.stats.checks, fault_id);
        if ctx.suppressed || !ctx.config.enabled {
            return false;
        }

        let p = probability
            .map(|p| p.clamp(0.0, 1.0))
            .unwrap_or_else(|| ctx.config.get(fault_id));
        if p <= 0.0 {
            return false;
        }

        let triggered = (rng.gen_range(0, 1_000_000) as f64 / 1_000_000.0) < p;
        if triggered {
            BuggifyStats::count(&mut ctx.stats.triggers, fault_id);
        }
        triggered
    })
}

/// True if `fault_id` should fire now, at its configured probability
#[inline]
pub fn should_buggify<R: Rng>(rng: &mut R, fault_id: &str) -> bool {
    roll(rng, fault_id, None)
}

#[inline]
pub fn should_buggify_with_prob<R: Rng>(rng: &mut R, fault_id: &str, probability: f64) -> bool {
    roll(rng, fault_id, Some(probability))
}

/// Inject `fault_id` with its configured probability, or with an explicit
/// override as the third argument
#[macro_export]
macro_rules! buggify {
    ($rng:expr, $fault_id:expr) => {
        $crate::buggify::should_buggify($rng, $fault_id)
    };
    ($rng:expr, $fault_id:expr, $prob:expr) => {
        $crate::buggify::should_buggify_with_prob($rng, $fault_id, $prob)
    };
}

/// Suppress all buggify calls until the returned guard drops
#[macro_export]
macro_rules! suppress_buggify {
    () => {
        $crate::buggify::BuggifySuppressor::new()
    };
}
