//! Stateright model checking
//!
//! Exhaustive state-space exploration of the replication merge rule. The
//! seed-driven simulations in `replication::convergence_dst` sample long
//! random histories; these models enumerate every interleaving of a small
//! one.
//!
//! ```bash
//! # Full model checks are #[ignore]d for test speed
//! cargo test stateright -- --ignored --nocapture
//! ```

pub mod replication;

