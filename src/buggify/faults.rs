//! Named fault injection sites

pub mod store {
    /// `get` fails with Unavailable
    pub const GET_UNAVAILABLE: &str = "store.get.unavailable";
    /// `conditional_put` fails with Unavailable before touching state
    pub const PUT_UNAVAILABLE: &str = "store.put.unavailable";
    /// `delete` fails with Unavailable before touching state
    pub const DELETE_UNAVAILABLE: &str = "store.delete.unavailable";
    /// `scan_page` fails with Unavailable
    pub const SCAN_UNAVAILABLE: &str = "store.scan.unavailable";
    /// `apply_replicated` fails with Unavailable
    pub const APPLY_UNAVAILABLE: &str = "store.apply.unavailable";
}

pub mod replication {
    /// Delta batch lost in transit
    pub const DELTA_DROP: &str = "replication.delta.drop";
    /// Delta batch delivered twice
    pub const DELTA_DUPLICATE: &str = "replication.delta.duplicate";
    /// Deltas within a batch delivered out of order
    pub const DELTA_REORDER: &str = "replication.delta.reorder";
}

pub const ALL_FAULTS: &[&str] = &[
    store::GET_UNAVAILABLE,
    store::PUT_UNAVAILABLE,
    store::DELETE_UNAVAILABLE,
    store::SCAN_UNAVAILABLE,
    store::APPLY_UNAVAILABLE,
    replication::DELTA_DROP,
    replication::DELTA_DUPLICATE,
    replication::DELTA_REORDER,
];
