use serde::{Deserialize, Serialize};

/// Tunables for a [`TransactionCoordinator`](crate::TransactionCoordinator).
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
#[serde(default)]
pub struct CoordinatorConfig {
    /// Timeout given to local and request-scoped transactions and propagated
    /// to the resources they enlist. Global branches use the timeout passed
    /// to `start`.
    pub default_timeout_seconds: Option<u32>,
    /// Upper bound on concurrently active contexts. New transactions fail with
    /// `XAER_RMFAIL` once it is reached.
    pub max_active_transactions: Option<usize>,
}
