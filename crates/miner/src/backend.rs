//! Chain backend consumed by the assembly worker.
//!
//! The chain store, transaction pool, and state database are external
//! collaborators; the worker only needs the narrow read surface below.

use crate::error::ChainError;
use tendermill_types::{Hash, Header, Log, StateSnapshot};

/// A pool transaction as the worker sees it: identity, cost, and the logs
/// it would emit if included. Selection policy beyond the gas band lives in
/// the pool itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolTx {
    pub hash: Hash,
    pub gas: u64,
    pub gas_price: u64,
    pub logs: Vec<Log>,
}

/// Read access to the chain required for block assembly.
///
/// Implementations are expected to be cheap and thread-safe; the worker
/// calls these from its assembly loop and from synchronous sealing requests.
pub trait ChainBackend: Send + Sync {
    /// Current chain head.
    fn head(&self) -> Header;

    /// Look up a header by block hash.
    fn header_by_hash(&self, hash: &Hash) -> Option<Header>;

    /// Executable transactions currently in the pool, best first.
    fn pending_transactions(&self) -> Vec<PoolTx>;

    /// State at a historical block.
    ///
    /// `reexec` bounds how many blocks may be re-executed to regenerate the
    /// state; `base` optionally seeds the regeneration; `require_live`
    /// demands an in-memory state; `prefer_disk` favors a persisted layer
    /// over re-execution.
    fn state_at(
        &self,
        parent: &Header,
        reexec: u64,
        base: Option<StateSnapshot>,
        require_live: bool,
        prefer_disk: bool,
    ) -> Result<StateSnapshot, ChainError>;
}
