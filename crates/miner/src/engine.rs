//! Sealing engine abstraction.
//!
//! The node runs with one of several consensus engines. Only proof-of-work
//! variants report a hashrate; every other capability is shared.

use crate::error::EngineError;
use tendermill_types::{Block, Header};

/// Capability surface of a consensus engine as the mining layer sees it.
pub trait SealEngine: Send + Sync {
    /// Seal `block`, producing the final sealed form.
    fn seal(&self, block: &Block) -> Result<Block, EngineError>;

    /// Validate a header against engine rules.
    fn verify_header(&self, header: &Header) -> Result<(), EngineError>;

    /// Current hashrate, `None` for engines without the proof-of-work
    /// capability.
    fn hashrate(&self) -> Option<u64> {
        None
    }
}
