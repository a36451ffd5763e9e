//! Backend interface consumed by the consensus core.
//!
//! Signing, block verification, finalization, and broadcast are external
//! collaborators; the core only drives them.

use crate::error::VerifyError;
use tendermill_messages::ConsensusMsg;
use tendermill_types::{Block, BlockHeight, CommitteeSet, Hash, Round, Signature};

/// External services the consensus core calls out to.
///
/// Implementations must be thread-safe; the driver invokes them from its
/// single task but timers and tests may hold clones of the handle.
pub trait Backend: Send + Sync {
    /// Sign `payload` with the local validator key.
    fn sign(&self, payload: &[u8]) -> Signature;

    /// Verify a proposed block against chain rules.
    ///
    /// May be latency-heavy; the driver blocks on it, which is acceptable
    /// because proposal handling is the driver's primary work. A
    /// [`VerifyError::FutureTimestampBlock`] carries the retry delay hint.
    fn verify_proposal(&self, block: &Block) -> Result<(), VerifyError>;

    /// Hand a signed message to the P2P layer.
    fn broadcast(&self, msg: ConsensusMsg);

    /// Record the hash of the block we proposed, so the sealer can match
    /// incoming commit work against it.
    fn set_proposed_block_hash(&self, hash: Hash);

    /// Finalize `block`, committed at `round`, into the chain.
    fn commit(&self, block: &Block, round: Round);

    /// Committee snapshot for `height`.
    fn committee(&self, height: BlockHeight) -> CommitteeSet;
}
