//! Error types for the mining layer.

use tendermill_types::Hash;
use thiserror::Error;

/// Errors surfaced by the worker handle and the miner control surface.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MinerError {
    /// Extra data exceeds the protocol maximum.
    #[error("extra data exceeds max length: {len} > {max}")]
    ExtraTooLarge { len: usize, max: usize },

    /// The requested parent block is not part of the local chain.
    #[error("unknown parent block {0}")]
    ParentUnknown(Hash),

    /// The worker has been closed and accepts no further sealing work.
    #[error("worker is not available")]
    Busy,
}

/// Errors from the chain backend the worker assembles against.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChainError {
    #[error("block {0} not found")]
    UnknownBlock(Hash),

    #[error("state unavailable at block {at}: {reason}")]
    StateUnavailable { at: Hash, reason: String },
}

/// Errors from the sealing engine.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EngineError {
    #[error("sealing failed: {0}")]
    SealFailed(String),

    #[error("invalid header: {0}")]
    InvalidHeader(String),
}
