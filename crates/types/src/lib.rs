//! Foundational types for the tendermill node.
//!
//! This crate provides the types shared between the mining and consensus
//! layers:
//!
//! - **Primitives**: [`Hash`] (Blake3), [`Address`], [`Signature`]
//! - **Identifiers**: [`BlockHeight`], [`Round`], [`Step`], [`ValidatorId`], [`VotePower`]
//! - **Chain types**: [`Block`], [`Header`], [`Receipt`], [`Log`], [`StateSnapshot`]
//! - **Committee**: [`CommitteeSet`] with the quorum threshold and proposer schedule
//!
//! # Design Philosophy
//!
//! This crate is self-contained with minimal dependencies. It does not depend
//! on any other workspace crates, making it the foundation layer.

mod block;
mod committee;
mod hash;
mod identifiers;

pub use block::{Address, Block, Header, Log, Receipt, Signature, StateSnapshot};
pub use committee::{CommitteeMember, CommitteeSet};
pub use hash::{Hash, HexError};
pub use identifiers::{BlockHeight, Round, Step, ValidatorId, VotePower};

/// Maximum size of the opaque extra data a producer may put in a header.
pub const MAX_EXTRA_DATA_SIZE: usize = 32;

/// Test utilities.
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils {
    use super::*;

    /// Build a header at `number` whose hash is derived from `seed`.
    pub fn test_header(number: u64, seed: u8) -> Header {
        Header {
            number: BlockHeight(number),
            parent_hash: Hash::from_bytes(&[seed.wrapping_sub(1); 8]),
            timestamp: 1_700_000_000 + number,
            coinbase: Address::ZERO,
            random: Hash::from_bytes(&[seed; 8]),
            extra: Vec::new(),
            gas_limit: 30_000_000,
            gas_used: 0,
        }
    }

    /// Build an empty block at `number` with a seed-dependent hash.
    pub fn test_block(number: u64, seed: u8) -> Block {
        Block::empty(test_header(number, seed))
    }

    /// Build an equal-weight committee of `n` validators for `height`.
    pub fn test_committee(height: u64, n: u64) -> CommitteeSet {
        let members = (0..n)
            .map(|i| CommitteeMember {
                id: ValidatorId(i),
                power: VotePower(1),
            })
            .collect();
        CommitteeSet::new(BlockHeight(height), members)
    }
}
