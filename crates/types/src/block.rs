//! Block, header, and execution-artifact types.
//!
//! The consensus and mining layers treat a block as an opaque value keyed by
//! its content hash and height; the fields here are the minimum a candidate
//! block carries between the assembly worker and the consensus driver.

use crate::{BlockHeight, Hash};

/// Miner/validator payout address (20 bytes, Ethereum-style).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Address(pub [u8; 20]);

impl Address {
    /// Zero address.
    pub const ZERO: Self = Address([0u8; 20]);
}

impl std::fmt::Display for Address {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

/// Block header: the fields consensus decides over.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    /// Height this block targets.
    pub number: BlockHeight,

    /// Hash of the parent block.
    pub parent_hash: Hash,

    /// Unix timestamp (seconds) the block was assembled at.
    pub timestamp: u64,

    /// Payout address for the block producer.
    pub coinbase: Address,

    /// Randomness beacon value carried in the header.
    pub random: Hash,

    /// Opaque extra data, at most [`MAX_EXTRA_DATA_SIZE`](crate::MAX_EXTRA_DATA_SIZE) bytes.
    pub extra: Vec<u8>,

    /// Gas ceiling the producer targeted.
    pub gas_limit: u64,

    /// Gas consumed by included transactions.
    pub gas_used: u64,
}

impl Header {
    /// Compute the content hash of this header.
    ///
    /// The hash commits to every field, so two headers differing in any
    /// field (including extra data) have distinct identities.
    pub fn hash(&self) -> Hash {
        Hash::from_parts(&[
            &self.number.0.to_le_bytes(),
            self.parent_hash.as_bytes(),
            &self.timestamp.to_le_bytes(),
            &self.coinbase.0,
            self.random.as_bytes(),
            &self.extra,
            &self.gas_limit.to_le_bytes(),
            &self.gas_used.to_le_bytes(),
        ])
    }
}

/// A candidate or committed block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Block {
    /// Consensus-relevant header.
    pub header: Header,

    /// Hashes of the included transactions.
    pub tx_hashes: Vec<Hash>,
}

impl Block {
    /// Build a block from a header with no transactions.
    pub fn empty(header: Header) -> Self {
        Self {
            header,
            tx_hashes: Vec::new(),
        }
    }

    /// Content hash; identical headers with identical payloads collide by design.
    pub fn hash(&self) -> Hash {
        let mut parts: Vec<&[u8]> = vec![];
        let header_hash = self.header.hash();
        parts.push(header_hash.as_bytes());
        for tx in &self.tx_hashes {
            parts.push(tx.as_bytes());
        }
        Hash::from_parts(&parts)
    }

    /// Height this block targets.
    pub fn number(&self) -> BlockHeight {
        self.header.number
    }
}

/// A log emitted by a transaction in the pending block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Log {
    /// Emitting contract address.
    pub address: Address,
    /// Indexed topics.
    pub topics: Vec<Hash>,
    /// Unindexed payload.
    pub data: Vec<u8>,
}

/// Receipt for one transaction in the pending block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Receipt {
    /// Hash of the transaction this receipt belongs to.
    pub tx_hash: Hash,
    /// Gas consumed by this transaction.
    pub gas_used: u64,
    /// Logs the transaction emitted.
    pub logs: Vec<Log>,
}

/// Snapshot of the state a pending block was assembled against.
///
/// The real state database is an external collaborator; callers only need a
/// stable identity (root) to pair with the pending block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateSnapshot {
    /// State root the snapshot was taken at.
    pub root: Hash,
    /// Height of the block the snapshot sits on.
    pub at: BlockHeight,
}

/// Opaque signature produced by the external signer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Signature(pub Vec<u8>);

#[cfg(test)]
mod tests {
    use super::*;

    fn header(number: u64, extra: &[u8]) -> Header {
        Header {
            number: BlockHeight(number),
            parent_hash: Hash::from_bytes(b"parent"),
            timestamp: 1_700_000_000,
            coinbase: Address::ZERO,
            random: Hash::ZERO,
            extra: extra.to_vec(),
            gas_limit: 30_000_000,
            gas_used: 0,
        }
    }

    #[test]
    fn header_hash_commits_to_extra_data() {
        assert_ne!(header(1, b"a").hash(), header(1, b"b").hash());
        assert_eq!(header(1, b"a").hash(), header(1, b"a").hash());
    }

    #[test]
    fn block_hash_commits_to_transactions() {
        let empty = Block::empty(header(1, b""));
        let mut with_tx = empty.clone();
        with_tx.tx_hashes.push(Hash::from_bytes(b"tx"));
        assert_ne!(empty.hash(), with_tx.hash());
    }
}
