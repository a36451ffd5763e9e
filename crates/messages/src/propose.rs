//! Proposal message.

use tendermill_types::{Block, BlockHeight, Hash, Round, Signature, ValidatorId};

/// A block proposal for one (height, round).
///
/// A proposal is uniquely identified within a round by its block hash; a
/// second proposal from the legitimate proposer carrying a different hash at
/// the same (height, round) is equivocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Propose {
    round: Round,
    height: BlockHeight,
    /// Most recent round the proposer observed a prevote quorum for this
    /// value, `None` when the value was never previously valid.
    valid_round: Option<Round>,
    block: Block,
    sender: ValidatorId,
    signature: Signature,
}

impl Propose {
    /// Build and sign a proposal. `sign` is the external signer hook.
    pub fn new(
        round: Round,
        height: BlockHeight,
        valid_round: Option<Round>,
        block: Block,
        sender: ValidatorId,
        sign: impl FnOnce(&[u8]) -> Signature,
    ) -> Self {
        let payload = Self::signing_payload(round, height, valid_round, &block.hash(), sender);
        let signature = sign(&payload);
        Self {
            round,
            height,
            valid_round,
            block,
            sender,
            signature,
        }
    }

    /// Bytes committed to by the proposal signature.
    pub fn signing_payload(
        round: Round,
        height: BlockHeight,
        valid_round: Option<Round>,
        block_hash: &Hash,
        sender: ValidatorId,
    ) -> Vec<u8> {
        // Valid round is encoded as round+1 with 0 meaning "none" so the
        // payload stays fixed-width.
        let vr_wire = valid_round.map(|r| r + 1).unwrap_or(0);
        let mut payload = Vec::with_capacity(11 + 8 * 4 + Hash::BYTES);
        payload.extend_from_slice(b"tm_propose:");
        payload.extend_from_slice(&height.0.to_le_bytes());
        payload.extend_from_slice(&round.to_le_bytes());
        payload.extend_from_slice(&vr_wire.to_le_bytes());
        payload.extend_from_slice(block_hash.as_bytes());
        payload.extend_from_slice(&sender.0.to_le_bytes());
        payload
    }

    /// Round this proposal targets.
    pub fn round(&self) -> Round {
        self.round
    }

    /// Height this proposal targets.
    pub fn height(&self) -> BlockHeight {
        self.height
    }

    /// Valid round carried by the proposal (`None` = never valid before).
    pub fn valid_round(&self) -> Option<Round> {
        self.valid_round
    }

    /// The proposed block.
    pub fn block(&self) -> &Block {
        &self.block
    }

    /// Hash of the proposed block.
    pub fn block_hash(&self) -> Hash {
        self.block.hash()
    }

    /// Validator that signed and sent this proposal.
    pub fn sender(&self) -> ValidatorId {
        self.sender
    }

    /// Signature over [`Self::signing_payload`].
    pub fn signature(&self) -> &Signature {
        &self.signature
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tendermill_types::test_utils::test_block;

    fn sig(payload: &[u8]) -> Signature {
        Signature(payload.to_vec())
    }

    #[test]
    fn payload_distinguishes_no_valid_round_from_round_zero() {
        let hash = Hash::from_bytes(b"block");
        let none = Propose::signing_payload(1, BlockHeight(5), None, &hash, ValidatorId(0));
        let zero = Propose::signing_payload(1, BlockHeight(5), Some(0), &hash, ValidatorId(0));
        assert_ne!(none, zero);
    }

    #[test]
    fn accessors_round_trip() {
        let block = test_block(5, 7);
        let expected_hash = block.hash();
        let p = Propose::new(2, BlockHeight(5), Some(1), block, ValidatorId(3), sig);
        assert_eq!(p.round(), 2);
        assert_eq!(p.height(), BlockHeight(5));
        assert_eq!(p.valid_round(), Some(1));
        assert_eq!(p.block_hash(), expected_hash);
        assert_eq!(p.sender(), ValidatorId(3));
    }
}
