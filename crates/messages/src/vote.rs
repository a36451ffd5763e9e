//! Prevote and precommit messages.

use tendermill_types::{BlockHeight, Hash, Round, Signature, ValidatorId};

/// Which voting step a vote belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VoteKind {
    Prevote,
    Precommit,
}

impl VoteKind {
    /// Domain tag mixed into the signing payload.
    fn domain(self) -> &'static [u8] {
        match self {
            VoteKind::Prevote => b"tm_prevote:",
            VoteKind::Precommit => b"tm_precommit:",
        }
    }
}

/// A prevote or precommit for one (height, round).
///
/// A vote for the zero hash is a nil vote: the voter saw no acceptable value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Vote {
    kind: VoteKind,
    round: Round,
    height: BlockHeight,
    value: Hash,
    sender: ValidatorId,
    signature: Signature,
}

impl Vote {
    /// Build and sign a vote. Use [`Hash::ZERO`] as `value` for a nil vote.
    pub fn new(
        kind: VoteKind,
        round: Round,
        height: BlockHeight,
        value: Hash,
        sender: ValidatorId,
        sign: impl FnOnce(&[u8]) -> Signature,
    ) -> Self {
        let payload = Self::signing_payload(kind, round, height, &value, sender);
        let signature = sign(&payload);
        Self {
            kind,
            round,
            height,
            value,
            sender,
            signature,
        }
    }

    /// Bytes committed to by the vote signature.
    pub fn signing_payload(
        kind: VoteKind,
        round: Round,
        height: BlockHeight,
        value: &Hash,
        sender: ValidatorId,
    ) -> Vec<u8> {
        let mut payload = Vec::with_capacity(16 + 8 * 3 + Hash::BYTES);
        payload.extend_from_slice(kind.domain());
        payload.extend_from_slice(&height.0.to_le_bytes());
        payload.extend_from_slice(&round.to_le_bytes());
        payload.extend_from_slice(value.as_bytes());
        payload.extend_from_slice(&sender.0.to_le_bytes());
        payload
    }

    pub fn kind(&self) -> VoteKind {
        self.kind
    }

    pub fn round(&self) -> Round {
        self.round
    }

    pub fn height(&self) -> BlockHeight {
        self.height
    }

    /// Voted-for block hash, [`Hash::ZERO`] for nil.
    pub fn value(&self) -> Hash {
        self.value
    }

    /// True when this vote endorses no value.
    pub fn is_nil(&self) -> bool {
        self.value.is_zero()
    }

    pub fn sender(&self) -> ValidatorId {
        self.sender
    }

    pub fn signature(&self) -> &Signature {
        &self.signature
    }
}
