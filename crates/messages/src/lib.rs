//! Consensus messages exchanged between validators.
//!
//! Wire encoding is owned by the external P2P layer; these are the in-memory
//! shapes the consensus core builds, signs, and hands to the broadcaster.

mod propose;
mod vote;

pub use propose::Propose;
pub use vote::{Vote, VoteKind};

/// Envelope handed to the broadcast collaborator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsensusMsg {
    Propose(Propose),
    Vote(Vote),
}

impl ConsensusMsg {
    /// Human-readable name for logs.
    pub fn type_name(&self) -> &'static str {
        match self {
            ConsensusMsg::Propose(_) => "Propose",
            ConsensusMsg::Vote(v) => match v.kind() {
                VoteKind::Prevote => "Prevote",
                VoteKind::Precommit => "Precommit",
            },
        }
    }
}
