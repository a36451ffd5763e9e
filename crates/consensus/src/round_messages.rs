//! Per-round message buffer and vote tallies for the current height.

use std::collections::{BTreeMap, HashMap};
use tendermill_messages::Propose;
use tendermill_types::{Hash, Round, ValidatorId, VotePower};
use tracing::warn;

/// Outcome of storing a proposal in a round slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SetOutcome {
    /// First proposal seen this round; stored.
    Stored,
    /// A proposal was already stored. A distinct hash from the legitimate
    /// proposer is equivocation; the caller reports it upward.
    AlreadySet { existing: Hash },
}

/// Outcome of adding a vote to a tally.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AddOutcome {
    /// Vote counted.
    Added,
    /// Same vote seen before; ignored.
    Duplicate,
    /// The validator already voted for a different hash in this step.
    Equivocation { previous: Hash },
}

/// One vote per (validator, step); power aggregated per voted-for hash.
#[derive(Debug, Default)]
struct VoteTally {
    power: HashMap<Hash, VotePower>,
    voters: HashMap<ValidatorId, Hash>,
}

impl VoteTally {
    fn add(&mut self, voter: ValidatorId, value: Hash, power: VotePower) -> AddOutcome {
        match self.voters.get(&voter) {
            Some(previous) if *previous == value => AddOutcome::Duplicate,
            Some(previous) => AddOutcome::Equivocation {
                previous: *previous,
            },
            None => {
                self.voters.insert(voter, value);
                let entry = self.power.entry(value).or_insert(VotePower::ZERO);
                *entry = entry.saturating_add(power);
                AddOutcome::Added
            }
        }
    }

    fn power(&self, value: &Hash) -> VotePower {
        self.power.get(value).copied().unwrap_or(VotePower::ZERO)
    }
}

/// Messages observed for one round of the current height: at most one
/// proposal plus the prevote and precommit tallies.
#[derive(Debug, Default)]
pub struct RoundMessages {
    proposal: Option<Propose>,
    verified: bool,
    prevotes: VoteTally,
    precommits: VoteTally,
}

impl RoundMessages {
    /// Store the first proposal seen at this round. Later proposals are
    /// left unstored and reported via [`SetOutcome::AlreadySet`].
    pub fn set_proposal(&mut self, proposal: Propose, verified: bool) -> SetOutcome {
        if let Some(existing) = &self.proposal {
            return SetOutcome::AlreadySet {
                existing: existing.block_hash(),
            };
        }
        self.proposal = Some(proposal);
        self.verified = verified;
        SetOutcome::Stored
    }

    /// Mark the stored proposal as verified.
    pub fn set_verified(&mut self) {
        self.verified = true;
    }

    /// The stored proposal, if any.
    pub fn proposal(&self) -> Option<&Propose> {
        self.proposal.as_ref()
    }

    /// Whether the stored proposal passed backend verification.
    pub fn proposal_verified(&self) -> bool {
        self.verified
    }

    /// Count a prevote.
    pub fn add_prevote(&mut self, voter: ValidatorId, value: Hash, power: VotePower) -> AddOutcome {
        self.prevotes.add(voter, value, power)
    }

    /// Count a precommit.
    pub fn add_precommit(
        &mut self,
        voter: ValidatorId,
        value: Hash,
        power: VotePower,
    ) -> AddOutcome {
        self.precommits.add(voter, value, power)
    }

    /// Aggregated prevote power for `value` at this round.
    pub fn prevotes_power(&self, value: &Hash) -> VotePower {
        self.prevotes.power(value)
    }

    /// Aggregated precommit power for `value` at this round.
    pub fn precommits_power(&self, value: &Hash) -> VotePower {
        self.precommits.power(value)
    }
}

/// Round → [`RoundMessages`] for the current height.
///
/// Entries live for the duration of their height and are dropped together
/// on commit; the committee view backing the power numbers never changes
/// mid-height.
#[derive(Debug, Default)]
pub struct MessageStore {
    rounds: BTreeMap<Round, RoundMessages>,
}

impl MessageStore {
    /// Get the buffer for `round`, creating an empty one if absent.
    pub fn get_or_create(&mut self, round: Round) -> &mut RoundMessages {
        self.rounds.entry(round).or_default()
    }

    /// Read-only access to the buffer for `round`.
    pub fn get(&self, round: Round) -> Option<&RoundMessages> {
        self.rounds.get(&round)
    }

    /// Drop every round of the finished height.
    pub fn reset(&mut self) {
        if !self.rounds.is_empty() {
            warn!(rounds = self.rounds.len(), "Clearing round messages");
        }
        self.rounds.clear();
    }

    /// Rounds with at least one observed message.
    pub fn rounds(&self) -> impl Iterator<Item = Round> + '_ {
        self.rounds.keys().copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tendermill_types::test_utils::test_block;
    use tendermill_types::{BlockHeight, Signature};

    fn propose(round: Round, seed: u8, sender: u64) -> Propose {
        Propose::new(
            round,
            BlockHeight(10),
            None,
            test_block(10, seed),
            ValidatorId(sender),
            |p| Signature(p.to_vec()),
        )
    }

    #[test]
    fn first_proposal_wins() {
        let mut rm = RoundMessages::default();
        let first = propose(0, 1, 3);
        let first_hash = first.block_hash();
        assert_eq!(rm.set_proposal(first, false), SetOutcome::Stored);
        assert!(!rm.proposal_verified());

        let second = propose(0, 2, 3);
        assert_eq!(
            rm.set_proposal(second, true),
            SetOutcome::AlreadySet {
                existing: first_hash
            }
        );
        // The original, unverified proposal stays in place.
        assert_eq!(rm.proposal().unwrap().block_hash(), first_hash);
        assert!(!rm.proposal_verified());
    }

    #[test]
    fn tally_counts_one_vote_per_validator() {
        let mut rm = RoundMessages::default();
        let value = Hash::from_bytes(b"v");

        assert_eq!(
            rm.add_precommit(ValidatorId(0), value, VotePower(2)),
            AddOutcome::Added
        );
        assert_eq!(
            rm.add_precommit(ValidatorId(0), value, VotePower(2)),
            AddOutcome::Duplicate
        );
        assert_eq!(rm.precommits_power(&value), VotePower(2));

        // A different value from the same validator is equivocation and
        // does not change the tally.
        assert_eq!(
            rm.add_precommit(ValidatorId(0), Hash::from_bytes(b"w"), VotePower(2)),
            AddOutcome::Equivocation { previous: value }
        );
        assert_eq!(rm.precommits_power(&value), VotePower(2));
        assert_eq!(
            rm.precommits_power(&Hash::from_bytes(b"w")),
            VotePower::ZERO
        );
    }

    #[test]
    fn power_aggregates_across_validators() {
        let mut rm = RoundMessages::default();
        let value = Hash::from_bytes(b"v");
        rm.add_prevote(ValidatorId(0), value, VotePower(100));
        rm.add_prevote(ValidatorId(1), value, VotePower(100));
        rm.add_prevote(ValidatorId(2), Hash::ZERO, VotePower(100));
        assert_eq!(rm.prevotes_power(&value), VotePower(200));
        assert_eq!(rm.prevotes_power(&Hash::ZERO), VotePower(100));
    }

    #[test]
    fn store_creates_and_resets() {
        let mut store = MessageStore::default();
        store.get_or_create(0);
        store.get_or_create(2);
        assert_eq!(store.rounds().collect::<Vec<_>>(), vec![0, 2]);
        assert!(store.get(1).is_none());
        store.reset();
        assert_eq!(store.rounds().count(), 0);
    }
}
