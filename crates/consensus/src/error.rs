//! Consensus error types.

use std::time::Duration;
use thiserror::Error;

/// Errors raised while dispatching consensus messages.
///
/// The height/round/step mismatches are routing signals, not failures: the
/// driver backlogs future messages and drops old ones after the late-commit
/// check has run. Only [`ConsensusError::TimerStop`] is fatal.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConsensusError {
    /// Message targets a height we already committed.
    #[error("message is for an old height")]
    OldHeightMessage,

    /// Message targets a height we have not reached yet.
    #[error("message is for a future height")]
    FutureHeightMessage,

    /// Message targets an earlier round of the current height.
    #[error("message is for an old round")]
    OldRoundMessage,

    /// Message targets a later round of the current height.
    #[error("message is for a future round")]
    FutureRoundMessage,

    /// Message belongs to a step we have not entered. Raised only for
    /// vote messages; proposals classify at the lowest step.
    #[error("message is for a future step")]
    FutureStepMessage,

    /// Proposal signed by someone other than the round's proposer.
    #[error("proposal is not from the round proposer")]
    NotFromProposer,

    /// Proposal failed backend verification.
    #[error("invalid proposal: {0}")]
    Invalid(#[from] VerifyError),

    /// The propose timeout could not be stopped cleanly. This means the
    /// driver processed a state transition the fired timeout should have
    /// preempted; the driver state is no longer trustworthy.
    #[error(transparent)]
    TimerStop(#[from] TimerStopError),
}

/// Proposal verification failures reported by the backend.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VerifyError {
    /// Block timestamp is ahead of local time; retry after `retry_in`.
    #[error("block from the future, retry in {retry_in:?}")]
    FutureTimestampBlock { retry_in: Duration },

    /// Proposal or block signature does not verify.
    #[error("invalid signature")]
    InvalidSignature,

    /// The block's parent is not known locally.
    #[error("unknown parent block")]
    UnknownParent,

    /// Any other header rule violation.
    #[error("invalid header: {0}")]
    BadHeader(String),
}

/// A scoped timer fired before it could be stopped and its fire event was
/// never consumed. Fatal inside the driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("propose timeout expired before it could be stopped")]
pub struct TimerStopError;
