//! Tendermint consensus core.
//!
//! This crate implements the proposer side of a Tendermint state machine
//! and the single-task driver that hosts it:
//!
//! - [`Core`]: shared state of the running instance (height, round, step,
//!   locked/valid values, committee snapshot, timers)
//! - Proposer role: [`Core::send_proposal`], [`Core::handle_proposal`],
//!   [`Core::handle_new_candidate_block`]
//! - [`MessageStore`] / [`RoundMessages`]: per-round proposal slot and vote
//!   power tallies
//! - [`Driver`]: the event loop; all state transitions happen on its task
//!
//! # Architecture
//!
//! ```text
//! network ─┐                       ┌─> Backend::broadcast
//! worker  ─┼─> mailbox ─> Driver ──┼─> Backend::commit
//! timers  ─┘              (Core)   └─> Backend::verify_proposal / sign
//! ```
//!
//! The prevote and precommit roles are siblings outside this crate; they
//! reach the round store through [`Core::round_messages`] and the lock
//! setters, and their messages feed the same mailbox.

mod backend;
mod core;
mod driver;
mod error;
pub mod metrics;
mod proposer;
mod round_messages;
mod timer;

pub use crate::core::{timeout_propose, Core, PROPOSE_TIMEOUT_BASE, PROPOSE_TIMEOUT_DELTA};
pub use backend::Backend;
pub use driver::{mailbox, ConsensusEvent, Driver, MAILBOX_CAPACITY};
pub use error::{ConsensusError, TimerStopError, VerifyError};
pub use round_messages::{AddOutcome, MessageStore, RoundMessages, SetOutcome};
pub use timer::{FutureProposalTimer, ProposeTimeout};
