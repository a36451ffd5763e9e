//! Driver-scoped timers.
//!
//! Both timers hand their fire back to the driver mailbox instead of acting
//! directly, so every state transition still happens on the driver task.

use crate::driver::ConsensusEvent;
use crate::error::TimerStopError;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tendermill_messages::Propose;
use tendermill_types::{BlockHeight, Round};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, trace};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TimeoutState {
    Inactive,
    Scheduled,
    Fired,
}

/// Scoped one-shot timeout for the propose step.
///
/// Must be stopped before any step transition out of Propose. A stop that
/// finds the timer already fired, with the fire event still unconsumed,
/// reports [`TimerStopError`], which the driver treats as fatal.
pub struct ProposeTimeout {
    state: Arc<Mutex<TimeoutState>>,
    handle: Option<JoinHandle<()>>,
}

impl Default for ProposeTimeout {
    fn default() -> Self {
        Self::new()
    }
}

impl ProposeTimeout {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(TimeoutState::Inactive)),
            handle: None,
        }
    }

    /// Schedule the timeout for `(height, round)`. Replaces any prior
    /// schedule.
    pub fn schedule(
        &mut self,
        height: BlockHeight,
        round: Round,
        duration: Duration,
        mailbox: mpsc::Sender<ConsensusEvent>,
    ) {
        self.cancel();
        *self.state.lock() = TimeoutState::Scheduled;
        let state = Arc::clone(&self.state);
        self.handle = Some(tokio::spawn(async move {
            tokio::time::sleep(duration).await;
            *state.lock() = TimeoutState::Fired;
            trace!(%height, round, "Propose timeout fired");
            let _ = mailbox
                .send(ConsensusEvent::ProposeTimeoutFired { height, round })
                .await;
        }));
        debug!(%height, round, ?duration, "Propose timeout scheduled");
    }

    /// Stop the timeout. A second stop is a benign no-op; stopping a fired
    /// but unconsumed timeout is a driver-state invariant violation.
    pub fn stop(&mut self) -> Result<(), TimerStopError> {
        let mut state = self.state.lock();
        match *state {
            TimeoutState::Inactive => Ok(()),
            TimeoutState::Scheduled => {
                *state = TimeoutState::Inactive;
                drop(state);
                if let Some(handle) = self.handle.take() {
                    handle.abort();
                }
                Ok(())
            }
            TimeoutState::Fired => Err(TimerStopError),
        }
    }

    /// Mark the fire event as consumed. Called by the driver when it
    /// dequeues [`ConsensusEvent::ProposeTimeoutFired`].
    pub fn consume_fire(&mut self) {
        *self.state.lock() = TimeoutState::Inactive;
        self.handle = None;
    }

    /// Hard reset on round/height boundaries: whatever the state, the old
    /// scope is gone and a stale fire event will fail its round check.
    pub fn cancel(&mut self) {
        *self.state.lock() = TimeoutState::Inactive;
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }

    /// Whether a timeout is currently scheduled.
    pub fn is_scheduled(&self) -> bool {
        *self.state.lock() == TimeoutState::Scheduled
    }
}

impl Drop for ProposeTimeout {
    fn drop(&mut self) {
        self.cancel();
    }
}

/// One-shot timer that re-injects a future-timestamp proposal into the
/// driver mailbox after the verifier's retry delay. At most one is
/// outstanding; arming replaces the previous instance.
#[derive(Default)]
pub struct FutureProposalTimer {
    handle: Option<JoinHandle<()>>,
}

impl FutureProposalTimer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Arm the timer; any prior instance is stopped first.
    pub fn arm(&mut self, delay: Duration, proposal: Propose, mailbox: mpsc::Sender<ConsensusEvent>) {
        self.stop();
        debug!(
            height = %proposal.height(),
            round = proposal.round(),
            ?delay,
            "Deferring future-timestamp proposal"
        );
        self.handle = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = mailbox.send(ConsensusEvent::Backlogged(proposal)).await;
        }));
    }

    /// Cancel any pending re-injection. Idempotent.
    pub fn stop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }

    /// Whether a re-injection is pending.
    pub fn is_armed(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }
}

impl Drop for FutureProposalTimer {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tendermill_types::test_utils::test_block;
    use tendermill_types::{Signature, ValidatorId};

    #[tokio::test]
    async fn stop_before_fire_is_clean() {
        let (tx, mut rx) = mpsc::channel(4);
        let mut timeout = ProposeTimeout::new();
        timeout.schedule(BlockHeight(1), 0, Duration::from_secs(60), tx);
        assert!(timeout.is_scheduled());
        assert_eq!(timeout.stop(), Ok(()));
        assert_eq!(timeout.stop(), Ok(())); // benign second stop
        assert!(
            tokio::time::timeout(Duration::from_millis(50), rx.recv())
                .await
                .is_err(),
            "stopped timeout must not fire"
        );
    }

    #[tokio::test]
    async fn stop_after_unconsumed_fire_errors() {
        let (tx, mut rx) = mpsc::channel(4);
        let mut timeout = ProposeTimeout::new();
        timeout.schedule(BlockHeight(1), 0, Duration::from_millis(5), tx);
        let event = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .expect("timeout should fire")
            .expect("channel open");
        assert!(matches!(event, ConsensusEvent::ProposeTimeoutFired { .. }));

        assert_eq!(timeout.stop(), Err(TimerStopError));
        timeout.consume_fire();
        assert_eq!(timeout.stop(), Ok(()));
    }

    #[tokio::test]
    async fn reschedule_replaces_prior_timer() {
        let (tx, mut rx) = mpsc::channel(4);
        let mut timeout = ProposeTimeout::new();
        timeout.schedule(BlockHeight(1), 0, Duration::from_secs(60), tx.clone());
        timeout.schedule(BlockHeight(1), 1, Duration::from_millis(5), tx);
        let event = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .expect("replacement should fire")
            .expect("channel open");
        match event {
            ConsensusEvent::ProposeTimeoutFired { round, .. } => assert_eq!(round, 1),
            other => panic!("unexpected event {other:?}"),
        }
        timeout.consume_fire();
    }

    #[tokio::test]
    async fn future_proposal_timer_reinjects() {
        let (tx, mut rx) = mpsc::channel(4);
        let proposal = Propose::new(
            0,
            BlockHeight(10),
            None,
            test_block(10, 1),
            ValidatorId(0),
            |p| Signature(p.to_vec()),
        );
        let mut timer = FutureProposalTimer::new();
        timer.arm(Duration::from_millis(5), proposal.clone(), tx);
        let event = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .expect("timer should fire")
            .expect("channel open");
        assert_eq!(event, ConsensusEvent::Backlogged(proposal));
    }

    #[tokio::test]
    async fn future_proposal_timer_stop_cancels() {
        let (tx, mut rx) = mpsc::channel(4);
        let proposal = Propose::new(
            0,
            BlockHeight(10),
            None,
            test_block(10, 1),
            ValidatorId(0),
            |p| Signature(p.to_vec()),
        );
        let mut timer = FutureProposalTimer::new();
        timer.arm(Duration::from_millis(20), proposal, tx);
        timer.stop();
        timer.stop(); // idempotent
        assert!(
            tokio::time::timeout(Duration::from_millis(80), rx.recv())
                .await
                .is_err(),
            "stopped timer must not re-inject"
        );
    }
}
