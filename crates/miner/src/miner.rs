//! Miner supervisor: gates the assembly worker on chain-sync status.
//!
//! A single background task owns all supervisor state. Control requests
//! (start/stop/close) arrive over channels, sync lifecycle events over a
//! feed subscription; exactly one input is consumed per loop iteration, so
//! the `can_start`/`should_start` flags need no locks.

use crate::engine::SealEngine;
use crate::error::MinerError;
use crate::worker::{Worker, WorkerApi};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tendermill_events::{Feed, Subscription, SyncEvent, SyncTopic};
use tendermill_types::{Address, Block, Hash, Log, Receipt, StateSnapshot};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// Block production supervisor.
///
/// Generic over the worker seam so the control loop can be exercised
/// against a recording double; production code uses the default [`Worker`].
pub struct Miner<W: WorkerApi = Worker> {
    worker: Arc<W>,
    engine: Arc<dyn SealEngine>,
    start_tx: mpsc::Sender<()>,
    stop_tx: mpsc::Sender<()>,
    exit_tx: watch::Sender<bool>,
    update_handle: Mutex<Option<JoinHandle<()>>>,
}

impl<W: WorkerApi> Miner<W> {
    /// Create the supervisor and spawn its control loop.
    ///
    /// The loop subscribes to the sync feed's start/done/failed topics; per
    /// the one-shot rule it unsubscribes permanently on the first `Done`.
    pub fn new(worker: Arc<W>, engine: Arc<dyn SealEngine>, sync_feed: &Feed<SyncEvent>) -> Self {
        let sync_events =
            sync_feed.subscribe_topics([SyncTopic::Started, SyncTopic::Done, SyncTopic::Failed]);
        let (start_tx, start_rx) = mpsc::channel(1);
        let (stop_tx, stop_rx) = mpsc::channel(1);
        let (exit_tx, exit_rx) = watch::channel(false);
        let handle = tokio::spawn(update_loop(
            Arc::clone(&worker),
            sync_events,
            start_rx,
            stop_rx,
            exit_rx,
        ));
        Self {
            worker,
            engine,
            start_tx,
            stop_tx,
            exit_tx,
            update_handle: Mutex::new(Some(handle)),
        }
    }

    /// Request mining to start. Deferred until sync completes if a sync is
    /// in progress.
    pub async fn start(&self) {
        let _ = self.start_tx.send(()).await;
    }

    /// Request mining to stop.
    pub async fn stop(&self) {
        let _ = self.stop_tx.send(()).await;
    }

    /// Shut the supervisor down: the worker is closed and the control loop
    /// joined before this returns.
    pub async fn close(&self) {
        let _ = self.exit_tx.send(true);
        let handle = self.update_handle.lock().take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }

    /// Whether the worker is currently producing blocks.
    pub fn mining(&self) -> bool {
        self.worker.is_running()
    }

    /// Engine hashrate; zero for engines without the proof-of-work
    /// capability.
    pub fn hashrate(&self) -> u64 {
        self.engine.hashrate().unwrap_or(0)
    }

    /// Set header extra data; rejects more than 32 bytes.
    pub fn set_extra(&self, extra: Vec<u8>) -> Result<(), MinerError> {
        self.worker.set_extra(extra)
    }

    /// Set the interval for sealing work resubmission.
    pub fn set_recommit_interval(&self, interval: Duration) {
        self.worker.set_recommit_interval(interval);
    }

    /// Set the gas ceiling to strive for when producing blocks.
    pub fn set_gas_ceil(&self, ceil: u64) {
        self.worker.set_gas_ceil(ceil);
    }

    /// Turn on the preseal feature. Enabled by default.
    pub fn enable_preseal(&self) {
        self.worker.enable_preseal();
    }

    /// Turn off the preseal feature.
    pub fn disable_preseal(&self) {
        self.worker.disable_preseal();
    }

    /// Currently pending block and associated state.
    pub fn pending(&self) -> Option<(Block, StateSnapshot)> {
        self.worker.pending()
    }

    /// Currently pending block.
    ///
    /// To access the pending block and pending state together use
    /// [`pending`](Self::pending); the state can change between calls.
    pub fn pending_block(&self) -> Option<Block> {
        self.worker.pending_block()
    }

    /// Currently pending block and corresponding receipts.
    pub fn pending_block_and_receipts(&self) -> Option<(Block, Vec<Receipt>)> {
        self.worker.pending_block_and_receipts()
    }

    /// Assemble an unsealed sealing block based on the given parameters.
    pub fn get_sealing_block(
        &self,
        parent: Hash,
        timestamp: u64,
        coinbase: Address,
        random: Hash,
    ) -> Result<Block, MinerError> {
        self.worker.get_sealing_block(parent, timestamp, coinbase, random)
    }

    /// Start delivering log batches from pending transactions.
    pub fn subscribe_pending_logs(&self) -> Subscription<Vec<Log>> {
        self.worker.subscribe_pending_logs()
    }
}

/// The supervisor control loop.
///
/// One-shot with respect to sync events: once `Done` arrives the
/// subscription is dropped for good, so an adversarial peer replaying
/// "sync needed" cannot hold mining down indefinitely.
async fn update_loop<W: WorkerApi>(
    worker: Arc<W>,
    sync_events: Subscription<SyncEvent>,
    mut start_rx: mpsc::Receiver<()>,
    mut stop_rx: mpsc::Receiver<()>,
    mut exit_rx: watch::Receiver<bool>,
) {
    let mut can_start = true;
    let mut should_start = false;
    let mut sync_events = Some(sync_events);

    loop {
        tokio::select! {
            event = recv_sync(&mut sync_events), if sync_events.is_some() => {
                match event {
                    None => {
                        // Feed closed underneath us; keep serving control
                        // channels.
                        sync_events = None;
                    }
                    Some(SyncEvent::Started) => {
                        let was_mining = worker.is_running();
                        worker.stop();
                        can_start = false;
                        if was_mining {
                            should_start = true;
                            info!("Mining aborted due to sync");
                        }
                    }
                    Some(SyncEvent::Failed) => {
                        can_start = true;
                        if should_start {
                            worker.start();
                        }
                    }
                    Some(SyncEvent::Done) => {
                        can_start = true;
                        if should_start {
                            worker.start();
                        }
                        if let Some(mut sub) = sync_events.take() {
                            sub.unsubscribe();
                            debug!("Sync finished, ignoring further sync events");
                        }
                    }
                }
            }
            Some(()) = start_rx.recv() => {
                if can_start {
                    worker.start();
                }
                should_start = true;
            }
            Some(()) = stop_rx.recv() => {
                should_start = false;
                worker.stop();
            }
            _ = exit_rx.changed() => {
                worker.close();
                return;
            }
        }
    }
}

async fn recv_sync(sub: &mut Option<Subscription<SyncEvent>>) -> Option<SyncEvent> {
    match sub {
        Some(sub) => sub.recv().await,
        None => std::future::pending().await,
    }
}
