//! Block-assembly worker handle.
//!
//! The worker owns the pending block: it rebuilds it from the chain head on
//! every recommit tick while running, answers synchronous sealing-block
//! requests, and feeds log batches from the pending block to subscribers.
//! Mutator calls and snapshot reads serialize behind one internal lock;
//! callers may invoke the handle from any task.

use crate::backend::{ChainBackend, PoolTx};
use crate::config::MinerConfig;
use crate::engine::SealEngine;
use crate::error::MinerError;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tendermill_types::{
    Address, Block, Hash, Header, Log, Receipt, StateSnapshot, MAX_EXTRA_DATA_SIZE,
};
use tendermill_events::{Feed, Subscription};
use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

/// Smallest recommit interval the worker accepts.
pub const MIN_RECOMMIT_INTERVAL: Duration = Duration::from_millis(1);

/// Re-execution budget used when regenerating pending state.
const PENDING_STATE_REEXEC: u64 = 128;

/// Control surface of the assembly worker.
///
/// This is the seam between the miner supervisor and the worker proper;
/// tests substitute a recording double here.
pub trait WorkerApi: Send + Sync + 'static {
    /// Resume the assembly loop. Idempotent; a no-op once closed.
    fn start(&self);

    /// Freeze sealing but retain pending state. Idempotent.
    fn stop(&self);

    /// Terminal shutdown: stops the loop and ends the pending-logs feed.
    fn close(&self);

    /// Whether the assembly loop is live.
    fn is_running(&self) -> bool;

    /// Set header extra data, at most [`MAX_EXTRA_DATA_SIZE`] bytes.
    fn set_extra(&self, extra: Vec<u8>) -> Result<(), MinerError>;

    /// Set the reassembly interval; values below [`MIN_RECOMMIT_INTERVAL`]
    /// are raised to it.
    fn set_recommit_interval(&self, interval: Duration);

    /// Set the gas ceiling for produced blocks.
    fn set_gas_ceil(&self, ceil: u64);

    /// Enable speculative sealing of the pending block (default).
    fn enable_preseal(&self);

    /// Disable speculative sealing.
    fn disable_preseal(&self);

    /// Pending block plus the state it was assembled against.
    fn pending(&self) -> Option<(Block, StateSnapshot)>;

    /// Pending block only.
    fn pending_block(&self) -> Option<Block>;

    /// Pending block plus its receipts.
    fn pending_block_and_receipts(&self) -> Option<(Block, Vec<Receipt>)>;

    /// Synchronously assemble an unsealed candidate atop `parent`.
    fn get_sealing_block(
        &self,
        parent: Hash,
        timestamp: u64,
        coinbase: Address,
        random: Hash,
    ) -> Result<Block, MinerError>;

    /// Subscribe to log batches from the pending block.
    fn subscribe_pending_logs(&self) -> Subscription<Vec<Log>>;
}

struct PendingSnapshot {
    block: Block,
    state: StateSnapshot,
    receipts: Vec<Receipt>,
}

struct Inner {
    extra: Vec<u8>,
    gas_floor: u64,
    gas_ceil: u64,
    gas_price: u64,
    coinbase: Address,
    preseal: bool,
    snapshot: Option<PendingSnapshot>,
}

/// Production worker backed by the chain and a sealing engine.
pub struct Worker {
    backend: Arc<dyn ChainBackend>,
    engine: Arc<dyn SealEngine>,
    inner: Mutex<Inner>,
    running: AtomicBool,
    closed: AtomicBool,
    kick: Notify,
    recommit_tx: watch::Sender<Duration>,
    pending_logs: Feed<Vec<Log>>,
    candidates: Feed<Block>,
    loop_handle: Mutex<Option<JoinHandle<()>>>,
}

impl Worker {
    /// Create a worker and spawn its assembly loop. The worker starts
    /// stopped; call [`WorkerApi::start`] to begin producing.
    pub fn new(
        config: &MinerConfig,
        backend: Arc<dyn ChainBackend>,
        engine: Arc<dyn SealEngine>,
    ) -> Arc<Self> {
        let (recommit_tx, recommit_rx) = watch::channel(sanitize_recommit(config.recommit));
        let worker = Arc::new(Self {
            backend,
            engine,
            inner: Mutex::new(Inner {
                extra: config.extra_data.clone(),
                gas_floor: config.gas_floor,
                gas_ceil: config.gas_ceil,
                gas_price: config.gas_price,
                coinbase: config.etherbase,
                preseal: true,
                snapshot: None,
            }),
            running: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            kick: Notify::new(),
            recommit_tx,
            pending_logs: Feed::new(),
            candidates: Feed::new(),
            loop_handle: Mutex::new(None),
        });
        let handle = tokio::spawn(Self::assembly_loop(Arc::clone(&worker), recommit_rx));
        *worker.loop_handle.lock() = Some(handle);
        worker
    }

    async fn assembly_loop(this: Arc<Self>, mut recommit_rx: watch::Receiver<Duration>) {
        loop {
            let interval = *recommit_rx.borrow();
            tokio::select! {
                _ = tokio::time::sleep(interval) => {
                    if this.is_running() {
                        this.rebuild_pending();
                    }
                }
                _ = this.kick.notified() => {
                    if this.is_running() {
                        this.rebuild_pending();
                    }
                }
                changed = recommit_rx.changed() => {
                    if changed.is_err() {
                        return;
                    }
                }
            }
            if this.closed.load(Ordering::Acquire) {
                return;
            }
        }
    }

    /// Subscribe to unsealed candidate blocks as they are assembled. Node
    /// glue forwards these into the consensus driver mailbox.
    pub fn subscribe_candidates(&self) -> Subscription<Block> {
        self.candidates.subscribe()
    }

    /// Rebuild the pending block from the current chain head.
    fn rebuild_pending(&self) {
        let head = self.backend.head();
        let (extra, gas_floor, gas_ceil, gas_price, coinbase, preseal) = {
            let inner = self.inner.lock();
            (
                inner.extra.clone(),
                inner.gas_floor,
                inner.gas_ceil,
                inner.gas_price,
                inner.coinbase,
                inner.preseal,
            )
        };

        let state = match self.backend.state_at(&head, PENDING_STATE_REEXEC, None, false, true) {
            Ok(state) => state,
            Err(err) => {
                warn!(head = %head.number, %err, "Pending state unavailable, skipping recommit");
                return;
            }
        };

        let gas_limit = gas_ceil.max(gas_floor);
        let (tx_hashes, receipts, gas_used) = select_transactions(
            &self.backend.pending_transactions(),
            gas_limit,
            gas_price,
        );

        let parent_hash = head.hash();
        let timestamp = unix_now().max(head.timestamp + 1);
        let header = Header {
            number: head.number.next(),
            parent_hash,
            timestamp,
            coinbase,
            random: Hash::ZERO,
            extra,
            gas_limit,
            gas_used,
        };
        let mut block = Block { header, tx_hashes };

        // Consensus consumes the unsealed candidate; sealing is its call.
        self.candidates.publish(block.clone());

        if preseal {
            // Speculative seal so RPC sees a sealed-looking pending block;
            // a failure here leaves the unsealed form in place.
            match self.engine.seal(&block) {
                Ok(sealed) => block = sealed,
                Err(err) => trace!(%err, "Preseal failed, keeping unsealed pending block"),
            }
        }

        let logs: Vec<Log> = receipts.iter().flat_map(|r| r.logs.clone()).collect();
        if !logs.is_empty() {
            self.pending_logs.publish(logs);
        }

        trace!(
            number = %block.header.number,
            txs = block.tx_hashes.len(),
            gas_used,
            "Rebuilt pending block"
        );

        self.inner.lock().snapshot = Some(PendingSnapshot {
            block,
            state,
            receipts,
        });
    }
}

impl WorkerApi for Worker {
    fn start(&self) {
        if self.closed.load(Ordering::Acquire) {
            return;
        }
        if !self.running.swap(true, Ordering::AcqRel) {
            debug!("Worker started");
            self.kick.notify_one();
        }
    }

    fn stop(&self) {
        if self.running.swap(false, Ordering::AcqRel) {
            debug!("Worker stopped");
        }
    }

    fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            warn!("Worker already closed");
            return;
        }
        self.running.store(false, Ordering::Release);
        if let Some(handle) = self.loop_handle.lock().take() {
            handle.abort();
        }
        self.pending_logs.close();
        self.candidates.close();
        debug!("Worker closed");
    }

    fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire) && !self.closed.load(Ordering::Acquire)
    }

    fn set_extra(&self, extra: Vec<u8>) -> Result<(), MinerError> {
        if extra.len() > MAX_EXTRA_DATA_SIZE {
            return Err(MinerError::ExtraTooLarge {
                len: extra.len(),
                max: MAX_EXTRA_DATA_SIZE,
            });
        }
        self.inner.lock().extra = extra;
        Ok(())
    }

    fn set_recommit_interval(&self, interval: Duration) {
        let interval = if interval < MIN_RECOMMIT_INTERVAL {
            warn!(
                requested = ?interval,
                minimum = ?MIN_RECOMMIT_INTERVAL,
                "Sanitizing miner recommit interval"
            );
            MIN_RECOMMIT_INTERVAL
        } else {
            interval
        };
        self.recommit_tx.send_replace(interval);
    }

    fn set_gas_ceil(&self, ceil: u64) {
        self.inner.lock().gas_ceil = ceil;
    }

    fn enable_preseal(&self) {
        self.inner.lock().preseal = true;
    }

    fn disable_preseal(&self) {
        self.inner.lock().preseal = false;
    }

    fn pending(&self) -> Option<(Block, StateSnapshot)> {
        let inner = self.inner.lock();
        inner
            .snapshot
            .as_ref()
            .map(|s| (s.block.clone(), s.state.clone()))
    }

    fn pending_block(&self) -> Option<Block> {
        self.inner.lock().snapshot.as_ref().map(|s| s.block.clone())
    }

    fn pending_block_and_receipts(&self) -> Option<(Block, Vec<Receipt>)> {
        let inner = self.inner.lock();
        inner
            .snapshot
            .as_ref()
            .map(|s| (s.block.clone(), s.receipts.clone()))
    }

    fn get_sealing_block(
        &self,
        parent: Hash,
        timestamp: u64,
        coinbase: Address,
        random: Hash,
    ) -> Result<Block, MinerError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(MinerError::Busy);
        }
        let parent_header = self
            .backend
            .header_by_hash(&parent)
            .ok_or(MinerError::ParentUnknown(parent))?;

        let (extra, gas_floor, gas_ceil, gas_price) = {
            let inner = self.inner.lock();
            (
                inner.extra.clone(),
                inner.gas_floor,
                inner.gas_ceil,
                inner.gas_price,
            )
        };
        let gas_limit = gas_ceil.max(gas_floor);
        let (tx_hashes, _receipts, gas_used) = select_transactions(
            &self.backend.pending_transactions(),
            gas_limit,
            gas_price,
        );

        let header = Header {
            number: parent_header.number.next(),
            parent_hash: parent,
            timestamp,
            coinbase,
            random,
            extra,
            gas_limit,
            gas_used,
        };
        debug!(number = %header.number, parent = ?parent, "Assembled sealing block");
        Ok(Block { header, tx_hashes })
    }

    fn subscribe_pending_logs(&self) -> Subscription<Vec<Log>> {
        self.pending_logs.subscribe()
    }
}

fn sanitize_recommit(interval: Duration) -> Duration {
    interval.max(MIN_RECOMMIT_INTERVAL)
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Pack pool transactions into the gas limit, cheapest-priced excluded.
fn select_transactions(
    pool: &[PoolTx],
    gas_limit: u64,
    min_gas_price: u64,
) -> (Vec<Hash>, Vec<Receipt>, u64) {
    let mut tx_hashes = Vec::new();
    let mut receipts = Vec::new();
    let mut gas_used = 0u64;
    for tx in pool {
        if tx.gas_price < min_gas_price {
            continue;
        }
        if gas_used + tx.gas > gas_limit {
            continue;
        }
        gas_used += tx.gas;
        tx_hashes.push(tx.hash);
        receipts.push(Receipt {
            tx_hash: tx.hash,
            gas_used: tx.gas,
            logs: tx.logs.clone(),
        });
    }
    (tx_hashes, receipts, gas_used)
}
