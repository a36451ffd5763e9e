//! Supervisor control-loop behavior against a recording worker double.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tendermill_events::{Feed, Subscription, SyncEvent};
use tendermill_miner::{EngineError, Miner, MinerError, SealEngine, WorkerApi};
use tendermill_types::{Address, Block, Hash, Header, Log, Receipt, StateSnapshot};
use tracing_test::traced_test;

/// Worker double that records observable transitions.
///
/// `start`/`stop` are recorded only when they change the running flag,
/// mirroring the production worker's idempotent behavior.
#[derive(Default)]
struct RecordingWorker {
    running: AtomicBool,
    closed: AtomicBool,
    starts: AtomicUsize,
    stops: AtomicUsize,
    closes: AtomicUsize,
    calls: Mutex<Vec<&'static str>>,
    logs: Feed<Vec<Log>>,
}

impl RecordingWorker {
    fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn call_log(&self) -> Vec<&'static str> {
        self.calls.lock().clone()
    }
}

impl WorkerApi for RecordingWorker {
    fn start(&self) {
        if self.closed.load(Ordering::Acquire) {
            return;
        }
        if !self.running.swap(true, Ordering::AcqRel) {
            self.starts.fetch_add(1, Ordering::AcqRel);
            self.calls.lock().push("start");
        }
    }

    fn stop(&self) {
        if self.running.swap(false, Ordering::AcqRel) {
            self.stops.fetch_add(1, Ordering::AcqRel);
            self.calls.lock().push("stop");
        }
    }

    fn close(&self) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            self.running.store(false, Ordering::Release);
            self.closes.fetch_add(1, Ordering::AcqRel);
            self.calls.lock().push("close");
        }
    }

    fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire) && !self.closed.load(Ordering::Acquire)
    }

    fn set_extra(&self, extra: Vec<u8>) -> Result<(), MinerError> {
        if extra.len() > tendermill_types::MAX_EXTRA_DATA_SIZE {
            return Err(MinerError::ExtraTooLarge {
                len: extra.len(),
                max: tendermill_types::MAX_EXTRA_DATA_SIZE,
            });
        }
        self.calls.lock().push("set_extra");
        Ok(())
    }

    fn set_recommit_interval(&self, _interval: Duration) {
        self.calls.lock().push("set_recommit_interval");
    }

    fn set_gas_ceil(&self, _ceil: u64) {
        self.calls.lock().push("set_gas_ceil");
    }

    fn enable_preseal(&self) {
        self.calls.lock().push("enable_preseal");
    }

    fn disable_preseal(&self) {
        self.calls.lock().push("disable_preseal");
    }

    fn pending(&self) -> Option<(Block, StateSnapshot)> {
        None
    }

    fn pending_block(&self) -> Option<Block> {
        None
    }

    fn pending_block_and_receipts(&self) -> Option<(Block, Vec<Receipt>)> {
        None
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
        Ok(Block::empty(Header {
            number: tendermill_types::BlockHeight(1),
            parent_hash: parent,
            timestamp,
            coinbase,
            random,
            extra: Vec::new(),
            gas_limit: 0,
            gas_used: 0,
        }))
    }

    fn subscribe_pending_logs(&self) -> Subscription<Vec<Log>> {
        self.logs.subscribe()
    }
}

struct BftEngine;

impl SealEngine for BftEngine {
    fn seal(&self, block: &Block) -> Result<Block, EngineError> {
        Ok(block.clone())
    }

    fn verify_header(&self, _header: &Header) -> Result<(), EngineError> {
        Ok(())
    }
}

struct PowEngine;

impl SealEngine for PowEngine {
    fn seal(&self, block: &Block) -> Result<Block, EngineError> {
        Ok(block.clone())
    }

    fn verify_header(&self, _header: &Header) -> Result<(), EngineError> {
        Ok(())
    }

    fn hashrate(&self) -> Option<u64> {
        Some(42)
    }
}

fn setup() -> (Arc<RecordingWorker>, Miner<RecordingWorker>, Feed<SyncEvent>) {
    let worker = RecordingWorker::new();
    let feed = Feed::new();
    let miner = Miner::new(Arc::clone(&worker), Arc::new(BftEngine), &feed);
    (worker, miner, feed)
}

/// Poll `cond` until it holds or a one-second deadline passes.
async fn wait_until(cond: impl Fn() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(1);
    while !cond() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "condition not reached within deadline"
        );
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
}

/// Give the control loop a beat, then check `cond` still holds.
async fn assert_holds(cond: impl Fn() -> bool) {
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(cond());
}

#[tokio::test]
#[traced_test]
async fn sync_start_pauses_mining_and_done_resumes() {
    let (worker, miner, feed) = setup();

    miner.start().await;
    wait_until(|| worker.starts.load(Ordering::Acquire) == 1).await;
    assert!(miner.mining());

    feed.publish(SyncEvent::Started);
    wait_until(|| worker.stops.load(Ordering::Acquire) == 1).await;
    assert!(!miner.mining());
    assert!(logs_contain("Mining aborted due to sync"));

    // Exactly one stop before the sync resolves.
    assert_holds(|| worker.stops.load(Ordering::Acquire) == 1).await;

    feed.publish(SyncEvent::Done);
    wait_until(|| worker.starts.load(Ordering::Acquire) == 2).await;
    assert!(miner.mining());
    assert_eq!(worker.call_log(), vec!["start", "stop", "start"]);
}

#[tokio::test]
async fn sync_events_are_ignored_after_first_done() {
    let (worker, miner, feed) = setup();

    miner.start().await;
    wait_until(|| worker.starts.load(Ordering::Acquire) == 1).await;

    // First sync pauses; its completion resumes and unsubscribes.
    feed.publish(SyncEvent::Started);
    wait_until(|| worker.stops.load(Ordering::Acquire) == 1).await;
    feed.publish(SyncEvent::Done);
    wait_until(|| worker.starts.load(Ordering::Acquire) == 2).await;

    // A replayed sync start must not touch the worker again.
    feed.publish(SyncEvent::Started);
    assert_holds(|| worker.stops.load(Ordering::Acquire) == 1).await;
    assert!(miner.mining());
}

#[tokio::test]
async fn sync_failed_allows_restart() {
    let (worker, miner, feed) = setup();

    // Sync begins while idle: nothing to abort, but starting is gated.
    feed.publish(SyncEvent::Started);
    assert_holds(|| worker.stops.load(Ordering::Acquire) == 0).await;

    miner.start().await;
    assert_holds(|| worker.starts.load(Ordering::Acquire) == 0).await;
    assert!(!miner.mining());

    // A failed sync lifts the gate and honors the deferred start.
    feed.publish(SyncEvent::Failed);
    wait_until(|| worker.starts.load(Ordering::Acquire) == 1).await;
    assert!(miner.mining());

    // Failed does not unsubscribe: a second sync still pauses mining.
    feed.publish(SyncEvent::Started);
    wait_until(|| worker.stops.load(Ordering::Acquire) == 1).await;
    assert!(!miner.mining());
}

#[tokio::test]
async fn close_shuts_worker_and_stops_reacting() {
    let (worker, miner, feed) = setup();

    miner.start().await;
    wait_until(|| worker.starts.load(Ordering::Acquire) == 1).await;

    miner.close().await;
    assert_eq!(worker.closes.load(Ordering::Acquire), 1);
    assert!(!miner.mining());

    // No worker interaction after close, whatever arrives.
    let calls_at_close = worker.call_log();
    miner.start().await;
    miner.stop().await;
    feed.publish(SyncEvent::Started);
    assert_holds(|| worker.call_log() == calls_at_close).await;
}

#[tokio::test]
async fn start_and_stop_are_idempotent() {
    let (worker, miner, _feed) = setup();

    miner.start().await;
    miner.start().await;
    wait_until(|| worker.starts.load(Ordering::Acquire) == 1).await;
    assert_holds(|| worker.starts.load(Ordering::Acquire) == 1).await;

    miner.stop().await;
    miner.stop().await;
    wait_until(|| worker.stops.load(Ordering::Acquire) == 1).await;
    assert_holds(|| worker.stops.load(Ordering::Acquire) == 1).await;

    miner.close().await;
}

#[tokio::test]
async fn set_extra_forwards_and_validates() {
    let (worker, miner, _feed) = setup();

    assert_eq!(miner.set_extra(vec![0u8; 32]), Ok(()));
    assert_eq!(
        miner.set_extra(vec![0u8; 33]),
        Err(MinerError::ExtraTooLarge { len: 33, max: 32 })
    );
    // Repeating the same call leaves the worker in the same state.
    assert_eq!(miner.set_extra(vec![0u8; 32]), Ok(()));
    assert_eq!(
        worker
            .call_log()
            .iter()
            .filter(|c| **c == "set_extra")
            .count(),
        2
    );
    miner.close().await;
}

#[tokio::test]
async fn hashrate_projects_to_zero_without_pow() {
    let worker = RecordingWorker::new();
    let feed = Feed::new();
    let bft = Miner::new(Arc::clone(&worker), Arc::new(BftEngine), &feed);
    assert_eq!(bft.hashrate(), 0);
    bft.close().await;

    let worker = RecordingWorker::new();
    let pow = Miner::new(Arc::clone(&worker), Arc::new(PowEngine), &feed);
    assert_eq!(pow.hashrate(), 42);
    pow.close().await;
}

#[tokio::test]
async fn supervisor_survives_sync_feed_closure() {
    let (worker, miner, feed) = setup();

    feed.close();
    // Control channels still work after the bus-closure sentinel.
    miner.start().await;
    wait_until(|| worker.starts.load(Ordering::Acquire) == 1).await;
    miner.stop().await;
    wait_until(|| worker.stops.load(Ordering::Acquire) == 1).await;
    miner.close().await;
    assert_eq!(worker.closes.load(Ordering::Acquire), 1);
}
