//! Block production control layer.
//!
//! Two cooperating pieces:
//!
//! - [`Worker`]: the block-assembly handle. Rebuilds the pending block on a
//!   recommit interval, answers synchronous sealing requests, and publishes
//!   pending logs.
//! - [`Miner`]: the supervisor. Gates the worker on chain-sync lifecycle
//!   events and owns the public control surface.
//!
//! The supervisor runs as one background task; all gating state lives on
//! that task. See [`miner`] for the control loop semantics.

mod backend;
mod config;
mod engine;
mod error;
mod miner;
mod worker;

pub use backend::{ChainBackend, PoolTx};
pub use config::MinerConfig;
pub use engine::SealEngine;
pub use error::{ChainError, EngineError, MinerError};
pub use miner::Miner;
pub use worker::{Worker, WorkerApi, MIN_RECOMMIT_INTERVAL};
