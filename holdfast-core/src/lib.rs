//! Holdfast Core - persistent chunk-loading claims for simulated worlds
//!
//! Keeps long-lived chunk reservations alive across process restarts:
//! - pluggable storage backends (flat-file JSON, SQLite) behind one contract
//! - per-owner, per-type quota balancing with deterministic demotion
//! - startup/shutdown reconciliation against the host's activation subsystem

pub mod activation;
pub mod balance;
pub mod claim;
pub mod error;
pub mod ledger;
pub mod reconcile;
pub mod storage;

pub use activation::{ChunkActivator, WorldCatalog};
pub use balance::{BalanceChange, BalancingEngine, EngineStats, QuotaStanding};
pub use claim::{ChunkPos, ClaimRecord, ClaimType, OwnerId, SERVER_OWNER};
pub use error::{HoldError, Result};
pub use ledger::{LedgerEntry, QuotaDefaults, QuotaLedger};
pub use reconcile::{LifecycleState, ReconcileController};
pub use storage::{
    BackendConstructor, FlatFileBackend, SqliteBackend, StorageBackend, StorageRegistry,
    StorageSnapshot,
};
