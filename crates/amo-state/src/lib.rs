//! The deterministic state machine behind the AMO blockchain: a versioned
//! Merkle store, the typed domain store with its secondary indexes, the block
//! lifecycle (replay prevention, block binding, laziness accounting, reward
//! and penalty distribution, draft processing), transaction dispatch, and the
//! ABCI driver that sequences it all per consensus callback.

#[macro_use]
extern crate tracing;

pub mod abci;
pub mod app;
pub mod blockchain;
pub mod governance;
pub mod kv;
pub mod merkle;
pub mod query;
pub mod store;
pub mod tx;

pub use app::{App, AppDbs, AppState};
pub use store::Store;
