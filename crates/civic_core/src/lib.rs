pub mod api;
pub mod changes;
pub mod config;
pub mod db;
pub mod error;
pub mod rate_gate;
pub mod roster;
pub mod schema;
pub mod session;
pub mod sync;

pub use api::{GatedApi, LegiScanClient, LegislativeApi};
pub use config::SyncConfig;
pub use db::{CacheStore, MemoryCache, SqliteCache};
pub use error::{ApiError, ApiResult};
pub use rate_gate::{Clock, ManualClock, RateGate, TokioClock};
pub use sync::{SyncReport, VoteSynchronizer};
