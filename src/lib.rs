//! Baccarat Table - chat-hosted baccarat rounds with atomic settlement
//!
//! Each chat runs its own table: a persistent multi-deck shoe, timed betting
//! rounds and a settlement engine that commits every balance, ledger and
//! history change of a round in a single write batch.

pub mod config;
pub mod errors;
pub mod factory;
pub mod games;
pub mod metrics;
pub mod notify;
pub mod scheduler;
pub mod storage;
pub mod store;
pub mod table;

pub use config::{CasinoConfig, ConfigBuilder, ConfigLoader};
pub use errors::{CasinoError, CasinoResult, ValidationError};
pub use factory::{CasinoFactory, CasinoHandle};
pub use games::{AccountId, ChatId, RoundId, Side};
pub use notify::{SettlementNotifier, TracingNotifier};
pub use table::{CasinoTable, SettleOutcome};
