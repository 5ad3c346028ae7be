//! Storage Layer
//!
//! SQLite-backed record store. The pipeline reads and writes through the
//! typed methods on [`Database`]; no raw SQL leaks past this module.

mod database;

pub use database::{
    Database, FanoutRun, LensAnalysis, PlannedAnswer, PoolConfig, SharedDatabase,
};
