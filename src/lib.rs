pub mod backtest;
pub mod data;
pub mod portfolio;
pub mod strategy;

// Re-export commonly used types
pub use backtest::{ReplayConfig, ReplayEngine, ReplayResult, ValuePoint};
pub use data::{
    BulkCsvSource, ChunkedCsvSource, DailySource, DataError, DateWindow, DayRecords, OptionRecord,
    OptionType, Snapshot, Synchronizer, UnderlyingBar,
};
pub use portfolio::{Ledger, OptionOrder, OrderAction, OrderBatch, RejectedOrder};
pub use strategy::{Strategy, VolatilityCarry, VolatilityCarryConfig};
