pub mod source;
pub mod sync;
pub mod types;

pub use source::{BulkCsvSource, ChunkedCsvSource, DailySource, DataError, DateWindow};
pub use sync::Synchronizer;
pub use types::{
    DayRecords, Greek, Greeks, OptionRecord, OptionType, Snapshot, UnderlyingBar,
    DEFAULT_CONTRACT_SIZE, STRIKE_SCALE,
};
