//! Daily data sources.
//!
//! Two implementations of the same single-pass contract:
//! - [`ChunkedCsvSource`] streams an arbitrarily large, date-sorted
//!   options file in bounded memory, emitting complete-day groups.
//! - [`BulkCsvSource`] loads a small OHLC file whole and emits one bar
//!   per day.
//!
//! A day's rows may straddle a physical chunk boundary, so the chunked
//! source never finalizes the most recent date in its buffer until a
//! later chunk proves the day complete (or the file ends).

use std::collections::VecDeque;
use std::fs::File;
use std::path::{Path, PathBuf};

use chrono::NaiveDate;
use csv::DeserializeRecordsIntoIter;
use rust_decimal::Decimal;
use serde::Deserialize;
use thiserror::Error;

use super::types::{
    flexible_date, DayRecords, Greeks, OptionRecord, OptionType, UnderlyingBar,
    DEFAULT_CONTRACT_SIZE,
};

/// Default records-per-read for the chunked source.
pub const DEFAULT_CHUNK_SIZE: usize = 100_000;

#[derive(Error, Debug)]
pub enum DataError {
    #[error("file not found: {0}")]
    FileNotFound(String),

    #[error("{path}: failed to open: {message}")]
    Open { path: String, message: String },

    #[error("{path}: malformed row {row}, column '{column}': {message}")]
    MalformedRow {
        path: String,
        row: u64,
        column: String,
        message: String,
    },

    #[error("{path}: rows out of date order at row {row}: {date} follows {prev}")]
    OutOfOrder {
        path: String,
        row: u64,
        date: NaiveDate,
        prev: NaiveDate,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Optional `[start_date, end_date]` replay bounds (inclusive).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DateWindow {
    pub start: Option<NaiveDate>,
    pub end: Option<NaiveDate>,
}

impl DateWindow {
    pub fn new(start: Option<NaiveDate>, end: Option<NaiveDate>) -> Self {
        Self { start, end }
    }

    /// Date falls before the window opens.
    pub fn before_start(&self, date: NaiveDate) -> bool {
        self.start.is_some_and(|s| date < s)
    }

    /// Date falls past the window end.
    pub fn after_end(&self, date: NaiveDate) -> bool {
        self.end.is_some_and(|e| date > e)
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        !self.before_start(date) && !self.after_end(date)
    }
}

/// A lazy, finite, single-pass sequence of `(date, records)` in
/// strictly increasing date order. Not restartable.
pub trait DailySource {
    fn next_day(&mut self) -> Result<Option<(NaiveDate, DayRecords)>, DataError>;
}

/// Raw CSV row for the options file. Field names follow the
/// OptionMetrics export headers; extra columns (e.g. an unnamed
/// index) are ignored.
#[derive(Debug, Deserialize)]
struct RawOptionRow {
    optionid: i64,
    secid: i64,
    symbol: String,
    #[serde(with = "flexible_date")]
    date: NaiveDate,
    #[serde(with = "flexible_date")]
    exdate: NaiveDate,
    cp_flag: OptionType,
    strike_price: i64,
    #[serde(with = "rust_decimal::serde::str")]
    best_bid: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    best_offer: Decimal,
    volume: i64,
    open_interest: i64,
    impl_volatility: f64,
    delta: f64,
    gamma: f64,
    vega: f64,
    theta: f64,
    #[serde(default = "default_contract_size")]
    contract_size: i64,
    #[serde(default)]
    index_flag: i32,
    #[serde(default)]
    issuer: String,
    #[serde(default)]
    exercise_style: String,
}

fn default_contract_size() -> i64 {
    DEFAULT_CONTRACT_SIZE
}

impl From<RawOptionRow> for OptionRecord {
    fn from(raw: RawOptionRow) -> Self {
        OptionRecord {
            optionid: raw.optionid,
            secid: raw.secid,
            symbol: raw.symbol,
            date: raw.date,
            exdate: raw.exdate,
            cp_flag: raw.cp_flag,
            strike_price: raw.strike_price,
            best_bid: raw.best_bid,
            best_offer: raw.best_offer,
            volume: raw.volume,
            open_interest: raw.open_interest,
            impl_volatility: raw.impl_volatility,
            greeks: Greeks {
                delta: raw.delta,
                gamma: raw.gamma,
                vega: raw.vega,
                theta: raw.theta,
            },
            contract_size: raw.contract_size,
            index_flag: raw.index_flag,
            issuer: raw.issuer,
            exercise_style: raw.exercise_style,
        }
    }
}

/// Streams a large, date-sorted options CSV in bounded memory.
///
/// Memory discipline: `buffer` only ever holds the not-yet-finalized
/// trailing day plus at most one chunk of newer rows; it is drained
/// into `ready` as soon as a later date proves a day complete.
pub struct ChunkedCsvSource {
    path: PathBuf,
    rows: DeserializeRecordsIntoIter<File, RawOptionRow>,
    headers: csv::StringRecord,
    chunk_size: usize,
    window: DateWindow,
    /// Rows whose day may still receive more records.
    buffer: Vec<OptionRecord>,
    /// Finalized days awaiting yield.
    ready: VecDeque<(NaiveDate, Vec<OptionRecord>)>,
    /// Records consumed from the reader so far.
    rows_read: u64,
    prev_date: Option<NaiveDate>,
    exhausted: bool,
    done: bool,
}

impl ChunkedCsvSource {
    /// Open a source over `path`, reading `chunk_size` records per
    /// physical read and yielding only days inside `window`.
    pub fn open(
        path: impl AsRef<Path>,
        chunk_size: usize,
        window: DateWindow,
    ) -> Result<Self, DataError> {
        let path = path.as_ref().to_path_buf();
        if !path.exists() {
            return Err(DataError::FileNotFound(path.display().to_string()));
        }

        let mut reader = csv::Reader::from_path(&path).map_err(|e| DataError::Open {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        let headers = reader
            .headers()
            .map_err(|e| DataError::Open {
                path: path.display().to_string(),
                message: e.to_string(),
            })?
            .clone();

        Ok(Self {
            path,
            rows: reader.into_deserialize(),
            headers,
            chunk_size: chunk_size.max(1),
            window,
            buffer: Vec::new(),
            ready: VecDeque::new(),
            rows_read: 0,
            prev_date: None,
            exhausted: false,
            done: false,
        })
    }

    /// Append up to one chunk of rows to the buffer, failing fast on
    /// malformed rows or a date regression.
    fn read_chunk(&mut self) -> Result<(), DataError> {
        for _ in 0..self.chunk_size {
            match self.rows.next() {
                Some(Ok(raw)) => {
                    self.rows_read += 1;
                    let record = OptionRecord::from(raw);
                    if let Some(prev) = self.prev_date {
                        if record.date < prev {
                            return Err(DataError::OutOfOrder {
                                path: self.path.display().to_string(),
                                row: self.rows_read,
                                date: record.date,
                                prev,
                            });
                        }
                    }
                    self.prev_date = Some(record.date);
                    self.buffer.push(record);
                }
                Some(Err(err)) => {
                    self.rows_read += 1;
                    return Err(self.malformed(err));
                }
                None => {
                    self.exhausted = true;
                    break;
                }
            }
        }
        Ok(())
    }

    fn malformed(&self, err: csv::Error) -> DataError {
        let column = match err.kind() {
            csv::ErrorKind::Deserialize { err: de, .. } => de
                .field()
                .and_then(|i| self.headers.get(i as usize))
                .unwrap_or("<record>")
                .to_string(),
            _ => "<record>".to_string(),
        };
        DataError::MalformedRow {
            path: self.path.display().to_string(),
            row: self.rows_read,
            column,
            message: err.to_string(),
        }
    }

    /// Finalize every complete day in the buffer. The most recent date
    /// is held back unless `flush_trailing` (reader exhausted). Window
    /// filtering happens here, per finalized day, never on raw chunks.
    fn finalize(&mut self, flush_trailing: bool) {
        while !self.buffer.is_empty() {
            let first_date = self.buffer[0].date;
            let boundary = self
                .buffer
                .iter()
                .position(|r| r.date != first_date)
                .unwrap_or(self.buffer.len());

            // Trailing day: may still receive rows from the next chunk.
            if boundary == self.buffer.len() && !flush_trailing {
                return;
            }

            let day: Vec<OptionRecord> = self.buffer.drain(..boundary).collect();

            if self.window.after_end(first_date) {
                // Past the window: stop without reading remaining input.
                self.buffer.clear();
                self.done = true;
                return;
            }
            if !self.window.before_start(first_date) {
                self.ready.push_back((first_date, day));
            }
        }
    }
}

impl DailySource for ChunkedCsvSource {
    fn next_day(&mut self) -> Result<Option<(NaiveDate, DayRecords)>, DataError> {
        loop {
            if let Some((date, rows)) = self.ready.pop_front() {
                return Ok(Some((date, DayRecords::Options(rows))));
            }
            if self.done {
                return Ok(None);
            }
            self.read_chunk()?;
            self.finalize(self.exhausted);
            if self.exhausted {
                self.done = true;
            }
        }
    }
}

/// Raw CSV row for the OHLC file.
#[derive(Debug, Deserialize)]
struct RawBarRow {
    #[serde(with = "flexible_date")]
    date: NaiveDate,
    #[serde(with = "rust_decimal::serde::str")]
    open: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    high: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    low: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    close: Decimal,
    #[serde(default)]
    volume: i64,
}

impl From<RawBarRow> for UnderlyingBar {
    fn from(raw: RawBarRow) -> Self {
        UnderlyingBar {
            date: raw.date,
            open: raw.open,
            high: raw.high,
            low: raw.low,
            close: raw.close,
            volume: raw.volume,
        }
    }
}

/// Loads a small OHLC CSV whole: sort by date, filter by window,
/// yield one bar per day.
pub struct BulkCsvSource {
    bars: std::vec::IntoIter<UnderlyingBar>,
}

impl BulkCsvSource {
    pub fn open(path: impl AsRef<Path>, window: DateWindow) -> Result<Self, DataError> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(DataError::FileNotFound(path.display().to_string()));
        }

        let mut reader = csv::Reader::from_path(path).map_err(|e| DataError::Open {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        let headers = reader
            .headers()
            .map_err(|e| DataError::Open {
                path: path.display().to_string(),
                message: e.to_string(),
            })?
            .clone();

        let mut bars: Vec<UnderlyingBar> = Vec::new();
        for (idx, result) in reader.into_deserialize::<RawBarRow>().enumerate() {
            let raw = result.map_err(|err| {
                let column = match err.kind() {
                    csv::ErrorKind::Deserialize { err: de, .. } => de
                        .field()
                        .and_then(|i| headers.get(i as usize))
                        .unwrap_or("<record>")
                        .to_string(),
                    _ => "<record>".to_string(),
                };
                DataError::MalformedRow {
                    path: path.display().to_string(),
                    row: idx as u64 + 1,
                    column,
                    message: err.to_string(),
                }
            })?;
            let bar = UnderlyingBar::from(raw);
            if window.contains(bar.date) {
                bars.push(bar);
            }
        }

        bars.sort_by_key(|b| b.date);

        Ok(Self {
            bars: bars.into_iter(),
        })
    }
}

impl DailySource for BulkCsvSource {
    fn next_day(&mut self) -> Result<Option<(NaiveDate, DayRecords)>, DataError> {
        Ok(self.bars.next().map(|bar| (bar.date, DayRecords::Bar(bar))))
    }
}
