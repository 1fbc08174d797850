//! Core replay engine.
//!
//! Drives the daily loop:
//! 1. Pull the next date-aligned snapshot from the synchronizer
//! 2. Hand it to the strategy with the open option positions
//! 3. Apply the returned intents to the ledger
//! 4. Settle expirations for the day
//! 5. Record market value
//!
//! Repeats until the synchronizer is exhausted or the window ends;
//! both are normal termination, not errors.

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::data::source::DEFAULT_CHUNK_SIZE;
use crate::data::{DailySource, DataError, DateWindow, Synchronizer};
use crate::portfolio::{Ledger, RejectedOrder};
use crate::strategy::Strategy;

#[derive(Error, Debug)]
pub enum ReplayError {
    #[error("data error: {0}")]
    Data(#[from] DataError),
}

/// Configuration for a replay run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplayConfig {
    /// First date to replay (inclusive). None = from data start.
    pub start_date: Option<NaiveDate>,

    /// Last date to replay (inclusive). None = to data end.
    pub end_date: Option<NaiveDate>,

    /// Records per physical read in the chunked source.
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,

    /// Starting cash.
    pub initial_market_value: Decimal,
}

fn default_chunk_size() -> usize {
    DEFAULT_CHUNK_SIZE
}

impl Default for ReplayConfig {
    fn default() -> Self {
        Self {
            start_date: None,
            end_date: None,
            chunk_size: DEFAULT_CHUNK_SIZE,
            initial_market_value: Decimal::from(1_000_000),
        }
    }
}

impl ReplayConfig {
    pub fn window(&self) -> DateWindow {
        DateWindow::new(self.start_date, self.end_date)
    }
}

/// Daily market value record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValuePoint {
    pub date: NaiveDate,
    pub market_value: Decimal,
    pub open_options: usize,
}

/// Result of a completed replay.
#[derive(Debug, Clone)]
pub struct ReplayResult {
    /// First replayed date, if any day was replayed.
    pub start_date: Option<NaiveDate>,

    /// Last replayed date.
    pub end_date: Option<NaiveDate>,

    /// Daily market value curve.
    pub value_curve: Vec<ValuePoint>,

    pub initial_value: Decimal,

    pub final_value: Decimal,

    /// Number of option expirations settled.
    pub settlements: usize,

    /// Intents the ledger refused, in order of occurrence.
    pub rejected_orders: Vec<RejectedOrder>,
}

impl ReplayResult {
    pub fn trading_days(&self) -> usize {
        self.value_curve.len()
    }

    /// Total return over the replay, percent.
    pub fn total_return_pct(&self) -> f64 {
        let initial: f64 = self.initial_value.try_into().unwrap_or(1.0);
        let final_v: f64 = self.final_value.try_into().unwrap_or(1.0);
        if initial == 0.0 {
            return 0.0;
        }
        (final_v - initial) / initial * 100.0
    }

    /// Annualized Sharpe ratio of daily returns (risk-free rate 0).
    pub fn sharpe_ratio(&self) -> f64 {
        if self.value_curve.len() < 2 {
            return 0.0;
        }

        let returns: Vec<f64> = self
            .value_curve
            .windows(2)
            .map(|w| {
                let prev: f64 = w[0].market_value.try_into().unwrap_or(1.0);
                let curr: f64 = w[1].market_value.try_into().unwrap_or(1.0);
                (curr - prev) / prev
            })
            .collect();

        let mean = returns.iter().sum::<f64>() / returns.len() as f64;
        let variance =
            returns.iter().map(|r| (r - mean).powi(2)).sum::<f64>() / returns.len() as f64;
        let std_dev = variance.sqrt();

        if std_dev == 0.0 {
            return 0.0;
        }
        (mean * 252.0_f64.sqrt()) / std_dev
    }

    /// Generate summary string.
    pub fn summary(&self) -> String {
        let range = match (self.start_date, self.end_date) {
            (Some(start), Some(end)) => format!("{} to {}", start, end),
            _ => "empty".to_string(),
        };
        format!(
            "Replay Results ({})\n\
             ----------------------------------------\n\
             Trading Days: {}\n\
             Final Value: {:.2}\n\
             Total Return: {:.2}%\n\
             Sharpe Ratio: {:.2}\n\
             Settlements: {}\n\
             Rejected Intents: {}",
            range,
            self.trading_days(),
            self.final_value,
            self.total_return_pct(),
            self.sharpe_ratio(),
            self.settlements,
            self.rejected_orders.len(),
        )
    }
}

/// The daily replay loop, owning the synchronizer, strategy and ledger.
pub struct ReplayEngine<S> {
    config: ReplayConfig,
    synchronizer: Synchronizer,
    strategy: S,
    ledger: Ledger,
}

impl<S: Strategy> ReplayEngine<S> {
    /// Build an engine over named daily sources. The configured window
    /// is enforced by the synchronizer.
    pub fn new(
        config: ReplayConfig,
        sources: Vec<(String, Box<dyn DailySource>)>,
        strategy: S,
    ) -> Self {
        let synchronizer = Synchronizer::new(sources, config.window());
        let ledger = Ledger::new(config.initial_market_value);
        Self {
            config,
            synchronizer,
            strategy,
            ledger,
        }
    }

    /// Run the replay to completion.
    pub fn run(&mut self) -> Result<ReplayResult, ReplayError> {
        let mut value_curve: Vec<ValuePoint> = Vec::new();
        let mut rejected_orders: Vec<RejectedOrder> = Vec::new();
        let mut settlements = 0usize;

        info!(
            initial_value = %self.config.initial_market_value,
            "starting replay"
        );

        while let Some(snapshot) = self.synchronizer.next_snapshot()? {
            let date = snapshot.date;

            if let Some(batch) = self.strategy.process(&snapshot, self.ledger.options()) {
                for rejection in self.ledger.apply_option_orders(batch.options) {
                    warn!("{}", rejection);
                    rejected_orders.push(rejection);
                }
                for rejection in self.ledger.apply_equity_orders(batch.equities) {
                    warn!("{}", rejection);
                    rejected_orders.push(rejection);
                }
            }

            // After the day's fills, so same-day entries settle today.
            let settled = self.ledger.settle_expirations(date);
            if !settled.is_empty() {
                debug!(%date, count = settled.len(), "settled expirations");
                settlements += settled.len();
            }

            value_curve.push(ValuePoint {
                date,
                market_value: self.ledger.market_value(),
                open_options: self.ledger.options().len(),
            });
        }

        let result = ReplayResult {
            start_date: value_curve.first().map(|p| p.date),
            end_date: value_curve.last().map(|p| p.date),
            value_curve,
            initial_value: self.config.initial_market_value,
            final_value: self.ledger.market_value(),
            settlements,
            rejected_orders,
        };

        info!(
            trading_days = result.trading_days(),
            final_value = %result.final_value,
            "replay complete"
        );
        Ok(result)
    }

    /// Ledger state (final state after `run`).
    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::types::tests::sample_option;
    use crate::data::{DayRecords, OptionRecord, Snapshot, UnderlyingBar};
    use crate::portfolio::{OptionOrder, OptionPosition, OrderAction, OrderBatch};
    use rust_decimal_macros::dec;
    use std::collections::BTreeMap;

    struct VecSource {
        items: std::vec::IntoIter<(NaiveDate, DayRecords)>,
    }

    impl VecSource {
        fn boxed(items: Vec<(NaiveDate, DayRecords)>) -> Box<dyn DailySource> {
            Box::new(Self {
                items: items.into_iter(),
            })
        }
    }

    impl DailySource for VecSource {
        fn next_day(&mut self) -> Result<Option<(NaiveDate, DayRecords)>, DataError> {
            Ok(self.items.next())
        }
    }

    /// Sells the contract on first sight, updates it afterwards.
    struct SellOnceThenUpdate {
        sold: bool,
    }

    impl Strategy for SellOnceThenUpdate {
        fn process(
            &mut self,
            snapshot: &Snapshot,
            positions: &BTreeMap<i64, OptionPosition>,
        ) -> Option<OrderBatch> {
            let records = snapshot.options("options")?;
            let mut batch = OrderBatch::default();
            for record in records {
                let action = if positions.contains_key(&record.optionid) {
                    OrderAction::Update
                } else if self.sold {
                    continue;
                } else {
                    self.sold = true;
                    OrderAction::Sell
                };
                let spot = snapshot
                    .bar("ohlc")
                    .map(|b| b.close)
                    .unwrap_or_else(|| record.strike());
                batch
                    .options
                    .push(OptionOrder::new(action, 1, spot, record.clone()));
            }
            if batch.is_empty() {
                None
            } else {
                Some(batch)
            }
        }
    }

    fn date(m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2013, m, d).unwrap()
    }

    fn bar_day(day: NaiveDate, close: Decimal) -> (NaiveDate, DayRecords) {
        (
            day,
            DayRecords::Bar(UnderlyingBar {
                date: day,
                open: close,
                high: close,
                low: close,
                close,
                volume: 1_000_000,
            }),
        )
    }

    fn chain_day(day: NaiveDate, record: OptionRecord) -> (NaiveDate, DayRecords) {
        (day, DayRecords::Options(vec![record]))
    }

    #[test]
    fn test_round_trip_replay() {
        // Day 1: sell the 1655 call at mid 26.6 -> 1,002,660.
        // Day 2 (= exdate): update spot to 1700 then settle intrinsic
        // 4,500 -> 998,160. Net P&L on the trade: -1,840.
        let quote = sample_option(100959462, date(8, 16));
        let expiry_quote = sample_option(100959462, date(9, 21));

        let options = VecSource::boxed(vec![
            chain_day(date(8, 16), quote),
            chain_day(date(9, 21), expiry_quote),
        ]);
        let ohlc = VecSource::boxed(vec![
            bar_day(date(8, 16), dec!(1655.8)),
            bar_day(date(9, 21), dec!(1700.0)),
        ]);

        let config = ReplayConfig::default();
        let mut engine = ReplayEngine::new(
            config,
            vec![
                ("ohlc".to_string(), ohlc),
                ("options".to_string(), options),
            ],
            SellOnceThenUpdate { sold: false },
        );

        let result = engine.run().unwrap();

        assert_eq!(result.trading_days(), 2);
        assert_eq!(result.value_curve[0].market_value, dec!(1_002_660));
        assert_eq!(result.value_curve[0].open_options, 1);
        assert_eq!(result.value_curve[1].market_value, dec!(998_160));
        assert_eq!(result.value_curve[1].open_options, 0);
        assert_eq!(result.final_value, dec!(998_160));
        assert_eq!(result.settlements, 1);
        assert!(result.rejected_orders.is_empty());
        assert!(engine.ledger().options().is_empty());
    }

    #[test]
    fn test_empty_replay() {
        let config = ReplayConfig::default();
        let mut engine = ReplayEngine::new(
            config,
            vec![("options".to_string(), VecSource::boxed(vec![]))],
            SellOnceThenUpdate { sold: false },
        );

        let result = engine.run().unwrap();
        assert_eq!(result.trading_days(), 0);
        assert_eq!(result.final_value, dec!(1_000_000));
        assert!(result.start_date.is_none());
        assert_eq!(result.total_return_pct(), 0.0);
    }

    #[test]
    fn test_window_bounds_replay() {
        let days: Vec<(NaiveDate, DayRecords)> = (16..=20)
            .map(|d| bar_day(date(8, d), dec!(1655.8)))
            .collect();

        let config = ReplayConfig {
            start_date: Some(date(8, 17)),
            end_date: Some(date(8, 19)),
            ..ReplayConfig::default()
        };
        let mut engine = ReplayEngine::new(
            config,
            vec![("ohlc".to_string(), VecSource::boxed(days))],
            SellOnceThenUpdate { sold: false },
        );

        let result = engine.run().unwrap();
        assert_eq!(result.start_date, Some(date(8, 17)));
        assert_eq!(result.end_date, Some(date(8, 19)));
        assert_eq!(result.trading_days(), 3);
    }

    #[test]
    fn test_same_day_fill_settles_same_cycle() {
        // Contract sold on its own expiration date: the credit and the
        // settlement land on the same day's cycle, exactly once.
        let quote = sample_option(1, date(9, 21));

        let config = ReplayConfig::default();
        let mut engine = ReplayEngine::new(
            config,
            vec![
                (
                    "options".to_string(),
                    VecSource::boxed(vec![chain_day(date(9, 21), quote)]),
                ),
                (
                    "ohlc".to_string(),
                    VecSource::boxed(vec![bar_day(date(9, 21), dec!(1700.0))]),
                ),
            ],
            SellOnceThenUpdate { sold: false },
        );

        let result = engine.run().unwrap();
        assert_eq!(result.settlements, 1);
        // Credit 2,660 then intrinsic debit 4,500 on the same day.
        assert_eq!(result.final_value, dec!(998_160));
    }

    #[test]
    fn test_sharpe_of_flat_curve_is_zero() {
        let result = ReplayResult {
            start_date: Some(date(8, 16)),
            end_date: Some(date(8, 19)),
            value_curve: vec![
                ValuePoint {
                    date: date(8, 16),
                    market_value: dec!(1_000_000),
                    open_options: 0,
                },
                ValuePoint {
                    date: date(8, 19),
                    market_value: dec!(1_000_000),
                    open_options: 0,
                },
            ],
            initial_value: dec!(1_000_000),
            final_value: dec!(1_000_000),
            settlements: 0,
            rejected_orders: Vec::new(),
        };
        assert_eq!(result.sharpe_ratio(), 0.0);
        assert_eq!(result.total_return_pct(), 0.0);
    }
}
