//! Volatility carry strategy.
//!
//! Sells ATM options when implied volatility is rich relative to
//! trailing realized volatility, and refreshes held contracts with
//! each day's quotes so the ledger marks and settles them correctly.

use std::collections::{BTreeMap, VecDeque};

use serde::{Deserialize, Serialize};

use crate::data::{OptionRecord, Snapshot, STRIKE_SCALE};
use crate::portfolio::{OptionOrder, OptionPosition, OrderAction, OrderBatch};

use super::Strategy;

/// Trading days per year, for annualizing realized volatility.
const TRADING_DAYS: f64 = 252.0;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VolatilityCarryConfig {
    /// Snapshot key of the underlying OHLC source.
    pub ohlc_source: String,

    /// Snapshot key of the options chain source.
    pub options_source: String,

    /// Trailing window length (days) for realized volatility.
    pub rv_window: usize,

    /// Sell only when IV >= rv * min_straddle_premium.
    pub min_straddle_premium: f64,

    /// ... and IV <= rv * max_straddle_premium (filters stale quotes).
    pub max_straddle_premium: f64,

    /// Minimum days to expiration for new positions.
    pub min_dte: i64,

    /// Maximum days to expiration for new positions.
    pub max_dte: i64,

    /// Cap on concurrently open option positions.
    pub max_positions: usize,

    /// ATM band as a fraction of spot (0.001 = strike within 0.1%).
    pub atm_band: f64,
}

impl Default for VolatilityCarryConfig {
    fn default() -> Self {
        Self {
            ohlc_source: "ohlc".to_string(),
            options_source: "options".to_string(),
            rv_window: 30,
            min_straddle_premium: 1.2,
            max_straddle_premium: 1.8,
            min_dte: 23,
            max_dte: 30,
            max_positions: 16,
            atm_band: 0.001,
        }
    }
}

pub struct VolatilityCarry {
    config: VolatilityCarryConfig,
    /// Trailing closes, bounded at `rv_window`.
    price_window: VecDeque<f64>,
}

impl VolatilityCarry {
    pub fn new(config: VolatilityCarryConfig) -> Self {
        let capacity = config.rv_window;
        Self {
            config,
            price_window: VecDeque::with_capacity(capacity),
        }
    }

    fn push_close(&mut self, close: f64) {
        if self.price_window.len() == self.config.rv_window {
            self.price_window.pop_front();
        }
        self.price_window.push_back(close);
    }

    /// Annualized realized volatility of log returns over the window.
    fn realized_vol(&self) -> f64 {
        let prices: Vec<f64> = self.price_window.iter().copied().collect();
        let returns: Vec<f64> = prices.windows(2).map(|w| (w[1] / w[0]).ln()).collect();
        if returns.is_empty() {
            return 0.0;
        }
        let mean = returns.iter().sum::<f64>() / returns.len() as f64;
        let variance =
            returns.iter().map(|r| (r - mean).powi(2)).sum::<f64>() / returns.len() as f64;
        variance.sqrt() * TRADING_DAYS.sqrt()
    }

    fn is_atm(&self, record: &OptionRecord, close: f64) -> bool {
        let strike = record.strike_price as f64 / STRIKE_SCALE as f64;
        strike >= close * (1.0 - self.config.atm_band)
            && strike <= close * (1.0 + self.config.atm_band)
    }

    fn iv_is_rich(&self, record: &OptionRecord, rv: f64) -> bool {
        record.impl_volatility >= rv * self.config.min_straddle_premium
            && record.impl_volatility <= rv * self.config.max_straddle_premium
    }
}

impl Strategy for VolatilityCarry {
    fn process(
        &mut self,
        snapshot: &Snapshot,
        positions: &BTreeMap<i64, OptionPosition>,
    ) -> Option<OrderBatch> {
        let bar = snapshot.bar(&self.config.ohlc_source)?;
        let close: f64 = bar.close.try_into().unwrap_or(0.0);
        self.push_close(close);

        // No signal until the trailing window is full.
        if self.price_window.len() < self.config.rv_window {
            return None;
        }
        let rv = self.realized_vol();

        let options = snapshot.options(&self.config.options_source)?;

        let mut batch = OrderBatch::default();
        let mut open_count = positions.len();

        for record in options {
            if positions.contains_key(&record.optionid) {
                // Held contract: refresh its mark with today's quote.
                batch.options.push(OptionOrder::new(
                    OrderAction::Update,
                    1,
                    bar.close,
                    record.clone(),
                ));
                continue;
            }

            let dte = record.dte();
            if dte < self.config.min_dte || dte > self.config.max_dte {
                continue;
            }
            if !self.is_atm(record, close) || !self.iv_is_rich(record, rv) {
                continue;
            }
            if open_count >= self.config.max_positions {
                continue;
            }

            batch.options.push(OptionOrder::new(
                OrderAction::Sell,
                1,
                bar.close,
                record.clone(),
            ));
            open_count += 1;
        }

        if batch.is_empty() {
            None
        } else {
            Some(batch)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::types::tests::sample_option;
    use crate::data::{DayRecords, UnderlyingBar};
    use crate::portfolio::Side;
    use approx::assert_relative_eq;
    use chrono::NaiveDate;
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;

    fn date(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2013, 8, d).unwrap()
    }

    fn snapshot_with(
        day: NaiveDate,
        close: Decimal,
        options: Option<Vec<OptionRecord>>,
    ) -> Snapshot {
        let mut snapshot = Snapshot::new(day);
        snapshot.data.insert(
            "ohlc".to_string(),
            DayRecords::Bar(UnderlyingBar {
                date: day,
                open: close,
                high: close,
                low: close,
                close,
                volume: 1_000_000,
            }),
        );
        if let Some(records) = options {
            snapshot
                .data
                .insert("options".to_string(), DayRecords::Options(records));
        }
        snapshot
    }

    /// Contract expiring 25 days after the quote date, struck at spot.
    fn atm_option(optionid: i64, day: NaiveDate, close: f64, iv: f64) -> OptionRecord {
        let mut record = sample_option(optionid, day);
        record.exdate = day + chrono::Duration::days(25);
        record.strike_price = (close * STRIKE_SCALE as f64).round() as i64;
        record.impl_volatility = iv;
        record
    }

    fn small_config() -> VolatilityCarryConfig {
        VolatilityCarryConfig {
            rv_window: 3,
            ..VolatilityCarryConfig::default()
        }
    }

    fn warm_up(strategy: &mut VolatilityCarry, closes: &[Decimal]) {
        let positions = BTreeMap::new();
        for (i, close) in closes.iter().enumerate() {
            let snapshot = snapshot_with(date(1 + i as u32), *close, None);
            assert!(strategy.process(&snapshot, &positions).is_none());
        }
    }

    #[test]
    fn test_realized_vol_matches_hand_computation() {
        let mut strategy = VolatilityCarry::new(small_config());
        for close in [100.0, 101.0, 99.0] {
            strategy.push_close(close);
        }

        // Log returns: ln(101/100), ln(99/101); population std x sqrt(252).
        let r1 = (101.0f64 / 100.0).ln();
        let r2 = (99.0f64 / 101.0).ln();
        let mean = (r1 + r2) / 2.0;
        let var = ((r1 - mean).powi(2) + (r2 - mean).powi(2)) / 2.0;
        let expected = var.sqrt() * 252.0f64.sqrt();

        assert_relative_eq!(strategy.realized_vol(), expected, epsilon = 1e-12);
    }

    #[test]
    fn test_no_orders_until_window_full() {
        let mut strategy = VolatilityCarry::new(small_config());
        let positions = BTreeMap::new();

        for d in 1..3u32 {
            let day = date(d);
            let chain = vec![atm_option(1, day, 1000.0, 0.5)];
            let snapshot = snapshot_with(day, dec!(1000.0), Some(chain));
            assert!(strategy.process(&snapshot, &positions).is_none());
        }
    }

    #[test]
    fn test_sells_atm_rich_iv_contract() {
        let mut strategy = VolatilityCarry::new(small_config());
        warm_up(&mut strategy, &[dec!(1000.0), dec!(1010.0)]);

        let day = date(3);
        let rv_after = {
            // Window after this day: 1000, 1010, 1000.
            let r1 = (1010.0f64 / 1000.0).ln();
            let r2 = (1000.0f64 / 1010.0).ln();
            let mean = (r1 + r2) / 2.0;
            let var = ((r1 - mean).powi(2) + (r2 - mean).powi(2)) / 2.0;
            var.sqrt() * 252.0f64.sqrt()
        };

        let chain = vec![
            // Rich IV, ATM, in DTE band: should be sold.
            atm_option(1, day, 1000.0, rv_after * 1.5),
            // IV below the premium floor: ignored.
            atm_option(2, day, 1000.0, rv_after * 0.5),
            // Rich IV but far from the money: ignored.
            {
                let mut r = atm_option(3, day, 1000.0, rv_after * 1.5);
                r.strike_price = 1_200_000;
                r
            },
        ];

        let positions = BTreeMap::new();
        let batch = strategy
            .process(&snapshot_with(day, dec!(1000.0), Some(chain)), &positions)
            .expect("expected a sell");

        assert_eq!(batch.options.len(), 1);
        assert_eq!(batch.options[0].action, OrderAction::Sell);
        assert_eq!(batch.options[0].record.optionid, 1);
        assert_eq!(batch.options[0].spot, dec!(1000.0));
    }

    #[test]
    fn test_held_contracts_get_updates() {
        let mut strategy = VolatilityCarry::new(small_config());
        warm_up(&mut strategy, &[dec!(1000.0), dec!(1010.0)]);

        let day = date(3);
        let held = atm_option(42, day, 1000.0, 0.01); // fails every entry filter
        let mut positions = BTreeMap::new();
        positions.insert(
            42,
            OptionPosition {
                opened_as: Side::Sell,
                quantity: 1,
                spot: dec!(1000.0),
                record: held.clone(),
            },
        );

        let batch = strategy
            .process(
                &snapshot_with(day, dec!(1000.0), Some(vec![held])),
                &positions,
            )
            .expect("expected an update");

        assert_eq!(batch.options.len(), 1);
        assert_eq!(batch.options[0].action, OrderAction::Update);
        assert_eq!(batch.options[0].record.optionid, 42);
    }

    #[test]
    fn test_respects_max_positions() {
        let mut config = small_config();
        config.max_positions = 2;
        let mut strategy = VolatilityCarry::new(config);
        warm_up(&mut strategy, &[dec!(1000.0), dec!(1010.0)]);

        let day = date(3);
        let rv_after = {
            let r = (1010.0f64 / 1000.0).ln();
            r * 252.0f64.sqrt()
        };
        let chain: Vec<OptionRecord> = (1..=5)
            .map(|id| atm_option(id, day, 1000.0, rv_after * 1.5))
            .collect();

        let positions = BTreeMap::new();
        let batch = strategy
            .process(&snapshot_with(day, dec!(1000.0), Some(chain)), &positions)
            .expect("expected sells");

        assert_eq!(batch.options.len(), 2);
    }

    #[test]
    fn test_no_options_source_yields_nothing() {
        let mut strategy = VolatilityCarry::new(small_config());
        warm_up(&mut strategy, &[dec!(1000.0), dec!(1010.0)]);

        let positions = BTreeMap::new();
        let snapshot = snapshot_with(date(3), dec!(1000.0), None);
        assert!(strategy.process(&snapshot, &positions).is_none());
    }
}
