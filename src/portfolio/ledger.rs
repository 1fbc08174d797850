//! The portfolio ledger.
//!
//! The sole state machine mutating positions and market value. Applies
//! strategy intents (open/refresh), settles expirations at intrinsic
//! value, and answers exposure queries. Per position the lifecycle is
//! `Open(Buy|Sell) -> Updated* -> Settled` (removed); no intermediate
//! state is observable from outside.

use std::collections::BTreeMap;

use chrono::NaiveDate;
use rust_decimal::Decimal;

use crate::data::{Greek, OptionRecord, OptionType};

use super::order::{
    EquityOrder, InstrumentId, OptionOrder, OrderAction, RejectReason, RejectedOrder, Side,
};

/// An open option position, keyed by `optionid` in the ledger.
#[derive(Debug, Clone)]
pub struct OptionPosition {
    /// Side the position was opened with. Never changed by updates.
    pub opened_as: Side,
    pub quantity: i64,
    /// Latest underlying reference price; used at settlement.
    pub spot: Decimal,
    /// Latest quote row for the contract.
    pub record: OptionRecord,
}

impl OptionPosition {
    /// Refresh market-observable fields from a newer quote row.
    /// Identity fields and the opening side are left untouched.
    fn refresh(&mut self, order: &OptionOrder) {
        self.spot = order.spot;
        self.record.date = order.record.date;
        self.record.best_bid = order.record.best_bid;
        self.record.best_offer = order.record.best_offer;
        self.record.volume = order.record.volume;
        self.record.open_interest = order.record.open_interest;
        self.record.impl_volatility = order.record.impl_volatility;
        self.record.greeks = order.record.greeks;
    }

    /// Option payoff at expiration, per unit of underlying.
    fn intrinsic_value(&self) -> Decimal {
        let strike = self.record.strike();
        match self.record.cp_flag {
            OptionType::Call => (self.spot - strike).max(Decimal::ZERO),
            OptionType::Put => (strike - self.spot).max(Decimal::ZERO),
        }
    }
}

/// An open equity position, keyed by symbol.
#[derive(Debug, Clone)]
pub struct EquityPosition {
    pub opened_as: Side,
    pub symbol: String,
    pub quantity: i64,
    pub spot: Decimal,
}

/// Record of one settled expiration.
#[derive(Debug, Clone)]
pub struct Settlement {
    pub optionid: i64,
    pub exdate: NaiveDate,
    /// Signed cash applied to market value.
    pub amount: Decimal,
}

/// Portfolio state: a scalar market value plus open positions.
///
/// Created once at backtest start, mutated once per simulated day
/// (apply, then settle), read at the end of the replay.
pub struct Ledger {
    market_value: Decimal,
    options: BTreeMap<i64, OptionPosition>,
    equities: BTreeMap<String, EquityPosition>,
}

impl Ledger {
    pub fn new(initial_market_value: Decimal) -> Self {
        Self {
            market_value: initial_market_value,
            options: BTreeMap::new(),
            equities: BTreeMap::new(),
        }
    }

    pub fn market_value(&self) -> Decimal {
        self.market_value
    }

    /// Open option positions, keyed by optionid.
    pub fn options(&self) -> &BTreeMap<i64, OptionPosition> {
        &self.options
    }

    /// Open equity positions, keyed by symbol.
    pub fn equities(&self) -> &BTreeMap<String, EquityPosition> {
        &self.equities
    }

    /// Apply one day's option intents. Rejected intents are returned
    /// for reporting; the rest of the batch still applies.
    ///
    /// Buy debits and Sell credits `quantity x contract_size x mid`;
    /// Update refreshes market fields with no cash effect.
    pub fn apply_option_orders(&mut self, orders: Vec<OptionOrder>) -> Vec<RejectedOrder> {
        let mut rejected = Vec::new();

        for order in orders {
            let optionid = order.record.optionid;
            match order.action.opening_side() {
                Some(side) => {
                    if self.options.contains_key(&optionid) {
                        rejected.push(RejectedOrder {
                            action: order.action,
                            instrument: InstrumentId::Option(optionid),
                            date: order.record.date,
                            reason: RejectReason::AlreadyOpen,
                        });
                        continue;
                    }

                    let notional = order.record.mid_price()
                        * Decimal::from(order.record.contract_size)
                        * Decimal::from(order.quantity);
                    // Sell credits premium, Buy pays it.
                    self.market_value -= side.sign() * notional;

                    self.options.insert(
                        optionid,
                        OptionPosition {
                            opened_as: side,
                            quantity: order.quantity,
                            spot: order.spot,
                            record: order.record,
                        },
                    );
                }
                None => match self.options.get_mut(&optionid) {
                    Some(position) => position.refresh(&order),
                    None => rejected.push(RejectedOrder {
                        action: order.action,
                        instrument: InstrumentId::Option(optionid),
                        date: order.record.date,
                        reason: RejectReason::NotHeld,
                    }),
                },
            }
        }

        rejected
    }

    /// Apply one day's equity intents. Buy debits `spot x quantity`,
    /// Sell credits it; Update re-marks the held quantity to a new
    /// spot (mark-to-market, not a cash trade).
    pub fn apply_equity_orders(&mut self, orders: Vec<EquityOrder>) -> Vec<RejectedOrder> {
        let mut rejected = Vec::new();

        for order in orders {
            match order.action.opening_side() {
                Some(side) => {
                    if self.equities.contains_key(&order.symbol) {
                        rejected.push(RejectedOrder {
                            action: order.action,
                            instrument: InstrumentId::Equity(order.symbol),
                            date: order.date,
                            reason: RejectReason::AlreadyOpen,
                        });
                        continue;
                    }

                    let notional = order.spot * Decimal::from(order.quantity);
                    self.market_value -= side.sign() * notional;

                    self.equities.insert(
                        order.symbol.clone(),
                        EquityPosition {
                            opened_as: side,
                            symbol: order.symbol,
                            quantity: order.quantity,
                            spot: order.spot,
                        },
                    );
                }
                None => match self.equities.get_mut(&order.symbol) {
                    Some(position) => {
                        let move_pnl = (order.spot - position.spot)
                            * Decimal::from(position.quantity)
                            * position.opened_as.sign();
                        self.market_value += move_pnl;
                        position.spot = order.spot;
                    }
                    None => rejected.push(RejectedOrder {
                        action: order.action,
                        instrument: InstrumentId::Equity(order.symbol),
                        date: order.date,
                        reason: RejectReason::NotHeld,
                    }),
                },
            }
        }

        rejected
    }

    /// Settle every open option with `exdate <= current_date` at
    /// intrinsic value, exactly once, and remove it.
    ///
    /// Must run after the day's `apply_*` calls so same-day fills are
    /// settled on the correct cycle.
    pub fn settle_expirations(&mut self, current_date: NaiveDate) -> Vec<Settlement> {
        let expired: Vec<i64> = self
            .options
            .iter()
            .filter(|(_, p)| p.record.exdate <= current_date)
            .map(|(id, _)| *id)
            .collect();

        let mut settlements = Vec::with_capacity(expired.len());
        for optionid in expired {
            if let Some(position) = self.options.remove(&optionid) {
                let amount = position.opened_as.sign()
                    * position.intrinsic_value()
                    * Decimal::from(position.record.contract_size)
                    * Decimal::from(position.quantity);
                self.market_value += amount;
                settlements.push(Settlement {
                    optionid,
                    exdate: position.record.exdate,
                    amount,
                });
            }
        }
        settlements
    }

    /// Greek exposure grouped by underlying symbol:
    /// sum of `greek x quantity x contract_size` over open options.
    pub fn greek_exposure(&self, greek: Greek) -> BTreeMap<String, f64> {
        let mut exposure: BTreeMap<String, f64> = BTreeMap::new();
        for position in self.options.values() {
            let value = position.record.greeks.get(greek)
                * position.quantity as f64
                * position.record.contract_size as f64;
            *exposure
                .entry(position.record.underlying_symbol().to_string())
                .or_default() += value;
        }
        exposure
    }
}
