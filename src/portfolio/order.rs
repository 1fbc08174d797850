//! Order intents: the contract between a strategy and the ledger.
//!
//! Intents are produced fresh each day and consumed whole by the
//! ledger; they are never retained after application.

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::data::OptionRecord;

/// What a strategy asks the ledger to do with an instrument.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderAction {
    /// Open a long position.
    Buy,
    /// Open a short position.
    Sell,
    /// Refresh market fields on an existing position. No cash effect.
    Update,
}

/// Direction a position was opened with. Fixed for the position's
/// lifetime; determines the settlement sign.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    /// +1 for Buy, -1 for Sell.
    pub fn sign(&self) -> Decimal {
        match self {
            Side::Buy => Decimal::ONE,
            Side::Sell => Decimal::NEGATIVE_ONE,
        }
    }
}

impl OrderAction {
    /// The opening side, if this action opens a position.
    pub fn opening_side(&self) -> Option<Side> {
        match self {
            OrderAction::Buy => Some(Side::Buy),
            OrderAction::Sell => Some(Side::Sell),
            OrderAction::Update => None,
        }
    }
}

/// Intent against a single option contract.
#[derive(Debug, Clone)]
pub struct OptionOrder {
    pub action: OrderAction,
    pub quantity: i64,
    /// Underlying reference price at submission.
    pub spot: Decimal,
    /// Full quote row for the contract.
    pub record: OptionRecord,
}

impl OptionOrder {
    pub fn new(action: OrderAction, quantity: i64, spot: Decimal, record: OptionRecord) -> Self {
        Self {
            action,
            quantity,
            spot,
            record,
        }
    }
}

/// Intent against the underlying equity.
#[derive(Debug, Clone)]
pub struct EquityOrder {
    pub action: OrderAction,
    pub symbol: String,
    pub quantity: i64,
    pub spot: Decimal,
    pub date: NaiveDate,
}

/// One day's intents from a strategy.
#[derive(Debug, Clone, Default)]
pub struct OrderBatch {
    pub options: Vec<OptionOrder>,
    pub equities: Vec<EquityOrder>,
}

impl OrderBatch {
    pub fn is_empty(&self) -> bool {
        self.options.is_empty() && self.equities.is_empty()
    }
}

/// Instrument named by a rejected intent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InstrumentId {
    Option(i64),
    Equity(String),
}

impl std::fmt::Display for InstrumentId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            InstrumentId::Option(id) => write!(f, "optionid {}", id),
            InstrumentId::Equity(symbol) => write!(f, "equity {}", symbol),
        }
    }
}

/// Why an intent was dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    /// Buy/Sell against an instrument that already has an open
    /// position; the caller should have classified it as Update.
    AlreadyOpen,
    /// Update against an instrument with no open position.
    NotHeld,
}

/// An intent the ledger refused. Reported, never fatal: the rest of
/// the batch still applies.
#[derive(Debug, Clone)]
pub struct RejectedOrder {
    pub action: OrderAction,
    pub instrument: InstrumentId,
    pub date: NaiveDate,
    pub reason: RejectReason,
}

impl std::fmt::Display for RejectedOrder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let reason = match self.reason {
            RejectReason::AlreadyOpen => "position already open",
            RejectReason::NotHeld => "no open position",
        };
        write!(
            f,
            "{:?} intent for {} on {} rejected: {}",
            self.action, self.instrument, self.date, reason
        )
    }
}
