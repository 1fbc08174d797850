//! Core data types for the daily replay.
//!
//! These types represent the fundamental market observations flowing
//! through the backtester: one row per option contract per trade date
//! (OptionMetrics-style schema) and one OHLC bar per day for the
//! underlying.

use std::collections::BTreeMap;

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Option type (call or put).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OptionType {
    #[serde(rename = "C", alias = "CALL", alias = "call", alias = "c")]
    Call,
    #[serde(rename = "P", alias = "PUT", alias = "put", alias = "p")]
    Put,
}

impl OptionType {
    pub fn from_flag(s: &str) -> Option<Self> {
        match s.to_uppercase().as_str() {
            "C" | "CALL" => Some(Self::Call),
            "P" | "PUT" => Some(Self::Put),
            _ => None,
        }
    }

    pub fn as_flag(&self) -> &'static str {
        match self {
            Self::Call => "C",
            Self::Put => "P",
        }
    }
}

/// Greeks for an option contract.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Greeks {
    pub delta: f64,
    pub gamma: f64,
    pub vega: f64,
    pub theta: f64,
}

/// Which greek to aggregate in exposure queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Greek {
    Delta,
    Gamma,
    Vega,
    Theta,
}

impl Greeks {
    pub fn get(&self, greek: Greek) -> f64 {
        match greek {
            Greek::Delta => self.delta,
            Greek::Gamma => self.gamma,
            Greek::Vega => self.vega,
            Greek::Theta => self.theta,
        }
    }
}

/// Scale factor applied to `strike_price` in the source data.
pub const STRIKE_SCALE: i64 = 1000;

/// Default contract multiplier (units of underlying per contract).
pub const DEFAULT_CONTRACT_SIZE: i64 = 100;

/// A single option quote row.
///
/// One row per contract per trade date. `optionid` uniquely and
/// immutably identifies a contract across its life.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptionRecord {
    /// Unique contract identifier.
    pub optionid: i64,

    /// Security identifier of the underlying.
    pub secid: i64,

    /// Contract symbol (e.g., "SPX 130921C1655000").
    pub symbol: String,

    /// Trade date of the quote.
    #[serde(with = "flexible_date")]
    pub date: NaiveDate,

    /// Expiration date.
    #[serde(with = "flexible_date")]
    pub exdate: NaiveDate,

    /// Call or put flag.
    pub cp_flag: OptionType,

    /// Strike price, integer-scaled by [`STRIKE_SCALE`].
    pub strike_price: i64,

    /// Best bid.
    pub best_bid: Decimal,

    /// Best offer.
    pub best_offer: Decimal,

    /// Trading volume.
    pub volume: i64,

    /// Open interest.
    pub open_interest: i64,

    /// Implied volatility.
    pub impl_volatility: f64,

    /// Greeks.
    #[serde(flatten)]
    pub greeks: Greeks,

    /// Contract multiplier.
    #[serde(default = "default_contract_size")]
    pub contract_size: i64,

    /// 1 if the underlying is an index.
    #[serde(default)]
    pub index_flag: i32,

    /// Issuer name.
    #[serde(default)]
    pub issuer: String,

    /// Exercise style ("E" european, "A" american).
    #[serde(default)]
    pub exercise_style: String,
}

fn default_contract_size() -> i64 {
    DEFAULT_CONTRACT_SIZE
}

impl OptionRecord {
    /// Strike in price units (undoes the integer scaling).
    pub fn strike(&self) -> Decimal {
        Decimal::from(self.strike_price) / Decimal::from(STRIKE_SCALE)
    }

    /// Mid price: average of best bid and best offer.
    pub fn mid_price(&self) -> Decimal {
        (self.best_bid + self.best_offer) / Decimal::from(2)
    }

    /// Days to expiration as of the quote date.
    pub fn dte(&self) -> i64 {
        (self.exdate - self.date).num_days()
    }

    /// Root symbol of the underlying ("SPX 130921C1655000" -> "SPX").
    pub fn underlying_symbol(&self) -> &str {
        self.symbol
            .split_whitespace()
            .next()
            .unwrap_or(&self.symbol)
    }
}

/// Daily OHLC bar for the underlying.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnderlyingBar {
    #[serde(with = "flexible_date")]
    pub date: NaiveDate,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub volume: i64,
}

/// One source's payload for a single day.
///
/// The chunked options source emits a full day's group of rows; the
/// bulk OHLC source emits one bar per day.
#[derive(Debug, Clone, PartialEq)]
pub enum DayRecords {
    Options(Vec<OptionRecord>),
    Bar(UnderlyingBar),
}

impl DayRecords {
    pub fn as_options(&self) -> Option<&[OptionRecord]> {
        match self {
            Self::Options(records) => Some(records),
            Self::Bar(_) => None,
        }
    }

    pub fn as_bar(&self) -> Option<&UnderlyingBar> {
        match self {
            Self::Bar(bar) => Some(bar),
            Self::Options(_) => None,
        }
    }

    /// Number of records carried for the day.
    pub fn len(&self) -> usize {
        match self {
            Self::Options(records) => records.len(),
            Self::Bar(_) => 1,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// All sources' payloads for one simulated day.
///
/// A source absent from the map had no observation for that date
/// (weekends, holidays, listing gaps); that is not an error.
#[derive(Debug, Clone, Default)]
pub struct Snapshot {
    pub date: NaiveDate,
    pub data: BTreeMap<String, DayRecords>,
}

impl Snapshot {
    pub fn new(date: NaiveDate) -> Self {
        Self {
            date,
            data: BTreeMap::new(),
        }
    }

    /// Options rows from the named source, if present today.
    pub fn options(&self, source: &str) -> Option<&[OptionRecord]> {
        self.data.get(source).and_then(DayRecords::as_options)
    }

    /// OHLC bar from the named source, if present today.
    pub fn bar(&self, source: &str) -> Option<&UnderlyingBar> {
        self.data.get(source).and_then(DayRecords::as_bar)
    }
}

/// Serde adapter accepting both `%Y-%m-%d` and `%Y-%m-%d %H:%M:%S`
/// date columns (source files mix the two).
pub(crate) mod flexible_date {
    use chrono::{NaiveDate, NaiveDateTime};
    use serde::{self, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(date: &NaiveDate, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&date.format("%Y-%m-%d").to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<NaiveDate, D::Error> {
        let s = String::deserialize(deserializer)?;
        parse(&s).map_err(serde::de::Error::custom)
    }

    pub fn parse(s: &str) -> Result<NaiveDate, String> {
        NaiveDate::parse_from_str(s, "%Y-%m-%d")
            .or_else(|_| {
                NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S").map(|dt| dt.date())
            })
            .map_err(|_| format!("unparseable date '{}'", s))
    }
}
