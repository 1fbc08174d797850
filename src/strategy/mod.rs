//! Strategy contract and bundled strategies.

pub mod volatility_carry;

use std::collections::BTreeMap;

use crate::data::Snapshot;
use crate::portfolio::{OptionPosition, OrderBatch};

/// A pluggable trading strategy.
///
/// Called once per simulated day with that day's snapshot and the
/// ledger's open option positions. May own rolling state (e.g. a
/// trailing price window) but must not mutate its inputs; position
/// changes happen only through the returned intents.
pub trait Strategy {
    fn process(
        &mut self,
        snapshot: &Snapshot,
        positions: &BTreeMap<i64, OptionPosition>,
    ) -> Option<OrderBatch>;
}

pub use volatility_carry::{VolatilityCarry, VolatilityCarryConfig};
