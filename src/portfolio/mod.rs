pub mod ledger;
pub mod order;

pub use ledger::{EquityPosition, Ledger, OptionPosition, Settlement};
pub use order::{
    EquityOrder, InstrumentId, OptionOrder, OrderAction, OrderBatch, RejectReason, RejectedOrder,
    Side,
};
