pub mod engine;

pub use engine::{ReplayConfig, ReplayEngine, ReplayError, ReplayResult, ValuePoint};
