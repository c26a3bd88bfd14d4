//! Domain models shared across the whole decision core.

pub mod position;
pub mod signal;
pub mod snapshot;

pub use position::{EntryParams, ExitReason, Position, Side};
pub use signal::{Action, SignalRecord, SignalSource, SourceScores, WeightMap};
pub use snapshot::MarketSnapshot;
