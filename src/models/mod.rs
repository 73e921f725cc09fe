//! Domain model types.

mod event;
mod memory;
mod signal;

pub use event::{EventHashes, RawEvent};
pub use memory::{MatchType, MemoryContext, MemoryEntry, MemorySource};
pub use signal::{
    Action, Direction, EventType, RiskFlag, SignalResult, SignalStatus, Strength, ASSET_NONE,
};
