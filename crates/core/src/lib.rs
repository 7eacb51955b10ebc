#![forbid(unsafe_code)]

pub mod gate;
pub mod model;
pub mod sync;
pub mod time;
pub mod wire;

pub use gate::{GateDecision, GateError};
pub use sync::SyncState;
pub use time::Clock;
