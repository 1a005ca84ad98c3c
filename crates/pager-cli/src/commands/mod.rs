//! CLI command implementations.
//!
//! - [`simulate`] - Replay a scenario on a virtual clock
//! - [`inspect`] - Show a persisted escalation and its health

pub mod inspect;
pub mod simulate;

pub use inspect::InspectCommand;
pub use simulate::SimulateCommand;
