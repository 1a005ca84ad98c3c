//! # pager-cli
//!
//! Command-line front end for the escalation engine.
//!
//! Provides commands for:
//! - Replaying scenario files on a virtual clock (`simulate`)
//! - Inspecting persisted escalation documents (`inspect`)
//!
//! # Architecture
//!
//! Scenarios run against the in-memory collaborators shipped with
//! `pager-escalation`. Wake-ups go to a manual queue and the simulator
//! advances its clock to the earliest pending wake-up or scripted event.
//!
//! ```text
//! ┌──────────────┐  trigger / events   ┌──────────────────┐
//! │  scenario    │────────────────────►│  Engine          │
//! └──────────────┘                     └────────┬─────────┘
//!        ▲          due wake-ups                │ schedule
//!        └─────────────────────────────── ManualQueue
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod cli;
pub mod commands;
pub mod error;
pub mod output;
pub mod scenario;

pub use cli::{Cli, Commands, Format, InspectArgs, LogFormat, SimulateArgs};
pub use error::CliError;
pub use output::OutputFormat;
pub use scenario::{ScenarioAction, ScenarioConfig, ScenarioEvent};
