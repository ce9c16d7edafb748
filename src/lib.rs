//! Core scheduling engine for the repository data-gathering pipeline.
//!
//! See `SPEC_FULL.md` and `DESIGN.md` for the requirements this crate
//! implements and where each piece is grounded.

pub mod api;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod kinds;
pub mod model;
pub mod periodic;
pub mod runner;

pub use config::Config;
pub use dispatcher::SchedWorker;
pub use error::SchedulerError;
