#![cfg_attr(all(not(debug_assertions), not(test)), deny(warnings))]
#![cfg_attr(
    all(not(debug_assertions), not(test)),
    deny(clippy::all, clippy::pedantic, clippy::nursery)
)]
#![allow(clippy::module_name_repetitions, clippy::missing_errors_doc)]
#![cfg_attr(not(test), deny(clippy::unwrap_used, clippy::expect_used))]
//! Continuous-culture control core (device-agnostic).
//!
//! Turns per-vial optical-density telemetry into one pump command per tick.
//! All device and disk interactions go through the `culture_traits`
//! collaborator traits: `TelemetrySource`, `StateStore` and `CommandSink`.
//!
//! ## Architecture
//!
//! - **Configuration**: runtime parameters per control law (`config`, built
//!   from `culture_config::Config` in `conversions`)
//! - **Smoothing**: rolling OD window reduced to its median (`smoothing`)
//! - **Growth rate**: log-linear least squares over a growth curve (`growth`)
//! - **Control laws**: turbidostat, chemostat, morbidostat and its legacy and
//!   timed variants behind the `ControlLaw` strategy (`laws`)
//! - **Dispatch**: per-vial slots folded into one fleet command (`dispatcher`)
//! - **Engine**: the atomic fleet tick over scratch state (`engine`)
//! - **Persistence**: JSON-lines journal and restart restore (`journal`, `state`)
//! - **Runtime**: telemetry sampler thread and experiment loop (`sampler`, `runner`)
//!
//! ## Time
//!
//! Experiment time is in hours since the experiment started; every record and
//! every debounce check uses it.

pub mod atomic;
pub mod builder;
pub mod collab_error;
pub mod config;
pub mod conversions;
pub mod dispatcher;
pub mod engine;
pub mod error;
pub mod growth;
pub mod journal;
pub mod laws;
pub mod mocks;
pub mod runner;
pub mod sampler;
pub mod smoothing;
pub mod state;
pub mod status;
pub mod util;

pub use builder::FleetBuilder;
pub use config::{LawConfig, RunConfig};
pub use dispatcher::{Dispatch, Dispatcher};
pub use engine::Fleet;
pub use error::{BuildError, CultureError, Report, Result};
pub use journal::{Journal, JournalError, Manifest};
pub use laws::{ControlLaw, VialDecision};
pub use runner::{OdBlank, RunOptions, RunSummary, run};
pub use sampler::TelemetrySampler;
pub use state::VialState;
pub use status::{TickReport, TickStatus};
