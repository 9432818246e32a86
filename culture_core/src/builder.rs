//! Type-state builder for `Fleet`.
//!
//! `build()` is only available once a run config is set; `try_build()` is
//! always available for dynamic checks. Both validate the run config, which
//! may come from code rather than a checked TOML file.

use std::marker::PhantomData;

use culture_traits::{Channel, StateStore};
use culture_traits::command::MAX_VIALS;

use crate::config::{LawConfig, RunConfig};
use crate::engine::Fleet;
use crate::error::{BuildError, Result};

// ── Type-state markers ───────────────────────────────────────────────────────

pub struct Missing;
pub struct Set;

pub struct FleetBuilder<R> {
    run: Option<RunConfig>,
    _r: PhantomData<R>,
}

impl Default for FleetBuilder<Missing> {
    fn default() -> Self {
        Self {
            run: None,
            _r: PhantomData,
        }
    }
}

impl Fleet {
    /// Start building a Fleet.
    pub fn builder() -> FleetBuilder<Missing> {
        FleetBuilder::default()
    }
}

fn invalid(msg: &'static str) -> eyre::Report {
    eyre::Report::new(BuildError::InvalidConfig(msg))
}

/// Checks the core relies on regardless of where the run config came from.
fn validate(run: &RunConfig) -> Result<()> {
    if run.vials.is_empty() {
        return Err(invalid("at least one vial is required"));
    }
    if run.vials.iter().any(|&v| v >= MAX_VIALS) {
        return Err(invalid("vial ids must be below 15 (the last slot drives the drain)"));
    }
    let mut sorted = run.vials.clone();
    sorted.sort_unstable();
    sorted.dedup();
    if sorted.len() != run.vials.len() {
        return Err(invalid("vial ids must be unique"));
    }
    if run.od_window == 0 {
        return Err(invalid("od_window must be >= 1"));
    }
    if !(run.vial_volume_ml.is_finite() && run.vial_volume_ml > 0.0) {
        return Err(invalid("vial volume must be > 0"));
    }
    match &run.law {
        LawConfig::Turbidostat(p) => {
            if !(p.lower_od > 0.0 && p.lower_od < p.upper_od) {
                return Err(invalid("turbidostat needs 0 < lower_od < upper_od"));
            }
        }
        LawConfig::Chemostat(p) => {
            if !(p.bolus_ml.is_finite() && p.bolus_ml > 0.0) {
                return Err(invalid("chemostat bolus must be > 0"));
            }
        }
        LawConfig::Morbidostat(p) => {
            if !(p.pump_wait_min > 0.0) {
                return Err(invalid("morbidostat pump_wait_min must be > 0"));
            }
        }
        LawConfig::TimedMorbidostat(p) => {
            if !(p.base.pump_wait_min > 0.0) {
                return Err(invalid("morbidostat pump_wait_min must be > 0"));
            }
        }
    }
    let channels: &[Channel] = match &run.law {
        LawConfig::Turbidostat(_) | LawConfig::Chemostat(_) => &[Channel::Media],
        LawConfig::Morbidostat(_) | LawConfig::TimedMorbidostat(_) => &Channel::ALL,
    };
    for &vial in &run.vials {
        for &channel in channels {
            let flow = run.flow(channel, vial);
            if !(flow.is_finite() && flow > 0.0) {
                return Err(invalid("pump flow rates must be > 0"));
            }
        }
    }
    Ok(())
}

impl<R> FleetBuilder<R> {
    /// Fallible build available in any type-state.
    pub fn try_build(self) -> Result<Fleet> {
        let run = self
            .run
            .ok_or_else(|| eyre::Report::new(BuildError::MissingConfig))?;
        validate(&run)?;
        Ok(Fleet::fresh(run))
    }

    /// Like `try_build`, but rebuild vial states from `store`. Also returns
    /// the experiment hour to resume from.
    pub fn try_restore<S: StateStore + ?Sized>(self, store: &S) -> Result<(Fleet, f64)> {
        let run = self
            .run
            .ok_or_else(|| eyre::Report::new(BuildError::MissingConfig))?;
        validate(&run)?;
        Fleet::restored(run, store)
    }
}

impl FleetBuilder<Missing> {
    pub fn with_run(self, run: RunConfig) -> FleetBuilder<Set> {
        FleetBuilder {
            run: Some(run),
            _r: PhantomData,
        }
    }
}

impl FleetBuilder<Set> {
    pub fn build(self) -> Result<Fleet> {
        self.try_build()
    }

    pub fn restore<S: StateStore + ?Sized>(self, store: &S) -> Result<(Fleet, f64)> {
        self.try_restore(store)
    }
}
