//! Control laws: one strategy per algorithm, selected once per run.
//!
//! A law sees one vial at a time. It mutates that vial's (scratch) state and
//! returns the pump slots it wants plus the journal records describing what
//! it did. Fleet-level concerns (drain sizing, command kind) are also asked
//! of the law so the dispatcher stays algorithm-agnostic.

pub mod chemostat;
pub mod morbidostat;
pub mod turbidostat;

use crate::config::{LawConfig, RunConfig};
use crate::error::CultureError;
use crate::state::VialState;
use culture_traits::{Channel, CommandKind, RecordBody, Slot};

pub use chemostat::Chemostat;
pub use morbidostat::{Morbidostat, TimedMorbidostat};
pub use turbidostat::Turbidostat;

/// Read-only inputs shared by every vial in a tick.
#[derive(Debug, Clone, Copy)]
pub struct LawContext<'a> {
    pub at_h: f64,
    pub run: &'a RunConfig,
}

impl LawContext<'_> {
    #[inline]
    pub fn flow(&self, channel: Channel, vial: usize) -> f64 {
        self.run.flow(channel, vial)
    }

    #[inline]
    pub fn volume_ml(&self) -> f64 {
        self.run.vial_volume_ml
    }
}

/// What one vial wants this tick.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VialDecision {
    pub slots: Vec<(Channel, Slot)>,
    /// Journal bodies, stamped with the tick time by the engine.
    pub records: Vec<RecordBody>,
    /// A growth curve that started at this hour just ended.
    pub growth_since_h: Option<f64>,
    /// An overflow or concentration bound was applied.
    pub clamped: bool,
}

impl VialDecision {
    /// Longest single pump activation asked for.
    pub fn max_seconds(&self) -> f64 {
        self.slots.iter().map(|(_, s)| s.seconds()).fold(0.0, f64::max)
    }
}

pub trait ControlLaw: Send + Sync {
    fn name(&self) -> &'static str;

    fn command_kind(&self) -> CommandKind {
        CommandKind::Immediate
    }

    /// Decide for one vial whose smoothed OD is `od`.
    fn evaluate(
        &self,
        state: &mut VialState,
        od: f64,
        ctx: &LawContext<'_>,
    ) -> Result<VialDecision, CultureError>;

    /// Decision for a vial without usable OD this tick. Laws that hold a
    /// standing schedule restate it; the rest skip the vial.
    fn standing(&self, state: &VialState) -> Result<VialDecision, CultureError> {
        Err(CultureError::DataUnavailable {
            vial: state.vial,
            have: state.window.len(),
            need: state.window.capacity(),
        })
    }

    /// Drain slot given every per-vial slot of the tick.
    fn drain(&self, slots: &[(Channel, Slot)]) -> Slot;
}

/// Build the law named by the run config.
pub fn select(law: &LawConfig) -> Box<dyn ControlLaw> {
    match law {
        LawConfig::Turbidostat(p) => Box::new(Turbidostat::new(p.clone())),
        LawConfig::Chemostat(p) => Box::new(Chemostat::new(p.clone())),
        LawConfig::Morbidostat(p) => Box::new(Morbidostat::new(p.clone())),
        LawConfig::TimedMorbidostat(p) => Box::new(TimedMorbidostat::new(p.clone())),
    }
}
