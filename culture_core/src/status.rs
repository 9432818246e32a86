//! Outcome of one fleet tick.

use crate::error::CultureError;
use culture_traits::PumpCommand;

/// What the tick did on the device side.
#[derive(Debug, Clone, PartialEq)]
pub enum TickStatus {
    /// A command was sent.
    Emitted(PumpCommand),
    /// Nothing to actuate; no command sent.
    Idle,
    /// The recurring schedule already running was recomputed unchanged.
    Unchanged,
    /// Telemetry was incomplete; nothing evaluated.
    Incomplete,
}

impl TickStatus {
    #[inline]
    pub fn command(&self) -> Option<&PumpCommand> {
        match self {
            Self::Emitted(c) => Some(c),
            _ => None,
        }
    }
}

/// Per-tick summary returned to the runner.
#[derive(Debug, Clone, PartialEq)]
pub struct TickReport {
    pub at_h: f64,
    pub status: TickStatus,
    /// Vials skipped this tick and why.
    pub skipped: Vec<(usize, CultureError)>,
    /// Vials whose actuation or concentration hit a bound.
    pub clamped: Vec<usize>,
    /// Journal records committed.
    pub records: usize,
}

impl TickReport {
    pub fn incomplete(at_h: f64) -> Self {
        Self {
            at_h,
            status: TickStatus::Incomplete,
            skipped: Vec::new(),
            clamped: Vec::new(),
            records: 0,
        }
    }
}
