use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum CultureError {
    /// Not enough smoothed data for this vial yet; the vial is skipped.
    #[error("vial {vial}: OD window has {have} of {need} samples")]
    DataUnavailable { vial: usize, have: usize, need: usize },
    #[error("growth rate needs at least two valid samples, got {0}")]
    InsufficientData(usize),
    #[error("growth rate regression is indeterminate (no time spread)")]
    RegressionIndeterminate,
    /// Persisted or derived state contradicts itself; the vial is isolated.
    #[error("vial {vial}: inconsistent state: {reason}")]
    ConfigInconsistent { vial: usize, reason: String },
    /// A collaborator failed mid-tick; the whole tick is abandoned.
    #[error("communication failure: {0}")]
    CommunicationFailure(String),
    #[error("vial {vial}: sample at {at_h} h precedes {last_h} h")]
    NonMonotonicSample { vial: usize, at_h: f64, last_h: f64 },
    #[error("timeout waiting for telemetry")]
    Timeout,
}

#[derive(Debug, Error, Clone)]
pub enum BuildError {
    #[error("missing run config")]
    MissingConfig,
    #[error("invalid config: {0}")]
    InvalidConfig(&'static str),
}

pub type Result<T> = eyre::Result<T>;
pub use eyre::Report;
