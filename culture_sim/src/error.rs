use thiserror::Error;

#[derive(Debug, Error)]
pub enum SimError {
    #[error("telemetry timeout")]
    Timeout,
    #[error("link down: {0}")]
    LinkDown(String),
    #[error("vial {0} has no pump slot")]
    NoSuchVial(usize),
    #[error("simulator state poisoned")]
    Poisoned,
}

pub type Result<T> = std::result::Result<T, SimError>;
