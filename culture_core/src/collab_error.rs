//! Maps `Box<dyn Error>` from collaborator boundaries to typed `CultureError`.
//!
//! The traits in `culture_traits` use `Box<dyn Error + Send + Sync>` so any
//! device or store can plug in; this module converts those to our typed
//! error enum, with an optional feature-gated path for `culture_sim::SimError`.

use crate::error::CultureError;

/// Map a collaborator error to a typed `CultureError`.
///
/// Attempts to downcast known simulator errors first, then falls back
/// to string-based heuristics.
pub fn map_collab_error(e: &(dyn std::error::Error + 'static)) -> CultureError {
    // Feature-gated: precise mapping for the simulator's typed error
    #[cfg(feature = "sim-errors")]
    {
        if let Some(se) = e.downcast_ref::<culture_sim::SimError>() {
            return match se {
                culture_sim::SimError::Timeout => CultureError::Timeout,
                other => CultureError::CommunicationFailure(other.to_string()),
            };
        }
    }

    if let Some(existing) = e.downcast_ref::<CultureError>() {
        return existing.clone();
    }

    // Fallback: string-based detection
    let s = e.to_string();
    if s.to_lowercase().contains("timeout") || s.to_lowercase().contains("timed out") {
        CultureError::Timeout
    } else {
        CultureError::CommunicationFailure(s)
    }
}

/// Wrap a boxed collaborator error as a report carrying the typed error.
pub fn collab_report(
    e: Box<dyn std::error::Error + Send + Sync>,
    what: &'static str,
) -> eyre::Report {
    let typed = map_collab_error(e.as_ref());
    eyre::Report::new(typed).wrap_err(what)
}
