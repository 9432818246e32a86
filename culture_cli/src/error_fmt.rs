//! Human-readable error descriptions and structured JSON error formatting.

use culture_core::error::{BuildError, CultureError};
use culture_core::JournalError;

/// Map an eyre::Report to a human-readable explanation with likely causes and fix hints.
pub fn humanize(err: &eyre::Report) -> String {
    // Typed matches first
    if let Some(be) = err.downcast_ref::<BuildError>() {
        return match be {
            BuildError::MissingConfig => {
                "What happened: The controller was built without a run configuration.\nLikely causes: The config could not be mapped onto the selected control law.\nHow to fix: Run `culture check` and fix what it reports.".to_string()
            }
            BuildError::InvalidConfig(msg) => format!(
                "What happened: Invalid configuration ({msg}).\nLikely causes: Missing or out-of-range values in the TOML.\nHow to fix: Edit the config file, then rerun `culture check`."
            ),
        };
    }

    if let Some(je) = err.downcast_ref::<JournalError>() {
        return match je {
            JournalError::AlgorithmMismatch { .. } | JournalError::Manifest(_) => format!(
                "What happened: {je}.\nLikely causes: The journal directory belongs to a different experiment.\nHow to fix: Point [store].dir at a fresh directory or restore the original config."
            ),
            JournalError::Corrupt { .. } => format!(
                "What happened: {je}.\nLikely causes: The journal was edited by hand or the disk is failing.\nHow to fix: Move the journal aside; lines before the corrupt one can be recovered manually."
            ),
            _ => format!(
                "What happened: {je}.\nLikely causes: The journal directory is not writable or the disk is full.\nHow to fix: Check permissions and free space for [store].dir."
            ),
        };
    }

    if let Some(ce) = err.downcast_ref::<CultureError>() {
        if matches!(ce, CultureError::Timeout) {
            return "What happened: Telemetry stopped arriving.\nLikely causes: The device link is down or run.telemetry_timeout_ms is too low.\nHow to fix: Check the link, raise the timeout, then rerun; the journal resumes where it stopped.".to_string();
        }
        if let CultureError::CommunicationFailure(detail) = ce {
            return format!(
                "What happened: A device or store call failed ({detail}).\nLikely causes: Link errors or an unwritable journal.\nHow to fix: Re-run with --log-level=debug to see which collaborator failed."
            );
        }
        return format!(
            "What happened: {ce}.\nLikely causes: See logs.\nHow to fix: Re-run with --log-level=debug or set RUST_LOG for more detail."
        );
    }

    // String-based heuristics for errors coming from config loading
    let msg = format!("{err:#}");
    let lower = msg.to_ascii_lowercase();

    if lower.contains("invalid configuration") {
        return format!(
            "What happened: Configuration is invalid or incomplete.\nDetails: {msg}\nHow to fix: Edit the TOML config and try again."
        );
    }

    if lower.contains("pump calibration") {
        return format!(
            "What happened: The pump calibration file could not be used.\nDetails: {msg}\nHow to fix: Expect tab-separated flow rates, one row per rack or a single shared row."
        );
    }

    // Generic fallback
    format!(
        "Something went wrong.\nHow to fix: Re-run with --log-level=debug for details. Original: {msg}"
    )
}

/// Stable exit codes per error class.
pub fn exit_code_for_error(err: &eyre::Report) -> i32 {
    if err.downcast_ref::<BuildError>().is_some() {
        return 2;
    }
    if err.downcast_ref::<JournalError>().is_some() {
        return 5;
    }
    match err.downcast_ref::<CultureError>() {
        Some(CultureError::Timeout) => return 3,
        Some(CultureError::CommunicationFailure(_)) => return 4,
        Some(_) => return 1,
        None => {}
    }
    let lower = format!("{err:#}").to_ascii_lowercase();
    if lower.contains("invalid configuration") || lower.contains("pump calibration") {
        return 2;
    }
    1
}

fn reason_name(err: &eyre::Report) -> &'static str {
    if err.downcast_ref::<BuildError>().is_some() {
        return "InvalidConfig";
    }
    if err.downcast_ref::<JournalError>().is_some() {
        return "Journal";
    }
    match err.downcast_ref::<CultureError>() {
        Some(CultureError::Timeout) => "Timeout",
        Some(CultureError::CommunicationFailure(_)) => "CommunicationFailure",
        Some(_) => "Culture",
        None if exit_code_for_error(err) == 2 => "InvalidConfig",
        None => "Error",
    }
}

/// Structured JSON for errors when --json is enabled.
pub fn format_error_json(err: &eyre::Report) -> String {
    serde_json::json!({
        "reason": reason_name(err),
        "exit_code": exit_code_for_error(err),
        "message": humanize(err),
    })
    .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn typed_errors_keep_their_code_through_context() {
        let e = eyre::Report::new(CultureError::Timeout).wrap_err("telemetry stalled");
        assert_eq!(exit_code_for_error(&e), 3);
        assert!(humanize(&e).contains("Telemetry stopped arriving"));

        let e = eyre::Report::new(CultureError::CommunicationFailure("nak".into()));
        assert_eq!(exit_code_for_error(&e), 4);
        let v: serde_json::Value = serde_json::from_str(&format_error_json(&e)).unwrap();
        assert_eq!(v["reason"], "CommunicationFailure");
    }

    #[test]
    fn config_errors_are_recognised_by_context() {
        let e = eyre::eyre!("run.od_window must be >= 1").wrap_err("invalid configuration in cfg.toml");
        assert_eq!(exit_code_for_error(&e), 2);
        assert!(humanize(&e).contains("od_window"));
        let v: serde_json::Value = serde_json::from_str(&format_error_json(&e)).unwrap();
        assert_eq!(v["reason"], "InvalidConfig");
    }
}
