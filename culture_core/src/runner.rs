//! Experiment loop: sampler thread in, fleet ticks, pump commands out.

use crate::engine::Fleet;
use crate::error::{CultureError, Result};
use crate::sampler::{Stamped, TelemetrySampler};
use crate::status::TickStatus;
use culture_traits::clock::Clock;
use culture_traits::{CommandSink, StateStore, TelemetryFrame, TelemetrySource};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

/// Extra wait on top of the source timeout before a missing frame counts
/// as a failure.
const RECV_SLACK: Duration = Duration::from_secs(1);

#[derive(Debug, Clone)]
pub struct RunOptions {
    /// Stop after this many frames; `None` runs until shutdown.
    pub max_ticks: Option<u64>,
    pub telemetry_timeout: Duration,
    /// Subtract each vial's first reading from all later ones.
    pub blank_od: bool,
    /// Give up after this many failed ticks in a row.
    pub max_consecutive_failures: u32,
    /// Send a stop-all command when the loop ends.
    pub stop_on_exit: bool,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            max_ticks: None,
            telemetry_timeout: Duration::from_secs(5),
            blank_od: false,
            max_consecutive_failures: 10,
            stop_on_exit: true,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RunSummary {
    pub law: &'static str,
    pub ticks: u64,
    pub commands: u64,
    pub idle: u64,
    pub unchanged: u64,
    pub incomplete: u64,
    pub failed: u64,
    pub isolated: Vec<usize>,
    pub last_at_h: f64,
}

/// Per-vial OD blank taken from the first complete frame.
#[derive(Debug, Clone, Default)]
pub struct OdBlank {
    offsets: Option<Vec<f64>>,
}

impl OdBlank {
    /// Blank `frame` in place; the first frame seen becomes the blank.
    pub fn apply(&mut self, frame: &mut TelemetryFrame) {
        let offsets = self.offsets.get_or_insert_with(|| {
            let b: Vec<f64> = frame
                .od
                .iter()
                .map(|v| if v.is_finite() { *v } else { 0.0 })
                .collect();
            tracing::info!(blank = ?b, "OD blank recorded");
            b
        });
        for (od, blank) in frame.od.iter_mut().zip(offsets.iter()) {
            *od -= blank;
        }
    }
}

/// Drive `fleet` from `source` until `max_ticks`, `shutdown`, or too many
/// consecutive failures. `start_h` is the experiment hour to resume from.
#[allow(clippy::too_many_arguments)]
pub fn run<T, S, K, C>(
    fleet: &mut Fleet,
    source: T,
    store: &mut S,
    sink: &mut K,
    clock: C,
    start_h: f64,
    opts: &RunOptions,
    shutdown: &AtomicBool,
) -> Result<RunSummary>
where
    T: TelemetrySource + Send + 'static,
    S: StateStore + ?Sized,
    K: CommandSink + ?Sized,
    C: Clock + Send + Sync + 'static,
{
    let sampler = TelemetrySampler::spawn(source, opts.telemetry_timeout, start_h, clock);
    let mut summary = RunSummary {
        law: fleet.law_name(),
        last_at_h: start_h,
        ..RunSummary::default()
    };
    let mut blank = OdBlank::default();
    let mut consecutive = 0u32;
    let mut fatal: Option<eyre::Report> = None;

    tracing::info!(law = fleet.law_name(), vials = ?fleet.run().vials, start_h, "experiment started");

    while !shutdown.load(Ordering::Relaxed) {
        if opts.max_ticks.is_some_and(|max| summary.ticks >= max) {
            break;
        }
        let Some(sample) = sampler.recv_timeout(opts.telemetry_timeout + RECV_SLACK) else {
            if shutdown.load(Ordering::Relaxed) {
                break;
            }
            summary.failed += 1;
            consecutive += 1;
            tracing::warn!(
                stalled_ms = sampler.stalled_for_now(),
                consecutive,
                "no telemetry"
            );
            if consecutive >= opts.max_consecutive_failures {
                fatal = Some(eyre::Report::new(CultureError::Timeout).wrap_err("telemetry stalled"));
                break;
            }
            continue;
        };

        summary.ticks += 1;
        let result = sample
            .map_err(|e| eyre::Report::new(e).wrap_err("read telemetry"))
            .and_then(|Stamped { at_h, mut frame }| {
                if opts.blank_od
                    && let Some(f) = frame.as_mut()
                {
                    blank.apply(f);
                }
                fleet.tick(at_h, frame.as_ref(), store, sink)
            });

        match result {
            Ok(report) => {
                consecutive = 0;
                summary.last_at_h = report.at_h;
                match report.status {
                    TickStatus::Emitted(_) => summary.commands += 1,
                    TickStatus::Idle => summary.idle += 1,
                    TickStatus::Unchanged => summary.unchanged += 1,
                    TickStatus::Incomplete => summary.incomplete += 1,
                }
                tracing::debug!(
                    at_h = report.at_h,
                    records = report.records,
                    skipped = report.skipped.len(),
                    clamped = ?report.clamped,
                    "tick"
                );
            }
            Err(e) => {
                summary.failed += 1;
                consecutive += 1;
                tracing::warn!(error = %e, consecutive, "tick abandoned");
                if consecutive >= opts.max_consecutive_failures {
                    fatal = Some(e.wrap_err(format!("{consecutive} consecutive ticks failed")));
                    break;
                }
            }
        }
    }
    drop(sampler);

    summary.isolated = fleet
        .vials()
        .iter()
        .filter(|v| v.is_faulted())
        .map(|v| v.vial)
        .collect();

    if opts.stop_on_exit {
        let stopped = fleet.stop_all(sink);
        if let Err(e) = stopped {
            tracing::error!(error = %e, "stop-all failed; pumps may still be running");
            if fatal.is_none() {
                return Err(e);
            }
        }
    }

    if let Some(e) = fatal {
        return Err(e);
    }
    tracing::info!(
        ticks = summary.ticks,
        commands = summary.commands,
        failed = summary.failed,
        last_at_h = summary.last_at_h,
        "experiment finished"
    );
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_is_taken_from_first_frame() {
        let mut blank = OdBlank::default();
        let mut first = TelemetryFrame { od: vec![0.05, f64::NAN], temp_c: vec![] };
        blank.apply(&mut first);
        assert_eq!(first.od[0], 0.0);
        let mut next = TelemetryFrame { od: vec![0.25, 0.3], temp_c: vec![] };
        blank.apply(&mut next);
        assert!((next.od[0] - 0.2).abs() < 1e-12);
        assert!((next.od[1] - 0.3).abs() < 1e-12);
    }
}
