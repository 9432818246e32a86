//! Fleet tick engine.
//!
//! One [`Fleet::tick`] turns a telemetry frame into at most one pump command.
//! Vial states are advanced on scratch copies; they replace the live states
//! only after the tick's records were appended and the command went out, so a
//! failing collaborator leaves the fleet exactly as it was before the tick.
//! Records are appended before the command is sent: a failed send may leave
//! pump records for pumps that never ran, never the reverse.

use crate::collab_error::collab_report;
use crate::config::RunConfig;
use crate::dispatcher::{Dispatch, Dispatcher};
use crate::error::{CultureError, Result};
use crate::growth::estimate_growth_rate;
use crate::laws::{self, ControlLaw, LawContext, VialDecision};
use crate::state::{RestoreError, VialState};
use crate::status::{TickReport, TickStatus};
use culture_traits::{
    CommandSink, LogChannel, PumpCommand, Record, RecordBody, StateStore, TelemetryFrame,
};
use rayon::prelude::*;

pub struct Fleet {
    run: RunConfig,
    law: Box<dyn ControlLaw>,
    vials: Vec<VialState>,
    dispatcher: Dispatcher,
}

impl std::fmt::Debug for Fleet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Fleet")
            .field("law", &self.law.name())
            .field("vials", &self.run.vials)
            .field("dispatcher", &self.dispatcher)
            .finish_non_exhaustive()
    }
}

/// What this tick's frame gave a vial.
#[derive(Debug, Clone, Copy, PartialEq)]
enum Intake {
    Fresh,
    Missing,
    /// Already reported; not evaluated.
    Rejected,
}

/// Outcome of evaluating one scratch vial.
enum Eval {
    Skip(CultureError),
    Decided(VialDecision),
}

impl Fleet {
    /// Fresh fleet at experiment start. Prefer [`crate::FleetBuilder`], which
    /// checks the run config first.
    pub(crate) fn fresh(run: RunConfig) -> Self {
        let law = laws::select(&run.law);
        let vials = run
            .vials
            .iter()
            .map(|&v| VialState::new(v, run.od_window))
            .collect();
        Self {
            run,
            law,
            vials,
            dispatcher: Dispatcher::new(),
        }
    }

    /// Rebuild every vial from `store`. Returns the fleet and the latest
    /// journal timestamp, from which experiment time resumes.
    ///
    /// A vial whose history is unusable comes back isolated; a failing store
    /// aborts the whole restore.
    pub(crate) fn restored<S: StateStore + ?Sized>(run: RunConfig, store: &S) -> Result<(Self, f64)> {
        let mut fleet = Self::fresh(run);
        let mut latest = 0.0f64;
        for st in &mut fleet.vials {
            match VialState::restore(st.vial, fleet.run.od_window, store) {
                Ok((restored, at_h)) => {
                    latest = latest.max(at_h);
                    *st = restored;
                }
                Err(RestoreError::Inconsistent(e)) => {
                    tracing::warn!(vial = st.vial, error = %e, "vial isolated on restore");
                    st.fault = Some(e.to_string());
                }
                Err(RestoreError::Store(msg)) => {
                    return Err(eyre::Report::new(CultureError::CommunicationFailure(msg))
                        .wrap_err("restore fleet state"));
                }
            }
        }
        tracing::info!(
            law = fleet.law.name(),
            vials = fleet.vials.len(),
            resume_h = latest,
            "fleet restored"
        );
        Ok((fleet, latest))
    }

    pub fn run(&self) -> &RunConfig {
        &self.run
    }

    pub fn law_name(&self) -> &'static str {
        self.law.name()
    }

    pub fn vials(&self) -> &[VialState] {
        &self.vials
    }

    pub fn vial(&self, vial: usize) -> Option<&VialState> {
        self.vials.iter().find(|s| s.vial == vial)
    }

    /// Stop every pump. Used at shutdown and before priming.
    pub fn stop_all<K: CommandSink + ?Sized>(&mut self, sink: &mut K) -> Result<()> {
        sink.send(&PumpCommand::stop_all())
            .map_err(|e| collab_report(e, "send stop-all"))?;
        self.dispatcher.reset();
        tracing::info!("all pumps stopped");
        Ok(())
    }

    /// Run one control tick at experiment time `at_h`.
    ///
    /// `frame` is `None` when the broadcast was incomplete: nothing is
    /// evaluated, recorded, or sent. Per-vial faults are reported in the
    /// returned [`TickReport`]; only collaborator failures return `Err`.
    pub fn tick<S, K>(
        &mut self,
        at_h: f64,
        frame: Option<&TelemetryFrame>,
        store: &mut S,
        sink: &mut K,
    ) -> Result<TickReport>
    where
        S: StateStore + ?Sized,
        K: CommandSink + ?Sized,
    {
        let Some(frame) = frame else {
            tracing::debug!(at_h, "incomplete telemetry; tick skipped");
            return Ok(TickReport::incomplete(at_h));
        };

        let mut scratch = self.vials.clone();
        let mut records: Vec<Record> = Vec::with_capacity(scratch.len() * 3);
        let mut report = TickReport::incomplete(at_h);

        // Sample intake
        let mut samples: Vec<Intake> = Vec::with_capacity(scratch.len());
        for st in &mut scratch {
            if st.is_faulted() {
                samples.push(Intake::Rejected);
                continue;
            }
            let od = frame.od(st.vial);
            let intake = match od {
                Some(v) => match st.window.push(st.vial, at_h, v) {
                    Ok(()) => {
                        st.smoothed = st.window.smoothed();
                        Intake::Fresh
                    }
                    Err(e) => {
                        tracing::warn!(vial = st.vial, error = %e, "sample rejected");
                        report.skipped.push((st.vial, e));
                        Intake::Rejected
                    }
                },
                None => Intake::Missing,
            };
            // the journal only holds samples the window accepted
            if intake != Intake::Rejected {
                records.push(Record::new(
                    st.vial,
                    at_h,
                    RecordBody::Od { od, temp_c: frame.temp_c(st.vial) },
                ));
            }
            samples.push(intake);
        }

        // Per-vial evaluation; each vial touches only its own state.
        let law = &*self.law;
        let ctx = LawContext { at_h, run: &self.run };
        let evals: Vec<Option<Eval>> = scratch
            .par_iter_mut()
            .zip(samples.par_iter())
            .map(|(st, intake)| {
                if *intake == Intake::Rejected {
                    return None;
                }
                let mut work = st.clone();
                let decided = match (intake, work.smoothed) {
                    (Intake::Fresh, Some(od)) => law.evaluate(&mut work, od, &ctx),
                    _ => law.standing(&work),
                };
                Some(match decided {
                    Ok(d) => {
                        *st = work;
                        Eval::Decided(d)
                    }
                    Err(e) => {
                        if let CultureError::ConfigInconsistent { .. } = e {
                            st.fault = Some(e.to_string());
                        }
                        Eval::Skip(e)
                    }
                })
            })
            .collect();

        let mut decisions: Vec<(usize, VialDecision)> = Vec::with_capacity(evals.len());
        for (st, eval) in scratch.iter_mut().zip(evals) {
            match eval {
                None => {}
                Some(Eval::Skip(e)) => {
                    match &e {
                        CultureError::ConfigInconsistent { .. } => {
                            tracing::warn!(vial = st.vial, error = %e, "vial isolated");
                        }
                        _ => tracing::debug!(vial = st.vial, reason = %e, "vial skipped"),
                    }
                    report.skipped.push((st.vial, e));
                }
                Some(Eval::Decided(d)) => {
                    if d.clamped {
                        report.clamped.push(st.vial);
                    }
                    records.extend(d.records.iter().cloned().map(|b| Record::new(st.vial, at_h, b)));
                    decisions.push((st.vial, d));
                }
            }
        }

        // Growth curves that just ended
        for (vial, d) in &decisions {
            let Some(since_h) = d.growth_since_h else { continue };
            let Some(st) = scratch.iter_mut().find(|s| s.vial == *vial) else {
                continue;
            };
            let history = store
                .read_since(*vial, LogChannel::Od, since_h)
                .map_err(|e| collab_report(e, "read OD history"))?;
            let mut points: Vec<(f64, f64)> = history
                .iter()
                .filter_map(|r| match r.body {
                    RecordBody::Od { od: Some(od), .. } => Some((r.at_h, od)),
                    _ => None,
                })
                .collect();
            if let Some(od) = frame.od(*vial)
                && at_h > since_h
            {
                points.push((at_h, od));
            }
            match estimate_growth_rate(&points) {
                Ok(per_hour) => {
                    tracing::info!(vial, per_hour, samples = points.len(), "growth rate");
                    st.growth_rate = Some(per_hour);
                    records.push(Record::new(*vial, at_h, RecordBody::GrowthRate { per_hour }));
                }
                Err(e) => {
                    tracing::warn!(vial, error = %e, "growth rate not updated");
                }
            }
        }

        // Persistence, then actuation, then commit. Every pump that ran has
        // its records in the store.
        let dispatch = self
            .dispatcher
            .assemble(law, decisions.iter().map(|(v, d)| (*v, d)));
        store
            .append_batch(&records)
            .map_err(|e| collab_report(e, "append tick records"))?;
        report.records = records.len();

        report.status = match dispatch {
            Dispatch::Emit(cmd) => {
                sink.send(&cmd).map_err(|e| collab_report(e, "send pump command"))?;
                self.dispatcher.sent(&cmd);
                tracing::info!(
                    at_h,
                    kind = ?cmd.kind,
                    active = cmd.active().count(),
                    drain = %cmd.drain(),
                    "pump command sent"
                );
                TickStatus::Emitted(cmd)
            }
            Dispatch::Idle => TickStatus::Idle,
            Dispatch::Unchanged => {
                tracing::debug!(at_h, "recurring schedule unchanged");
                TickStatus::Unchanged
            }
        };
        self.vials = scratch;
        Ok(report)
    }
}
