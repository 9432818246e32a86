//! Chemostat: fixed dilution rate delivered as a recurring bolus.
//!
//! Once a vial passes its start gate (time and OD), the device is told to
//! pump a media bolus every `period` seconds; efflux rides on the shared
//! drain slot. A stopped vial is stopped on both racks. The schedule is
//! recomputed while data is available and persisted only when the period
//! changes; otherwise the last persisted schedule stands.

use super::{ControlLaw, LawContext, VialDecision};
use crate::config::ChemostatParams;
use crate::error::CultureError;
use crate::state::VialState;
use crate::util::{SECONDS_PER_HOUR, round_centi};
use culture_traits::{Channel, CommandKind, RecordBody, Slot};

#[derive(Debug, Clone)]
pub struct Chemostat {
    p: ChemostatParams,
}

impl Chemostat {
    pub fn new(p: ChemostatParams) -> Self {
        Self { p }
    }

    /// Seconds between boluses for the configured rate; 0 when the rate is not positive.
    pub fn period_s(&self, volume_ml: f64) -> u64 {
        if self.p.rate_per_h <= 0.0 {
            return 0;
        }
        let period = SECONDS_PER_HOUR * self.p.bolus_ml / (self.p.rate_per_h * volume_ml);
        if !period.is_finite() {
            return 0;
        }
        // at least one second so a positive rate never reads as stopped
        (period.round() as u64).max(1)
    }

    /// Seconds the pump runs to deliver one bolus.
    pub fn bolus_s(&self, flow_ml_s: f64) -> f64 {
        round_centi(self.p.bolus_ml / flow_ml_s)
    }

    fn schedule_slots(state: &VialState) -> Vec<(Channel, Slot)> {
        let cs = &state.chemostat;
        if !cs.started {
            return Vec::new();
        }
        if cs.period_s == 0 {
            return vec![(Channel::Media, Slot::Stopped), (Channel::EFFLUX, Slot::Stopped)];
        }
        vec![(
            Channel::Media,
            Slot::Recurring {
                bolus_s: cs.bolus_s,
                period_s: cs.period_s,
            },
        )]
    }
}

impl ControlLaw for Chemostat {
    fn name(&self) -> &'static str {
        "chemostat"
    }

    fn command_kind(&self) -> CommandKind {
        CommandKind::Recurring
    }

    fn evaluate(
        &self,
        state: &mut VialState,
        od: f64,
        ctx: &LawContext<'_>,
    ) -> Result<VialDecision, CultureError> {
        let mut out = VialDecision::default();
        if ctx.at_h > self.p.start_time_h && od > self.p.start_od {
            let period_s = self.period_s(ctx.volume_ml());
            let bolus_s = self.bolus_s(ctx.flow(Channel::Media, state.vial));
            let cs = &mut state.chemostat;
            if !cs.started {
                cs.started = true;
                tracing::info!(vial = state.vial, at_h = ctx.at_h, "chemostat gate open");
            }
            if cs.period_s != period_s {
                cs.phase = cs.phase.saturating_add(1);
                cs.period_s = period_s;
                cs.bolus_s = bolus_s;
                out.records.push(RecordBody::Chemostat {
                    phase: cs.phase,
                    period_s,
                    bolus_s,
                });
                tracing::info!(vial = state.vial, phase = cs.phase, period_s, bolus_s, "chemostat schedule changed");
            }
        }
        out.slots = Self::schedule_slots(state);
        Ok(out)
    }

    fn standing(&self, state: &VialState) -> Result<VialDecision, CultureError> {
        if !state.chemostat.started {
            return Err(CultureError::DataUnavailable {
                vial: state.vial,
                have: state.window.len(),
                need: state.window.capacity(),
            });
        }
        Ok(VialDecision {
            slots: Self::schedule_slots(state),
            ..VialDecision::default()
        })
    }

    /// Twice the largest bolus among vials on the fastest period.
    fn drain(&self, slots: &[(Channel, Slot)]) -> Slot {
        let fastest = slots
            .iter()
            .filter_map(|(_, s)| match s {
                Slot::Recurring { period_s, .. } if *period_s > 0 => Some(*period_s),
                _ => None,
            })
            .min();
        let Some(period_s) = fastest else {
            return if slots.is_empty() { Slot::NoOp } else { Slot::Stopped };
        };
        let bolus = slots
            .iter()
            .filter_map(|(_, s)| match s {
                Slot::Recurring { bolus_s, period_s: p } if *p == period_s => Some(*bolus_s),
                _ => None,
            })
            .fold(0.0, f64::max);
        Slot::Recurring {
            bolus_s: round_centi(bolus * 2.0),
            period_s,
        }
    }
}
