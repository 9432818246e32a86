//! Turbidostat: keep each vial's OD inside a band by diluting with media.
//!
//! A vial grows until it crosses `upper`, which ends its growth curve and
//! drops the setpoint to `lower`. It is then diluted on every allowed tick
//! while OD stays above the setpoint, and released to grow again once OD
//! falls below the lower third of the band.

use super::{ControlLaw, LawContext, VialDecision};
use crate::config::TurbidostatParams;
use crate::error::CultureError;
use crate::state::VialState;
use crate::util::{round_centi, waited};
use culture_traits::{Channel, RecordBody, Slot};

#[derive(Debug, Clone)]
pub struct Turbidostat {
    p: TurbidostatParams,
}

impl Turbidostat {
    pub fn new(p: TurbidostatParams) -> Self {
        Self { p }
    }

    /// Seconds of influx bringing `od` down to `lower` in a `volume_ml` vial,
    /// clamped and rounded. The flag reports an applied clamp.
    pub fn dilution_seconds(&self, od: f64, volume_ml: f64, flow_ml_s: f64) -> (f64, bool) {
        let raw = -(self.p.lower_od / od).ln() * volume_ml / flow_ml_s;
        let raw = raw.max(0.0);
        let (secs, clamped) = match self.p.pump_for_max_s {
            Some(max) if raw > max => (max, true),
            _ => (raw, false),
        };
        (round_centi(secs), clamped)
    }

    fn curves_left(&self, curves: u32) -> bool {
        self.p.stop_after_n_curves.is_none_or(|limit| curves <= limit)
    }
}

impl ControlLaw for Turbidostat {
    fn name(&self) -> &'static str {
        "turbidostat"
    }

    fn evaluate(
        &self,
        state: &mut VialState,
        od: f64,
        ctx: &LawContext<'_>,
    ) -> Result<VialDecision, CultureError> {
        let p = &self.p;
        let mut out = VialDecision::default();
        let ts = &mut state.turbidostat;

        // End of a growth curve
        if od > p.upper_od && ts.setpoint != p.lower_od {
            out.growth_since_h = Some(ts.setpoint_at_h);
            ts.setpoint = p.lower_od;
            ts.setpoint_at_h = ctx.at_h;
            out.records.push(RecordBody::Setpoint {
                od: p.lower_od,
                curves: ts.curves,
            });
            tracing::info!(vial = state.vial, od, curves = ts.curves, "growth curve complete");
        }

        // Start of the next one
        if od < p.release_od() && ts.setpoint != p.upper_od {
            ts.setpoint = p.upper_od;
            ts.setpoint_at_h = ctx.at_h;
            ts.curves = ts.curves.saturating_add(1);
            out.records.push(RecordBody::Setpoint {
                od: p.upper_od,
                curves: ts.curves,
            });
            tracing::debug!(vial = state.vial, od, curves = ts.curves, "growth curve started");
        }

        if od > ts.setpoint && self.curves_left(ts.curves) {
            let flow = ctx.flow(Channel::Media, state.vial);
            let (secs, clamped) = self.dilution_seconds(od, ctx.volume_ml(), flow);
            out.clamped = clamped;
            if clamped {
                tracing::debug!(vial = state.vial, secs, "influx clamped to pump_for_max_s");
            }
            if secs <= 0.0 {
                tracing::trace!(vial = state.vial, od, "dilution rounds to zero");
            } else if waited(ctx.at_h, state.last_pump_at(Channel::Media), p.pump_wait_min) {
                out.slots.push((Channel::Media, Slot::Run(secs)));
                out.records.push(RecordBody::Pump {
                    channel: Channel::Media,
                    seconds: secs,
                    od,
                });
                state.note_pump(Channel::Media, ctx.at_h, od);
            } else {
                tracing::trace!(vial = state.vial, "dilution held back by pump_wait_min");
            }
        }

        Ok(out)
    }

    fn drain(&self, slots: &[(Channel, Slot)]) -> Slot {
        let max = slots.iter().map(|(_, s)| s.seconds()).fold(0.0, f64::max);
        if max > 0.0 {
            Slot::Run(round_centi(max + self.p.time_out_s))
        } else {
            Slot::NoOp
        }
    }
}
