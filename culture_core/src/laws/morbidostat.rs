//! Morbidostat: hold growth in check by dosing drug as the culture adapts.
//!
//! Every `pump_wait_min` each vial runs one cycle: it scores its OD trend,
//! then either idles (too dilute), feeds media, or doses drug A or B. Drug
//! may only follow a completed media cycle. Drug concentrations are tracked
//! by mixing arithmetic so the journal holds the exposure history.
//!
//! [`TimedMorbidostat`] replaces the OD-driven choice with a timetable.

use super::{ControlLaw, LawContext, VialDecision};
use crate::config::{CoursePlan, MorbidostatParams, Scoring, TimedParams};
use crate::error::CultureError;
use crate::state::VialState;
use crate::util::{clamp_flag, dilution_factor, round_centi, waited};
use culture_traits::{Channel, DoseCourse, MorbidoPhase, RecordBody, Slot, TimedSchedule};

/// Score offset that forces the decision once OD leaves the middle band.
const BAND_FORCE: f64 = 1e5;
/// Weight of the integral term.
const KI: f64 = 0.01;

/// Proportional, integral and derivative terms of one cycle.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Terms {
    pub p: f64,
    pub i: f64,
    pub d: f64,
    pub score: f64,
}

pub fn terms(params: &MorbidostatParams, state: &VialState, od: f64) -> Terms {
    let p = od - params.middle_od;
    let i = state.morbido.integral();
    let cycle_h = params.cycle_h();
    let d = if cycle_h > 0.0 {
        (od - state.last_pump_od) / cycle_h
    } else {
        0.0
    };
    let mut score = KI * i + d;
    match params.scoring {
        Scoring::Banded => {
            if od > params.upper_od {
                score += BAND_FORCE;
            } else if od < params.middle_od {
                score -= BAND_FORCE;
            } else {
                score += p;
            }
        }
        Scoring::Legacy => {
            if p > 0.0 {
                score += BAND_FORCE;
            } else {
                score -= BAND_FORCE;
            }
        }
    }
    Terms { p, i, d, score }
}

/// Same-drug rigs route every dose to the B rack.
fn same_drug_override(params: &MorbidostatParams) -> bool {
    // TODO: confirm the intended threshold with the rig owners; this keeps the
    // deployed behaviour where any non-zero drug A stock selects drug B.
    params.same_drug && 0.6 * params.drug_a_stock != 0.0
}

fn feedback_phase(params: &MorbidostatParams, state: &VialState, od: f64, t: &Terms) -> MorbidoPhase {
    if od < params.lower_od {
        MorbidoPhase::Idle
    } else if t.score > 0.0 && state.morbido.drug_allowed() {
        if od > params.upper_od || same_drug_override(params) {
            MorbidoPhase::DoseB
        } else {
            MorbidoPhase::DoseA
        }
    } else {
        MorbidoPhase::Media
    }
}

/// Apply `phase` to the vial: mixing arithmetic, pump slot and journal rows.
fn run_cycle(
    params: &MorbidostatParams,
    state: &mut VialState,
    od: f64,
    t: Terms,
    phase: MorbidoPhase,
    schedule: Option<TimedSchedule>,
    ctx: &LawContext<'_>,
) -> VialDecision {
    let v = ctx.volume_ml();
    let channel = phase.channel();
    let secs = channel.map_or(0.0, |c| round_centi(params.pump_s(c)));
    let added_ml = channel.map_or(0.0, |c| secs * ctx.flow(c, state.vial));
    let keep = dilution_factor(v, added_ml);
    let mix = |stock: f64, old: f64| (stock * added_ml + old * v) / (added_ml + v);

    let m = &mut state.morbido;
    let (mut a, mut b) = (m.drug_a, m.drug_b);
    match phase {
        MorbidoPhase::Idle => {}
        MorbidoPhase::Media => {
            a *= keep;
            b *= keep;
        }
        MorbidoPhase::DoseA => {
            a = mix(params.drug_a_stock, a);
            b = if params.same_drug { a } else { b * keep };
        }
        MorbidoPhase::DoseB => {
            b = mix(params.drug_b_stock, b);
            a = if params.same_drug { b } else { a * keep };
        }
    }

    let (hi_a, hi_b) = if params.same_drug {
        let hi = params.drug_a_stock.max(params.drug_b_stock);
        (hi, hi)
    } else {
        (params.drug_a_stock, params.drug_b_stock)
    };
    let (a, clamped_a) = clamp_flag(a, 0.0, hi_a);
    let (b, clamped_b) = clamp_flag(b, 0.0, hi_b);
    m.phase = phase;
    m.drug_a = a;
    m.drug_b = b;
    m.push_p(t.p);
    if let Some(s) = schedule {
        m.schedule = s;
    }

    let pump_channel = channel.unwrap_or(Channel::Media);
    let mut out = VialDecision {
        clamped: clamped_a || clamped_b,
        ..VialDecision::default()
    };
    if let Some(c) = channel
        && secs > 0.0
    {
        out.slots.push((c, Slot::Run(secs)));
    }
    out.records.push(RecordBody::Morbido {
        p: t.p,
        i: t.i,
        d: t.d,
        score: t.score,
        drug_a: a,
        drug_b: b,
        phase,
        schedule,
    });
    out.records.push(RecordBody::Pump {
        channel: pump_channel,
        seconds: secs,
        od,
    });
    state.note_pump(pump_channel, ctx.at_h, od);
    tracing::debug!(vial = state.vial, ?phase, score = t.score, drug_a = a, drug_b = b, "morbidostat cycle");
    out
}

fn suction(params: &MorbidostatParams, slots: &[(Channel, Slot)]) -> Slot {
    let max = slots.iter().map(|(_, s)| s.seconds()).fold(0.0, f64::max);
    if max > 0.0 && params.suction_s > 0.0 {
        Slot::Run(round_centi(params.suction_s))
    } else {
        Slot::NoOp
    }
}

#[derive(Debug, Clone)]
pub struct Morbidostat {
    p: MorbidostatParams,
}

impl Morbidostat {
    pub fn new(p: MorbidostatParams) -> Self {
        Self { p }
    }
}

impl ControlLaw for Morbidostat {
    fn name(&self) -> &'static str {
        match self.p.scoring {
            Scoring::Banded => "morbidostat",
            Scoring::Legacy => "old_morbidostat",
        }
    }

    fn evaluate(
        &self,
        state: &mut VialState,
        od: f64,
        ctx: &LawContext<'_>,
    ) -> Result<VialDecision, CultureError> {
        if !waited(ctx.at_h, state.last_any_pump(), self.p.pump_wait_min) {
            return Ok(VialDecision::default());
        }
        let t = terms(&self.p, state, od);
        let phase = feedback_phase(&self.p, state, od, &t);
        tracing::trace!(vial = state.vial, p = t.p, i = t.i, d = t.d, score = t.score, "morbidostat score");
        Ok(run_cycle(&self.p, state, od, t, phase, None, ctx))
    }

    fn drain(&self, slots: &[(Channel, Slot)]) -> Slot {
        suction(&self.p, slots)
    }
}

/// Start hour of the course after `course.courses` have run, if any remain.
fn next_course_h(course: &DoseCourse, plan: &CoursePlan) -> Option<f64> {
    if course.courses > 0 && plan.freq_h <= 0.0 {
        return None;
    }
    Some(plan.init_h + f64::from(course.courses) * plan.freq_h)
}

/// Open a due course. Returns true while a course has cycles left.
fn course_active(course: &mut DoseCourse, plan: &CoursePlan, at_h: f64) -> bool {
    if course.remaining == 0
        && let Some(start) = next_course_h(course, plan)
        && at_h >= start
    {
        course.courses = course.courses.saturating_add(1);
        course.remaining = plan.cycles;
    }
    course.remaining > 0
}

/// Morbidostat dosing on a fixed timetable.
///
/// Drug A courses start at `init_a_h` and every `freq_a_h` after; each runs
/// `times_a` consecutive dosing cycles. Drug B works the same way when
/// enabled and waits while an A course is running. OD is scored and logged
/// but never gates a dose.
#[derive(Debug, Clone)]
pub struct TimedMorbidostat {
    p: TimedParams,
}

impl TimedMorbidostat {
    pub fn new(p: TimedParams) -> Self {
        Self { p }
    }

    fn choose(&self, schedule: &mut TimedSchedule, at_h: f64) -> MorbidoPhase {
        if course_active(&mut schedule.a, &self.p.a, at_h) {
            schedule.a.remaining -= 1;
            return MorbidoPhase::DoseA;
        }
        if let Some(plan) = &self.p.b
            && course_active(&mut schedule.b, plan, at_h)
        {
            schedule.b.remaining -= 1;
            return MorbidoPhase::DoseB;
        }
        MorbidoPhase::Media
    }
}

impl ControlLaw for TimedMorbidostat {
    fn name(&self) -> &'static str {
        "timed_morbidostat"
    }

    fn evaluate(
        &self,
        state: &mut VialState,
        od: f64,
        ctx: &LawContext<'_>,
    ) -> Result<VialDecision, CultureError> {
        let base = &self.p.base;
        if !waited(ctx.at_h, state.last_any_pump(), base.pump_wait_min) {
            return Ok(VialDecision::default());
        }
        let t = terms(base, state, od);
        let mut schedule = state.morbido.schedule;
        let phase = self.choose(&mut schedule, ctx.at_h);
        Ok(run_cycle(base, state, od, t, phase, Some(schedule), ctx))
    }

    fn drain(&self, slots: &[(Channel, Slot)]) -> Slot {
        suction(&self.p.base, slots)
    }
}
