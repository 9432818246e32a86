//! Per-vial controller state and its reconstruction from the journal.
//!
//! `VialState` holds everything a control law reads between ticks. It is
//! created with zeroed values at experiment start, mutated only on a scratch
//! copy during a tick, and rebuilt from the store tails after a restart.

use crate::error::CultureError;
use crate::smoothing::OdWindow;
use culture_traits::command::RACKS;
use culture_traits::{Channel, LogChannel, MorbidoPhase, Record, RecordBody, StateStore, TimedSchedule};
use std::collections::VecDeque;

/// Proportional-error samples the morbidostat integrates over.
pub const RECENT_P: usize = 5;

#[derive(Debug, Clone, PartialEq, Default)]
pub struct TurbidostatState {
    /// Active setpoint. 0 before the first transition.
    pub setpoint: f64,
    /// Hour the active setpoint was entered.
    pub setpoint_at_h: f64,
    /// Growth curves started so far.
    pub curves: u32,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct ChemostatState {
    /// Bumped on every schedule change.
    pub phase: u32,
    pub period_s: u64,
    pub bolus_s: f64,
    /// The start gate has opened at least once.
    pub started: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MorbidoState {
    pub phase: MorbidoPhase,
    pub drug_a: f64,
    pub drug_b: f64,
    /// Last persisted proportional errors, oldest first.
    pub recent_p: VecDeque<f64>,
    pub schedule: TimedSchedule,
}

impl Default for MorbidoState {
    fn default() -> Self {
        // journal seed row: p = 0, idle
        let mut recent_p = VecDeque::with_capacity(RECENT_P);
        recent_p.push_back(0.0);
        Self {
            phase: MorbidoPhase::Idle,
            drug_a: 0.0,
            drug_b: 0.0,
            recent_p,
            schedule: TimedSchedule::default(),
        }
    }
}

impl MorbidoState {
    /// Drug is only dosed right after a completed media cycle.
    #[inline]
    pub fn drug_allowed(&self) -> bool {
        self.phase == MorbidoPhase::Media
    }

    #[inline]
    pub fn integral(&self) -> f64 {
        self.recent_p.iter().sum()
    }

    pub fn push_p(&mut self, p: f64) {
        if self.recent_p.len() == RECENT_P {
            self.recent_p.pop_front();
        }
        self.recent_p.push_back(p);
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct VialState {
    pub vial: usize,
    pub window: OdWindow,
    /// Median of the window as of the last tick.
    pub smoothed: Option<f64>,
    /// Hour of the last pump event per rack.
    pub last_pump_h: [f64; RACKS],
    /// Smoothed OD logged with the most recent pump event.
    pub last_pump_od: f64,
    pub growth_rate: Option<f64>,
    pub turbidostat: TurbidostatState,
    pub chemostat: ChemostatState,
    pub morbido: MorbidoState,
    /// Set when the vial is isolated; it is skipped until restart.
    pub fault: Option<String>,
}

impl VialState {
    pub fn new(vial: usize, od_window: usize) -> Self {
        Self {
            vial,
            window: OdWindow::new(od_window),
            smoothed: None,
            last_pump_h: [0.0; RACKS],
            last_pump_od: 0.0,
            growth_rate: None,
            turbidostat: TurbidostatState::default(),
            chemostat: ChemostatState::default(),
            morbido: MorbidoState::default(),
            fault: None,
        }
    }

    #[inline]
    pub fn last_pump_at(&self, channel: Channel) -> f64 {
        self.last_pump_h[channel.rack()]
    }

    /// Most recent pump event on any rack.
    #[inline]
    pub fn last_any_pump(&self) -> f64 {
        self.last_pump_h.iter().copied().fold(0.0, f64::max)
    }

    pub fn note_pump(&mut self, channel: Channel, at_h: f64, od: f64) {
        self.last_pump_h[channel.rack()] = at_h;
        self.last_pump_od = od;
    }

    #[inline]
    pub fn is_faulted(&self) -> bool {
        self.fault.is_some()
    }

    /// Rebuild from the tails of every journal channel.
    ///
    /// Returns the rebuilt state and the latest timestamp seen, so the caller
    /// can resume experiment time. Records that cannot belong to this vial's
    /// history yield `ConfigInconsistent`.
    pub fn restore<S: StateStore + ?Sized>(
        vial: usize,
        od_window: usize,
        store: &S,
    ) -> Result<(Self, f64), RestoreError> {
        let mut st = Self::new(vial, od_window);
        let mut latest = 0.0f64;
        let read = |channel: LogChannel, n: usize| {
            store
                .read_last(vial, channel, n)
                .map_err(|e| RestoreError::Store(e.to_string()))
        };
        let inconsistent = |reason: String| {
            RestoreError::Inconsistent(CultureError::ConfigInconsistent { vial, reason })
        };

        // The live window skips missing readings, so walk back until it is
        // refilled with finite samples.
        let ods = read(LogChannel::Od, usize::MAX)?;
        if let Some(r) = ods.last() {
            check_stamp(r, vial).map_err(inconsistent)?;
            latest = latest.max(r.at_h);
        }
        let finite: Vec<&Record> = ods
            .iter()
            .filter(|r| matches!(r.body, RecordBody::Od { od: Some(od), .. } if od.is_finite()))
            .collect();
        for r in &finite[finite.len().saturating_sub(od_window)..] {
            check_stamp(r, vial).map_err(inconsistent)?;
            if let RecordBody::Od { od: Some(od), .. } = r.body {
                st.window
                    .push(vial, r.at_h, od)
                    .map_err(|e| inconsistent(e.to_string()))?;
            }
        }
        st.smoothed = st.window.smoothed();

        // Pump history: the latest event per rack plus the OD of the last one.
        for r in read(LogChannel::Pump, usize::MAX)? {
            check_stamp(&r, vial).map_err(inconsistent)?;
            latest = latest.max(r.at_h);
            if let RecordBody::Pump { channel, od, seconds } = r.body {
                if !(seconds.is_finite() && seconds >= 0.0) {
                    return Err(inconsistent(format!("pump record with duration {seconds}")));
                }
                st.note_pump(channel, r.at_h, od);
            }
        }

        if let Some(r) = read(LogChannel::Setpoint, 1)?.pop() {
            check_stamp(&r, vial).map_err(inconsistent)?;
            latest = latest.max(r.at_h);
            if let RecordBody::Setpoint { od, curves } = r.body {
                st.turbidostat = TurbidostatState {
                    setpoint: od,
                    setpoint_at_h: r.at_h,
                    curves,
                };
            }
        }

        if let Some(r) = read(LogChannel::GrowthRate, 1)?.pop() {
            latest = latest.max(r.at_h);
            if let RecordBody::GrowthRate { per_hour } = r.body {
                st.growth_rate = Some(per_hour);
            }
        }

        let morbido = read(LogChannel::Morbido, RECENT_P)?;
        if !morbido.is_empty() {
            st.morbido.recent_p.clear();
        }
        for r in morbido {
            check_stamp(&r, vial).map_err(inconsistent)?;
            latest = latest.max(r.at_h);
            if let RecordBody::Morbido { p, drug_a, drug_b, phase, schedule, .. } = r.body {
                if drug_a < 0.0 || drug_b < 0.0 {
                    return Err(inconsistent(format!(
                        "negative drug concentration ({drug_a}, {drug_b})"
                    )));
                }
                st.morbido.push_p(p);
                st.morbido.phase = phase;
                st.morbido.drug_a = drug_a;
                st.morbido.drug_b = drug_b;
                if let Some(s) = schedule {
                    st.morbido.schedule = s;
                }
            }
        }

        if let Some(r) = read(LogChannel::Chemostat, 1)?.pop() {
            check_stamp(&r, vial).map_err(inconsistent)?;
            latest = latest.max(r.at_h);
            if let RecordBody::Chemostat { phase, period_s, bolus_s } = r.body {
                st.chemostat = ChemostatState {
                    phase,
                    period_s,
                    bolus_s,
                    started: true,
                };
            }
        }

        Ok((st, latest))
    }
}

fn check_stamp(r: &Record, vial: usize) -> Result<(), String> {
    if r.vial != vial {
        return Err(format!("record for vial {} in vial {vial} history", r.vial));
    }
    if !(r.at_h.is_finite() && r.at_h >= 0.0) {
        return Err(format!("record stamped at {} h", r.at_h));
    }
    Ok(())
}

/// Why a vial could not be rebuilt.
#[derive(Debug, Clone, PartialEq)]
pub enum RestoreError {
    /// The store itself failed; the whole restore is aborted.
    Store(String),
    /// This vial's history is unusable; the vial is isolated.
    Inconsistent(CultureError),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mocks::MemoryStore;

    #[test]
    fn fresh_state_is_idle_with_seed_p() {
        let st = VialState::new(2, 5);
        assert_eq!(st.morbido.phase, MorbidoPhase::Idle);
        assert!(!st.morbido.drug_allowed());
        assert_eq!(st.morbido.integral(), 0.0);
        assert_eq!(st.last_any_pump(), 0.0);
    }

    #[test]
    fn recent_p_keeps_last_five() {
        let mut m = MorbidoState::default();
        for p in 1..=7 {
            m.push_p(f64::from(p));
        }
        assert_eq!(m.recent_p.len(), RECENT_P);
        assert_eq!(m.integral(), 3.0 + 4.0 + 5.0 + 6.0 + 7.0);
    }

    #[test]
    fn restore_rebuilds_window_and_pump_history() {
        let mut store = MemoryStore::default();
        for i in 0..6 {
            let t = f64::from(i) * 0.1;
            store.push(Record::new(1, t, RecordBody::Od { od: Some(0.1 + t), temp_c: None }));
        }
        store.push(Record::new(
            1,
            0.45,
            RecordBody::Pump { channel: Channel::Media, seconds: 3.2, od: 0.5 },
        ));
        store.push(Record::new(1, 0.3, RecordBody::Setpoint { od: 0.2, curves: 2 }));

        let (st, latest) = VialState::restore(1, 3, &store).unwrap();
        assert_eq!(st.window.len(), 3);
        assert!((st.smoothed.unwrap() - 0.5).abs() < 1e-12);
        assert_eq!(st.last_pump_at(Channel::Media), 0.45);
        assert_eq!(st.last_pump_od, 0.5);
        assert_eq!(st.turbidostat.curves, 2);
        assert!((latest - 0.5).abs() < 1e-12);
    }

    #[test]
    fn restore_skips_missing_readings_when_refilling_window() {
        let mut store = MemoryStore::default();
        for (i, od) in [Some(0.3), Some(0.3), Some(0.3), None, None].into_iter().enumerate() {
            store.push(Record::new(0, i as f64, RecordBody::Od { od, temp_c: None }));
        }
        let (st, latest) = VialState::restore(0, 3, &store).unwrap();
        assert_eq!(st.window.len(), 3);
        assert_eq!(st.smoothed, Some(0.3));
        assert_eq!(latest, 4.0);
    }

    #[test]
    fn restore_flags_negative_concentration() {
        let mut store = MemoryStore::default();
        store.push(Record::new(
            0,
            1.0,
            RecordBody::Morbido {
                p: 0.0,
                i: 0.0,
                d: 0.0,
                score: 0.0,
                drug_a: -1.0,
                drug_b: 0.0,
                phase: MorbidoPhase::Media,
                schedule: None,
            },
        ));
        let err = VialState::restore(0, 3, &store).unwrap_err();
        assert!(matches!(
            err,
            RestoreError::Inconsistent(CultureError::ConfigInconsistent { vial: 0, .. })
        ));
    }
}
