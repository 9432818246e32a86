//! Simulated culture rig.
//!
//! [`SimFleet`] owns the vial models and hands out two handles sharing them:
//! [`SimTelemetry`] (a `TelemetrySource`) and [`SimPumps`] (a `CommandSink`).
//! Time is a [`ManualClock`]: every telemetry read advances it by one tick
//! and evolves the cultures over that interval, so an experiment of days
//! runs in moments.

pub mod culture;
pub mod error;

pub use error::SimError;

use crate::culture::{Culture, CultureParams};
use crate::error::Result;
use culture_traits::clock::ManualClock;
use culture_traits::command::MAX_VIALS;
use culture_traits::{
    Channel, CommandKind, CommandSink, PumpCommand, Slot, TelemetryFrame, TelemetrySource,
};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq)]
pub struct SimParams {
    pub culture: CultureParams,
    /// Vials simulated; all actuatable slots by default.
    pub vials: usize,
    pub initial_od: f64,
    pub flow_ml_s: f64,
    pub tick: Duration,
    pub drug_a_stock: f64,
    pub drug_b_stock: f64,
    /// Peak-to-peak OD noise added to readings.
    pub noise: f64,
    pub seed: u32,
    pub temp_c: f64,
}

impl Default for SimParams {
    fn default() -> Self {
        Self {
            culture: CultureParams::default(),
            vials: MAX_VIALS,
            initial_od: 0.05,
            flow_ml_s: 1.0,
            tick: Duration::from_secs(20),
            drug_a_stock: 1.0,
            drug_b_stock: 10.0,
            noise: 0.002,
            seed: 0x5EED,
            temp_c: 30.0,
        }
    }
}

/// Faults the next calls will hit.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Faults {
    pub failed_reads: u32,
    pub incomplete_reads: u32,
    pub failed_sends: u32,
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct Schedule {
    bolus_s: f64,
    period_s: u64,
    /// Seconds since the last bolus.
    since_s: f64,
}

#[derive(Debug)]
struct SimState {
    params: SimParams,
    vials: Vec<Culture>,
    schedules: Vec<Option<Schedule>>,
    faults: Faults,
    rng: u32,
    commands: u64,
}

impl SimState {
    fn next_noise(&mut self) -> f64 {
        let mut x = self.rng;
        x ^= x << 13;
        x ^= x >> 17;
        x ^= x << 5;
        self.rng = x;
        let u = f64::from(x) / (f64::from(u32::MAX) + 1.0);
        (u - 0.5) * self.params.noise
    }

    /// Evolve every vial over `dt`, firing recurring boluses as they fall due.
    fn advance(&mut self, dt: Duration) {
        let p = self.params.culture.clone();
        let flow = self.params.flow_ml_s;
        for (c, sched) in self.vials.iter_mut().zip(self.schedules.iter_mut()) {
            let mut left = dt.as_secs_f64();
            if let Some(s) = sched.as_mut().filter(|s| s.period_s > 0) {
                let period = s.period_s as f64;
                while s.since_s + left >= period {
                    let step = period - s.since_s;
                    c.grow(&p, step / 3600.0);
                    c.add(&p, s.bolus_s * flow, 0.0, 0.0);
                    left -= step;
                    s.since_s = 0.0;
                }
                s.since_s += left;
            }
            c.grow(&p, left / 3600.0);
        }
    }

    fn apply(&mut self, cmd: &PumpCommand) {
        let p = self.params.culture.clone();
        let flow = self.params.flow_ml_s;
        let (stock_a, stock_b) = (self.params.drug_a_stock, self.params.drug_b_stock);
        for vial in 0..self.vials.len() {
            match cmd.kind {
                CommandKind::Immediate => {
                    for channel in Channel::ALL {
                        let secs = match cmd.get(channel, vial) {
                            Slot::Run(s) => s,
                            _ => continue,
                        };
                        let (a, b) = match channel {
                            Channel::Media => (0.0, 0.0),
                            Channel::DrugA => (stock_a, 0.0),
                            Channel::DrugB => (0.0, stock_b),
                        };
                        self.vials[vial].add(&p, secs * flow, a, b);
                    }
                    if cmd.get(Channel::Media, vial) == Slot::Stopped {
                        self.schedules[vial] = None;
                    }
                }
                CommandKind::Recurring => match cmd.get(Channel::Media, vial) {
                    Slot::Recurring { bolus_s, period_s } => {
                        let since_s = self.schedules[vial].map_or(0.0, |s| s.since_s);
                        self.schedules[vial] = Some(Schedule { bolus_s, period_s, since_s });
                    }
                    Slot::Stopped => self.schedules[vial] = None,
                    _ => {}
                },
            }
        }
        self.commands += 1;
    }
}

/// Shared simulator. Device handles come from [`telemetry`](Self::telemetry)
/// and [`pumps`](Self::pumps) and all see the same vials.
#[derive(Debug, Clone)]
pub struct SimFleet {
    state: Arc<Mutex<SimState>>,
    clock: ManualClock,
}

fn lock(state: &Mutex<SimState>) -> Result<MutexGuard<'_, SimState>> {
    state.lock().map_err(|_| SimError::Poisoned)
}

impl SimFleet {
    pub fn new(params: SimParams, clock: ManualClock) -> Self {
        let n = params.vials.min(MAX_VIALS);
        let state = SimState {
            vials: vec![Culture::new(params.initial_od); n],
            schedules: vec![None; n],
            faults: Faults::default(),
            rng: params.seed.max(1),
            commands: 0,
            params,
        };
        tracing::debug!(vials = n, "simulated fleet created");
        Self {
            state: Arc::new(Mutex::new(state)),
            clock,
        }
    }

    pub fn clock(&self) -> &ManualClock {
        &self.clock
    }

    pub fn telemetry(&self) -> SimTelemetry {
        SimTelemetry {
            state: self.state.clone(),
            clock: self.clock.clone(),
        }
    }

    pub fn pumps(&self) -> SimPumps {
        SimPumps {
            state: self.state.clone(),
        }
    }

    /// Queue faults for upcoming calls.
    pub fn inject(&self, faults: Faults) -> Result<()> {
        lock(&self.state)?.faults = faults;
        Ok(())
    }

    /// Snapshot of one vial.
    pub fn culture(&self, vial: usize) -> Result<Culture> {
        lock(&self.state)?
            .vials
            .get(vial)
            .cloned()
            .ok_or(SimError::NoSuchVial(vial))
    }

    /// Number of commands applied so far.
    pub fn commands(&self) -> Result<u64> {
        Ok(lock(&self.state)?.commands)
    }

    /// Whether a recurring schedule is running for `vial`.
    pub fn has_schedule(&self, vial: usize) -> Result<bool> {
        Ok(lock(&self.state)?
            .schedules
            .get(vial)
            .is_some_and(Option::is_some))
    }
}

#[derive(Debug)]
pub struct SimTelemetry {
    state: Arc<Mutex<SimState>>,
    clock: ManualClock,
}

impl TelemetrySource for SimTelemetry {
    fn read_frame(
        &mut self,
        _timeout: Duration,
    ) -> std::result::Result<Option<TelemetryFrame>, Box<dyn std::error::Error + Send + Sync>> {
        let mut st = lock(&self.state)?;
        let tick = st.params.tick;
        st.advance(tick);
        self.clock.advance(tick);

        if st.faults.failed_reads > 0 {
            st.faults.failed_reads -= 1;
            return Err(Box::new(SimError::Timeout));
        }
        if st.faults.incomplete_reads > 0 {
            st.faults.incomplete_reads -= 1;
            return Ok(None);
        }

        let n = st.vials.len();
        let mut od = Vec::with_capacity(n);
        for i in 0..n {
            let noise = st.next_noise();
            od.push((st.vials[i].od + noise).max(0.0));
        }
        let temp_c = vec![st.params.temp_c; n];
        tracing::trace!(?od, "simulated telemetry");
        Ok(Some(TelemetryFrame { od, temp_c }))
    }
}

#[derive(Debug)]
pub struct SimPumps {
    state: Arc<Mutex<SimState>>,
}

impl CommandSink for SimPumps {
    fn send(
        &mut self,
        cmd: &PumpCommand,
    ) -> std::result::Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let mut st = lock(&self.state)?;
        if st.faults.failed_sends > 0 {
            st.faults.failed_sends -= 1;
            return Err(Box::new(SimError::LinkDown("pump broadcast not acknowledged".into())));
        }
        tracing::trace!(kind = ?cmd.kind, values = ?cmd.wire_values(), "simulated pump command");
        st.apply(cmd);
        Ok(())
    }
}
