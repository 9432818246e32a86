//! Runtime configuration for the fleet controller.
//!
//! These are the immutable structs the control laws read every tick. They
//! are built once from the TOML-deserialized `culture_config::Config` (see
//! `conversions`) and never mutated during a run.

use culture_config::FlowTable;
use culture_traits::Channel;

/// Turbidostat thresholds and pump limits.
#[derive(Debug, Clone, PartialEq)]
pub struct TurbidostatParams {
    pub lower_od: f64,
    pub upper_od: f64,
    /// Added to the longest influx to size the drain (s).
    pub time_out_s: f64,
    pub pump_wait_min: f64,
    /// Clamp on one influx (s). `None` disables the clamp.
    pub pump_for_max_s: Option<f64>,
    /// Stop diluting after this many curves. `None` never stops.
    pub stop_after_n_curves: Option<u32>,
}

impl TurbidostatParams {
    /// Below this OD a diluted vial is released to grow again.
    #[inline]
    pub fn release_od(&self) -> f64 {
        self.lower_od + (self.upper_od - self.lower_od) / 3.0
    }
}

impl Default for TurbidostatParams {
    fn default() -> Self {
        Self {
            lower_od: 0.2,
            upper_od: 0.4,
            time_out_s: 5.0,
            pump_wait_min: 3.0,
            pump_for_max_s: None,
            stop_after_n_curves: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChemostatParams {
    pub start_od: f64,
    pub start_time_h: f64,
    pub rate_per_h: f64,
    pub bolus_ml: f64,
}

impl Default for ChemostatParams {
    fn default() -> Self {
        Self {
            start_od: 0.0,
            start_time_h: 0.0,
            rate_per_h: 0.1,
            bolus_ml: 0.5,
        }
    }
}

/// How the morbidostat turns OD history into a dosing score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Scoring {
    /// Upper/middle hysteresis around the proportional term.
    #[default]
    Banded,
    /// Pre-hysteresis scoring: the sign of the proportional term decides.
    Legacy,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MorbidostatParams {
    pub lower_od: f64,
    pub middle_od: f64,
    pub upper_od: f64,
    pub pump_wait_min: f64,
    pub drug_a_stock: f64,
    pub drug_b_stock: f64,
    pub same_drug: bool,
    pub pump_media_s: f64,
    pub pump_a_s: f64,
    pub pump_b_s: f64,
    pub suction_s: f64,
    pub scoring: Scoring,
}

impl MorbidostatParams {
    /// Length of one dosing cycle in hours.
    #[inline]
    pub fn cycle_h(&self) -> f64 {
        self.pump_wait_min / 60.0
    }

    #[inline]
    pub fn stock(&self, channel: Channel) -> f64 {
        match channel {
            Channel::Media => 0.0,
            Channel::DrugA => self.drug_a_stock,
            Channel::DrugB => self.drug_b_stock,
        }
    }

    #[inline]
    pub fn pump_s(&self, channel: Channel) -> f64 {
        match channel {
            Channel::Media => self.pump_media_s,
            Channel::DrugA => self.pump_a_s,
            Channel::DrugB => self.pump_b_s,
        }
    }
}

impl Default for MorbidostatParams {
    fn default() -> Self {
        Self {
            lower_od: 0.15,
            middle_od: 0.3,
            upper_od: 0.45,
            pump_wait_min: 12.0,
            drug_a_stock: 1.0,
            drug_b_stock: 10.0,
            same_drug: false,
            pump_media_s: 10.0,
            pump_a_s: 10.0,
            pump_b_s: 10.0,
            suction_s: 20.0,
            scoring: Scoring::Banded,
        }
    }
}

/// One drug's dosing timetable.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CoursePlan {
    pub init_h: f64,
    /// Hours between course starts; 0 runs one course.
    pub freq_h: f64,
    /// Consecutive dosing cycles per course.
    pub cycles: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TimedParams {
    pub base: MorbidostatParams,
    pub a: CoursePlan,
    /// `None` when drug B is not in use.
    pub b: Option<CoursePlan>,
}

/// Control law selected for the run.
#[derive(Debug, Clone, PartialEq)]
pub enum LawConfig {
    Turbidostat(TurbidostatParams),
    Chemostat(ChemostatParams),
    Morbidostat(MorbidostatParams),
    TimedMorbidostat(TimedParams),
}

impl LawConfig {
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Turbidostat(_) => "turbidostat",
            Self::Chemostat(_) => "chemostat",
            Self::Morbidostat(m) => match m.scoring {
                Scoring::Banded => "morbidostat",
                Scoring::Legacy => "old_morbidostat",
            },
            Self::TimedMorbidostat(_) => "timed_morbidostat",
        }
    }
}

#[derive(Debug, Clone)]
pub struct RunConfig {
    pub vials: Vec<usize>,
    pub vial_volume_ml: f64,
    pub od_window: usize,
    pub flows: FlowTable,
    pub law: LawConfig,
}

impl RunConfig {
    /// Flow rate (mL/s) of the pump feeding `vial` from `channel`.
    #[inline]
    pub fn flow(&self, channel: Channel, vial: usize) -> f64 {
        self.flows.rate(channel.rack(), vial)
    }

    #[inline]
    pub fn law_name(&self) -> &'static str {
        self.law.name()
    }
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            vials: (0..culture_traits::command::MAX_VIALS).collect(),
            vial_volume_ml: 30.0,
            od_window: 7,
            flows: FlowTable::uniform(1.0),
            law: LawConfig::Turbidostat(TurbidostatParams::default()),
        }
    }
}
