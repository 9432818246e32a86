//! Conversions bridging `culture_config` types to the runtime structs in `config`.
//!
//! The TOML layer has already been validated; these only reshape it.

use crate::config::{
    ChemostatParams, CoursePlan, LawConfig, MorbidostatParams, RunConfig, Scoring, TimedParams,
    TurbidostatParams,
};
use culture_config::{Algorithm, FlowTable};

// ── TurbidostatParams ────────────────────────────────────────────────────────

impl From<&culture_config::TurbidostatCfg> for TurbidostatParams {
    fn from(c: &culture_config::TurbidostatCfg) -> Self {
        Self {
            lower_od: c.lower_od,
            upper_od: c.upper_od,
            time_out_s: c.time_out_s,
            pump_wait_min: c.pump_wait_min,
            pump_for_max_s: c.pump_for_max_s,
            stop_after_n_curves: c.stop_after_n_curves,
        }
    }
}

// ── ChemostatParams ──────────────────────────────────────────────────────────

impl From<&culture_config::ChemostatCfg> for ChemostatParams {
    fn from(c: &culture_config::ChemostatCfg) -> Self {
        Self {
            start_od: c.start_od,
            start_time_h: c.start_time_h,
            rate_per_h: c.rate_per_h,
            bolus_ml: c.bolus_ml,
        }
    }
}

// ── MorbidostatParams ────────────────────────────────────────────────────────

impl From<&culture_config::MorbidostatCfg> for MorbidostatParams {
    fn from(c: &culture_config::MorbidostatCfg) -> Self {
        Self {
            lower_od: c.lower_od,
            middle_od: c.middle_od,
            upper_od: c.upper_od,
            pump_wait_min: c.pump_wait_min,
            drug_a_stock: c.drug_a_stock,
            drug_b_stock: c.drug_b_stock,
            same_drug: c.same_drug,
            pump_media_s: c.pump_media_s,
            pump_a_s: c.pump_a_s,
            pump_b_s: c.pump_b_s,
            suction_s: c.suction_s,
            scoring: Scoring::Banded,
        }
    }
}

// ── CoursePlan ───────────────────────────────────────────────────────────────

fn plans(s: &culture_config::ScheduleCfg) -> (CoursePlan, Option<CoursePlan>) {
    let a = CoursePlan {
        init_h: s.init_a_h,
        freq_h: s.freq_a_h,
        cycles: s.times_a,
    };
    let b = s.use_b.then_some(CoursePlan {
        init_h: s.init_b_h,
        freq_h: s.freq_b_h,
        cycles: s.times_b,
    });
    (a, b)
}

// ── LawConfig ────────────────────────────────────────────────────────────────

impl From<&culture_config::Config> for LawConfig {
    fn from(c: &culture_config::Config) -> Self {
        match c.run.algorithm {
            Algorithm::Turbidostat => Self::Turbidostat((&c.turbidostat).into()),
            Algorithm::Chemostat => Self::Chemostat((&c.chemostat).into()),
            Algorithm::Morbidostat => Self::Morbidostat((&c.morbidostat).into()),
            Algorithm::OldMorbidostat => Self::Morbidostat(MorbidostatParams {
                scoring: Scoring::Legacy,
                ..(&c.morbidostat).into()
            }),
            Algorithm::TimedMorbidostat => {
                let (a, b) = plans(&c.schedule);
                Self::TimedMorbidostat(TimedParams {
                    base: (&c.morbidostat).into(),
                    a,
                    b,
                })
            }
        }
    }
}

// ── RunConfig ────────────────────────────────────────────────────────────────

impl TryFrom<(&culture_config::Config, FlowTable)> for RunConfig {
    type Error = eyre::Report;

    /// Validates the TOML config before reshaping it.
    fn try_from((c, flows): (&culture_config::Config, FlowTable)) -> Result<Self, Self::Error> {
        c.validate()?;
        Ok(Self {
            vials: c.run.vials.clone(),
            vial_volume_ml: c.run.vial_volume_ml,
            od_window: c.run.od_window,
            flows,
            law: c.into(),
        })
    }
}
