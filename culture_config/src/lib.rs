#![cfg_attr(all(not(debug_assertions), not(test)), deny(warnings))]
#![cfg_attr(
    all(not(debug_assertions), not(test)),
    deny(clippy::all, clippy::pedantic, clippy::nursery)
)]
#![allow(clippy::module_name_repetitions, clippy::missing_errors_doc)]
//! Config schema and pump calibration parsing for the culture controller.
//!
//! - `Config` and its sections are deserialized from TOML and validated once
//!   at load time; nothing downstream re-checks ranges.
//! - Pump calibration is a tab-separated table of flow rates (mL/s), one row
//!   per pump rack or a single row shared by every rack.
use culture_traits::command::{MAX_VIALS, RACKS, SLOTS_PER_RACK};
use serde::Deserialize;
use serde::de::Deserializer;
use std::path::Path;

/// Control law driving every vial of the run.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum Algorithm {
    #[default]
    Turbidostat,
    Chemostat,
    Morbidostat,
    /// Morbidostat scoring used before the upper/middle hysteresis existed.
    OldMorbidostat,
    /// Morbidostat dosing on a fixed timetable instead of OD feedback.
    TimedMorbidostat,
}

impl Algorithm {
    pub const fn name(self) -> &'static str {
        match self {
            Self::Turbidostat => "turbidostat",
            Self::Chemostat => "chemostat",
            Self::Morbidostat => "morbidostat",
            Self::OldMorbidostat => "old_morbidostat",
            Self::TimedMorbidostat => "timed_morbidostat",
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct RunCfg {
    pub algorithm: Algorithm,
    /// Vials under control. Accepts either:
    /// - a list: [0, 1, 2]
    /// - an inclusive range table: { from = 0, to = 14 }
    #[serde(deserialize_with = "de_vials")]
    pub vials: Vec<usize>,
    /// Liquid volume held by a vial (mL), set by the efflux straw length.
    pub vial_volume_ml: f64,
    /// Number of OD samples the median is taken over.
    pub od_window: usize,
    /// Seconds between telemetry ticks.
    pub tick_s: u64,
    /// Give up on a telemetry read after this long.
    pub telemetry_timeout_ms: u64,
    /// Subtract each vial's first reading from every later one.
    pub blank_od: bool,
}

impl Default for RunCfg {
    fn default() -> Self {
        Self {
            algorithm: Algorithm::Turbidostat,
            vials: (0..MAX_VIALS).collect(),
            vial_volume_ml: 30.0,
            od_window: 7,
            tick_s: 20,
            telemetry_timeout_ms: 5_000,
            blank_od: false,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct TurbidostatCfg {
    pub lower_od: f64,
    pub upper_od: f64,
    /// Extra drain time on top of the longest influx (s).
    pub time_out_s: f64,
    /// Minimum spacing between pump events on one vial (min).
    pub pump_wait_min: f64,
    /// Overflow clamp on a single influx (s). Absent means no clamp.
    pub pump_for_max_s: Option<f64>,
    /// Stop diluting a vial after this many growth curves. Absent means never.
    pub stop_after_n_curves: Option<u32>,
}

impl Default for TurbidostatCfg {
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

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct ChemostatCfg {
    /// Dilutions start once OD exceeds this; 0 starts at any positive OD.
    pub start_od: f64,
    /// Dilutions start after this many hours.
    pub start_time_h: f64,
    /// Dilution rate (1/h, not mL/h).
    pub rate_per_h: f64,
    /// Volume delivered per dilution event (mL).
    pub bolus_ml: f64,
}

impl Default for ChemostatCfg {
    fn default() -> Self {
        Self {
            start_od: 0.0,
            start_time_h: 0.0,
            rate_per_h: 0.1,
            bolus_ml: 0.5,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct MorbidostatCfg {
    pub lower_od: f64,
    pub middle_od: f64,
    pub upper_od: f64,
    /// Length of one dosing cycle (min).
    pub pump_wait_min: f64,
    /// Stock concentration of drug A (µM).
    pub drug_a_stock: f64,
    /// Stock concentration of drug B (µM).
    pub drug_b_stock: f64,
    /// Drug B is a stronger stock of drug A.
    pub same_drug: bool,
    pub pump_media_s: f64,
    pub pump_a_s: f64,
    pub pump_b_s: f64,
    pub suction_s: f64,
}

impl Default for MorbidostatCfg {
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
        }
    }
}

/// Timetable for `timed_morbidostat`. Hours are experiment time.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct ScheduleCfg {
    pub use_b: bool,
    /// First course of drug A starts at this hour.
    pub init_a_h: f64,
    pub init_b_h: f64,
    /// Hours between course starts; 0 runs a single course.
    pub freq_a_h: f64,
    pub freq_b_h: f64,
    /// Dosing cycles in a row per course.
    pub times_a: u32,
    pub times_b: u32,
}

impl Default for ScheduleCfg {
    fn default() -> Self {
        Self {
            use_b: false,
            init_a_h: 0.0,
            init_b_h: 0.0,
            freq_a_h: 0.0,
            freq_b_h: 0.0,
            times_a: 1,
            times_b: 1,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct PumpsCfg {
    /// Flow rate used for every pump when no calibration file is given (mL/s).
    pub flow_rate_ml_s: f64,
    /// Tab-separated flow-rate calibration file.
    pub calibration: Option<String>,
}

impl Default for PumpsCfg {
    fn default() -> Self {
        Self {
            flow_rate_ml_s: 1.0,
            calibration: None,
        }
    }
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct Logging {
    pub file: Option<String>,  // path to .log (JSON lines)
    pub level: Option<String>, // "info","debug"
    /// Log rotation policy: "never" | "daily" | "hourly" (default: never)
    pub rotation: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct StoreCfg {
    /// Directory holding the per-vial journal.
    pub dir: String,
    /// fsync after every append batch.
    pub fsync: bool,
}

impl Default for StoreCfg {
    fn default() -> Self {
        Self {
            dir: "journal".to_string(),
            fsync: true,
        }
    }
}

/// Simulated rig used when no device is attached.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct SimCfg {
    pub initial_od: f64,
    /// Uninhibited growth rate (1/h).
    pub growth_per_h: f64,
    pub capacity_od: f64,
    /// Drug A concentration halving the growth rate (µM).
    pub ic50_a: f64,
    pub ic50_b: f64,
    /// Peak-to-peak OD noise.
    pub noise: f64,
    pub seed: u32,
}

impl Default for SimCfg {
    fn default() -> Self {
        Self {
            initial_od: 0.05,
            growth_per_h: 0.8,
            capacity_od: 1.2,
            ic50_a: 0.5,
            ic50_b: 5.0,
            noise: 0.002,
            seed: 0x5EED,
        }
    }
}

#[derive(Debug, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub run: RunCfg,
    #[serde(default)]
    pub turbidostat: TurbidostatCfg,
    #[serde(default)]
    pub chemostat: ChemostatCfg,
    #[serde(default)]
    pub morbidostat: MorbidostatCfg,
    #[serde(default)]
    pub schedule: ScheduleCfg,
    #[serde(default)]
    pub pumps: PumpsCfg,
    #[serde(default)]
    pub logging: Logging,
    #[serde(default)]
    pub store: StoreCfg,
    #[serde(default)]
    pub sim: SimCfg,
}

pub fn load_toml(s: &str) -> Result<Config, toml::de::Error> {
    toml::from_str::<Config>(s)
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum VialsToml {
    List(Vec<usize>),
    Range { from: usize, to: usize },
}

fn de_vials<'de, D>(deserializer: D) -> Result<Vec<usize>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match VialsToml::deserialize(deserializer)? {
        VialsToml::List(v) => v,
        VialsToml::Range { from, to } if from <= to => (from..=to).collect(),
        VialsToml::Range { .. } => Vec::new(),
    })
}

#[inline]
fn finite_non_negative(x: f64) -> bool {
    x.is_finite() && x >= 0.0
}

#[inline]
fn finite_positive(x: f64) -> bool {
    x.is_finite() && x > 0.0
}

impl Config {
    pub fn validate(&self) -> eyre::Result<()> {
        // Run
        if self.run.vials.is_empty() {
            eyre::bail!("run.vials must name at least one vial");
        }
        if let Some(v) = self.run.vials.iter().find(|v| **v >= MAX_VIALS) {
            eyre::bail!("run.vials entry {v} is out of range (0..{MAX_VIALS})");
        }
        let mut seen = [false; MAX_VIALS];
        for &v in &self.run.vials {
            if std::mem::replace(&mut seen[v], true) {
                eyre::bail!("run.vials lists vial {v} twice");
            }
        }
        if !finite_positive(self.run.vial_volume_ml) {
            eyre::bail!("run.vial_volume_ml must be > 0");
        }
        if self.run.od_window == 0 {
            eyre::bail!("run.od_window must be >= 1");
        }
        if self.run.tick_s == 0 {
            eyre::bail!("run.tick_s must be >= 1");
        }
        if self.run.telemetry_timeout_ms == 0 {
            eyre::bail!("run.telemetry_timeout_ms must be >= 1");
        }

        // Pumps
        if !finite_positive(self.pumps.flow_rate_ml_s) {
            eyre::bail!("pumps.flow_rate_ml_s must be > 0");
        }

        if let Some(r) = self.logging.rotation.as_deref()
            && !matches!(r, "never" | "daily" | "hourly")
        {
            eyre::bail!("logging.rotation must be never, daily or hourly (got `{r}`)");
        }

        let sim = &self.sim;
        if !finite_non_negative(sim.initial_od) || !finite_non_negative(sim.noise) {
            eyre::bail!("sim.initial_od and sim.noise must be >= 0");
        }
        for (name, v) in [
            ("growth_per_h", sim.growth_per_h),
            ("capacity_od", sim.capacity_od),
            ("ic50_a", sim.ic50_a),
            ("ic50_b", sim.ic50_b),
        ] {
            if !finite_positive(v) {
                eyre::bail!("sim.{name} must be > 0");
            }
        }

        // Only the selected law's section has to make sense.
        match self.run.algorithm {
            Algorithm::Turbidostat => self.validate_turbidostat(),
            Algorithm::Chemostat => self.validate_chemostat(),
            Algorithm::Morbidostat | Algorithm::OldMorbidostat => self.validate_morbidostat(),
            Algorithm::TimedMorbidostat => {
                self.validate_morbidostat()?;
                self.validate_schedule()
            }
        }
    }

    fn validate_turbidostat(&self) -> eyre::Result<()> {
        let t = &self.turbidostat;
        // ln(lower/OD) is undefined at zero
        if !finite_positive(t.lower_od) {
            eyre::bail!("turbidostat.lower_od must be > 0");
        }
        if !finite_positive(t.upper_od) || t.upper_od <= t.lower_od {
            eyre::bail!("turbidostat.upper_od must be > turbidostat.lower_od");
        }
        if !finite_non_negative(t.time_out_s) {
            eyre::bail!("turbidostat.time_out_s must be >= 0");
        }
        if !finite_non_negative(t.pump_wait_min) {
            eyre::bail!("turbidostat.pump_wait_min must be >= 0");
        }
        if let Some(max) = t.pump_for_max_s
            && !finite_positive(max)
        {
            eyre::bail!("turbidostat.pump_for_max_s must be > 0 when set");
        }
        Ok(())
    }

    fn validate_chemostat(&self) -> eyre::Result<()> {
        let c = &self.chemostat;
        if !finite_non_negative(c.start_od) {
            eyre::bail!("chemostat.start_od must be >= 0");
        }
        if !finite_non_negative(c.start_time_h) {
            eyre::bail!("chemostat.start_time_h must be >= 0");
        }
        if !c.rate_per_h.is_finite() {
            eyre::bail!("chemostat.rate_per_h must be finite");
        }
        if !c.bolus_ml.is_finite() || c.bolus_ml < 0.2 {
            eyre::bail!("chemostat.bolus_ml must be >= 0.2");
        }
        Ok(())
    }

    fn validate_morbidostat(&self) -> eyre::Result<()> {
        let m = &self.morbidostat;
        if !finite_non_negative(m.lower_od) {
            eyre::bail!("morbidostat.lower_od must be >= 0");
        }
        if !m.middle_od.is_finite() || m.middle_od < m.lower_od {
            eyre::bail!("morbidostat.middle_od must be >= morbidostat.lower_od");
        }
        if !m.upper_od.is_finite() || m.upper_od < m.middle_od {
            eyre::bail!("morbidostat.upper_od must be >= morbidostat.middle_od");
        }
        if !finite_positive(m.pump_wait_min) {
            eyre::bail!("morbidostat.pump_wait_min must be > 0");
        }
        if !finite_non_negative(m.drug_a_stock) {
            eyre::bail!("morbidostat.drug_a_stock must be >= 0");
        }
        if !finite_non_negative(m.drug_b_stock) {
            eyre::bail!("morbidostat.drug_b_stock must be >= 0");
        }
        for (name, v) in [
            ("pump_media_s", m.pump_media_s),
            ("pump_a_s", m.pump_a_s),
            ("pump_b_s", m.pump_b_s),
            ("suction_s", m.suction_s),
        ] {
            if !finite_non_negative(v) {
                eyre::bail!("morbidostat.{name} must be >= 0");
            }
        }
        Ok(())
    }

    fn validate_schedule(&self) -> eyre::Result<()> {
        let s = &self.schedule;
        for (name, v) in [
            ("init_a_h", s.init_a_h),
            ("init_b_h", s.init_b_h),
            ("freq_a_h", s.freq_a_h),
            ("freq_b_h", s.freq_b_h),
        ] {
            if !finite_non_negative(v) {
                eyre::bail!("schedule.{name} must be >= 0");
            }
        }
        if s.times_a == 0 {
            eyre::bail!("schedule.times_a must be >= 1");
        }
        if s.use_b && s.times_b == 0 {
            eyre::bail!("schedule.times_b must be >= 1");
        }
        Ok(())
    }
}

/// Flow rate of every pump, mL/s, indexed `[rack][slot]`.
#[derive(Debug, Clone, PartialEq)]
pub struct FlowTable {
    rates: [[f64; SLOTS_PER_RACK]; RACKS],
}

impl FlowTable {
    pub fn uniform(rate_ml_s: f64) -> Self {
        Self {
            rates: [[rate_ml_s; SLOTS_PER_RACK]; RACKS],
        }
    }

    /// Build from calibration rows. One row is shared by every rack; otherwise
    /// there must be one row per rack.
    pub fn from_rows(rows: &[Vec<f64>]) -> eyre::Result<Self> {
        let per_rack: Vec<&Vec<f64>> = match rows.len() {
            1 => vec![&rows[0]; RACKS],
            RACKS => rows.iter().collect(),
            n => eyre::bail!("pump calibration needs 1 or {RACKS} rows, got {n}"),
        };
        let mut rates = [[0.0; SLOTS_PER_RACK]; RACKS];
        for (rack, row) in per_rack.into_iter().enumerate() {
            if row.len() != SLOTS_PER_RACK {
                eyre::bail!(
                    "pump calibration row {} has {} values, expected {SLOTS_PER_RACK}",
                    rack + 1,
                    row.len()
                );
            }
            for (slot, &r) in row.iter().enumerate() {
                if !finite_positive(r) {
                    eyre::bail!(
                        "pump calibration rack {rack} slot {slot}: flow rate must be > 0, got {r}"
                    );
                }
                rates[rack][slot] = r;
            }
        }
        Ok(Self { rates })
    }

    /// Flow rate of `(rack, slot)`; out-of-range lookups yield 0.
    #[inline]
    pub fn rate(&self, rack: usize, slot: usize) -> f64 {
        self.rates
            .get(rack)
            .and_then(|r| r.get(slot))
            .copied()
            .unwrap_or(0.0)
    }
}

pub fn load_pump_calibration(path: &Path) -> eyre::Result<FlowTable> {
    let mut rdr = csv::ReaderBuilder::new()
        .has_headers(false)
        .delimiter(b'\t')
        .flexible(true)
        .trim(csv::Trim::All)
        .from_path(path)
        .map_err(|e| eyre::eyre!("open pump calibration {:?}: {}", path, e))?;

    let mut rows = Vec::new();
    for (idx, rec) in rdr.records().enumerate() {
        let rec = rec.map_err(|e| eyre::eyre!("read pump calibration row {}: {}", idx + 1, e))?;
        let mut row = Vec::with_capacity(rec.len());
        for field in rec.iter().filter(|f| !f.is_empty()) {
            let v: f64 = field.parse().map_err(|e| {
                eyre::eyre!("invalid pump calibration value {field:?} in row {}: {e}", idx + 1)
            })?;
            row.push(v);
        }
        if !row.is_empty() {
            rows.push(row);
        }
    }
    FlowTable::from_rows(&rows)
}

impl Config {
    /// Flow table from `[pumps]`: the calibration file if set, else the uniform rate.
    /// A relative calibration path resolves against `base_dir`.
    pub fn flow_table(&self, base_dir: Option<&Path>) -> eyre::Result<FlowTable> {
        match &self.pumps.calibration {
            Some(p) => {
                let path = Path::new(p);
                let path = match base_dir {
                    Some(dir) if path.is_relative() => dir.join(path),
                    _ => path.to_path_buf(),
                };
                load_pump_calibration(&path)
            }
            None => Ok(FlowTable::uniform(self.pumps.flow_rate_ml_s)),
        }
    }
}
