//! Command bodies: config mapping, journal handling, and the simulated rig.

use culture_config::{Config, FlowTable};
use culture_core::collab_error::collab_report;
use culture_core::util::tick_period;
use culture_core::{Fleet, Journal, Manifest, RunConfig, RunOptions, RunSummary, VialState};
use culture_sim::culture::CultureParams;
use culture_sim::{SimFleet, SimParams};
use culture_traits::clock::ManualClock;
use culture_traits::command::WIRE_SLOTS;
use culture_traits::{CommandSink, PumpCommand};
use eyre::{Result, WrapErr};
use std::path::{Path, PathBuf};
use std::sync::atomic::AtomicBool;
use std::time::Duration;

/// A validated config together with the directory relative paths resolve in.
pub struct Loaded {
    pub cfg: Config,
    pub base_dir: Option<PathBuf>,
}

impl Loaded {
    pub fn flows(&self) -> Result<FlowTable> {
        self.cfg
            .flow_table(self.base_dir.as_deref())
            .wrap_err("pump calibration")
    }

    pub fn run_config(&self) -> Result<RunConfig> {
        RunConfig::try_from((&self.cfg, self.flows()?)).wrap_err("invalid configuration")
    }

    pub fn journal_dir(&self) -> PathBuf {
        let dir = Path::new(&self.cfg.store.dir);
        match &self.base_dir {
            Some(base) if dir.is_relative() => base.join(dir),
            _ => dir.to_path_buf(),
        }
    }

    fn manifest(&self) -> Manifest {
        Manifest {
            algorithm: self.cfg.run.algorithm.name().to_owned(),
            vials: self.cfg.run.vials.clone(),
        }
    }
}

pub fn load_config(path: &Path) -> Result<Loaded> {
    let text = std::fs::read_to_string(path)
        .wrap_err_with(|| format!("invalid configuration: cannot read {}", path.display()))?;
    let cfg: Config = toml::from_str(&text)
        .wrap_err_with(|| format!("invalid configuration in {}", path.display()))?;
    cfg.validate()
        .wrap_err_with(|| format!("invalid configuration in {}", path.display()))?;
    Ok(Loaded {
        cfg,
        base_dir: path.parent().map(Path::to_path_buf),
    })
}

/// Simulated rig parameters: vial geometry, flow and drug stocks from the
/// experiment sections, culture behaviour from `[sim]`.
pub fn sim_params(cfg: &Config) -> SimParams {
    SimParams {
        culture: CultureParams {
            volume_ml: cfg.run.vial_volume_ml,
            growth_per_h: cfg.sim.growth_per_h,
            capacity_od: cfg.sim.capacity_od,
            ic50_a: cfg.sim.ic50_a,
            ic50_b: cfg.sim.ic50_b,
        },
        initial_od: cfg.sim.initial_od,
        flow_ml_s: cfg.pumps.flow_rate_ml_s,
        tick: tick_period(cfg.run.tick_s),
        drug_a_stock: cfg.morbidostat.drug_a_stock,
        drug_b_stock: cfg.morbidostat.drug_b_stock,
        noise: cfg.sim.noise,
        seed: cfg.sim.seed,
        ..SimParams::default()
    }
}

/// Run (or resume) the configured experiment against the simulator.
pub fn run_experiment(
    loaded: &Loaded,
    ticks: Option<u64>,
    shutdown: &AtomicBool,
) -> Result<RunSummary> {
    let run = loaded.run_config()?;
    let dir = loaded.journal_dir();
    let mut journal = Journal::open(&dir, loaded.cfg.store.fsync)?;
    journal.ensure_manifest(&loaded.manifest())?;

    let (mut fleet, start_h) = if journal.is_empty() {
        (Fleet::builder().with_run(run).build()?, 0.0)
    } else {
        let (fleet, at_h) = Fleet::builder().with_run(run).restore(&journal)?;
        tracing::info!(dir = %dir.display(), resume_h = at_h, lines = journal.lines(), "resuming experiment");
        (fleet, at_h)
    };

    let clock = ManualClock::new();
    let sim = SimFleet::new(sim_params(&loaded.cfg), clock.clone());
    let mut pumps = sim.pumps();
    let opts = RunOptions {
        max_ticks: ticks,
        telemetry_timeout: Duration::from_millis(loaded.cfg.run.telemetry_timeout_ms),
        blank_od: loaded.cfg.run.blank_od,
        ..RunOptions::default()
    };
    culture_core::run(
        &mut fleet,
        sim.telemetry(),
        &mut journal,
        &mut pumps,
        clock,
        start_h,
        &opts,
        shutdown,
    )
}

/// Controller state rebuilt from the journal.
pub struct Status {
    pub law: &'static str,
    pub resume_h: f64,
    pub fleet: Fleet,
}

pub fn status(loaded: &Loaded) -> Result<Status> {
    let run = loaded.run_config()?;
    let dir = loaded.journal_dir();
    let journal = Journal::open(&dir, false)?;
    if journal.is_empty() {
        eyre::bail!("journal at {} holds no records yet", dir.display());
    }
    journal.ensure_manifest(&loaded.manifest())?;
    let law = run.law_name();
    let (fleet, resume_h) = Fleet::builder().with_run(run).restore(&journal)?;
    Ok(Status {
        law,
        resume_h,
        fleet,
    })
}

pub fn vial_json(v: &VialState) -> serde_json::Value {
    serde_json::json!({
        "vial": v.vial,
        "smoothed_od": v.smoothed,
        "growth_rate": v.growth_rate,
        "setpoint": v.turbidostat.setpoint,
        "curves": v.turbidostat.curves,
        "chemostat_period_s": v.chemostat.period_s,
        "phase": v.morbido.phase,
        "drug_a": v.morbido.drug_a,
        "drug_b": v.morbido.drug_b,
        "fault": v.fault,
    })
}

pub fn vial_line(v: &VialState) -> String {
    let od = v
        .smoothed
        .map_or_else(|| "-".to_string(), |od| format!("{od:.3}"));
    let gr = v
        .growth_rate
        .map_or_else(|| "-".to_string(), |g| format!("{g:.3}"));
    let mut line = format!(
        "vial {:>2}  od {od:>6}  gr {gr:>6}/h  setpoint {:.2}  curves {}  phase {:?}  drug a {:.3} b {:.3}",
        v.vial,
        v.turbidostat.setpoint,
        v.turbidostat.curves,
        v.morbido.phase,
        v.morbido.drug_a,
        v.morbido.drug_b,
    );
    if let Some(f) = &v.fault {
        line = format!("{line}  ISOLATED: {f}");
    }
    line
}

/// Stop-all, then one run of every wire slot.
pub fn prime<K: CommandSink + ?Sized>(sink: &mut K, seconds: f64) -> Result<usize> {
    if !(seconds.is_finite() && seconds > 0.0) {
        eyre::bail!("prime duration must be > 0 seconds, got {seconds}");
    }
    sink.send(&PumpCommand::stop_all())
        .map_err(|e| collab_report(e, "stop pumps before priming"))?;
    let cmd = PumpCommand::prime(seconds);
    tracing::info!(seconds, values = ?cmd.wire_values(), "priming pump lines");
    sink.send(&cmd).map_err(|e| collab_report(e, "prime pumps"))?;
    Ok(WIRE_SLOTS)
}
