mod cli;
mod error_fmt;
mod experiment;

use clap::Parser;
use cli::{Cli, Commands, FILE_GUARD, JSON_MODE};
use culture_config::Logging;
use eyre::{Result, WrapErr};
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

fn main() {
    let _ = color_eyre::install();
    let cli = Cli::parse();
    let _ = JSON_MODE.set(cli.json);

    if let Err(e) = real_main(cli) {
        let json = JSON_MODE.get().copied().unwrap_or(false);
        if json {
            eprintln!("{}", error_fmt::format_error_json(&e));
        } else {
            eprintln!("{}", error_fmt::humanize(&e));
        }
        std::process::exit(error_fmt::exit_code_for_error(&e));
    }
}

fn real_main(cli: Cli) -> Result<()> {
    let loaded = experiment::load_config(&cli.config)?;
    init_tracing(
        &cli.log_level,
        cli.json,
        &loaded.cfg.logging,
        loaded.base_dir.as_deref(),
    )?;

    match cli.cmd {
        Commands::Check => {
            let flows = loaded.flows()?;
            let run = loaded.run_config()?;
            if cli.json {
                println!(
                    "{}",
                    serde_json::json!({
                        "ok": true,
                        "algorithm": run.law_name(),
                        "vials": run.vials,
                        "journal": loaded.journal_dir(),
                        "calibrated": loaded.cfg.pumps.calibration.is_some(),
                    })
                );
            } else {
                println!(
                    "config ok: {} on {} vial(s), journal at {}",
                    run.law_name(),
                    run.vials.len(),
                    loaded.journal_dir().display()
                );
                if loaded.cfg.pumps.calibration.is_some() {
                    println!(
                        "pump calibration loaded (media vial 0: {:.3} mL/s)",
                        flows.rate(0, 0)
                    );
                }
            }
        }
        Commands::Status => {
            let st = experiment::status(&loaded)?;
            if cli.json {
                let vials: Vec<_> = st.fleet.vials().iter().map(experiment::vial_json).collect();
                println!(
                    "{}",
                    serde_json::json!({
                        "law": st.law,
                        "resume_h": st.resume_h,
                        "vials": vials,
                    })
                );
            } else {
                println!("{} at {:.3} h", st.law, st.resume_h);
                for v in st.fleet.vials() {
                    println!("{}", experiment::vial_line(v));
                }
            }
        }
        Commands::Run { ticks } => {
            let shutdown = Arc::new(AtomicBool::new(false));
            {
                let flag = shutdown.clone();
                ctrlc::set_handler(move || {
                    flag.store(true, Ordering::Relaxed);
                })
                .wrap_err("install Ctrl-C handler")?;
            }
            let summary = experiment::run_experiment(&loaded, ticks, &shutdown)?;
            if cli.json {
                println!("{}", serde_json::to_string(&summary)?);
            } else {
                println!(
                    "experiment finished: {} ticks, {} commands, {} failed, at {:.3} h",
                    summary.ticks, summary.commands, summary.failed, summary.last_at_h
                );
                if !summary.isolated.is_empty() {
                    println!("isolated vials: {:?}", summary.isolated);
                }
            }
        }
        Commands::Prime { seconds } => {
            let sim = culture_sim::SimFleet::new(
                experiment::sim_params(&loaded.cfg),
                culture_traits::clock::ManualClock::new(),
            );
            let lines = experiment::prime(&mut sim.pumps(), seconds)?;
            if cli.json {
                println!("{}", serde_json::json!({ "primed": lines, "seconds": seconds }));
            } else {
                println!("primed {lines} pump lines for {seconds} s");
            }
        }
    }
    Ok(())
}

/// Console logs go to stderr so stdout stays machine-readable. The optional
/// `[logging].file` sink writes JSON lines through a non-blocking appender.
fn init_tracing(level: &str, json: bool, logging: &Logging, base_dir: Option<&Path>) -> Result<()> {
    let level = logging.level.as_deref().unwrap_or(level);
    let filter = EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(level))?;

    let file_layer = match &logging.file {
        Some(file) => {
            let path = Path::new(file);
            let path = match base_dir {
                Some(dir) if path.is_relative() => dir.join(path),
                _ => path.to_path_buf(),
            };
            let dir = path.parent().unwrap_or_else(|| Path::new("."));
            let name = path.file_name().map_or_else(
                || std::ffi::OsString::from("culture.log"),
                std::ffi::OsStr::to_os_string,
            );
            // rotation values are checked by Config::validate
            let appender = match logging.rotation.as_deref() {
                Some("daily") => tracing_appender::rolling::daily(dir, name),
                Some("hourly") => tracing_appender::rolling::hourly(dir, name),
                _ => tracing_appender::rolling::never(dir, name),
            };
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let _ = FILE_GUARD.set(guard);
            Some(fmt::layer().json().with_ansi(false).with_writer(writer))
        }
        None => None,
    };

    let console_json = json.then(|| fmt::layer().json().with_writer(std::io::stderr));
    let console_text = (!json).then(|| fmt::layer().with_target(false).with_writer(std::io::stderr));

    tracing_subscriber::registry()
        .with(filter)
        .with(console_json)
        .with(console_text)
        .with(file_layer)
        .try_init()
        .wrap_err("install tracing subscriber")?;
    Ok(())
}
