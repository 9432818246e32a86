use culture_core::config::{LawConfig, RunConfig, TurbidostatParams};
use culture_core::mocks::{MemoryStore, RecordingSink, ScriptedTelemetry};
use culture_core::{CultureError, Fleet, RunOptions, run};
use culture_traits::clock::ManualClock;
use culture_traits::{PumpCommand, Slot};
use std::sync::atomic::AtomicBool;
use std::time::Duration;

fn fleet() -> Fleet {
    Fleet::builder()
        .with_run(RunConfig {
            vials: vec![0],
            od_window: 1,
            law: LawConfig::Turbidostat(TurbidostatParams::default()),
            ..RunConfig::default()
        })
        .build()
        .unwrap()
}

fn opts(max_ticks: u64) -> RunOptions {
    RunOptions {
        max_ticks: Some(max_ticks),
        telemetry_timeout: Duration::from_millis(20),
        max_consecutive_failures: 2,
        ..RunOptions::default()
    }
}

#[test]
fn runs_requested_ticks_then_stops_all_pumps() {
    let mut fleet = fleet();
    let mut store = MemoryStore::default();
    let mut sink = RecordingSink::default();
    let source = ScriptedTelemetry::new().frame(&[0.5]).frame(&[0.5]).incomplete();
    let shutdown = AtomicBool::new(false);

    let summary = run(
        &mut fleet,
        source,
        &mut store,
        &mut sink,
        ManualClock::new(),
        1.0,
        &opts(3),
        &shutdown,
    )
    .unwrap();

    assert_eq!(summary.law, "turbidostat");
    assert_eq!(summary.ticks, 3);
    // second frame lands inside pump_wait_min
    assert_eq!((summary.commands, summary.idle, summary.incomplete), (1, 1, 1));
    assert_eq!(summary.last_at_h, 1.0);
    assert_eq!(sink.sent.len(), 2);
    assert_eq!(sink.sent[1], PumpCommand::stop_all());
}

#[test]
fn blanking_subtracts_the_first_frame() {
    let mut fleet = fleet();
    let mut store = MemoryStore::default();
    let mut sink = RecordingSink::default();
    // raw 0.52 with a 0.5 blank is far below lower_od: released, never pumped
    let source = ScriptedTelemetry::new().frame(&[0.5]).frame(&[0.52]);
    let shutdown = AtomicBool::new(false);
    let options = RunOptions {
        blank_od: true,
        ..opts(2)
    };

    let summary = run(
        &mut fleet,
        source,
        &mut store,
        &mut sink,
        ManualClock::new(),
        1.0,
        &options,
        &shutdown,
    )
    .unwrap();
    assert_eq!(summary.commands, 0);
    assert_eq!(fleet.vial(0).unwrap().turbidostat.curves, 1);
    assert_eq!(sink.sent, vec![PumpCommand::stop_all()]);
}

#[test]
fn consecutive_failures_end_the_run_after_stopping_pumps() {
    let mut fleet = fleet();
    let mut store = MemoryStore::default();
    let mut sink = RecordingSink::default();
    let source = ScriptedTelemetry::new().failure("bus error").failure("bus error");
    let shutdown = AtomicBool::new(false);

    let err = run(
        &mut fleet,
        source,
        &mut store,
        &mut sink,
        ManualClock::new(),
        0.0,
        &opts(10),
        &shutdown,
    )
    .unwrap_err();
    assert!(matches!(
        err.downcast_ref::<CultureError>(),
        Some(CultureError::CommunicationFailure(_))
    ));
    assert_eq!(sink.sent.len(), 1);
    assert!(sink.sent[0].slots().iter().all(|s| *s == Slot::Stopped));
}

#[test]
fn preset_shutdown_runs_no_ticks() {
    let mut fleet = fleet();
    let mut store = MemoryStore::default();
    let mut sink = RecordingSink::default();
    let shutdown = AtomicBool::new(true);

    let summary = run(
        &mut fleet,
        ScriptedTelemetry::new().frame(&[0.5]),
        &mut store,
        &mut sink,
        ManualClock::new(),
        0.0,
        &RunOptions::default(),
        &shutdown,
    )
    .unwrap();
    assert_eq!(summary.ticks, 0);
    assert!(store.records().is_empty());
}
