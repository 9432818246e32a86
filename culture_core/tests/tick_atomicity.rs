//! A tick either commits completely or leaves the fleet as it was.

use culture_core::config::{LawConfig, RunConfig, TurbidostatParams};
use culture_core::mocks::{MemoryStore, RecordingSink};
use culture_core::{CultureError, Fleet, TickStatus};
use culture_traits::{Channel, LogChannel, Slot, TelemetryFrame};

fn turbidostat_run() -> RunConfig {
    RunConfig {
        vials: vec![0, 1],
        od_window: 1,
        law: LawConfig::Turbidostat(TurbidostatParams {
            lower_od: 0.2,
            upper_od: 0.4,
            time_out_s: 5.0,
            pump_wait_min: 3.0,
            pump_for_max_s: None,
            stop_after_n_curves: None,
        }),
        ..RunConfig::default()
    }
}

fn frame(od: &[f64]) -> TelemetryFrame {
    TelemetryFrame {
        od: od.to_vec(),
        temp_c: vec![37.0; od.len()],
    }
}

#[test]
fn dense_vial_is_diluted_and_tick_committed() {
    let mut fleet = Fleet::builder().with_run(turbidostat_run()).build().unwrap();
    let mut store = MemoryStore::default();
    let mut sink = RecordingSink::default();

    let report = fleet
        .tick(1.0, Some(&frame(&[0.5, 0.3])), &mut store, &mut sink)
        .unwrap();

    let TickStatus::Emitted(cmd) = &report.status else {
        panic!("expected a command, got {:?}", report.status);
    };
    // -ln(0.2 / 0.5) * 30 mL / 1 mL/s
    assert_eq!(cmd.get(Channel::Media, 0), Slot::Run(27.49));
    // setpoint starts at 0, so a vial above lower is brought down to it
    assert_eq!(cmd.get(Channel::Media, 1), Slot::Run(12.16));
    assert_eq!(cmd.drain(), Slot::Run(32.49));
    assert_eq!(sink.sent.len(), 1);

    assert_eq!(store.count(0, LogChannel::Od), 1);
    assert_eq!(store.count(0, LogChannel::Pump), 1);
    assert_eq!(store.count(0, LogChannel::Setpoint), 1);
    assert_eq!(report.records, store.records().len());

    let v0 = fleet.vial(0).unwrap();
    assert_eq!(v0.turbidostat.setpoint, 0.2);
    assert_eq!(v0.last_pump_at(Channel::Media), 1.0);
}

#[test]
fn sink_failure_leaves_state_untouched() {
    let mut fleet = Fleet::builder().with_run(turbidostat_run()).build().unwrap();
    let mut store = MemoryStore::default();
    let mut sink = RecordingSink {
        fail: true,
        ..RecordingSink::default()
    };
    let before = fleet.vials().to_vec();

    let err = fleet
        .tick(1.0, Some(&frame(&[0.5, 0.5])), &mut store, &mut sink)
        .unwrap_err();

    match err.downcast_ref::<CultureError>() {
        Some(CultureError::CommunicationFailure(_)) => {}
        other => panic!("expected CommunicationFailure, got {other:?}"),
    }
    assert_eq!(fleet.vials(), before.as_slice());
    // journaled ahead of the send
    assert_eq!(store.count(0, LogChannel::Pump), 1);
}

#[test]
fn store_failure_sends_nothing() {
    let mut fleet = Fleet::builder().with_run(turbidostat_run()).build().unwrap();
    let mut store = MemoryStore::default();
    store.fail_append = true;
    let mut sink = RecordingSink::default();
    let before = fleet.vials().to_vec();

    let err = fleet
        .tick(1.0, Some(&frame(&[0.5, 0.5])), &mut store, &mut sink)
        .unwrap_err();
    assert!(matches!(
        err.downcast_ref::<CultureError>(),
        Some(CultureError::CommunicationFailure(_))
    ));
    assert!(sink.sent.is_empty());
    assert_eq!(fleet.vials(), before.as_slice());
}

#[test]
fn retry_after_store_failure_respects_pump_wait() {
    let mut fleet = Fleet::builder().with_run(turbidostat_run()).build().unwrap();
    let mut store = MemoryStore::default();
    store.fail_append = true;
    let mut sink = RecordingSink::default();

    assert!(
        fleet
            .tick(1.0, Some(&frame(&[0.5, 0.5])), &mut store, &mut sink)
            .is_err()
    );

    // store back; the next ticks are 0.6 and 1.2 min later, inside the 3 min wait
    store.fail_append = false;
    let report = fleet
        .tick(1.01, Some(&frame(&[0.5, 0.5])), &mut store, &mut sink)
        .unwrap();
    assert!(matches!(report.status, TickStatus::Emitted(_)));
    fleet
        .tick(1.02, Some(&frame(&[0.5, 0.5])), &mut store, &mut sink)
        .unwrap();

    let vial0_pumps = sink
        .sent
        .iter()
        .filter(|c| c.get(Channel::Media, 0).seconds() > 0.0)
        .count();
    assert_eq!(vial0_pumps, 1);
    assert_eq!(store.count(0, LogChannel::Pump), 1);
}

#[test]
fn incomplete_frame_does_nothing() {
    let mut fleet = Fleet::builder().with_run(turbidostat_run()).build().unwrap();
    let mut store = MemoryStore::default();
    let mut sink = RecordingSink::default();

    let report = fleet.tick(1.0, None, &mut store, &mut sink).unwrap();
    assert_eq!(report.status, TickStatus::Incomplete);
    assert!(store.records().is_empty());
    assert!(sink.sent.is_empty());
}

#[test]
fn missing_reading_skips_only_that_vial() {
    let mut fleet = Fleet::builder().with_run(turbidostat_run()).build().unwrap();
    let mut store = MemoryStore::default();
    let mut sink = RecordingSink::default();

    let report = fleet
        .tick(1.0, Some(&frame(&[f64::NAN, 0.5])), &mut store, &mut sink)
        .unwrap();
    assert!(matches!(
        report.skipped.as_slice(),
        [(0, CultureError::DataUnavailable { vial: 0, .. })]
    ));
    let cmd = report.status.command().unwrap();
    assert_eq!(cmd.get(Channel::Media, 0), Slot::NoOp);
    assert!(cmd.get(Channel::Media, 1).seconds() > 0.0);
    // the missing reading is still journaled, as null
    assert_eq!(store.count(0, LogChannel::Od), 1);
}

#[test]
fn non_monotonic_sample_is_rejected_per_vial() {
    let mut fleet = Fleet::builder().with_run(turbidostat_run()).build().unwrap();
    let mut store = MemoryStore::default();
    let mut sink = RecordingSink::default();

    fleet
        .tick(1.0, Some(&frame(&[0.3, 0.3])), &mut store, &mut sink)
        .unwrap();
    let report = fleet
        .tick(0.5, Some(&frame(&[0.3, 0.3])), &mut store, &mut sink)
        .unwrap();
    assert_eq!(report.skipped.len(), 2);
    assert!(
        report
            .skipped
            .iter()
            .all(|(_, e)| matches!(e, CultureError::NonMonotonicSample { .. }))
    );
    // the rejected samples never reach the journal
    assert_eq!(store.count(0, LogChannel::Od), 1);
    assert_eq!(store.count(1, LogChannel::Od), 1);
}
