//! End-to-end control scenarios through `Fleet::tick`.

use culture_core::config::{
    ChemostatParams, LawConfig, MorbidostatParams, RunConfig, Scoring, TurbidostatParams,
};
use culture_core::mocks::{MemoryStore, RecordingSink};
use culture_core::{Fleet, TickStatus};
use culture_traits::{Channel, CommandKind, LogChannel, RecordBody, Slot, TelemetryFrame};

fn frame(od: &[f64]) -> TelemetryFrame {
    TelemetryFrame {
        od: od.to_vec(),
        temp_c: vec![30.0; od.len()],
    }
}

fn turbidostat(window: usize, max_s: Option<f64>) -> RunConfig {
    RunConfig {
        vials: vec![0],
        od_window: window,
        law: LawConfig::Turbidostat(TurbidostatParams {
            lower_od: 0.10,
            upper_od: 0.30,
            time_out_s: 5.0,
            pump_wait_min: 3.0,
            pump_for_max_s: max_s,
            stop_after_n_curves: None,
        }),
        ..RunConfig::default()
    }
}

#[test]
fn window_inside_band_sends_nothing() {
    let mut fleet = Fleet::builder().with_run(turbidostat(5, Some(20.0))).build().unwrap();
    let mut store = MemoryStore::default();
    let mut sink = RecordingSink::default();

    for (k, od) in [0.10, 0.12, 0.11, 0.13, 0.12].into_iter().enumerate() {
        let at_h = 0.1 * (k as f64 + 1.0);
        let report = fleet.tick(at_h, Some(&frame(&[od])), &mut store, &mut sink).unwrap();
        assert_eq!(report.status, TickStatus::Idle);
    }
    assert!(sink.sent.is_empty());
    let v = fleet.vial(0).unwrap();
    assert_eq!(v.smoothed, Some(0.12));
    // released to grow: setpoint moved to upper, first curve counted
    assert_eq!(v.turbidostat.setpoint, 0.30);
    assert_eq!(v.turbidostat.curves, 1);
}

#[test]
fn crossing_upper_drops_setpoint_and_dilutes() {
    let mut fleet = Fleet::builder().with_run(turbidostat(1, None)).build().unwrap();
    let mut store = MemoryStore::default();
    let mut sink = RecordingSink::default();

    // grow through the band first so the setpoint sits at upper
    fleet.tick(0.5, Some(&frame(&[0.12])), &mut store, &mut sink).unwrap();
    fleet.tick(0.75, Some(&frame(&[0.2])), &mut store, &mut sink).unwrap();
    let report = fleet.tick(1.0, Some(&frame(&[0.35])), &mut store, &mut sink).unwrap();

    let cmd = report.status.command().unwrap();
    // -ln(0.10 / 0.35) * 30 / 1
    assert_eq!(cmd.get(Channel::Media, 0), Slot::Run(37.58));
    assert_eq!(fleet.vial(0).unwrap().turbidostat.setpoint, 0.10);

    // samples after the curve started: 0.75 h and the current one
    let gr = store
        .records()
        .iter()
        .find_map(|r| match r.body {
            RecordBody::GrowthRate { per_hour } => Some(per_hour),
            _ => None,
        })
        .expect("growth rate record");
    let want = (0.35f64 / 0.2).ln() / 0.25;
    assert!((gr - want).abs() < 1e-9);
}

#[test]
fn clamp_caps_influx() {
    let mut fleet = Fleet::builder().with_run(turbidostat(1, Some(20.0))).build().unwrap();
    let mut store = MemoryStore::default();
    let mut sink = RecordingSink::default();

    let report = fleet.tick(1.0, Some(&frame(&[0.35])), &mut store, &mut sink).unwrap();
    assert_eq!(report.clamped, vec![0]);
    let cmd = report.status.command().unwrap();
    assert_eq!(cmd.get(Channel::Media, 0), Slot::Run(20.0));
    assert_eq!(cmd.drain(), Slot::Run(25.0));
}

#[test]
fn chemostat_schedule_is_sent_once_and_survives_missing_data() {
    let run = RunConfig {
        vials: vec![0, 2],
        od_window: 1,
        law: LawConfig::Chemostat(ChemostatParams {
            start_od: 0.0,
            start_time_h: 0.0,
            rate_per_h: 0.1,
            bolus_ml: 0.5,
        }),
        ..RunConfig::default()
    };
    let mut fleet = Fleet::builder().with_run(run).build().unwrap();
    let mut store = MemoryStore::default();
    let mut sink = RecordingSink::default();
    let ods = [0.2, 0.0, 0.2];

    let first = fleet.tick(0.1, Some(&frame(&ods)), &mut store, &mut sink).unwrap();
    let cmd = first.status.command().unwrap();
    assert_eq!(cmd.kind, CommandKind::Recurring);
    // 3600 * 0.5 / (0.1 * 30)
    let want = Slot::Recurring { bolus_s: 0.5, period_s: 600 };
    assert_eq!(cmd.get(Channel::Media, 2), want);
    assert_eq!(cmd.get(Channel::EFFLUX, 2), Slot::NoOp);
    assert_eq!(cmd.drain(), Slot::Recurring { bolus_s: 1.0, period_s: 600 });

    let again = fleet.tick(0.2, Some(&frame(&ods)), &mut store, &mut sink).unwrap();
    assert_eq!(again.status, TickStatus::Unchanged);

    let gap = fleet
        .tick(0.3, Some(&frame(&[0.2, 0.0, f64::NAN])), &mut store, &mut sink)
        .unwrap();
    assert_eq!(gap.status, TickStatus::Unchanged);

    assert_eq!(sink.sent.len(), 1);
    assert_eq!(store.count(2, LogChannel::Chemostat), 1);
}

fn morbidostat(same_drug: bool) -> RunConfig {
    RunConfig {
        vials: vec![0, 1, 2],
        od_window: 1,
        law: LawConfig::Morbidostat(MorbidostatParams {
            lower_od: 0.1,
            middle_od: 0.3,
            upper_od: 0.5,
            pump_wait_min: 12.0,
            drug_a_stock: 1.0,
            drug_b_stock: 10.0,
            same_drug,
            pump_media_s: 10.0,
            pump_a_s: 10.0,
            pump_b_s: 10.0,
            suction_s: 20.0,
            scoring: Scoring::Banded,
        }),
        ..RunConfig::default()
    }
}

#[test]
fn morbidostat_alternates_media_and_drug() {
    let mut fleet = Fleet::builder().with_run(morbidostat(false)).build().unwrap();
    let mut store = MemoryStore::default();
    let mut sink = RecordingSink::default();

    let mut phases = Vec::new();
    for k in 1..=4 {
        let at_h = 0.25 * f64::from(k);
        let report = fleet
            .tick(at_h, Some(&frame(&[0.4, 0.05, 0.2])), &mut store, &mut sink)
            .unwrap();
        let cmd = report.status.command().unwrap();
        assert_eq!(cmd.drain(), Slot::Run(20.0));
        // too dilute: idle, no pump
        assert!(cmd.get(Channel::Media, 1).is_noop());
        phases.push(fleet.vial(0).unwrap().morbido.phase);
    }
    use culture_traits::MorbidoPhase::{DoseA, Media};
    assert_eq!(phases, vec![Media, DoseA, Media, DoseA]);
    let v0 = fleet.vial(0).unwrap();
    assert!(v0.morbido.drug_a > 0.0 && v0.morbido.drug_a <= 1.0);
}

#[test]
fn same_drug_keeps_both_concentrations_equal_fleetwide() {
    let mut fleet = Fleet::builder().with_run(morbidostat(true)).build().unwrap();
    let mut store = MemoryStore::default();
    let mut sink = RecordingSink::default();

    for k in 1..=8 {
        let at_h = 0.25 * f64::from(k);
        fleet
            .tick(at_h, Some(&frame(&[0.45, 0.6, 0.35])), &mut store, &mut sink)
            .unwrap();
        for v in fleet.vials() {
            assert_eq!(v.morbido.drug_a, v.morbido.drug_b, "vial {}", v.vial);
        }
    }
}
