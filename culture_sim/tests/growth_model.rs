use culture_sim::culture::{Culture, CultureParams};
use culture_sim::{Faults, SimFleet, SimParams};
use culture_traits::clock::ManualClock;
use culture_traits::{Channel, CommandKind, CommandSink, PumpCommand, Slot, TelemetrySource};
use rstest::rstest;
use std::time::Duration;

#[rstest]
#[case::drug_a(Channel::DrugA)]
#[case::drug_b(Channel::DrugB)]
fn drug_pulse_slows_the_dosed_vial(#[case] channel: Channel) {
    let sim = SimFleet::new(
        SimParams {
            vials: 2,
            noise: 0.0,
            ..SimParams::default()
        },
        ManualClock::new(),
    );
    let mut pumps = sim.pumps();
    let mut cmd = PumpCommand::new(CommandKind::Immediate);
    cmd.set(channel, 0, Slot::Run(10.0));
    cmd.set(Channel::Media, 1, Slot::Run(10.0));
    pumps.send(&cmd).unwrap();

    let before = (sim.culture(0).unwrap().od, sim.culture(1).unwrap().od);
    assert!((before.0 - before.1).abs() < 1e-12);

    let mut telemetry = sim.telemetry();
    for _ in 0..180 {
        telemetry.read_frame(Duration::from_secs(1)).unwrap();
    }
    let dosed = sim.culture(0).unwrap();
    let clean = sim.culture(1).unwrap();
    assert!(dosed.od < clean.od);
    assert_eq!(sim.clock().elapsed(), Duration::from_secs(3600));
}

#[rstest]
#[case(0.0, 1.0)]
#[case(0.5, 0.5)]
#[case(1.5, 0.25)]
fn inhibition_halves_at_ic50(#[case] drug_a: f64, #[case] want: f64) {
    let p = CultureParams::default();
    let c = Culture {
        drug_a,
        ..Culture::new(0.1)
    };
    assert!((c.inhibition(&p) - want).abs() < 1e-12);
}

#[test]
fn unknown_vial_is_reported() {
    let sim = SimFleet::new(SimParams::default(), ManualClock::new());
    assert!(sim.culture(15).is_err());
    sim.inject(Faults::default()).unwrap();
    assert_eq!(sim.commands().unwrap(), 0);
}
