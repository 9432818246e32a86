use culture_config::{Algorithm, load_toml};
use rstest::rstest;

const BASE: &str = r#"
[run]
algorithm = "turbidostat"
vials = [0, 1, 2]
vial_volume_ml = 30.0
od_window = 5

[turbidostat]
lower_od = 0.2
upper_od = 0.4
time_out_s = 5.0
pump_wait_min = 3.0
pump_for_max_s = 20.0
"#;

#[test]
fn accepts_minimal_turbidostat() {
    let cfg = load_toml(BASE).expect("parse TOML");
    cfg.validate().expect("valid");
    assert_eq!(cfg.run.algorithm, Algorithm::Turbidostat);
    assert_eq!(cfg.run.vials, vec![0, 1, 2]);
    assert_eq!(cfg.turbidostat.pump_for_max_s, Some(20.0));
    assert_eq!(cfg.turbidostat.stop_after_n_curves, None);
}

#[test]
fn shipped_sample_config_is_valid() {
    let cfg = load_toml(include_str!("../../etc/culture.toml")).expect("parse sample");
    cfg.validate().expect("sample is valid");
    assert_eq!(cfg.run.vials.len(), 15);
    assert_eq!(cfg.sim.seed, 24301);
}

#[test]
fn empty_document_uses_defaults() {
    let cfg = load_toml("").expect("parse TOML");
    cfg.validate().expect("defaults are valid");
    assert_eq!(cfg.run.vials.len(), 15);
    assert_eq!(cfg.run.od_window, 7);
    assert_eq!(cfg.store.dir, "journal");
}

#[test]
fn vials_accept_inclusive_range_table() {
    let cfg = load_toml("[run]\nvials = { from = 2, to = 5 }\n").expect("parse TOML");
    assert_eq!(cfg.run.vials, vec![2, 3, 4, 5]);
}

#[rstest]
#[case("[run]\nvials = [15]\n", "out of range")]
#[case("[run]\nvials = [1, 1]\n", "twice")]
#[case("[run]\nvials = []\n", "at least one vial")]
#[case("[run]\nvial_volume_ml = 0.0\n", "vial_volume_ml must be > 0")]
#[case("[run]\nod_window = 0\n", "od_window must be >= 1")]
#[case("[pumps]\nflow_rate_ml_s = -1.0\n", "flow_rate_ml_s must be > 0")]
#[case("[turbidostat]\nlower_od = 0.5\nupper_od = 0.4\n", "upper_od must be > turbidostat.lower_od")]
#[case("[turbidostat]\nlower_od = 0.0\n", "lower_od must be > 0")]
#[case("[turbidostat]\npump_for_max_s = 0.0\n", "pump_for_max_s must be > 0")]
#[case("[turbidostat]\npump_wait_min = -3.0\n", "pump_wait_min must be >= 0")]
#[case("[sim]\ncapacity_od = 0.0\n", "sim.capacity_od must be > 0")]
#[case("[logging]\nrotation = \"weekly\"\n", "logging.rotation")]
fn rejects_invalid_values(#[case] toml: &str, #[case] needle: &str) {
    let cfg = load_toml(toml).expect("parse TOML");
    let err = cfg.validate().expect_err("should reject");
    let msg = format!("{err}");
    assert!(msg.contains(needle), "message {msg:?} lacks {needle:?}");
}

#[rstest]
#[case("chemostat", "[chemostat]\nbolus_ml = 0.1\n", "bolus_ml must be >= 0.2")]
#[case("morbidostat", "[morbidostat]\npump_wait_min = 0.0\n", "pump_wait_min must be > 0")]
#[case("morbidostat", "[morbidostat]\nmiddle_od = 0.1\nlower_od = 0.2\n", "middle_od must be >=")]
#[case("old_morbidostat", "[morbidostat]\npump_b_s = -1.0\n", "pump_b_s must be >= 0")]
#[case("timed_morbidostat", "[schedule]\ntimes_a = 0\n", "times_a must be >= 1")]
#[case("timed_morbidostat", "[schedule]\nuse_b = true\ntimes_b = 0\n", "times_b must be >= 1")]
#[case("timed_morbidostat", "[schedule]\nfreq_a_h = -2.0\n", "freq_a_h must be >= 0")]
fn rejects_invalid_law_sections(#[case] algo: &str, #[case] section: &str, #[case] needle: &str) {
    let toml = format!("[run]\nalgorithm = \"{algo}\"\n{section}");
    let cfg = load_toml(&toml).expect("parse TOML");
    let err = cfg.validate().expect_err("should reject");
    assert!(format!("{err}").contains(needle), "{err}");
}

#[test]
fn unselected_law_sections_are_not_checked() {
    // chemostat bolus below minimum, but turbidostat is running
    let cfg = load_toml("[chemostat]\nbolus_ml = 0.0\n").expect("parse TOML");
    cfg.validate().expect("valid");
}

#[test]
fn unknown_algorithm_is_a_parse_error() {
    assert!(load_toml("[run]\nalgorithm = \"fermenter\"\n").is_err());
}
