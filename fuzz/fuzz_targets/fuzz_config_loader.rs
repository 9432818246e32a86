#![no_main]
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &str| {
    // Arbitrary TOML must either fail to parse or validate without panicking.
    let Ok(cfg) = culture_config::load_toml(data) else {
        return;
    };
    if cfg.validate().is_ok() {
        // uniform flow tables come straight from validated rates
        if cfg.pumps.calibration.is_none() {
            let _ = cfg.flow_table(None);
        }
    }
});
