//! Exponential growth-rate estimate over one completed growth curve.
//!
//! Fits `ln(OD) = r * t + c` by ordinary least squares and reports `r` in
//! 1/hour. Samples with a non-finite or non-positive OD carry no information
//! about `ln(OD)` and are dropped before the fit.

use crate::error::CultureError;

/// Growth rate (1/h) from `(hours, od)` samples.
pub fn estimate_growth_rate(samples: &[(f64, f64)]) -> Result<f64, CultureError> {
    let pts: Vec<(f64, f64)> = samples
        .iter()
        .filter(|(t, od)| t.is_finite() && od.is_finite() && *od > 0.0)
        .map(|&(t, od)| (t, od.ln()))
        .collect();
    if pts.len() < 2 {
        return Err(CultureError::InsufficientData(pts.len()));
    }

    // OLS in f64
    let n = pts.len() as f64;
    let mean_t = pts.iter().map(|p| p.0).sum::<f64>() / n;
    let mean_y = pts.iter().map(|p| p.1).sum::<f64>() / n;
    let mut stt = 0.0f64;
    let mut sty = 0.0f64;
    for (t, y) in &pts {
        let dt = t - mean_t;
        stt += dt * dt;
        sty += dt * (y - mean_y);
    }
    if !stt.is_finite() || stt == 0.0 {
        return Err(CultureError::RegressionIndeterminate);
    }
    let slope = sty / stt;
    if !slope.is_finite() {
        return Err(CultureError::RegressionIndeterminate);
    }
    Ok(slope)
}
