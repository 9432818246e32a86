//! Single-vial growth model.
//!
//! Logistic growth whose rate is scaled down by the two drug concentrations,
//! each with its own half-inhibitory concentration. Additions are mixed
//! instantly and the vial is drained back to its working volume.

#[derive(Debug, Clone, PartialEq)]
pub struct CultureParams {
    pub volume_ml: f64,
    pub growth_per_h: f64,
    /// Carrying capacity in OD units.
    pub capacity_od: f64,
    pub ic50_a: f64,
    pub ic50_b: f64,
}

impl Default for CultureParams {
    fn default() -> Self {
        Self {
            volume_ml: 30.0,
            growth_per_h: 0.8,
            capacity_od: 1.2,
            ic50_a: 0.5,
            ic50_b: 5.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Culture {
    pub od: f64,
    pub drug_a: f64,
    pub drug_b: f64,
}

impl Culture {
    pub fn new(od: f64) -> Self {
        Self {
            od,
            drug_a: 0.0,
            drug_b: 0.0,
        }
    }

    /// Growth-rate multiplier in `(0, 1]`.
    pub fn inhibition(&self, p: &CultureParams) -> f64 {
        let load = self.drug_a / p.ic50_a.max(f64::EPSILON) + self.drug_b / p.ic50_b.max(f64::EPSILON);
        1.0 / (1.0 + load.max(0.0))
    }

    /// Advance `dt_h` hours.
    pub fn grow(&mut self, p: &CultureParams, dt_h: f64) {
        if dt_h <= 0.0 || p.capacity_od <= 0.0 {
            return;
        }
        let r = p.growth_per_h * self.inhibition(p);
        // closed-form logistic step
        let k = p.capacity_od;
        let x = self.od.max(1e-6);
        self.od = k / (1.0 + (k / x - 1.0) * (-r * dt_h).exp());
    }

    /// Mix in `added_ml` carrying drugs at `(a, b)` and drain back to volume.
    pub fn add(&mut self, p: &CultureParams, added_ml: f64, a: f64, b: f64) {
        if added_ml <= 0.0 {
            return;
        }
        let v = p.volume_ml;
        let total = v + added_ml;
        self.od *= v / total;
        self.drug_a = (self.drug_a * v + a * added_ml) / total;
        self.drug_b = (self.drug_b * v + b * added_ml) / total;
    }
}
