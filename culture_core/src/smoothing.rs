//! Rolling OD window and the median that turns it into one control value.

use crate::error::CultureError;
use std::collections::VecDeque;

/// Median of `values`; even counts average the two middle values.
/// Returns `None` for an empty slice. Non-finite inputs sort last.
pub fn median(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    let mut v = values.to_vec();
    v.sort_by(f64::total_cmp);
    let mid = v.len() / 2;
    Some(if v.len() % 2 == 0 {
        (v[mid - 1] + v[mid]) / 2.0
    } else {
        v[mid]
    })
}

/// Fixed-capacity window of `(hours, od)` samples, oldest first.
///
/// Timestamps never decrease. The smoothed value exists only once the window
/// is full, so a fresh vial produces nothing until `capacity` samples arrived.
#[derive(Debug, Clone, PartialEq)]
pub struct OdWindow {
    capacity: usize,
    samples: VecDeque<(f64, f64)>,
}

impl OdWindow {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            samples: VecDeque::with_capacity(capacity),
        }
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    #[inline]
    pub fn is_full(&self) -> bool {
        self.samples.len() == self.capacity
    }

    pub fn last_at(&self) -> Option<f64> {
        self.samples.back().map(|s| s.0)
    }

    /// Append a finite sample, evicting the oldest once full.
    pub fn push(&mut self, vial: usize, at_h: f64, od: f64) -> Result<(), CultureError> {
        if let Some(last_h) = self.last_at()
            && at_h < last_h
        {
            return Err(CultureError::NonMonotonicSample { vial, at_h, last_h });
        }
        if !od.is_finite() {
            return Ok(());
        }
        if self.samples.len() == self.capacity {
            self.samples.pop_front();
        }
        self.samples.push_back((at_h, od));
        Ok(())
    }

    /// Median OD of a full window.
    pub fn smoothed(&self) -> Option<f64> {
        if !self.is_full() {
            return None;
        }
        let ods: Vec<f64> = self.samples.iter().map(|s| s.1).collect();
        median(&ods)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use rstest::rstest;

    #[rstest]
    #[case(&[0.10, 0.12, 0.11, 0.13, 0.12], 0.12)]
    #[case(&[3.0, 1.0, 2.0, 4.0], 2.5)]
    #[case(&[0.5], 0.5)]
    fn median_cases(#[case] v: &[f64], #[case] want: f64) {
        assert!((median(v).unwrap() - want).abs() < 1e-12);
    }

    #[test]
    fn smoothed_needs_full_window() {
        let mut w = OdWindow::new(3);
        w.push(0, 0.0, 0.1).unwrap();
        w.push(0, 0.1, 0.2).unwrap();
        assert_eq!(w.smoothed(), None);
        w.push(0, 0.2, 0.3).unwrap();
        assert_eq!(w.smoothed(), Some(0.2));
    }

    #[test]
    fn non_finite_samples_are_not_kept() {
        let mut w = OdWindow::new(2);
        w.push(0, 0.0, f64::NAN).unwrap();
        assert!(w.is_empty());
    }

    #[test]
    fn rejects_time_going_backwards() {
        let mut w = OdWindow::new(2);
        w.push(4, 1.0, 0.1).unwrap();
        let err = w.push(4, 0.5, 0.1).unwrap_err();
        assert!(matches!(err, CultureError::NonMonotonicSample { vial: 4, .. }));
    }

    proptest! {
        #[test]
        fn window_is_bounded_and_ordered(cap in 1usize..12, n in 0usize..64) {
            let mut w = OdWindow::new(cap);
            for i in 0..n {
                let at_h = i as f64 * 0.01;
                w.push(0, at_h, 0.1 + i as f64 * 1e-3).unwrap();
                prop_assert!(w.len() <= cap);
                prop_assert_eq!(w.last_at(), Some(at_h));
            }
            prop_assert_eq!(w.is_full(), n >= cap);
        }

        #[test]
        fn median_lies_within_range(v in proptest::collection::vec(0.0f64..5.0, 1..20)) {
            let m = median(&v).unwrap();
            let lo = v.iter().copied().fold(f64::INFINITY, f64::min);
            let hi = v.iter().copied().fold(f64::NEG_INFINITY, f64::max);
            prop_assert!(m >= lo && m <= hi);
        }
    }
}
