use crate::core::error::{EngineError, Result};

#[derive(Clone, Debug, PartialEq)]
pub struct LinearCurve {
    xs: Vec<f64>,
    ys: Vec<f64>,
}

impl LinearCurve {
    pub fn new(xs: Vec<f64>, ys: Vec<f64>) -> Result<Self> {
        if xs.len() != ys.len() {
            return Err(EngineError::invalid_parameters(format!(
                "curve axes differ in length: {} vs {}",
                xs.len(),
                ys.len()
            )));
        }
        if xs.len() < 2 {
            return Err(EngineError::invalid_parameters(
                "curve needs at least two knots",
            ));
        }
        if xs.iter().chain(ys.iter()).any(|v| !v.is_finite()) {
            return Err(EngineError::invalid_parameters(
                "curve knots must be finite",
            ));
        }
        for pair in xs.windows(2) {
            if pair[1] <= pair[0] {
                return Err(EngineError::invalid_parameters(format!(
                    "curve x axis must be strictly increasing, found {} after {}",
                    pair[1], pair[0]
                )));
            }
        }
        Ok(LinearCurve { xs, ys })
    }

    pub fn xs(&self) -> &[f64] {
        &self.xs
    }

    pub fn ys(&self) -> &[f64] {
        &self.ys
    }

    // Out-of-range fill is the y envelope: smallest y below the range,
    // largest y above. Only differs from the edge knots on non-monotone curves.
    pub fn value_clamped(&self, x: f64) -> f64 {
        let n = self.xs.len();
        if x < self.xs[0] {
            return self.ys.iter().copied().fold(f64::INFINITY, f64::min);
        }
        if x > self.xs[n - 1] {
            return self.ys.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        }
        if x == self.xs[n - 1] {
            return self.ys[n - 1];
        }
        self.interior_value(x)
    }

    pub fn value_extrapolated(&self, x: f64) -> f64 {
        let n = self.xs.len();
        if x < self.xs[0] {
            let slope = (self.ys[1] - self.ys[0]) / (self.xs[1] - self.xs[0]);
            return self.ys[0] + (x - self.xs[0]) * slope;
        }
        if x > self.xs[n - 1] {
            let slope = (self.ys[n - 1] - self.ys[n - 2]) / (self.xs[n - 1] - self.xs[n - 2]);
            return self.ys[n - 1] + (x - self.xs[n - 1]) * slope;
        }
        self.interior_value(x)
    }

    fn interior_value(&self, x: f64) -> f64 {
        let mut hi = 1;
        while self.xs[hi] < x {
            hi += 1;
        }
        let lo = hi - 1;
        if x == self.xs[lo] {
            return self.ys[lo];
        }
        let t = (x - self.xs[lo]) / (self.xs[hi] - self.xs[lo]);
        self.ys[lo] + t * (self.ys[hi] - self.ys[lo])
    }

    // Flat stretches invert to their first knot; targets outside the y range
    // clamp to the end knots.
    pub fn invert_at(&self, y: f64) -> Result<f64> {
        let n = self.ys.len();
        for pair in self.ys.windows(2) {
            if pair[1] < pair[0] {
                return Err(EngineError::computation_failure(format!(
                    "cannot invert a decreasing curve segment ({} to {})",
                    pair[0], pair[1]
                )));
            }
        }
        if y <= self.ys[0] {
            return Ok(self.xs[0]);
        }
        if y >= self.ys[n - 1] {
            return Ok(self.xs[n - 1]);
        }
        for i in 0..n - 1 {
            if y == self.ys[i] {
                return Ok(self.xs[i]);
            }
            if self.ys[i] < y && y < self.ys[i + 1] {
                let t = (y - self.ys[i]) / (self.ys[i + 1] - self.ys[i]);
                return Ok(self.xs[i] + t * (self.xs[i + 1] - self.xs[i]));
            }
        }
        Ok(self.xs[n - 1])
    }
}

pub fn linspace(start: f64, stop: f64, n: usize) -> Vec<f64> {
    if n == 0 {
        return Vec::new();
    }
    if n == 1 {
        return vec![start];
    }
    let step = (stop - start) / (n - 1) as f64;
    let mut out: Vec<f64> = (0..n).map(|i| start + step * i as f64).collect();
    out[n - 1] = stop;
    out
}

// The nan_* reductions skip non-finite entries and return NaN when none remain.
pub fn nan_mean(values: &[f64]) -> f64 {
    let mut sum = 0.0;
    let mut count = 0usize;
    for &v in values {
        if v.is_finite() {
            sum += v;
            count += 1;
        }
    }
    if count == 0 {
        return f64::NAN;
    }
    sum / count as f64
}

pub fn nan_min(values: &[f64]) -> f64 {
    values
        .iter()
        .copied()
        .filter(|v| v.is_finite())
        .fold(f64::NAN, f64::min)
}

pub fn nan_max(values: &[f64]) -> f64 {
    values
        .iter()
        .copied()
        .filter(|v| v.is_finite())
        .fold(f64::NAN, f64::max)
}

pub fn zero_non_finite(value: f64) -> f64 {
    if value.is_finite() { value } else { 0.0 }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::{any, prop_assert, proptest};

    const EPS: f64 = 1e-6;

    fn assert_approx(actual: f64, expected: f64) {
        assert!(
            (actual - expected).abs() < EPS,
            "expected {expected}, got {actual}"
        );
    }

    fn sample_curve() -> LinearCurve {
        LinearCurve::new(
            vec![2.0, 5.0, 10.0, 25.0],
            vec![10.0, 18.0, 30.0, 60.0],
        )
        .unwrap()
    }

    #[test]
    fn rejects_mismatched_axis_lengths() {
        let err = LinearCurve::new(vec![1.0, 2.0], vec![1.0]).unwrap_err();
        assert_eq!(err.code(), "invalid-parameters");
    }

    #[test]
    fn rejects_single_knot() {
        let err = LinearCurve::new(vec![1.0], vec![1.0]).unwrap_err();
        assert_eq!(err.code(), "invalid-parameters");
    }

    #[test]
    fn rejects_non_increasing_x_axis() {
        let err = LinearCurve::new(vec![1.0, 1.0, 2.0], vec![0.0, 1.0, 2.0]).unwrap_err();
        assert_eq!(err.code(), "invalid-parameters");
        let err = LinearCurve::new(vec![1.0, 3.0, 2.0], vec![0.0, 1.0, 2.0]).unwrap_err();
        assert_eq!(err.code(), "invalid-parameters");
    }

    #[test]
    fn rejects_non_finite_knots() {
        let err = LinearCurve::new(vec![1.0, f64::NAN], vec![0.0, 1.0]).unwrap_err();
        assert_eq!(err.code(), "invalid-parameters");
        let err = LinearCurve::new(vec![1.0, 2.0], vec![0.0, f64::INFINITY]).unwrap_err();
        assert_eq!(err.code(), "invalid-parameters");
    }

    #[test]
    fn interpolation_hits_every_knot_exactly() {
        let curve = sample_curve();
        for (x, y) in curve.xs().iter().zip(curve.ys().iter()) {
            assert_eq!(curve.value_clamped(*x), *y);
            assert_eq!(curve.value_extrapolated(*x), *y);
        }
    }

    #[test]
    fn interpolation_is_linear_between_knots() {
        let curve = sample_curve();
        // Hand calculation: halfway from (2, 10) to (5, 18) is 14.
        assert_approx(curve.value_clamped(3.5), 14.0);
        // Hand calculation: t = (16 - 10) / (25 - 10) = 0.4 along the
        // (10, 30)..(25, 60) segment, 30 + 0.4 * 30 = 42.
        assert_approx(curve.value_clamped(16.0), 42.0);
    }

    #[test]
    fn clamped_lookup_holds_edge_values() {
        let curve = sample_curve();
        assert_approx(curve.value_clamped(0.5), 10.0);
        assert_approx(curve.value_clamped(100.0), 60.0);
    }

    #[test]
    fn clamped_fill_uses_the_y_envelope_not_the_edge_knots() {
        // A dented curve: the smallest and largest y sit on interior knots.
        let curve = LinearCurve::new(
            vec![2.0, 5.0, 10.0, 25.0],
            vec![12.0, 4.0, 60.0, 30.0],
        )
        .unwrap();
        assert_approx(curve.value_clamped(1.0), 4.0);
        assert_approx(curve.value_clamped(30.0), 60.0);
        // The boundary knot itself still interpolates.
        assert_approx(curve.value_clamped(25.0), 30.0);
        assert_approx(curve.value_clamped(2.0), 12.0);
    }

    #[test]
    fn extrapolated_lookup_continues_edge_slopes() {
        let curve = sample_curve();
        // Left slope (18 - 10) / (5 - 2) = 8/3.
        assert_approx(curve.value_extrapolated(-1.0), 10.0 - 3.0 * 8.0 / 3.0);
        // Right slope (60 - 30) / (25 - 10) = 2.
        assert_approx(curve.value_extrapolated(30.0), 60.0 + 5.0 * 2.0);
    }

    #[test]
    fn extrapolation_is_continuous_at_the_edges() {
        let curve = sample_curve();
        let h = 1e-9;
        assert!((curve.value_extrapolated(2.0 - h) - 10.0).abs() < 1e-6);
        assert!((curve.value_extrapolated(25.0 + h) - 60.0).abs() < 1e-6);
    }

    #[test]
    fn invert_finds_interior_targets() {
        let curve = sample_curve();
        // Hand calculation: y = 24 sits at t = 0.5 of (5, 18)..(10, 30).
        assert_approx(curve.invert_at(24.0).unwrap(), 7.5);
        assert_approx(curve.invert_at(18.0).unwrap(), 5.0);
    }

    #[test]
    fn invert_clamps_targets_outside_the_y_range() {
        let curve = sample_curve();
        assert_approx(curve.invert_at(5.0).unwrap(), 2.0);
        assert_approx(curve.invert_at(90.0).unwrap(), 25.0);
    }

    #[test]
    fn invert_resolves_flat_stretches_to_their_first_knot() {
        let curve = LinearCurve::new(
            vec![2.0, 5.0, 10.0, 25.0],
            vec![0.0, 0.0, 0.0, 40.0],
        )
        .unwrap();
        assert_approx(curve.invert_at(0.0).unwrap(), 2.0);
        assert_approx(curve.invert_at(20.0).unwrap(), 17.5);
    }

    #[test]
    fn invert_rejects_decreasing_y_axes() {
        let curve = LinearCurve::new(
            vec![2.0, 5.0, 10.0],
            vec![10.0, 8.0, 30.0],
        )
        .unwrap();
        let err = curve.invert_at(9.0).unwrap_err();
        assert_eq!(err.code(), "computation-failure");
    }

    #[test]
    fn linspace_pins_both_endpoints() {
        let grid = linspace(1e-5, 0.5, 10_000);
        assert_eq!(grid.len(), 10_000);
        assert_eq!(grid[0], 1e-5);
        assert_eq!(grid[9_999], 0.5);
        let step = grid[1] - grid[0];
        assert_approx(step, (0.5 - 1e-5) / 9_999.0);
    }

    #[test]
    fn linspace_handles_degenerate_counts() {
        assert!(linspace(0.0, 1.0, 0).is_empty());
        assert_eq!(linspace(3.0, 9.0, 1), vec![3.0]);
    }

    #[test]
    fn nan_stats_skip_non_finite_entries() {
        let values = [1.0, f64::NAN, 3.0, f64::INFINITY];
        assert_approx(nan_mean(&values), 2.0);
        assert_approx(nan_min(&values), 1.0);
        assert_approx(nan_max(&values), 3.0);
    }

    #[test]
    fn nan_stats_collapse_to_nan_when_nothing_is_finite() {
        let values = [f64::NAN, f64::INFINITY];
        assert!(nan_mean(&values).is_nan());
        assert!(nan_min(&values).is_nan());
        assert!(nan_max(&values).is_nan());
    }

    #[test]
    fn zero_non_finite_keeps_finite_values() {
        assert_eq!(zero_non_finite(4.5), 4.5);
        assert_eq!(zero_non_finite(f64::NAN), 0.0);
        assert_eq!(zero_non_finite(f64::NEG_INFINITY), 0.0);
    }

    proptest! {
        #![proptest_config(proptest::test_runner::Config::with_cases(40))]

        #[test]
        fn clamped_values_stay_inside_the_y_envelope(x in any::<f64>()) {
            let curve = sample_curve();
            if x.is_finite() {
                let y = curve.value_clamped(x);
                prop_assert!(y >= 10.0 - EPS);
                prop_assert!(y <= 60.0 + EPS);
            }
        }

        #[test]
        fn invert_then_evaluate_recovers_interior_targets(t in 0.0f64..1.0) {
            let curve = sample_curve();
            let y = 10.0 + t * 50.0;
            let x = curve.invert_at(y).unwrap();
            let back = curve.value_clamped(x);
            prop_assert!((back - y).abs() < 1e-9);
        }
    }
}
