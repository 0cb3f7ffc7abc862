pub struct AucCalculator;

impl AucCalculator {
    /// Linear trapezoidal AUC over `(time, concentration)` points sorted by time.
    ///
    /// Spacing may be uneven; a single point (or none) gives zero area.
    pub fn linear_trapezoidal(points: &[(f64, f64)]) -> f64 {
        points
            .windows(2)
            .map(|w| {
                let (t1, c1) = w[0];
                let (t2, c2) = w[1];
                (t2 - t1) * (c1 + c2) / 2.0
            })
            .sum()
    }

    /// Calculate AUC to infinity using terminal elimination rate constant
    pub fn auc_inf(auc_last: f64, clast: f64, lambda_z: f64) -> Option<f64> {
        if lambda_z > 0.0 && lambda_z.is_finite() {
            Some(auc_last + clast / lambda_z)
        } else {
            None
        }
    }

    pub fn percent_extrapolated(auc_last: f64, auc_inf: f64) -> Option<f64> {
        if auc_inf > 0.0 {
            Some((auc_inf - auc_last) / auc_inf * 100.0)
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_two_point_trapezoid_is_exact() {
        assert_eq!(AucCalculator::linear_trapezoidal(&[(0.0, 0.0), (1.0, 10.0)]), 5.0);
    }

    #[test]
    fn test_uneven_spacing() {
        let points = [(0.0, 0.0), (1.0, 10.0), (3.0, 6.0), (7.0, 2.0)];
        // 5 + 16 + 16
        assert_relative_eq!(AucCalculator::linear_trapezoidal(&points), 37.0);
    }

    #[test]
    fn test_degenerate_inputs() {
        assert_eq!(AucCalculator::linear_trapezoidal(&[]), 0.0);
        assert_eq!(AucCalculator::linear_trapezoidal(&[(2.0, 5.0)]), 0.0);
    }

    #[test]
    fn test_auc_inf_requires_positive_rate() {
        assert_eq!(AucCalculator::auc_inf(10.0, 2.0, 0.5), Some(14.0));
        assert_eq!(AucCalculator::auc_inf(10.0, 2.0, 0.0), None);
        assert_eq!(AucCalculator::auc_inf(10.0, 2.0, -0.1), None);
        assert_eq!(AucCalculator::percent_extrapolated(10.0, 20.0), Some(50.0));
    }
}
