use crate::{
    auc::AucCalculator, errors::ConversionError, models::*, parameters::ParameterCalculator,
    Result,
};

/// Minimum number of usable points for a parameter set.
pub const MIN_POINTS: usize = 3;

/// Number of trailing points used for the terminal slope.
pub const TERMINAL_POINTS: usize = 3;

pub struct PkCalculator;

impl PkCalculator {
    /// Compute PK parameters for one concentration-time series.
    ///
    /// Pairs with a missing time, a missing concentration or a concentration
    /// at or below zero are dropped. The remaining pairs are sorted by time
    /// and then by concentration, so the result does not depend on input order.
    pub fn compute_parameters(
        times: &[Option<f64>],
        concentrations: &[Option<f64>],
        dose: Option<f64>,
    ) -> Result<PkParameters> {
        let points = Self::valid_points(times, concentrations)?;

        if points.len() < MIN_POINTS {
            return Err(ConversionError::InsufficientData(format!(
                "{} quantifiable concentrations (minimum {} required)",
                points.len(),
                MIN_POINTS
            )));
        }

        Self::parameters_from_points(&points, dose)
    }

    /// Usable `(time, concentration)` pairs, sorted by time then concentration.
    pub fn valid_points(
        times: &[Option<f64>],
        concentrations: &[Option<f64>],
    ) -> Result<Vec<(f64, f64)>> {
        if times.len() != concentrations.len() {
            return Err(ConversionError::InvalidInput(format!(
                "{} times but {} concentrations",
                times.len(),
                concentrations.len()
            )));
        }

        let mut points: Vec<(f64, f64)> = times
            .iter()
            .zip(concentrations)
            .filter_map(|(t, c)| match (t, c) {
                (Some(t), Some(c)) if t.is_finite() && c.is_finite() && *c > 0.0 => Some((*t, *c)),
                _ => None,
            })
            .collect();

        points.sort_by(|a, b| a.0.total_cmp(&b.0).then(a.1.total_cmp(&b.1)));
        Ok(points)
    }

    fn parameters_from_points(points: &[(f64, f64)], dose: Option<f64>) -> Result<PkParameters> {
        let (cmax, tmax) = ParameterCalculator::calculate_cmax_tmax(points)?;
        let (tlast, clast) = ParameterCalculator::find_tlast_clast(points).ok_or_else(|| {
            ConversionError::InsufficientData("No quantifiable concentrations found".to_string())
        })?;

        let auc_last = AucCalculator::linear_trapezoidal(points);

        let terminal = &points[points.len().saturating_sub(TERMINAL_POINTS)..];
        let fit = ParameterCalculator::fit_terminal_phase(terminal);
        let lambda_z = fit.map(|f| f.lambda_z).filter(|l| *l > 0.0 && l.is_finite());

        let half_life = lambda_z.and_then(ParameterCalculator::calculate_half_life);
        let auc_inf = lambda_z.and_then(|l| AucCalculator::auc_inf(auc_last, clast, l));
        let auc_percent_extrap =
            auc_inf.and_then(|inf| AucCalculator::percent_extrapolated(auc_last, inf));

        if lambda_z.is_none() {
            log::debug!("Terminal slope not estimable; half-life and AUC_inf left undefined");
        }

        Ok(PkParameters {
            n_points: points.len(),
            cmax,
            tmax,
            tlast,
            clast,
            auc_last,
            auc_inf,
            auc_percent_extrap,
            lambda_z,
            lambda_z_r_squared: lambda_z.and(fit.map(|f| f.r_squared)),
            half_life,
            dose,
        })
    }
}
