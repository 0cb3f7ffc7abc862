use crate::{errors::ConversionError, Result};
use std::f64::consts::LN_2;

/// Log-linear fit of the terminal phase.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TerminalFit {
    pub lambda_z: f64,
    pub intercept: f64,
    pub r_squared: f64,
}

pub struct ParameterCalculator;

impl ParameterCalculator {
    /// Calculate Cmax and Tmax; ties resolve to the earliest point.
    pub fn calculate_cmax_tmax(points: &[(f64, f64)]) -> Result<(f64, f64)> {
        let mut iter = points.iter();
        let first = *iter
            .next()
            .ok_or_else(|| ConversionError::InsufficientData("No observations available".to_string()))?;

        let (tmax, cmax) = iter.fold(first, |best, &(t, c)| if c > best.1 { (t, c) } else { best });
        Ok((cmax, tmax))
    }

    /// Time and concentration of the last point.
    pub fn find_tlast_clast(points: &[(f64, f64)]) -> Option<(f64, f64)> {
        points.last().copied()
    }

    /// Linear regression of ln(C) on time over the given points.
    ///
    /// Returns `None` for fewer than two points or when all times coincide.
    pub fn fit_terminal_phase(points: &[(f64, f64)]) -> Option<TerminalFit> {
        if points.len() < 2 || points.iter().any(|&(_, c)| c <= 0.0) {
            return None;
        }

        let times: Vec<f64> = points.iter().map(|&(t, _)| t).collect();
        let ln_concentrations: Vec<f64> = points.iter().map(|&(_, c)| c.ln()).collect();

        // ln(C) = ln(C0) - lambda_z * t
        let n = times.len() as f64;
        let sum_t = times.iter().sum::<f64>();
        let sum_ln_c = ln_concentrations.iter().sum::<f64>();
        let sum_t_ln_c = times
            .iter()
            .zip(&ln_concentrations)
            .map(|(t, ln_c)| t * ln_c)
            .sum::<f64>();
        let sum_t2 = times.iter().map(|t| t * t).sum::<f64>();

        if times.iter().all(|&t| t == times[0]) {
            return None;
        }
        let denominator = n * sum_t2 - sum_t * sum_t;
        if denominator <= 0.0 {
            return None;
        }

        let slope = (n * sum_t_ln_c - sum_t * sum_ln_c) / denominator;
        let intercept = (sum_ln_c - slope * sum_t) / n;

        let mean_ln_c = sum_ln_c / n;
        let ss_tot = ln_concentrations
            .iter()
            .map(|ln_c| (ln_c - mean_ln_c).powi(2))
            .sum::<f64>();
        let ss_res = times
            .iter()
            .zip(&ln_concentrations)
            .map(|(t, ln_c)| (ln_c - (intercept + slope * t)).powi(2))
            .sum::<f64>();
        // Perfectly flat data leaves nothing to explain.
        let r_squared = if ss_tot > 0.0 { 1.0 - ss_res / ss_tot } else { 1.0 };

        if !slope.is_finite() {
            return None;
        }

        Some(TerminalFit {
            lambda_z: -slope,
            intercept,
            r_squared,
        })
    }

    /// Calculate half-life from lambda_z
    pub fn calculate_half_life(lambda_z: f64) -> Option<f64> {
        if lambda_z > 0.0 && lambda_z.is_finite() {
            Some(LN_2 / lambda_z)
        } else {
            None
        }
    }
}
