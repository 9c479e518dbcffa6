//! ARIMA(p, d, q) fitted by conditional sum of squares.
//!
//! The series is differenced `d` times and an ARMA(p, q) is fitted to the
//! result with pre-sample values and innovations held at zero. The search runs
//! in an unconstrained space: each coefficient block is mapped through `tanh`
//! to partial autocorrelations and then through the Durbin-Levinson recursion,
//! so every candidate AR polynomial is stationary and every MA polynomial is
//! invertible. Starting values come from a Hannan-Rissanen regression when the
//! series is long enough to support one.

use argmin::core::{CostFunction, Error, Executor, State, TerminationReason};
use argmin::solver::neldermead::NelderMead;
use linfa::prelude::*;
use linfa_linear::LinearRegression;
use log::{debug, info};
use nalgebra::DMatrix;
use ndarray::{Array1, Array2};

use crate::error::ForecastError;

pub type FittedLinearRegression = linfa_linear::FittedLinearRegression<f64>;

/// Number of future laps predicted by the session.
pub const FORECAST_HORIZON: usize = 5;

const MAX_ITERS: u64 = 2_000;
const SD_TOLERANCE: f64 = 1e-10;
const SIMPLEX_STEP: f64 = 0.5;
// keeps starting partials away from the +-1 boundary where atanh blows up
const MAX_START_PARTIAL: f64 = 0.95;

/// Orders of an ARIMA model.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArimaOrder {
    pub p: usize,
    pub d: usize,
    pub q: usize,
}

impl ArimaOrder {
    /// The fixed order used for lap times.
    pub const LAP_TIME: ArimaOrder = ArimaOrder { p: 2, d: 1, q: 2 };

    pub fn new(p: usize, d: usize, q: usize) -> Self {
        Self { p, d, q }
    }

    /// Shortest series the fit accepts: enough to leave two residuals after
    /// differencing and the AR burn-in.
    pub fn min_observations(&self) -> usize {
        self.p + self.d + 2
    }

    fn n_params(&self) -> usize {
        self.p + self.q
    }
}

impl std::fmt::Display for ArimaOrder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ARIMA({}, {}, {})", self.p, self.d, self.q)
    }
}

/// Fit quality and coefficient diagnostics.
#[derive(Debug, Clone, PartialEq)]
pub struct FitSummary {
    pub order: ArimaOrder,
    pub ar: Vec<f64>,
    pub ma: Vec<f64>,
    /// Residual variance on the differenced scale
    pub sigma2: f64,
    /// Root mean squared error of the in-sample fit on the original scale
    pub rmse: f64,
    pub log_likelihood: f64,
    pub aic: f64,
    pub stationary: bool,
    pub invertible: bool,
    pub iterations: u64,
    pub converged: bool,
}

/// A fitted ARIMA model together with the series it was fitted on.
#[derive(Debug, Clone)]
pub struct LapTimeModel {
    order: ArimaOrder,
    series: Vec<f64>,
    ar: Vec<f64>,
    ma: Vec<f64>,
    // innovations of the differenced series, one per differenced observation
    residuals: Vec<f64>,
    sigma2: f64,
    iterations: u64,
    converged: bool,
}

impl LapTimeModel {
    /// Fit `order` to `series`.
    ///
    /// # Errors
    /// - `InsufficientData` when the series is shorter than
    ///   [`ArimaOrder::min_observations`].
    /// - `NonFinite` for NaN or infinite observations.
    /// - `Optimizer` / `Degenerate` when the search fails or ends on a
    ///   non-finite objective.
    ///
    /// Hitting the iteration cap is not an error; the best point found is kept.
    pub fn fit(series: &[f64], order: ArimaOrder) -> Result<Self, ForecastError> {
        let needed = order.min_observations();
        if series.len() < needed {
            return Err(ForecastError::InsufficientData { needed, got: series.len() });
        }
        if let Some(index) = series.iter().position(|v| !v.is_finite()) {
            return Err(ForecastError::NonFinite { index });
        }

        let w = difference(series, order.d);
        let (theta, iterations, converged) = if order.n_params() == 0 {
            (Vec::new(), 0, true)
        } else {
            minimize_css(&w, order)?
        };

        let (ar, ma) = unpack(&theta, order);
        let residuals = arma_residuals(&w, &ar, &ma);
        let effective = (w.len() - order.p) as f64;
        let sigma2 = residuals[order.p..].iter().map(|e| e * e).sum::<f64>() / effective;
        if !sigma2.is_finite() {
            return Err(ForecastError::Degenerate(format!("residual variance is {}", sigma2)));
        }
        if !converged {
            debug!(
                target: "model:fit",
                "{} stopped after {} iterations without converging", order, iterations
            );
        }
        info!(
            target: "model:fit",
            "{} fitted on {} observations (ar {:?}, ma {:?}, sigma2 {:.3})",
            order, series.len(), ar, ma, sigma2
        );

        Ok(LapTimeModel {
            order,
            series: series.to_vec(),
            ar,
            ma,
            residuals,
            sigma2,
            iterations,
            converged,
        })
    }

    pub fn order(&self) -> ArimaOrder {
        self.order
    }

    pub fn ar(&self) -> &[f64] {
        &self.ar
    }

    pub fn ma(&self) -> &[f64] {
        &self.ma
    }

    pub fn series(&self) -> &[f64] {
        &self.series
    }

    /// One-step-ahead in-sample predictions, aligned with the fitted series.
    ///
    /// The first `d` observations have no history to predict from and are
    /// returned as observed.
    pub fn fitted_values(&self) -> Vec<f64> {
        let d = self.order.d;
        self.series
            .iter()
            .enumerate()
            .map(|(t, &y)| if t < d { y } else { y - self.residuals[t - d] })
            .collect()
    }

    /// Out-of-sample forecast of the next `steps` values on the original scale.
    pub fn forecast(&self, steps: usize) -> Vec<f64> {
        let w = difference(&self.series, self.order.d);
        let mut w_ext = w.clone();
        let mut e_ext = self.residuals.clone();
        for _ in 0..steps {
            let t = w_ext.len();
            let next = predict_next(&w_ext, &e_ext, t, &self.ar, &self.ma);
            w_ext.push(next);
            e_ext.push(0.0);
        }

        let mut path = w_ext.split_off(w.len());
        for level in (0..self.order.d).rev() {
            let mut last = difference(&self.series, level).last().copied().unwrap_or_default();
            path = path
                .iter()
                .map(|step| {
                    last += step;
                    last
                })
                .collect();
        }
        path
    }

    pub fn summary(&self) -> FitSummary {
        let d = self.order.d;
        let fitted = self.fitted_values();
        let tail = self.series.len() - d;
        let rmse = (self.series[d..]
            .iter()
            .zip(&fitted[d..])
            .map(|(y, f)| (y - f).powi(2))
            .sum::<f64>()
            / tail as f64)
            .sqrt();

        let effective = (self.residuals.len() - self.order.p) as f64;
        let variance = self.sigma2.max(f64::EPSILON);
        let log_likelihood =
            -0.5 * effective * ((2.0 * std::f64::consts::PI * variance).ln() + 1.0);
        let k = (self.order.n_params() + 1) as f64;
        let negated_ma: Vec<f64> = self.ma.iter().map(|m| -m).collect();

        FitSummary {
            order: self.order,
            ar: self.ar.clone(),
            ma: self.ma.clone(),
            sigma2: self.sigma2,
            rmse,
            log_likelihood,
            aic: -2.0 * log_likelihood + 2.0 * k,
            stationary: roots_inside_unit_circle(&self.ar),
            invertible: roots_inside_unit_circle(&negated_ma),
            iterations: self.iterations,
            converged: self.converged,
        }
    }
}

/// Apply first differences `d` times.
pub fn difference(series: &[f64], d: usize) -> Vec<f64> {
    let mut out = series.to_vec();
    for _ in 0..d {
        out = out.windows(2).map(|w| w[1] - w[0]).collect();
    }
    out
}

fn lagged(xs: &[f64], t: usize, lag: usize) -> f64 {
    t.checked_sub(lag).and_then(|i| xs.get(i)).copied().unwrap_or(0.0)
}

fn predict_next(w: &[f64], e: &[f64], t: usize, ar: &[f64], ma: &[f64]) -> f64 {
    let ar_part: f64 = ar.iter().enumerate().map(|(i, a)| a * lagged(w, t, i + 1)).sum();
    let ma_part: f64 = ma.iter().enumerate().map(|(j, m)| m * lagged(e, t, j + 1)).sum();
    ar_part + ma_part
}

/// Innovations of an ARMA recursion with zero pre-sample values.
pub fn arma_residuals(w: &[f64], ar: &[f64], ma: &[f64]) -> Vec<f64> {
    let mut e = Vec::with_capacity(w.len());
    for t in 0..w.len() {
        let innovation = w[t] - predict_next(w, &e, t, ar, ma);
        e.push(innovation);
    }
    e
}

/// Map partial autocorrelations in (-1, 1) to AR coefficients (Durbin-Levinson).
pub fn partials_to_coefficients(partials: &[f64]) -> Vec<f64> {
    let mut coeffs: Vec<f64> = Vec::with_capacity(partials.len());
    for (k, &r) in partials.iter().enumerate() {
        let mut next: Vec<f64> = (0..k).map(|j| coeffs[j] - r * coeffs[k - 1 - j]).collect();
        next.push(r);
        coeffs = next;
    }
    coeffs
}

/// Inverse of [`partials_to_coefficients`]; partials are clamped into the open interval.
pub fn coefficients_to_partials(coeffs: &[f64]) -> Vec<f64> {
    let p = coeffs.len();
    let mut current = coeffs.to_vec();
    let mut partials = vec![0.0; p];
    for k in (0..p).rev() {
        let r = current[k].clamp(-MAX_START_PARTIAL, MAX_START_PARTIAL);
        partials[k] = r;
        let denom = 1.0 - r * r;
        current = (0..k).map(|j| (current[j] + r * current[k - 1 - j]) / denom).collect();
    }
    partials
}

fn unpack(theta: &[f64], order: ArimaOrder) -> (Vec<f64>, Vec<f64>) {
    let ar_partials: Vec<f64> = theta[..order.p].iter().map(|u| u.tanh()).collect();
    let ma_partials: Vec<f64> = theta[order.p..].iter().map(|u| u.tanh()).collect();
    let ar = partials_to_coefficients(&ar_partials);
    let ma = partials_to_coefficients(&ma_partials).into_iter().map(|c| -c).collect();
    (ar, ma)
}

fn pack(ar: &[f64], ma: &[f64]) -> Vec<f64> {
    let negated_ma: Vec<f64> = ma.iter().map(|m| -m).collect();
    coefficients_to_partials(ar)
        .into_iter()
        .chain(coefficients_to_partials(&negated_ma))
        .map(|r| r.atanh())
        .collect()
}

/// Conditional sum of squares over the differenced series.
struct CssProblem {
    w: Vec<f64>,
    order: ArimaOrder,
    scale: f64,
}

impl CostFunction for CssProblem {
    type Param = Vec<f64>;
    type Output = f64;

    fn cost(&self, theta: &Self::Param) -> Result<Self::Output, Error> {
        let (ar, ma) = unpack(theta, self.order);
        let residuals = arma_residuals(&self.w, &ar, &ma);
        let tail = &residuals[self.order.p..];
        let css = tail.iter().map(|e| (e / self.scale).powi(2)).sum::<f64>() / tail.len() as f64;
        Ok(if css.is_finite() { css } else { f64::MAX })
    }
}

fn minimize_css(w: &[f64], order: ArimaOrder) -> Result<(Vec<f64>, u64, bool), ForecastError> {
    let start = initial_guess(w, order);
    let mut simplex = vec![start.clone()];
    for i in 0..start.len() {
        let mut vertex = start.clone();
        vertex[i] += SIMPLEX_STEP;
        simplex.push(vertex);
    }

    let problem = CssProblem { w: w.to_vec(), order, scale: scale_of(w) };
    let solver = NelderMead::new(simplex)
        .with_sd_tolerance(SD_TOLERANCE)
        .map_err(|e| ForecastError::Optimizer(e.to_string()))?;
    let result = Executor::new(problem, solver)
        .configure(|state| state.max_iters(MAX_ITERS))
        .run()
        .map_err(|e| ForecastError::Optimizer(e.to_string()))?;

    let state = result.state();
    if !state.get_best_cost().is_finite() || state.get_best_cost() == f64::MAX {
        return Err(ForecastError::Degenerate("objective is not finite at the optimum".to_string()));
    }
    let best = state
        .get_best_param()
        .cloned()
        .ok_or_else(|| ForecastError::Optimizer("solver returned no parameters".to_string()))?;
    let converged =
        !matches!(state.get_termination_reason(), Some(TerminationReason::MaxItersReached));
    Ok((best, state.get_iter(), converged))
}

fn scale_of(w: &[f64]) -> f64 {
    let n = w.len() as f64;
    let mean = w.iter().sum::<f64>() / n;
    let sd = (w.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n).sqrt();
    if sd > 0.0 && sd.is_finite() {
        sd
    } else {
        1.0
    }
}

/// Hannan-Rissanen starting values, or zeros when the series is too short or
/// either regression fails.
fn initial_guess(w: &[f64], order: ArimaOrder) -> Vec<f64> {
    let long_order = order.p.max(order.q) + 3;
    if order.q == 0 || w.len() < 3 * long_order {
        return match order.p {
            0 => vec![0.0; order.n_params()],
            _ => ar_only_guess(w, order).unwrap_or_else(|| vec![0.0; order.n_params()]),
        };
    }
    hannan_rissanen(w, order, long_order).unwrap_or_else(|| {
        debug!(target: "model:initial_guess", "Hannan-Rissanen failed, starting from zero");
        vec![0.0; order.n_params()]
    })
}

fn ar_only_guess(w: &[f64], order: ArimaOrder) -> Option<Vec<f64>> {
    if w.len() < 3 * order.p.max(1) + 2 {
        return None;
    }
    let fitted = regress_on_lags(w, &[], order.p, 0, order.p)?;
    let mut guess = pack(&fitted.params().to_vec(), &[]);
    guess.resize(order.n_params(), 0.0);
    Some(guess)
}

fn hannan_rissanen(w: &[f64], order: ArimaOrder, long_order: usize) -> Option<Vec<f64>> {
    // stage one: long autoregression to estimate the innovations
    let long = regress_on_lags(w, &[], long_order, 0, long_order)?;
    let mut innovations = vec![0.0; w.len()];
    for t in long_order..w.len() {
        let prediction: f64 = long.params().iter().enumerate().map(|(i, a)| a * w[t - i - 1]).sum();
        innovations[t] = w[t] - prediction;
    }

    // stage two: regress on lagged values and lagged innovations
    let start = long_order + order.p.max(order.q);
    let stage_two = regress_on_lags(w, &innovations, order.p, order.q, start)?;
    let params = stage_two.params().to_vec();
    let (ar, ma) = params.split_at(order.p);
    Some(pack(ar, ma))
}

fn regress_on_lags(
    w: &[f64],
    innovations: &[f64],
    p: usize,
    q: usize,
    start: usize,
) -> Option<FittedLinearRegression> {
    let rows = w.len().checked_sub(start)?;
    let cols = p + q;
    if rows <= cols {
        return None;
    }
    let feats: Vec<f64> = (start..w.len())
        .flat_map(|t| {
            (1..=p).map(move |i| w[t - i]).chain((1..=q).map(move |j| innovations[t - j]))
        })
        .collect();
    let x = Array2::from_shape_vec((rows, cols), feats).ok()?;
    let y = Array1::from_vec(w[start..].to_vec());
    let ds = Dataset::new(x, y);
    let fitted = LinearRegression::new().with_intercept(false).fit(&ds).ok()?;
    if fitted.params().iter().all(|v| v.is_finite()) {
        Some(fitted)
    } else {
        None
    }
}

/// True when every root of `1 - c1 z - ... - ck z^k` lies outside the unit
/// circle, i.e. the companion matrix has all eigenvalues inside it.
pub fn roots_inside_unit_circle(coeffs: &[f64]) -> bool {
    let k = coeffs.len();
    if k == 0 {
        return true;
    }
    let companion = DMatrix::from_fn(k, k, |i, j| {
        if i == 0 {
            coeffs[j]
        } else if i == j + 1 {
            1.0
        } else {
            0.0
        }
    });
    companion.complex_eigenvalues().iter().all(|z| z.norm() < 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};
    use rand_distr::StandardNormal;

    fn simulate_ari(phi: f64, n: usize, seed: u64) -> Vec<f64> {
        let mut rng = StdRng::seed_from_u64(seed);
        let mut level = 90_000.0;
        let mut previous = 0.0;
        let mut out = Vec::with_capacity(n);
        for _ in 0..n {
            let noise: f64 = rng.sample(StandardNormal);
            let step = phi * previous + 300.0 * noise;
            previous = step;
            level += step;
            out.push(level);
        }
        out
    }

    #[test]
    fn five_laps_forecast_five_values() {
        let laps = [90000.0, 89500.0, 91000.0, 90200.0, 89800.0];
        let model = LapTimeModel::fit(&laps, ArimaOrder::LAP_TIME).unwrap();
        let forecast = model.forecast(FORECAST_HORIZON);
        assert_eq!(forecast.len(), 5);
        assert!(forecast.iter().all(|v| v.is_finite()));
    }

    #[test]
    fn short_series_is_rejected() {
        let err = LapTimeModel::fit(&[1.0, 2.0, 3.0, 4.0], ArimaOrder::LAP_TIME).unwrap_err();
        assert_eq!(err, ForecastError::InsufficientData { needed: 5, got: 4 });
    }

    #[test]
    fn non_finite_values_are_rejected() {
        let laps = [90000.0, f64::NAN, 91000.0, 90200.0, 89800.0];
        let err = LapTimeModel::fit(&laps, ArimaOrder::LAP_TIME).unwrap_err();
        assert_eq!(err, ForecastError::NonFinite { index: 1 });
    }

    #[test]
    fn fitted_values_align_with_the_series() {
        let laps = simulate_ari(0.3, 40, 11);
        let model = LapTimeModel::fit(&laps, ArimaOrder::LAP_TIME).unwrap();
        let fitted = model.fitted_values();
        assert_eq!(fitted.len(), laps.len());
        assert_eq!(fitted[0], laps[0]);
        assert!(fitted.iter().all(|v| v.is_finite()));
    }

    #[test]
    fn constant_series_forecasts_the_constant() {
        let laps = vec![92000.0; 12];
        let model = LapTimeModel::fit(&laps, ArimaOrder::LAP_TIME).unwrap();
        for value in model.forecast(3) {
            assert_relative_eq!(value, 92000.0, epsilon = 1e-6);
        }
        assert_relative_eq!(model.summary().rmse, 0.0, epsilon = 1e-6);
    }

    #[test]
    fn recovers_an_autoregressive_coefficient() {
        let series = simulate_ari(0.6, 600, 3);
        let model = LapTimeModel::fit(&series, ArimaOrder::new(1, 1, 0)).unwrap();
        assert!((model.ar()[0] - 0.6).abs() < 0.1, "ar = {:?}", model.ar());
        assert!(model.summary().stationary);
    }

    #[test]
    fn random_walk_forecast_is_flat() {
        let series = [1.0, 3.0, 2.0, 5.0, 4.0, 6.0];
        let model = LapTimeModel::fit(&series, ArimaOrder::new(0, 1, 0)).unwrap();
        assert_eq!(model.forecast(3), vec![6.0, 6.0, 6.0]);
        assert_eq!(model.fitted_values(), vec![1.0, 1.0, 3.0, 2.0, 5.0, 4.0]);
    }

    #[test]
    fn forecast_integrates_the_differenced_path() {
        // w = [2, 2, 2, 2]; an AR(1) near one keeps adding roughly 2 per step
        let series = [10.0, 12.0, 14.0, 16.0, 18.0];
        let model = LapTimeModel {
            order: ArimaOrder::new(1, 1, 0),
            series: series.to_vec(),
            ar: vec![1.0],
            ma: Vec::new(),
            residuals: arma_residuals(&difference(&series, 1), &[1.0], &[]),
            sigma2: 0.0,
            iterations: 0,
            converged: true,
        };
        assert_eq!(model.forecast(3), vec![20.0, 22.0, 24.0]);
    }

    #[test]
    fn differencing_twice() {
        assert_eq!(difference(&[1.0, 4.0, 9.0, 16.0], 1), vec![3.0, 5.0, 7.0]);
        assert_eq!(difference(&[1.0, 4.0, 9.0, 16.0], 2), vec![2.0, 2.0]);
        assert_eq!(difference(&[1.0, 4.0], 0), vec![1.0, 4.0]);
    }

    #[test]
    fn residuals_use_zero_presample() {
        let e = arma_residuals(&[1.0, 2.0, 3.0], &[0.5], &[0.5]);
        assert_relative_eq!(e[0], 1.0);
        assert_relative_eq!(e[1], 2.0 - 0.5 * 1.0 - 0.5 * 1.0);
        assert_relative_eq!(e[2], 3.0 - 0.5 * 2.0 - 0.5 * e[1]);
    }

    #[test]
    fn partial_transform_keeps_polynomials_stationary() {
        for partials in [[0.9, -0.9], [-0.99, 0.99], [0.5, 0.2], [0.0, 0.97]] {
            let coeffs = partials_to_coefficients(&partials);
            assert!(roots_inside_unit_circle(&coeffs), "{:?} -> {:?}", partials, coeffs);
        }
    }

    #[test]
    fn partial_transform_inverts() {
        let partials = [0.4, -0.3];
        let back = coefficients_to_partials(&partials_to_coefficients(&partials));
        assert_relative_eq!(back[0], 0.4, epsilon = 1e-12);
        assert_relative_eq!(back[1], -0.3, epsilon = 1e-12);
    }

    #[test]
    fn explosive_polynomial_is_flagged() {
        assert!(!roots_inside_unit_circle(&[1.2]));
        assert!(!roots_inside_unit_circle(&[0.5, 0.6]));
        assert!(roots_inside_unit_circle(&[0.5, 0.3]));
        assert!(roots_inside_unit_circle(&[]));
    }

    #[test]
    fn summary_reports_the_order_and_fit() {
        let laps = simulate_ari(0.2, 60, 5);
        let summary = LapTimeModel::fit(&laps, ArimaOrder::LAP_TIME).unwrap().summary();
        assert_eq!(summary.order, ArimaOrder::LAP_TIME);
        assert_eq!(summary.ar.len(), 2);
        assert_eq!(summary.ma.len(), 2);
        assert!(summary.sigma2 > 0.0);
        assert!(summary.rmse > 0.0);
        assert!(summary.aic.is_finite());
    }
}
