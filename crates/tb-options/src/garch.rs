//! GARCH(1,1) volatility forecasting by Gaussian maximum likelihood.
//!
//! The optimiser works in an unconstrained space:
//! `omega = exp(x0)`, `alpha + beta = 0.9999 * logistic(x1)` and
//! `alpha / (alpha + beta) = logistic(x2)`, so every trial point is a valid
//! stationary model.

use serde::{Deserialize, Serialize};
use tracing::debug;

use tb_types::VolatilityError;

pub const MIN_OBSERVATIONS: usize = 30;
const MAX_ITERATIONS: usize = 5_000;
const MAX_PERSISTENCE: f64 = 0.9999;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GarchParams {
    pub omega: f64,
    pub alpha: f64,
    pub beta: f64,
}

impl GarchParams {
    pub fn persistence(&self) -> f64 {
        self.alpha + self.beta
    }

    /// Unconditional daily variance.
    pub fn long_run_variance(&self) -> f64 {
        self.omega / (1.0 - self.persistence())
    }

    /// Periods for a variance shock to decay by half.
    pub fn half_life(&self) -> Option<f64> {
        let p = self.persistence();
        if p <= 0.0 || p >= 1.0 {
            None
        } else {
            Some(-(2.0_f64.ln()) / p.ln())
        }
    }

    fn from_unconstrained(x: &[f64; 3]) -> Self {
        let persistence = MAX_PERSISTENCE * logistic(x[1]);
        let share = logistic(x[2]);
        Self {
            omega: x[0].exp(),
            alpha: persistence * share,
            beta: persistence * (1.0 - share),
        }
    }

    fn to_unconstrained(&self) -> [f64; 3] {
        let persistence = self.persistence();
        [
            self.omega.ln(),
            logit(persistence / MAX_PERSISTENCE),
            logit(self.alpha / persistence),
        ]
    }
}

/// Fitted model and its forward volatilities.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GarchForecast {
    pub params: GarchParams,
    pub log_likelihood: f64,
    pub iterations: usize,
    /// Forecast daily volatilities for steps `1..=horizon`.
    pub daily_volatility: Vec<f64>,
    pub long_run_volatility: f64,
}

impl GarchForecast {
    pub fn annualized(&self, periods_per_year: f64) -> Vec<f64> {
        let scale = periods_per_year.sqrt();
        self.daily_volatility.iter().map(|v| v * scale).collect()
    }
}

fn logistic(x: f64) -> f64 {
    1.0 / (1.0 + (-x).exp())
}

fn logit(p: f64) -> f64 {
    let p = p.clamp(1e-9, 1.0 - 1e-9);
    (p / (1.0 - p)).ln()
}

/// Conditional variances, seeded with the sample variance.
fn conditional_variance(residuals: &[f64], params: &GarchParams, initial: f64) -> Vec<f64> {
    let mut sigma2 = Vec::with_capacity(residuals.len());
    sigma2.push(initial);
    for t in 1..residuals.len() {
        let prev = sigma2[t - 1];
        sigma2.push(params.omega + params.alpha * residuals[t - 1].powi(2) + params.beta * prev);
    }
    sigma2
}

fn log_likelihood(residuals: &[f64], sigma2: &[f64]) -> f64 {
    let ln_2pi = (2.0 * std::f64::consts::PI).ln();
    residuals
        .iter()
        .zip(sigma2)
        .map(|(e, s2)| -0.5 * (ln_2pi + s2.ln() + e * e / s2))
        .sum()
}

struct Minimum {
    point: [f64; 3],
    value: f64,
    iterations: usize,
    converged: bool,
}

/// Nelder-Mead simplex minimisation; non-finite values count as +inf.
fn nelder_mead<F>(objective: F, start: [f64; 3], step: f64) -> Minimum
where
    F: Fn(&[f64; 3]) -> f64,
{
    let eval = |x: &[f64; 3]| {
        let v = objective(x);
        if v.is_finite() {
            v
        } else {
            f64::INFINITY
        }
    };
    let lerp = |from: &[f64; 3], to: &[f64; 3], t: f64| -> [f64; 3] {
        [
            from[0] + t * (to[0] - from[0]),
            from[1] + t * (to[1] - from[1]),
            from[2] + t * (to[2] - from[2]),
        ]
    };

    let mut simplex: Vec<([f64; 3], f64)> = Vec::with_capacity(4);
    simplex.push((start, eval(&start)));
    for i in 0..3 {
        let mut vertex = start;
        vertex[i] += step;
        simplex.push((vertex, eval(&vertex)));
    }

    for iteration in 0..MAX_ITERATIONS {
        simplex.sort_by(|a, b| a.1.total_cmp(&b.1));
        let (best, f_best) = simplex[0];
        let (worst, f_worst) = simplex[3];
        let f_second = simplex[2].1;

        let f_spread = f_worst - f_best;
        let x_spread = simplex[1..]
            .iter()
            .flat_map(|(x, _)| x.iter().zip(best.iter()).map(|(a, b)| (a - b).abs()))
            .fold(0.0, f64::max);
        if f_best.is_finite()
            && (f_spread == 0.0 || (f_spread <= 1e-10 * (1.0 + f_best.abs()) && x_spread <= 1e-6))
        {
            return Minimum {
                point: best,
                value: f_best,
                iterations: iteration,
                converged: true,
            };
        }

        let mut centroid = [0.0; 3];
        for (x, _) in &simplex[..3] {
            for d in 0..3 {
                centroid[d] += x[d] / 3.0;
            }
        }

        let reflected = lerp(&centroid, &worst, -1.0);
        let f_reflected = eval(&reflected);

        if f_reflected < f_best {
            let expanded = lerp(&centroid, &worst, -2.0);
            let f_expanded = eval(&expanded);
            simplex[3] = if f_expanded < f_reflected {
                (expanded, f_expanded)
            } else {
                (reflected, f_reflected)
            };
            continue;
        }
        if f_reflected < f_second {
            simplex[3] = (reflected, f_reflected);
            continue;
        }

        let (contracted, f_contracted) = if f_reflected < f_worst {
            let c = lerp(&centroid, &reflected, 0.5);
            (c, eval(&c))
        } else {
            let c = lerp(&centroid, &worst, 0.5);
            (c, eval(&c))
        };
        if f_contracted < f_reflected.min(f_worst) {
            simplex[3] = (contracted, f_contracted);
            continue;
        }

        for vertex in simplex.iter_mut().skip(1) {
            let shrunk = lerp(&best, &vertex.0, 0.5);
            *vertex = (shrunk, eval(&shrunk));
        }
    }

    simplex.sort_by(|a, b| a.1.total_cmp(&b.1));
    Minimum {
        point: simplex[0].0,
        value: simplex[0].1,
        iterations: MAX_ITERATIONS,
        converged: false,
    }
}

/// Fit GARCH(1,1) to daily `returns` and forecast `horizon` steps ahead.
pub fn fit_and_forecast(returns: &[f64], horizon: usize) -> Result<GarchForecast, VolatilityError> {
    if returns.len() < MIN_OBSERVATIONS {
        return Err(VolatilityError::InsufficientData {
            message: format!(
                "GARCH(1,1) needs at least {} returns, got {}",
                MIN_OBSERVATIONS,
                returns.len()
            ),
        });
    }
    if horizon == 0 {
        return Err(VolatilityError::InvalidParameter {
            name: "horizon",
            value: 0.0,
            reason: "forecast horizon must be at least 1".to_string(),
        });
    }
    if let Some(bad) = returns.iter().find(|r| !r.is_finite()) {
        return Err(VolatilityError::InvalidParameter {
            name: "return",
            value: *bad,
            reason: "returns must be finite".to_string(),
        });
    }

    let n = returns.len() as f64;
    let mean = returns.iter().sum::<f64>() / n;
    let residuals: Vec<f64> = returns.iter().map(|r| r - mean).collect();
    let variance = residuals.iter().map(|e| e * e).sum::<f64>() / (n - 1.0);
    if variance <= 1e-20 {
        return Err(VolatilityError::ModelFit {
            message: format!("returns have zero variance ({variance})"),
            last_estimate: Vec::new(),
            iterations: 0,
        });
    }

    let start = GarchParams {
        omega: variance * 0.05,
        alpha: 0.10,
        beta: 0.85,
    };
    let negative_ll = |x: &[f64; 3]| {
        let params = GarchParams::from_unconstrained(x);
        let sigma2 = conditional_variance(&residuals, &params, variance);
        -log_likelihood(&residuals, &sigma2)
    };
    let minimum = nelder_mead(negative_ll, start.to_unconstrained(), 0.5);
    let params = GarchParams::from_unconstrained(&minimum.point);
    let estimate = vec![params.omega, params.alpha, params.beta];

    if !minimum.value.is_finite() {
        return Err(VolatilityError::ModelFit {
            message: "log-likelihood is not finite".to_string(),
            last_estimate: estimate,
            iterations: minimum.iterations,
        });
    }
    if !minimum.converged {
        return Err(VolatilityError::ModelFit {
            message: "Nelder-Mead did not converge".to_string(),
            last_estimate: estimate,
            iterations: minimum.iterations,
        });
    }
    debug!(
        omega = params.omega,
        alpha = params.alpha,
        beta = params.beta,
        iterations = minimum.iterations,
        "fitted GARCH(1,1)"
    );

    let sigma2 = conditional_variance(&residuals, &params, variance);
    let last_sigma2 = sigma2[sigma2.len() - 1];
    let last_resid = residuals[residuals.len() - 1];
    let long_run = params.long_run_variance();
    let persistence = params.persistence();

    let next = params.omega + params.alpha * last_resid * last_resid + params.beta * last_sigma2;
    let daily_volatility = (0..horizon)
        .map(|h| (long_run + persistence.powi(h as i32) * (next - long_run)).sqrt())
        .collect();

    Ok(GarchForecast {
        params,
        log_likelihood: -minimum.value,
        iterations: minimum.iterations,
        daily_volatility,
        long_run_volatility: long_run.sqrt(),
    })
}
