//! Monte Carlo pricing of European options under geometric Brownian motion.

use rand::Rng;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};

use tb_types::PricingError;

use crate::pricing::{intrinsic, inv_norm_cdf, PricingInput};

pub const DEFAULT_SEED: u64 = 42;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MonteCarloConfig {
    /// Number of simulated terminal prices.
    pub simulations: usize,
    pub seed: u64,
    /// Pair every draw with its negation.
    pub antithetic: bool,
}

impl Default for MonteCarloConfig {
    fn default() -> Self {
        Self {
            simulations: 100_000,
            seed: DEFAULT_SEED,
            antithetic: true,
        }
    }
}

impl MonteCarloConfig {
    pub fn with_simulations(mut self, simulations: usize) -> Self {
        self.simulations = simulations;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn with_antithetic(mut self, antithetic: bool) -> Self {
        self.antithetic = antithetic;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MonteCarloResult {
    pub price: f64,
    pub standard_error: f64,
    /// Independent samples behind the estimate (pairs count once).
    pub samples: usize,
}

/// Monte Carlo price with the default seed and antithetic variates.
pub fn monte_carlo_price(
    input: &PricingInput,
    simulations: usize,
) -> Result<MonteCarloResult, PricingError> {
    monte_carlo_price_with(
        input,
        &MonteCarloConfig::default().with_simulations(simulations),
    )
}

pub fn monte_carlo_price_with(
    input: &PricingInput,
    config: &MonteCarloConfig,
) -> Result<MonteCarloResult, PricingError> {
    input.validate()?;
    if config.simulations == 0 {
        return Err(PricingError::invalid(
            "simulations",
            0.0,
            "at least one simulation is required",
        ));
    }
    if input.is_expired() {
        return Ok(MonteCarloResult {
            price: input.intrinsic(),
            standard_error: 0.0,
            samples: config.simulations,
        });
    }

    let t = input.time_to_expiry;
    let drift = (input.risk_free_rate - input.dividend_yield - 0.5 * input.volatility.powi(2)) * t;
    let diffusion = input.volatility * t.sqrt();
    let discount = (-input.risk_free_rate * t).exp();
    let payoff = |z: f64| {
        let terminal = input.spot * (drift + diffusion * z).exp();
        discount * intrinsic(input.kind, terminal, input.strike)
    };

    let mut rng = ChaCha8Rng::seed_from_u64(config.seed);
    let samples = if config.antithetic {
        config.simulations.div_ceil(2)
    } else {
        config.simulations
    };

    let mut sum = 0.0;
    let mut sum_sq = 0.0;
    for _ in 0..samples {
        // open interval so the inverse CDF stays finite
        let u: f64 = rng.gen_range(f64::EPSILON..1.0);
        let z = inv_norm_cdf(u);
        let sample = if config.antithetic {
            0.5 * (payoff(z) + payoff(-z))
        } else {
            payoff(z)
        };
        sum += sample;
        sum_sq += sample * sample;
    }

    let n = samples as f64;
    let mean = sum / n;
    let standard_error = if samples > 1 {
        let variance = ((sum_sq - n * mean * mean) / (n - 1.0)).max(0.0);
        (variance / n).sqrt()
    } else {
        0.0
    };

    Ok(MonteCarloResult {
        price: mean,
        standard_error,
        samples,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pricing::black_scholes_price;
    use tb_types::OptionKind;

    fn input(kind: OptionKind) -> PricingInput {
        PricingInput::new(100.0, 105.0, 0.5, 0.03, 0.25, kind)
    }

    #[test]
    fn test_matches_black_scholes_within_error() {
        for kind in [OptionKind::Call, OptionKind::Put] {
            let input = input(kind);
            let mc = monte_carlo_price(&input, 200_000).unwrap();
            let bs = black_scholes_price(&input).unwrap();
            assert!(
                (mc.price - bs).abs() < 4.0 * mc.standard_error + 1e-3,
                "{kind}: mc={} se={} bs={bs}",
                mc.price,
                mc.standard_error
            );
        }
    }

    #[test]
    fn test_same_seed_is_reproducible() {
        let config = MonteCarloConfig::default().with_simulations(5_000).with_seed(7);
        let a = monte_carlo_price_with(&input(OptionKind::Call), &config).unwrap();
        let b = monte_carlo_price_with(&input(OptionKind::Call), &config).unwrap();
        assert_eq!(a, b);
        let c = monte_carlo_price_with(&input(OptionKind::Call), &config.with_seed(8)).unwrap();
        assert_ne!(a.price, c.price);
    }

    #[test]
    fn test_antithetic_reduces_error() {
        let base = MonteCarloConfig::default().with_simulations(50_000);
        let plain = monte_carlo_price_with(&input(OptionKind::Call), &base.with_antithetic(false)).unwrap();
        let anti = monte_carlo_price_with(&input(OptionKind::Call), &base).unwrap();
        assert!(anti.standard_error < plain.standard_error);
        assert_eq!(anti.samples, 25_000);
    }

    #[test]
    fn test_zero_simulations_rejected() {
        let config = MonteCarloConfig::default().with_simulations(0);
        assert!(monte_carlo_price_with(&input(OptionKind::Put), &config).is_err());
    }

    #[test]
    fn test_expired_is_intrinsic() {
        let expired = input(OptionKind::Put).with_time_to_expiry(0.0);
        let result = monte_carlo_price(&expired, 10).unwrap();
        assert_eq!(result.price, 5.0);
        assert_eq!(result.standard_error, 0.0);
    }
}
