//! Cox-Ross-Rubinstein binomial lattice.
//!
//! Used for American legs in the backtest day loop, both for pricing and for
//! deciding whether immediate exercise dominates holding the option.

use serde::{Deserialize, Serialize};

use tb_types::PricingError;

use crate::pricing::{intrinsic, PricingInput};

/// Root-node comparison between holding and exercising.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ExerciseDecision {
    /// Discounted expected value of holding one more step.
    pub continuation_value: f64,
    pub intrinsic_value: f64,
    pub exercise_now: bool,
    /// Lattice value: the larger of continuation and intrinsic.
    pub value: f64,
}

struct Lattice {
    up: f64,
    disc_p: f64,
    disc_1mp: f64,
}

impl Lattice {
    fn build(input: &PricingInput, steps: usize) -> Result<Self, PricingError> {
        let dt = input.time_to_expiry / steps as f64;
        let up = (input.volatility * dt.sqrt()).exp();
        let down = 1.0 / up;
        let growth = ((input.risk_free_rate - input.dividend_yield) * dt).exp();
        let p = (growth - down) / (up - down);
        if !p.is_finite() || !(0.0..=1.0).contains(&p) {
            return Err(PricingError::invalid(
                "risk_neutral_probability",
                p,
                format!(
                    "outside [0, 1] with {} steps ({})",
                    steps,
                    input.describe()
                ),
            ));
        }
        let disc = (-input.risk_free_rate * dt).exp();
        Ok(Self {
            up,
            disc_p: disc * p,
            disc_1mp: disc * (1.0 - p),
        })
    }

    /// Backward induction down to the step-1 nodes, then the root
    /// continuation value.
    fn root_continuation(&self, input: &PricingInput, steps: usize, american: bool) -> f64 {
        let ratio = self.up * self.up;
        let mut values = Vec::with_capacity(steps + 1);
        let mut st = input.spot * self.up.powi(-(steps as i32));
        for _ in 0..=steps {
            values.push(intrinsic(input.kind, st, input.strike));
            st *= ratio;
        }

        for i in (1..steps).rev() {
            let mut st = input.spot * self.up.powi(-(i as i32));
            for j in 0..=i {
                let continuation = self.disc_p * values[j + 1] + self.disc_1mp * values[j];
                values[j] = if american {
                    continuation.max(intrinsic(input.kind, st, input.strike))
                } else {
                    continuation
                };
                st *= ratio;
            }
        }

        self.disc_p * values[1] + self.disc_1mp * values[0]
    }
}

fn check_steps(steps: usize) -> Result<(), PricingError> {
    if steps == 0 {
        return Err(PricingError::invalid(
            "steps",
            0.0,
            "binomial steps must be at least 1",
        ));
    }
    Ok(())
}

/// CRR lattice price. With `american` every node takes the larger of
/// continuation and immediate exercise.
pub fn binomial_tree_price(
    input: &PricingInput,
    steps: usize,
    american: bool,
) -> Result<f64, PricingError> {
    input.validate()?;
    check_steps(steps)?;
    if input.is_expired() {
        return Ok(input.intrinsic());
    }

    let lattice = Lattice::build(input, steps)?;
    let continuation = lattice.root_continuation(input, steps, american);
    Ok(if american {
        continuation.max(input.intrinsic())
    } else {
        continuation
    })
}

/// Whether an American holder should exercise now.
pub fn binomial_exercise_decision(
    input: &PricingInput,
    steps: usize,
) -> Result<ExerciseDecision, PricingError> {
    input.validate()?;
    check_steps(steps)?;
    let intrinsic_value = input.intrinsic();
    if input.is_expired() {
        return Ok(ExerciseDecision {
            continuation_value: 0.0,
            intrinsic_value,
            exercise_now: intrinsic_value > 0.0,
            value: intrinsic_value,
        });
    }

    let lattice = Lattice::build(input, steps)?;
    let continuation_value = lattice.root_continuation(input, steps, true);
    let tolerance = 1e-12 * intrinsic_value.max(1.0);
    let exercise_now = intrinsic_value > 0.0 && intrinsic_value > continuation_value + tolerance;

    Ok(ExerciseDecision {
        continuation_value,
        intrinsic_value,
        exercise_now,
        value: continuation_value.max(intrinsic_value),
    })
}
