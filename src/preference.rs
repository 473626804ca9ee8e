//! Preference-optimization losses.
//!
//! Two interchangeable strategies over one contract: given per-example
//! summed log-probabilities from a trainable policy and a frozen reference
//! model, produce per-example losses and implicit rewards.
//!
//! - [`DpoLoss`]: direct preference optimization, a logistic regression on
//!   the policy/reference log-ratio margin, with optional label smoothing.
//! - [`RsoLoss`]: the statistical rejection-sampling ("hinge") variant.
//!   Deprecated; construction emits a one-time notice.
//!
//! Rewards are reporting-only values: this crate carries no gradient
//! machinery, and an enclosing optimizer must treat them as constants.
//!
//! # Example
//!
//! ```
//! use ndarray::array;
//! use preparar::preference::{ChosenRejectedOutputs, DpoLoss, PreferenceLoss};
//!
//! # fn main() -> Result<(), preparar::preference::ShapeMismatchError> {
//! let policy = ChosenRejectedOutputs::new(array![2.0], array![1.0]);
//! let reference = ChosenRejectedOutputs::new(array![1.0], array![1.0]);
//!
//! let (losses, chosen_rewards, rejected_rewards) =
//!     DpoLoss::new(0.1, 0.0).compute(&policy, &reference)?;
//! assert_eq!(losses.len(), 1);
//! assert!(chosen_rewards[0] > rejected_rewards[0]);
//! # Ok(())
//! # }
//! ```

use std::sync::Once;

use ndarray::Array1;
use thiserror::Error;
use tracing::warn;

/// Shape mismatch between policy and reference batches
#[derive(Debug, Error)]
#[error("Batch shape mismatch: expected {expected} examples, got {actual}")]
pub struct ShapeMismatchError {
    /// Batch length of the first tensor seen
    pub expected: usize,
    /// Conflicting batch length
    pub actual: usize,
}

/// Per-example model outputs for a batch of preference pairs.
///
/// One value per batch example in each field. The logit aggregates are
/// carried for reporting alongside the log-probabilities and are not
/// consumed by the loss computation.
#[derive(Debug, Clone)]
pub struct ChosenRejectedOutputs {
    /// Summed log-probabilities of the chosen responses
    pub chosen_logps: Array1<f32>,
    /// Summed log-probabilities of the rejected responses
    pub rejected_logps: Array1<f32>,
    /// Mean logits over the chosen responses
    pub chosen_logits: Array1<f32>,
    /// Mean logits over the rejected responses
    pub rejected_logits: Array1<f32>,
}

impl ChosenRejectedOutputs {
    /// Build from log-probabilities alone, with zeroed logit aggregates.
    #[must_use]
    pub fn new(chosen_logps: Array1<f32>, rejected_logps: Array1<f32>) -> Self {
        let chosen_logits = Array1::zeros(chosen_logps.len());
        let rejected_logits = Array1::zeros(rejected_logps.len());
        Self {
            chosen_logps,
            rejected_logps,
            chosen_logits,
            rejected_logits,
        }
    }

    /// Attach logit aggregates.
    #[must_use]
    pub fn with_logits(mut self, chosen_logits: Array1<f32>, rejected_logits: Array1<f32>) -> Self {
        self.chosen_logits = chosen_logits;
        self.rejected_logits = rejected_logits;
        self
    }
}

/// Per-example losses and rewards: `(losses, chosen_rewards,
/// rejected_rewards)`.
pub type PreferenceLossOutput = (Array1<f32>, Array1<f32>, Array1<f32>);

/// Preference loss contract shared by the strategies.
pub trait PreferenceLoss: Send + Sync {
    /// Compute per-example losses and rewards for a batch.
    ///
    /// # Errors
    /// Returns [`ShapeMismatchError`] when the policy and reference
    /// batches disagree in length.
    fn compute(
        &self,
        policy: &ChosenRejectedOutputs,
        reference: &ChosenRejectedOutputs,
    ) -> Result<PreferenceLossOutput, ShapeMismatchError>;

    /// Name of the loss strategy
    fn name(&self) -> &'static str;
}

/// Numerically stable `softplus(x) = ln(1 + e^x)`.
fn softplus(x: f32) -> f32 {
    x.max(0.0) + (-x.abs()).exp().ln_1p()
}

/// `ln σ(x)` computed as `-softplus(-x)` to avoid overflow for
/// large-magnitude inputs.
fn log_sigmoid(x: f32) -> f32 {
    -softplus(-x)
}

/// Policy-vs-reference log-ratio margin, one value per example.
fn margin_logits(
    policy: &ChosenRejectedOutputs,
    reference: &ChosenRejectedOutputs,
) -> Result<Array1<f32>, ShapeMismatchError> {
    let expected = policy.chosen_logps.len();
    for actual in [
        policy.rejected_logps.len(),
        reference.chosen_logps.len(),
        reference.rejected_logps.len(),
    ] {
        if actual != expected {
            return Err(ShapeMismatchError { expected, actual });
        }
    }
    let pi_logratios = &policy.chosen_logps - &policy.rejected_logps;
    let ref_logratios = &reference.chosen_logps - &reference.rejected_logps;
    Ok(pi_logratios - ref_logratios)
}

/// Implicit rewards scaled by the temperature, for reporting.
fn rewards(
    policy: &ChosenRejectedOutputs,
    reference: &ChosenRejectedOutputs,
    temperature: f32,
) -> (Array1<f32>, Array1<f32>) {
    let chosen = (&policy.chosen_logps - &reference.chosen_logps) * temperature;
    let rejected = (&policy.rejected_logps - &reference.rejected_logps) * temperature;
    (chosen, rejected)
}

/// Direct Preference Optimization loss.
///
/// `loss = -ln σ(beta·logits)·(1-s) - ln σ(-beta·logits)·s` where
/// `logits` is the policy-vs-reference log-ratio margin and `s` the label
/// smoothing. The reference model's influence vanishes as `beta -> 0`;
/// label smoothing encodes uncertainty about the preference labels.
#[derive(Debug, Clone)]
pub struct DpoLoss {
    beta: f32,
    label_smoothing: f32,
}

impl DpoLoss {
    /// Create the loss with the given temperature and label smoothing.
    ///
    /// # Panics
    /// Panics when `beta` is not positive or `label_smoothing` is outside
    /// `[0, 1)`.
    #[must_use]
    pub fn new(beta: f32, label_smoothing: f32) -> Self {
        assert!(beta > 0.0, "beta must be positive");
        assert!(
            (0.0..1.0).contains(&label_smoothing),
            "label_smoothing must be in [0, 1)"
        );
        Self {
            beta,
            label_smoothing,
        }
    }
}

impl Default for DpoLoss {
    fn default() -> Self {
        Self::new(0.1, 0.0)
    }
}

impl PreferenceLoss for DpoLoss {
    fn compute(
        &self,
        policy: &ChosenRejectedOutputs,
        reference: &ChosenRejectedOutputs,
    ) -> Result<PreferenceLossOutput, ShapeMismatchError> {
        let logits = margin_logits(policy, reference)?;
        let smoothing = self.label_smoothing;
        let losses = logits.mapv(|x| {
            -log_sigmoid(self.beta * x) * (1.0 - smoothing)
                - log_sigmoid(-self.beta * x) * smoothing
        });
        let (chosen_rewards, rejected_rewards) = rewards(policy, reference, self.beta);
        Ok((losses, chosen_rewards, rejected_rewards))
    }

    fn name(&self) -> &'static str {
        "DPO"
    }
}

static RSO_DEPRECATION: Once = Once::new();

/// Statistical Rejection Sampling Optimization ("hinge") loss.
///
/// `loss = max(0, 1 - gamma·logits)` over the same margin as [`DpoLoss`].
/// Deprecated: kept for existing recipes; constructing it emits a
/// one-time notice.
#[derive(Debug, Clone)]
pub struct RsoLoss {
    gamma: f32,
}

impl RsoLoss {
    /// Create the loss with the given temperature.
    #[must_use]
    pub fn new(gamma: f32) -> Self {
        RSO_DEPRECATION.call_once(|| {
            warn!("RsoLoss is deprecated and will be removed in an upcoming release");
        });
        Self { gamma }
    }
}

impl PreferenceLoss for RsoLoss {
    fn compute(
        &self,
        policy: &ChosenRejectedOutputs,
        reference: &ChosenRejectedOutputs,
    ) -> Result<PreferenceLossOutput, ShapeMismatchError> {
        let logits = margin_logits(policy, reference)?;
        let losses = logits.mapv(|x| (1.0 - self.gamma * x).max(0.0));
        let (chosen_rewards, rejected_rewards) = rewards(policy, reference, self.gamma);
        Ok((losses, chosen_rewards, rejected_rewards))
    }

    fn name(&self) -> &'static str {
        "RSO"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use ndarray::array;

    fn batch() -> (ChosenRejectedOutputs, ChosenRejectedOutputs) {
        let policy = ChosenRejectedOutputs::new(array![2.0], array![1.0]);
        let reference = ChosenRejectedOutputs::new(array![1.0], array![1.0]);
        (policy, reference)
    }

    #[test]
    fn test_dpo_loss_reference_values() {
        let (policy, reference) = batch();
        let (losses, chosen, rejected) =
            DpoLoss::new(0.1, 0.0).compute(&policy, &reference).unwrap();

        // margin logits = (2-1) - (1-1) = 1.0; loss = -ln sigma(0.1)
        assert_relative_eq!(losses[0], 0.644397, epsilon = 1e-4);
        assert_relative_eq!(chosen[0], 0.1, epsilon = 1e-6);
        assert_relative_eq!(rejected[0], 0.0, epsilon = 1e-6);
    }

    #[test]
    fn test_rso_loss_reference_values() {
        let (policy, reference) = batch();
        let (losses, chosen, rejected) = RsoLoss::new(0.1).compute(&policy, &reference).unwrap();

        // hinge: max(0, 1 - 0.1 * 1.0)
        assert_relative_eq!(losses[0], 0.9, epsilon = 1e-6);
        assert_relative_eq!(chosen[0], 0.1, epsilon = 1e-6);
        assert_relative_eq!(rejected[0], 0.0, epsilon = 1e-6);
    }

    #[test]
    fn test_rso_hinge_clamps_at_zero() {
        let policy = ChosenRejectedOutputs::new(array![50.0], array![1.0]);
        let reference = ChosenRejectedOutputs::new(array![1.0], array![1.0]);
        let (losses, _, _) = RsoLoss::new(0.1).compute(&policy, &reference).unwrap();
        assert_relative_eq!(losses[0], 0.0, epsilon = 1e-6);
    }

    #[test]
    fn test_label_smoothing_blends_both_directions() {
        let (policy, reference) = batch();
        let (plain, _, _) = DpoLoss::new(0.1, 0.0).compute(&policy, &reference).unwrap();
        let (smoothed, _, _) = DpoLoss::new(0.1, 0.2).compute(&policy, &reference).unwrap();

        // -ln sigma(0.1)*0.8 - ln sigma(-0.1)*0.2
        let expected = 0.644397 * 0.8 + 0.744397 * 0.2;
        assert_relative_eq!(smoothed[0], expected, epsilon = 1e-4);
        assert!(smoothed[0] > plain[0]);
    }

    #[test]
    fn test_large_magnitude_logits_stay_finite() {
        let policy = ChosenRejectedOutputs::new(array![1000.0, -1000.0], array![0.0, 0.0]);
        let reference = ChosenRejectedOutputs::new(array![0.0, 0.0], array![0.0, 0.0]);
        let (losses, _, _) = DpoLoss::new(1.0, 0.0).compute(&policy, &reference).unwrap();
        assert!(losses.iter().all(|l| l.is_finite()));
        // the strongly preferred example drives its loss to ~0
        assert_relative_eq!(losses[0], 0.0, epsilon = 1e-4);
        // the strongly dispreferred example pays ~the full margin
        assert_relative_eq!(losses[1], 1000.0, epsilon = 1e-1);
    }

    #[test]
    fn test_outputs_match_batch_length() {
        let policy = ChosenRejectedOutputs::new(array![1.0, 2.0, 3.0], array![0.5, 1.5, 2.5]);
        let reference = ChosenRejectedOutputs::new(array![1.0, 1.0, 1.0], array![1.0, 1.0, 1.0]);
        for loss in [&DpoLoss::default() as &dyn PreferenceLoss, &RsoLoss::new(0.1)] {
            let (losses, chosen, rejected) = loss.compute(&policy, &reference).unwrap();
            assert_eq!(losses.len(), 3);
            assert_eq!(chosen.len(), 3);
            assert_eq!(rejected.len(), 3);
        }
    }

    #[test]
    fn test_shape_mismatch_is_fatal() {
        let policy = ChosenRejectedOutputs::new(array![1.0, 2.0], array![0.5, 1.5]);
        let reference = ChosenRejectedOutputs::new(array![1.0], array![1.0]);
        let err = DpoLoss::default().compute(&policy, &reference).unwrap_err();
        assert_eq!(err.expected, 2);
        assert_eq!(err.actual, 1);
    }

    #[test]
    #[should_panic(expected = "beta must be positive")]
    fn test_negative_beta_rejected() {
        DpoLoss::new(-0.1, 0.0);
    }

    #[test]
    #[should_panic(expected = "label_smoothing must be in [0, 1)")]
    fn test_invalid_smoothing_rejected() {
        DpoLoss::new(0.1, 1.0);
    }

    #[test]
    fn test_with_logits_carries_aggregates() {
        let outputs = ChosenRejectedOutputs::new(array![1.0], array![0.0])
            .with_logits(array![3.0], array![-3.0]);
        assert_relative_eq!(outputs.chosen_logits[0], 3.0);
        assert_relative_eq!(outputs.rejected_logits[0], -3.0);
    }

    #[test]
    fn test_loss_names() {
        assert_eq!(DpoLoss::default().name(), "DPO");
        assert_eq!(RsoLoss::new(0.1).name(), "RSO");
    }
}
