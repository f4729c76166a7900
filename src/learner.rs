//! Exponentially weighted average forecaster for delayed feedback.
//!
//! The delay is not known up front, so it is estimated with a doubling
//! trick: the estimate doubles whenever the accrued real delay passes it.
//! The learning rate grows with the estimate, `sqrt(D * ln n)`.

use ndarray::{Array1, ArrayView1};

use crate::math::{minmax, normalize_log};

#[derive(Debug, Clone)]
pub struct WaaDelayed {
    w: Array1<f64>,
    est_delay: u64,
    real_delay: u64,
}

impl Default for WaaDelayed {
    fn default() -> Self {
        Self::new(1)
    }
}

impl WaaDelayed {
    pub fn new(n: usize) -> Self {
        let mut learner = Self {
            w: Array1::zeros(0),
            est_delay: 1,
            real_delay: 0,
        };
        learner.initialize(n);
        learner
    }

    /// Uniform weights over `n` experts, delay state back to its start
    pub fn initialize(&mut self, n: usize) {
        assert!(n > 0, "learner needs at least one expert");

        self.w = Array1::from_elem(n, 1.0 / n as f64);
        self.est_delay = 1;
        self.real_delay = 0;
    }

    #[inline]
    pub fn weights(&self) -> ArrayView1<'_, f64> {
        self.w.view()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.w.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.w.is_empty()
    }

    #[inline]
    pub fn est_delay(&self) -> u64 {
        self.est_delay
    }

    #[inline]
    pub fn real_delay(&self) -> u64 {
        self.real_delay
    }

    /// Applies per-expert `losses` accrued over `dt` frames.
    ///
    /// # Panics
    ///
    /// If `losses` does not have one entry per expert, or any loss is NaN or
    /// infinite.
    pub fn update(&mut self, losses: ArrayView1<'_, f64>, dt: u64, norm: bool) {
        assert_eq!(
            losses.len(),
            self.w.len(),
            "gradient losses must have one entry per expert"
        );
        assert!(
            losses.iter().all(|l| l.is_finite()),
            "gradient losses must be finite"
        );

        let losses = if norm {
            minmax(losses) * dt as f64
        } else {
            losses.mapv(|l| l * dt as f64)
        };

        for i in 1..=dt {
            self.real_delay += i;
            while self.est_delay < self.real_delay {
                self.est_delay *= 2;
            }
        }

        let lr = (self.est_delay as f64 * (self.w.len() as f64).ln()).sqrt();

        let temp = self.w.mapv(|w| (w + f64::MIN_POSITIVE).ln()) - losses * lr;
        self.w = normalize_log(temp.view());

        tracing::debug!(
            dt,
            lr,
            est_delay = self.est_delay,
            real_delay = self.real_delay,
            "learner updated"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::{assert_abs_diff_eq, assert_relative_eq};
    use ndarray::array;
    use proptest::prelude::*;

    #[test]
    fn test_initialize_uniform() {
        let learner = WaaDelayed::new(4);

        assert_eq!(learner.weights(), array![0.25, 0.25, 0.25, 0.25]);
        assert_eq!(learner.est_delay(), 1);
        assert_eq!(learner.real_delay(), 0);
    }

    #[test]
    fn test_zero_loss_expert_wins() {
        let mut learner = WaaDelayed::new(3);
        let losses = array![1.0, 0.0, 1.0];

        for _ in 0..5 {
            learner.update(losses.view(), 1, false);
        }

        let w = learner.weights();
        assert!(w[1] > w[0]);
        assert!(w[1] > w[2]);
        assert_relative_eq!(w.sum(), 1.0, epsilon = 1e-9);
    }

    #[test]
    fn test_zero_dt_keeps_weights() {
        let mut learner = WaaDelayed::new(3);
        learner.update(array![0.2, 0.9, 0.4].view(), 3, true);
        let before = learner.weights().to_owned();
        let delay = (learner.est_delay(), learner.real_delay());

        learner.update(array![5.0, 0.0, 1.0].view(), 0, false);

        assert_eq!((learner.est_delay(), learner.real_delay()), delay);
        for (a, b) in before.iter().zip(learner.weights().iter()) {
            assert_abs_diff_eq!(a, b, epsilon = 1e-12);
        }
    }

    #[test]
    fn test_delay_accrual_sums_indices() {
        let mut learner = WaaDelayed::new(2);
        learner.update(array![0.0, 0.0].view(), 4, false);

        // 1 + 2 + 3 + 4
        assert_eq!(learner.real_delay(), 10);
        assert_eq!(learner.est_delay(), 16);
    }

    #[test]
    fn test_single_expert_stays_certain() {
        let mut learner = WaaDelayed::new(1);
        learner.update(array![3.0].view(), 5, false);

        assert_relative_eq!(learner.weights()[0], 1.0);
    }

    #[test]
    fn test_degenerate_weight_does_not_produce_nan() {
        let mut learner = WaaDelayed::new(2);
        for _ in 0..50 {
            learner.update(array![0.0, 1.0e6].view(), 30, false);
        }

        assert!(learner.weights().iter().all(|w| w.is_finite() && *w >= 0.0));
        assert_relative_eq!(learner.weights().sum(), 1.0, epsilon = 1e-9);
    }

    #[test]
    fn test_overflowing_losses_fall_back_to_uniform() {
        let mut learner = WaaDelayed::new(3);
        learner.update(array![f64::MAX, f64::MAX, f64::MAX].view(), 8, false);

        let w = learner.weights();
        assert!(w.iter().all(|v| v.is_finite()));
        assert_relative_eq!(w.sum(), 1.0, epsilon = 1e-9);
        assert_relative_eq!(w[0], w[2]);
    }

    #[test]
    #[should_panic(expected = "must be finite")]
    fn test_infinite_losses_panic() {
        let mut learner = WaaDelayed::new(3);
        learner.update(array![f64::INFINITY, f64::INFINITY, f64::INFINITY].view(), 1, false);
    }

    #[test]
    #[should_panic(expected = "must be finite")]
    fn test_nan_loss_panics() {
        let mut learner = WaaDelayed::new(2);
        learner.update(array![f64::NAN, 0.0].view(), 1, false);
    }

    #[test]
    #[should_panic(expected = "one entry per expert")]
    fn test_wrong_loss_length_panics() {
        let mut learner = WaaDelayed::new(3);
        learner.update(array![1.0, 0.0].view(), 1, false);
    }

    proptest! {
        #[test]
        fn prop_weights_stay_on_simplex(
            n in 1usize..6,
            steps in proptest::collection::vec(
                (proptest::collection::vec(0.0f64..10.0, 6), 0u64..40, any::<bool>()),
                1..20,
            ),
        ) {
            let mut learner = WaaDelayed::new(n);
            let mut last_est = learner.est_delay();

            for (losses, dt, norm) in steps {
                let losses = Array1::from(losses[..n].to_vec());
                learner.update(losses.view(), dt, norm);

                let w = learner.weights();
                prop_assert!(w.iter().all(|x| *x >= 0.0 && x.is_finite()));
                prop_assert!((w.sum() - 1.0).abs() < 1e-9);
                prop_assert!(learner.est_delay() >= last_est);
                prop_assert!(learner.est_delay() >= learner.real_delay());
                last_est = learner.est_delay();
            }
        }
    }
}
