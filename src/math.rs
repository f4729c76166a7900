use ndarray::{Array1, ArrayView1};
use rand::distributions::{Distribution, WeightedError, WeightedIndex};
use rand::Rng;

/// Rescales `x` into [0, 1]. A constant vector carries no ranking, so it
/// maps to zeros.
pub fn minmax(x: ArrayView1<'_, f64>) -> Array1<f64> {
    let min = x.fold(f64::INFINITY, |a, &b| a.min(b));
    let max = x.fold(f64::NEG_INFINITY, |a, &b| a.max(b));
    let range = max - min;

    if !range.is_finite() || range <= f64::EPSILON {
        return Array1::zeros(x.len());
    }

    x.mapv(|v| (v - min) / range)
}

/// `ln(sum(exp(x)))` computed around the maximum to avoid overflow
pub fn logsumexp(x: ArrayView1<'_, f64>) -> f64 {
    let max = x.fold(f64::NEG_INFINITY, |a, &b| a.max(b));
    if !max.is_finite() {
        return max;
    }

    max + x.mapv(|v| (v - max).exp()).sum().ln()
}

/// `exp(x - logsumexp(x))`, the distribution behind log-weights `x`. When no
/// entry carries mass the result is uniform.
pub fn normalize_log(x: ArrayView1<'_, f64>) -> Array1<f64> {
    let lse = logsumexp(x);
    if !lse.is_finite() {
        return Array1::from_elem(x.len(), 1.0 / x.len() as f64);
    }

    x.mapv(|v| (v - lse).exp())
}

/// Samples an index with probability proportional to its weight
pub fn weighted_random_choice<R: Rng + ?Sized>(
    weights: ArrayView1<'_, f64>,
    rng: &mut R,
) -> Result<usize, WeightedError> {
    let dist: WeightedIndex<f64> = WeightedIndex::new(weights.iter())?;

    Ok(dist.sample(rng))
}
