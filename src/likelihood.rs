//! Binomial read-count likelihoods shared by the clusterer and the sampler.

use statrs::function::factorial::ln_binomial;

/// Probabilities are kept this far away from 0 and 1 so that a single read
/// never drives a log-likelihood to negative infinity.
pub const MIN_PROB: f64 = 1e-9;

pub fn clamp_prob(p: f64) -> f64 {
    p.clamp(MIN_PROB, 1.0 - MIN_PROB)
}

/// `ln C(total, alt)`, the part of the binomial log-pmf that does not depend on p.
pub fn ln_binomial_coefficient(alt: u64, total: u64) -> f64 {
    ln_binomial(total, alt)
}

/// Binomial log-pmf with a precomputed coefficient.
pub fn binomial_ln_pmf(alt: u64, total: u64, p: f64, ln_coef: f64) -> f64 {
    let p = clamp_prob(p);
    ln_coef + alt as f64 * p.ln() + (total - alt) as f64 * (1.0 - p).ln()
}

pub fn log_sum_exp(values: &[f64]) -> f64 {
    let max = values.iter().fold(f64::NEG_INFINITY, |a, &b| a.max(b));
    if max == f64::NEG_INFINITY {
        return f64::NEG_INFINITY;
    }
    max + values.iter().map(|v| (v - max).exp()).sum::<f64>().ln()
}

/// Pooled read counts of one mutation cluster.
///
/// The pooled log-likelihood equals the sum of the per-variant binomial
/// log-likelihoods, since every variant in the cluster shares one VAF.
#[derive(Debug, Clone, PartialEq)]
pub struct ClusterCounts {
    /// Cluster label (1-based, noise excluded).
    pub label: usize,
    pub alt: u64,
    pub total: u64,
    pub n_variants: usize,
    ln_coef: f64,
}

impl ClusterCounts {
    pub fn from_variants(label: usize, counts: impl IntoIterator<Item = (u64, u64)>) -> Self {
        let mut alt = 0;
        let mut total = 0;
        let mut ln_coef = 0.0;
        let mut n_variants = 0;
        for (a, t) in counts {
            alt += a;
            total += t;
            ln_coef += ln_binomial_coefficient(a, t);
            n_variants += 1;
        }
        Self {
            label,
            alt,
            total,
            n_variants,
            ln_coef,
        }
    }

    pub fn observed_vaf(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            self.alt as f64 / self.total as f64
        }
    }

    pub fn ln_likelihood(&self, vaf: f64) -> f64 {
        binomial_ln_pmf(self.alt, self.total, vaf, self.ln_coef)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn binomial_pmf_matches_closed_form() {
        // C(4,2) * 0.5^4 = 6/16
        let ln = binomial_ln_pmf(2, 4, 0.5, ln_binomial_coefficient(2, 4));
        assert_relative_eq!(ln.exp(), 0.375, epsilon = 1e-12);
    }

    #[test]
    fn zero_probability_is_clamped() {
        let ln = binomial_ln_pmf(3, 10, 0.0, ln_binomial_coefficient(3, 10));
        assert!(ln.is_finite());
    }

    #[test]
    fn log_sum_exp_handles_negative_infinity() {
        assert_eq!(log_sum_exp(&[f64::NEG_INFINITY, f64::NEG_INFINITY]), f64::NEG_INFINITY);
        assert_relative_eq!(log_sum_exp(&[0.0, f64::NEG_INFINITY]), 0.0);
        assert_relative_eq!(log_sum_exp(&[2f64.ln(), 2f64.ln()]), 4f64.ln(), epsilon = 1e-12);
    }

    #[test]
    fn pooled_likelihood_equals_per_variant_sum() {
        let variants = [(10u64, 40u64), (12, 38), (9, 41)];
        let pooled = ClusterCounts::from_variants(1, variants);
        let vaf = 0.27;
        let per_variant: f64 = variants
            .iter()
            .map(|&(a, t)| binomial_ln_pmf(a, t, vaf, ln_binomial_coefficient(a, t)))
            .sum();
        assert_relative_eq!(pooled.ln_likelihood(vaf), per_variant, epsilon = 1e-9);
        assert_eq!(pooled.n_variants, 3);
        assert_relative_eq!(pooled.observed_vaf(), 31.0 / 119.0);
    }
}
