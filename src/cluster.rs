//! Binomial mixture clustering of variants by VAF.
//!
//! The last mixture component is a noise component with a fixed weight
//! (`noise_proportion`) and a fixed VAF (`noise_vaf`). The remaining
//! components are fitted by EM from several random starts per candidate
//! mixture size, and the size is chosen by BIC.

use log::{debug, info};
use rand::Rng;
use rayon::prelude::*;

use crate::bic::{select_best, ModelScore};
use crate::config::{restart_rng, InferenceConfig};
use crate::error::{CloneError, Result, Stage};
use crate::likelihood::{binomial_ln_pmf, ln_binomial_coefficient, log_sum_exp, ClusterCounts};
use crate::variant::ReadCounts;

const MIN_START_VAF: f64 = 0.001;
const MAX_START_VAF: f64 = 0.999;

/// Fitted mixture for one candidate size. Component `c - 1` is noise.
#[derive(Debug, Clone, PartialEq)]
pub struct ClusterFit {
    pub cluster_count: usize,
    pub restart: usize,
    pub iterations: usize,
    pub log_likelihood: f64,
    pub weights: Vec<f64>,
    pub vafs: Vec<f64>,
    /// Hard component index per variant.
    pub components: Vec<usize>,
}

/// Selected clustering. Non-noise labels are `1..=n_clusters`, ordered by
/// decreasing VAF; `noise_label` is `n_clusters + 1`.
#[derive(Debug, Clone, PartialEq)]
pub struct Clustering {
    pub labels: Vec<usize>,
    pub n_clusters: usize,
    pub noise_label: usize,
    /// Estimated VAF of label `l` at index `l - 1`.
    pub vafs: Vec<f64>,
    /// BIC per candidate mixture size, in candidate order.
    pub scores: Vec<ModelScore>,
    pub fit: ClusterFit,
}

impl Clustering {
    pub fn selected_count(&self) -> usize {
        self.fit.cluster_count
    }

    pub fn is_noise(&self, label: usize) -> bool {
        label == self.noise_label
    }

    /// Pooled counts for every non-noise cluster, indexed by `label - 1`.
    pub fn cluster_counts(&self, counts: &ReadCounts) -> Vec<ClusterCounts> {
        (1..=self.n_clusters)
            .map(|label| {
                ClusterCounts::from_variants(
                    label,
                    counts
                        .variants()
                        .iter()
                        .zip(&self.labels)
                        .filter(|(_, &l)| l == label)
                        .map(|(v, _)| (v.alt, v.total)),
                )
            })
            .collect()
    }
}

pub struct VariantClusterer<'a> {
    config: &'a InferenceConfig,
}

impl<'a> VariantClusterer<'a> {
    pub fn new(config: &'a InferenceConfig) -> Self {
        Self { config }
    }

    pub fn cluster(&self, counts: &ReadCounts) -> Result<Clustering> {
        let n = counts.len();
        let smallest = *self.config.cluster_counts.start();
        if n < smallest {
            return Err(CloneError::insufficient(
                Stage::Clustering,
                format!(
                    "{} variants cannot fill the smallest candidate of {} clusters",
                    n, smallest
                ),
            ));
        }

        let data = MixtureData::new(counts);
        let candidates: Vec<usize> = self
            .config
            .cluster_counts
            .clone()
            .filter(|&c| {
                let fits = c <= n;
                if !fits {
                    debug!("skipping {} clusters for {} variants", c, n);
                }
                fits
            })
            .collect();

        let jobs: Vec<(usize, usize)> = candidates
            .iter()
            .flat_map(|&c| (0..self.config.cluster_restarts).map(move |r| (c, r)))
            .collect();
        let fits: Vec<ClusterFit> = jobs
            .par_iter()
            .map(|&(c, r)| {
                let mut rng = restart_rng(self.config.seed, c, r);
                fit_mixture(&data, c, r, self.config, &mut rng)
            })
            .collect();

        let mut best_fits: Vec<ClusterFit> = Vec::with_capacity(candidates.len());
        for fit in fits {
            match best_fits.last_mut() {
                Some(best) if best.cluster_count == fit.cluster_count => {
                    if fit.log_likelihood > best.log_likelihood {
                        *best = fit;
                    }
                }
                _ => best_fits.push(fit),
            }
        }

        let scores: Vec<ModelScore> = best_fits
            .iter()
            .map(|fit| {
                let free = fit.cluster_count - 1;
                ModelScore::new(fit.cluster_count, fit.log_likelihood, 2 * free, n)
            })
            .collect();
        for score in &scores {
            info!(
                "clusters={} logLik={:.3} BIC={:.3}",
                score.size, score.log_likelihood, score.bic
            );
        }

        let best = select_best(&scores).ok_or_else(|| {
            CloneError::insufficient(Stage::Clustering, "no candidate mixture produced a finite score")
        })?;
        let fit = best_fits.swap_remove(best);
        info!("selected {} clusters (noise included)", fit.cluster_count);
        Ok(relabel(fit, scores))
    }
}

struct MixtureData {
    alt: Vec<u64>,
    total: Vec<u64>,
    ln_coef: Vec<f64>,
    vaf: Vec<f64>,
}

impl MixtureData {
    fn new(counts: &ReadCounts) -> Self {
        let variants = counts.variants();
        Self {
            alt: variants.iter().map(|v| v.alt).collect(),
            total: variants.iter().map(|v| v.total).collect(),
            ln_coef: variants
                .iter()
                .map(|v| ln_binomial_coefficient(v.alt, v.total))
                .collect(),
            vaf: variants.iter().map(|v| v.vaf()).collect(),
        }
    }

    fn len(&self) -> usize {
        self.alt.len()
    }
}

/// k-means++ style seeding on VAF: the first start is a random variant, later
/// ones are drawn proportionally to the squared distance to the nearest start.
fn initial_vafs(data: &MixtureData, free: usize, rng: &mut impl Rng) -> Vec<f64> {
    let n = data.len();
    let mut starts: Vec<f64> = Vec::with_capacity(free);
    starts.push(data.vaf[rng.gen_range(0..n)]);
    while starts.len() < free {
        let dist: Vec<f64> = data
            .vaf
            .iter()
            .map(|v| {
                starts
                    .iter()
                    .map(|s| (v - s).powi(2))
                    .fold(f64::INFINITY, f64::min)
            })
            .collect();
        let sum: f64 = dist.iter().sum();
        let next = if sum > 0.0 {
            let mut target = rng.gen::<f64>() * sum;
            let mut chosen = n - 1;
            for (i, d) in dist.iter().enumerate() {
                if target < *d {
                    chosen = i;
                    break;
                }
                target -= d;
            }
            data.vaf[chosen]
        } else {
            rng.gen::<f64>()
        };
        starts.push(next);
    }
    starts
        .into_iter()
        .map(|v| v.clamp(MIN_START_VAF, MAX_START_VAF))
        .collect()
}

fn fit_mixture(
    data: &MixtureData,
    cluster_count: usize,
    restart: usize,
    config: &InferenceConfig,
    rng: &mut impl Rng,
) -> ClusterFit {
    let n = data.len();
    let free = cluster_count - 1;
    let tau = config.noise_proportion;

    let mut vafs = initial_vafs(data, free, rng);
    vafs.push(config.noise_vaf);
    let mut weights = vec![(1.0 - tau) / free as f64; free];
    weights.push(tau);

    let mut resp = vec![vec![0.0; cluster_count]; n];
    let mut log_likelihood = f64::NEG_INFINITY;
    let mut iterations = 0;
    let mut log_terms = vec![0.0; cluster_count];

    loop {
        // E-step
        let mut ll = 0.0;
        for i in 0..n {
            for k in 0..cluster_count {
                log_terms[k] = weights[k].ln()
                    + binomial_ln_pmf(data.alt[i], data.total[i], vafs[k], data.ln_coef[i]);
            }
            let norm = log_sum_exp(&log_terms);
            ll += norm;
            for k in 0..cluster_count {
                resp[i][k] = (log_terms[k] - norm).exp();
            }
        }
        let converged = (ll - log_likelihood).abs() < config.em_tolerance;
        log_likelihood = ll;
        iterations += 1;
        if converged || iterations >= config.em_max_iterations {
            break;
        }

        // M-step; the noise component keeps its weight and VAF
        let mut mass = vec![0.0; free];
        for k in 0..free {
            let mut alt_sum = 0.0;
            let mut total_sum = 0.0;
            for i in 0..n {
                mass[k] += resp[i][k];
                alt_sum += resp[i][k] * data.alt[i] as f64;
                total_sum += resp[i][k] * data.total[i] as f64;
            }
            if total_sum > 0.0 {
                vafs[k] = alt_sum / total_sum;
            }
        }
        let free_mass: f64 = mass.iter().sum();
        for k in 0..free {
            weights[k] = if free_mass > 0.0 {
                (1.0 - tau) * mass[k] / free_mass
            } else {
                (1.0 - tau) / free as f64
            };
        }
    }

    let components = resp
        .iter()
        .map(|r| {
            let mut best = 0;
            for k in 1..cluster_count {
                if r[k] > r[best] {
                    best = k;
                }
            }
            best
        })
        .collect();

    ClusterFit {
        cluster_count,
        restart,
        iterations,
        log_likelihood,
        weights,
        vafs,
        components,
    }
}

fn relabel(fit: ClusterFit, scores: Vec<ModelScore>) -> Clustering {
    let noise = fit.cluster_count - 1;
    let mut order: Vec<usize> = (0..noise)
        .filter(|k| fit.components.contains(k))
        .collect();
    order.sort_by(|&a, &b| fit.vafs[b].total_cmp(&fit.vafs[a]).then(a.cmp(&b)));

    let n_clusters = order.len();
    let noise_label = n_clusters + 1;
    let mut label_of = vec![noise_label; fit.cluster_count];
    for (i, &k) in order.iter().enumerate() {
        label_of[k] = i + 1;
    }
    let labels = fit.components.iter().map(|&k| label_of[k]).collect();
    let vafs = order.iter().map(|&k| fit.vafs[k]).collect();

    Clustering {
        labels,
        n_clusters,
        noise_label,
        vafs,
        scores,
        fit,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use quickcheck_macros::quickcheck;

    fn counts(pairs: &[(u64, u64)]) -> ReadCounts {
        ReadCounts::new(
            (0..pairs.len()).map(|i| format!("v{}", i)).collect(),
            pairs.iter().map(|p| p.0).collect(),
            pairs.iter().map(|p| p.1).collect(),
        )
        .unwrap()
    }

    fn two_groups() -> ReadCounts {
        let offsets = [-3i64, -2, -1, 0, 1, 2, 3, 0, 1, -1];
        let mut pairs = Vec::new();
        for i in 0..20 {
            let o = offsets[i % offsets.len()];
            pairs.push(((20 + o) as u64, 200));
            pairs.push(((80 + o) as u64, 200));
        }
        counts(&pairs)
    }

    fn small_config() -> InferenceConfig {
        InferenceConfig {
            cluster_counts: 2..=4,
            cluster_restarts: 5,
            ..Default::default()
        }
    }

    #[test]
    fn single_group_selects_one_cluster() {
        let pairs: Vec<(u64, u64)> = [48, 49, 50, 51, 52, 50, 49, 51, 50, 50]
            .iter()
            .map(|&a| (a, 100))
            .collect();
        let config = small_config();
        let clustering = VariantClusterer::new(&config).cluster(&counts(&pairs)).unwrap();
        assert_eq!(clustering.selected_count(), 2);
        assert_eq!(clustering.n_clusters, 1);
        assert!(clustering.labels.iter().all(|&l| l == 1));
        assert_relative_eq!(clustering.vafs[0], 0.5, epsilon = 0.01);
    }

    #[test]
    fn separated_groups_select_two_clusters() {
        let config = small_config();
        let data = two_groups();
        let clustering = VariantClusterer::new(&config).cluster(&data).unwrap();
        assert_eq!(clustering.n_clusters, 2);
        assert_relative_eq!(clustering.vafs[0], 0.4, epsilon = 0.01);
        assert_relative_eq!(clustering.vafs[1], 0.1, epsilon = 0.01);
        for (v, &label) in data.variants().iter().zip(&clustering.labels) {
            let expected = if v.vaf() > 0.25 { 1 } else { 2 };
            assert_eq!(label, expected);
        }
        assert_eq!(clustering.scores.len(), 3);
    }

    #[test]
    fn selection_is_deterministic_for_a_seed() {
        let config = small_config();
        let data = two_groups();
        let a = VariantClusterer::new(&config).cluster(&data).unwrap();
        let b = VariantClusterer::new(&config).cluster(&data).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn empty_input_is_insufficient() {
        let config = small_config();
        let err = VariantClusterer::new(&config).cluster(&counts(&[])).unwrap_err();
        assert_eq!(err.stage(), Some(Stage::Clustering));
    }

    #[test]
    fn candidates_larger_than_input_are_skipped() {
        let config = InferenceConfig {
            cluster_counts: 2..=6,
            cluster_restarts: 2,
            ..Default::default()
        };
        let clustering = VariantClusterer::new(&config)
            .cluster(&counts(&[(10, 20), (30, 100), (5, 50)]))
            .unwrap();
        assert!(clustering.scores.iter().all(|s| s.size <= 3));
    }

    #[test]
    fn pooled_cluster_counts_follow_labels() {
        let config = small_config();
        let data = two_groups();
        let clustering = VariantClusterer::new(&config).cluster(&data).unwrap();
        let pooled = clustering.cluster_counts(&data);
        assert_eq!(pooled.len(), 2);
        assert_eq!(pooled[0].n_variants + pooled[1].n_variants, 40);
        assert_eq!(pooled[0].total, 20 * 200);
    }

    #[quickcheck]
    fn weights_sum_to_one(alts: Vec<u8>, seed: u64) -> bool {
        if alts.len() < 3 {
            return true;
        }
        let pairs: Vec<(u64, u64)> = alts.iter().map(|&a| (a as u64, 255)).collect();
        let data = counts(&pairs);
        let config = InferenceConfig {
            seed,
            em_max_iterations: 50,
            ..small_config()
        };
        let mut rng = restart_rng(seed, 3, 0);
        let fit = fit_mixture(&MixtureData::new(&data), 3, 0, &config, &mut rng);
        let sum: f64 = fit.weights.iter().sum();
        (sum - 1.0).abs() < 1e-9 && fit.weights[2] == config.noise_proportion
    }
}
