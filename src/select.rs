//! Choice of the clone count K from pooled chain samples.

use log::{info, warn};

use crate::bic::{select_best, ModelScore};
use crate::config::InferenceConfig;
use crate::error::{CloneError, Result, Stage};
use crate::sampler::{ChainOutput, ChainSet, TreeSample};

/// Topology choices plus cell-fraction degrees of freedom for `k` clones.
pub fn n_free_parameters(k: usize) -> usize {
    2 * k
}

/// Samples of one chain left after dropping `burnin` and keeping every
/// `thin`-th of the rest.
pub fn retained<'c>(
    chain: &'c ChainOutput,
    burnin: usize,
    thin: usize,
) -> impl Iterator<Item = &'c TreeSample> + 'c {
    chain.samples.iter().skip(burnin).step_by(thin.max(1))
}

#[derive(Debug, Clone, PartialEq)]
pub struct CloneCountSelection {
    /// One score per clone count that kept at least one sample.
    pub scores: Vec<ModelScore>,
    pub clone_count: usize,
    /// Pooled retained samples for the chosen clone count, in chain order.
    pub samples: Vec<TreeSample>,
}

pub struct ModelSelector<'a> {
    config: &'a InferenceConfig,
}

impl<'a> ModelSelector<'a> {
    pub fn new(config: &'a InferenceConfig) -> Self {
        Self { config }
    }

    /// Retained samples of every usable chain in `set`.
    pub fn pool(&self, set: &ChainSet) -> Vec<TreeSample> {
        set.chains
            .iter()
            .filter(|chain| !(self.config.exclude_divergent && chain.divergence.is_some()))
            .flat_map(|chain| retained(chain, self.config.burnin, self.config.post_thin))
            .cloned()
            .collect()
    }

    /// Score every clone count against `n_variants`, the number of
    /// non-noise variants behind the mutation clusters, and keep the best.
    pub fn select(&self, sets: &[ChainSet], n_variants: usize) -> Result<CloneCountSelection> {
        // at least two observations so that ln(n) keeps penalising extra clones
        let n_observations = n_variants.max(2);
        let mut scores = Vec::new();
        let mut pools = Vec::new();
        for set in sets {
            let pooled = self.pool(set);
            if pooled.is_empty() {
                warn!(
                    "K={} kept no samples after burn-in {} and thinning {}",
                    set.clone_count, self.config.burnin, self.config.post_thin
                );
                continue;
            }
            let mean_ll =
                pooled.iter().map(|s| s.log_likelihood).sum::<f64>() / pooled.len() as f64;
            let score = ModelScore::new(
                set.clone_count,
                mean_ll,
                n_free_parameters(set.clone_count),
                n_observations,
            );
            info!(
                "K={} samples={} mean logLik={:.3} BIC={:.3}",
                set.clone_count,
                pooled.len(),
                mean_ll,
                score.bic
            );
            scores.push(score);
            pools.push(pooled);
        }

        let best = select_best(&scores).ok_or_else(|| {
            CloneError::insufficient(
                Stage::Selection,
                format!(
                    "no clone count kept samples after burn-in {}; lower burnin or raise max_steps",
                    self.config.burnin
                ),
            )
        })?;
        let clone_count = scores[best].size;
        info!("selected K={}", clone_count);
        Ok(CloneCountSelection {
            scores,
            clone_count,
            samples: pools.swap_remove(best),
        })
    }
}
