//! One inference run: clustering, sampling, K selection, aggregation and
//! tree output, in that order.

use log::info;

use crate::bic::ModelScore;
use crate::cluster::{Clustering, VariantClusterer};
use crate::config::InferenceConfig;
use crate::error::{Result, SamplingDivergence};
use crate::output::{TreeOutput, TreeOutputBuilder};
use crate::posterior::{Posterior, PosteriorAggregator};
use crate::sampler::{ChainDiagnostics, TreeSampler};
use crate::select::ModelSelector;
use crate::variant::ReadCounts;

#[derive(Debug, Clone, PartialEq)]
pub struct InferenceResult {
    pub clustering: Clustering,
    pub chain_diagnostics: Vec<ChainDiagnostics>,
    pub divergences: Vec<SamplingDivergence>,
    /// BIC per clone count that kept samples.
    pub clone_scores: Vec<ModelScore>,
    pub clone_count: usize,
    pub posterior: Posterior,
    pub best: TreeOutput,
}

/// Run-scoped state; nothing survives between runs.
#[derive(Debug, Clone)]
pub struct InferenceRun {
    config: InferenceConfig,
}

impl InferenceRun {
    pub fn new(config: InferenceConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &InferenceConfig {
        &self.config
    }

    pub fn run(&self, counts: &ReadCounts) -> Result<InferenceResult> {
        let config = &self.config;
        info!("inference over {} variants (seed {})", counts.len(), config.seed);

        let clustering = VariantClusterer::new(config).cluster(counts)?;
        let clusters = clustering.cluster_counts(counts);
        info!(
            "{} mutation clusters on the tree, {} noise variants",
            clusters.len(),
            clustering
                .labels
                .iter()
                .filter(|&&l| clustering.is_noise(l))
                .count()
        );

        let sampler = TreeSampler::new(config, &clusters)?;
        let chain_sets = sampler.sample_all();
        let chain_diagnostics = chain_sets
            .iter()
            .flat_map(|set| set.chains.iter().map(|c| c.diagnostics()))
            .collect();
        let divergences = chain_sets
            .iter()
            .flat_map(|set| set.chains.iter().filter_map(|c| c.divergence.clone()))
            .collect();

        let clustered_variants = clusters.iter().map(|c| c.n_variants).sum();
        let selection = ModelSelector::new(config).select(&chain_sets, clustered_variants)?;
        drop(chain_sets);

        let posterior = PosteriorAggregator::new(config.config_cutoff)
            .aggregate(selection.clone_count, selection.samples)?;
        let best = TreeOutputBuilder::new(&posterior, &clustering, counts).build_best()?;

        Ok(InferenceResult {
            clustering,
            chain_diagnostics,
            divergences,
            clone_scores: selection.scores,
            clone_count: selection.clone_count,
            posterior,
            best,
        })
    }
}
