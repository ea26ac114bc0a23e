//! Grouping of retained tree samples into configurations.
//!
//! Samples are canonicalised first, so trees that differ only by clone
//! labels or by cell fractions fall into the same configuration.

use std::collections::HashMap;

use log::{debug, info};
use serde::Serialize;

use crate::error::{CloneError, Result, Stage};
use crate::sampler::TreeSample;
use crate::tree::ConfigurationKey;

#[derive(Debug, Clone, PartialEq)]
pub struct Configuration {
    /// Rank by posterior probability, starting at 1.
    pub id: usize,
    pub key: ConfigurationKey,
    pub posterior: f64,
    pub max_log_likelihood: f64,
    /// Index into [`Posterior::samples`] of the best member.
    pub best_sample: usize,
    pub members: Vec<usize>,
}

/// Row of the configuration summary table.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConfigurationSummary {
    pub configuration: usize,
    pub posterior: f64,
    pub max_log_likelihood: f64,
}

/// Spread of one clone's cell fraction over a configuration's members.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FractionSummary {
    pub node: usize,
    pub mean: f64,
    pub min: f64,
    pub max: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Posterior {
    pub clone_count: usize,
    /// Canonicalised retained samples.
    pub samples: Vec<TreeSample>,
    /// Configurations at or above the cutoff, by decreasing posterior.
    pub configurations: Vec<Configuration>,
    /// Configuration holding the highest-likelihood retained sample.
    pub best: usize,
    /// The highest-likelihood sample overall fell in a configuration below
    /// the cutoff, so `best` points at the runner-up.
    pub best_discarded: bool,
    pub n_discarded: usize,
}

impl Posterior {
    pub fn log_likelihoods(&self) -> Vec<f64> {
        self.samples.iter().map(|s| s.log_likelihood).collect()
    }

    pub fn configuration(&self, id: usize) -> Option<&Configuration> {
        self.configurations.iter().find(|c| c.id == id)
    }

    pub fn best_configuration(&self) -> &Configuration {
        // best is always taken from the retained list
        &self.configurations[self.best - 1]
    }

    pub fn summary(&self) -> Vec<ConfigurationSummary> {
        self.configurations
            .iter()
            .map(|c| ConfigurationSummary {
                configuration: c.id,
                posterior: c.posterior,
                max_log_likelihood: c.max_log_likelihood,
            })
            .collect()
    }

    /// Per-node cell-fraction spread over the members of configuration `id`;
    /// the last entry is the root.
    pub fn fraction_summary(&self, id: usize) -> Option<Vec<FractionSummary>> {
        let config = self.configuration(id)?;
        let fractions: Vec<Vec<f64>> = config
            .members
            .iter()
            .map(|&i| self.samples[i].tree.cell_fractions())
            .collect();
        let n_nodes = fractions.first()?.len();
        Some(
            (0..n_nodes)
                .map(|node| {
                    let values = fractions.iter().map(|f| f[node]);
                    FractionSummary {
                        node,
                        mean: values.clone().sum::<f64>() / fractions.len() as f64,
                        min: values.clone().fold(f64::INFINITY, f64::min),
                        max: values.fold(f64::NEG_INFINITY, f64::max),
                    }
                })
                .collect(),
        )
    }
}

/// Configuration groups before the cutoff, in order of first appearance.
#[derive(Debug, Clone, PartialEq)]
pub struct ConfigurationGroup {
    pub key: ConfigurationKey,
    pub members: Vec<usize>,
    pub posterior: f64,
    pub max_log_likelihood: f64,
    pub best_sample: usize,
}

pub fn group_configurations(samples: &[TreeSample]) -> Vec<ConfigurationGroup> {
    let total = samples.len() as f64;
    let mut index: HashMap<ConfigurationKey, usize> = HashMap::new();
    let mut groups: Vec<ConfigurationGroup> = Vec::new();
    for (i, sample) in samples.iter().enumerate() {
        let key = sample.tree.key();
        match index.get(&key) {
            Some(&g) => {
                let group = &mut groups[g];
                group.members.push(i);
                if sample.log_likelihood > group.max_log_likelihood {
                    group.max_log_likelihood = sample.log_likelihood;
                    group.best_sample = i;
                }
            }
            None => {
                index.insert(key.clone(), groups.len());
                groups.push(ConfigurationGroup {
                    key,
                    members: vec![i],
                    posterior: 0.0,
                    max_log_likelihood: sample.log_likelihood,
                    best_sample: i,
                });
            }
        }
    }
    for group in &mut groups {
        group.posterior = group.members.len() as f64 / total;
    }
    groups
}

pub struct PosteriorAggregator {
    cutoff: f64,
}

impl PosteriorAggregator {
    pub fn new(cutoff: f64) -> Self {
        Self { cutoff }
    }

    pub fn aggregate(&self, clone_count: usize, samples: Vec<TreeSample>) -> Result<Posterior> {
        if samples.is_empty() {
            return Err(CloneError::insufficient(
                Stage::Aggregation,
                format!("no retained samples for K={}", clone_count),
            ));
        }
        let samples: Vec<TreeSample> = samples
            .into_iter()
            .map(|s| TreeSample {
                tree: s.tree.canonical(),
                ..s
            })
            .collect();

        let groups = group_configurations(&samples);
        let n_groups = groups.len();
        let global_max = groups
            .iter()
            .map(|g| g.max_log_likelihood)
            .fold(f64::NEG_INFINITY, f64::max);
        let mut kept: Vec<(usize, ConfigurationGroup)> = groups
            .into_iter()
            .enumerate()
            .filter(|(_, g)| g.posterior >= self.cutoff)
            .collect();
        if kept.is_empty() {
            return Err(CloneError::EmptyPosterior {
                cutoff: self.cutoff,
                n_configurations: n_groups,
                n_samples: samples.len(),
            });
        }
        kept.sort_by(|(ia, a), (ib, b)| {
            b.posterior
                .total_cmp(&a.posterior)
                .then(b.max_log_likelihood.total_cmp(&a.max_log_likelihood))
                .then(ia.cmp(ib))
        });

        let configurations: Vec<Configuration> = kept
            .into_iter()
            .enumerate()
            .map(|(rank, (_, g))| Configuration {
                id: rank + 1,
                key: g.key,
                posterior: g.posterior,
                max_log_likelihood: g.max_log_likelihood,
                best_sample: g.best_sample,
                members: g.members,
            })
            .collect();
        let mut best = 0;
        for (i, c) in configurations.iter().enumerate() {
            if c.max_log_likelihood > configurations[best].max_log_likelihood {
                best = i;
            }
        }
        let best_discarded = configurations[best].max_log_likelihood < global_max;
        if best_discarded {
            debug!(
                "K={}: highest logLik {:.3} lies in a configuration below cutoff {}; reporting configuration {} at {:.3}",
                clone_count,
                global_max,
                self.cutoff,
                configurations[best].id,
                configurations[best].max_log_likelihood
            );
        }
        let best = configurations[best].id;
        info!(
            "K={}: {} of {} configurations kept at cutoff {}; best likelihood in configuration {}",
            clone_count,
            configurations.len(),
            n_groups,
            self.cutoff,
            best
        );

        Ok(Posterior {
            clone_count,
            samples,
            n_discarded: n_groups - configurations.len(),
            configurations,
            best,
            best_discarded,
        })
    }
}
