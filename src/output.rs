//! Projection of a chosen configuration onto a concrete tree and a
//! variant-to-clone table. No inference happens here.

use serde::Serialize;

use crate::cluster::Clustering;
use crate::error::{CloneError, Result};
use crate::posterior::Posterior;
use crate::variant::ReadCounts;

/// Node id of the normal background in reports.
pub const NORMAL_NODE: usize = 0;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CloneNode {
    pub id: usize,
    pub parent: Option<usize>,
    /// Cells in this clone or any descendant.
    pub cell_fraction: f64,
    /// Cells in this clone only.
    pub proportion: f64,
    /// Cluster labels acquired on the edge into this node.
    pub clusters: Vec<usize>,
    pub implied_vaf: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CloneTreeReport {
    pub configuration: usize,
    pub log_likelihood: f64,
    pub nodes: Vec<CloneNode>,
}

impl CloneTreeReport {
    pub fn node(&self, id: usize) -> Option<&CloneNode> {
        self.nodes.iter().find(|n| n.id == id)
    }
}

/// One row per input variant. Noise variants carry no clone.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VariantAssignment {
    pub variant_id: String,
    pub cluster: usize,
    pub clone: Option<usize>,
    pub clone_vaf: Option<f64>,
    pub clone_observed_vaf: Option<f64>,
    pub vaf: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TreeOutput {
    pub tree: CloneTreeReport,
    pub assignments: Vec<VariantAssignment>,
}

pub struct TreeOutputBuilder<'a> {
    posterior: &'a Posterior,
    clustering: &'a Clustering,
    counts: &'a ReadCounts,
}

impl<'a> TreeOutputBuilder<'a> {
    pub fn new(posterior: &'a Posterior, clustering: &'a Clustering, counts: &'a ReadCounts) -> Self {
        Self {
            posterior,
            clustering,
            counts,
        }
    }

    /// Tree of the configuration's highest-likelihood member.
    pub fn build(&self, configuration: usize) -> Result<TreeOutput> {
        let config = self.posterior.configuration(configuration).ok_or_else(|| {
            CloneError::invalid_input(format!("unknown configuration {}", configuration))
        })?;
        let sample = &self.posterior.samples[config.best_sample];
        let tree = &sample.tree;
        let k = tree.n_clones();
        // clone i is reported as i + 1, the root as NORMAL_NODE
        let report_id = |node: usize| if node == k { NORMAL_NODE } else { node + 1 };

        let fractions = tree.cell_fractions();
        let mut nodes = Vec::with_capacity(k + 1);
        for node in std::iter::once(k).chain(0..k) {
            nodes.push(CloneNode {
                id: report_id(node),
                parent: tree.parent(node).map(report_id),
                cell_fraction: fractions[node],
                proportion: tree.proportions()[node],
                clusters: tree.clusters_on(node).into_iter().map(|c| c + 1).collect(),
                implied_vaf: if node == k { 0.0 } else { fractions[node] / 2.0 },
            });
        }

        let mut pooled = vec![(0u64, 0u64); k];
        for (variant, &label) in self.counts.variants().iter().zip(&self.clustering.labels) {
            if !self.clustering.is_noise(label) {
                let node = tree.node_of_cluster(label - 1);
                pooled[node].0 += variant.alt;
                pooled[node].1 += variant.total;
            }
        }

        let assignments = self
            .counts
            .variants()
            .iter()
            .zip(&self.clustering.labels)
            .map(|(variant, &label)| {
                let node = (!self.clustering.is_noise(label)).then(|| tree.node_of_cluster(label - 1));
                VariantAssignment {
                    variant_id: variant.id.clone(),
                    cluster: label,
                    clone: node.map(report_id),
                    clone_vaf: node.map(|n| fractions[n] / 2.0),
                    clone_observed_vaf: node.map(|n| {
                        let (alt, total) = pooled[n];
                        if total == 0 {
                            0.0
                        } else {
                            alt as f64 / total as f64
                        }
                    }),
                    vaf: variant.vaf(),
                }
            })
            .collect();

        Ok(TreeOutput {
            tree: CloneTreeReport {
                configuration,
                log_likelihood: sample.log_likelihood,
                nodes,
            },
            assignments,
        })
    }

    pub fn build_best(&self) -> Result<TreeOutput> {
        self.build(self.posterior.best)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bic::ModelScore;
    use crate::cluster::ClusterFit;
    use crate::posterior::PosteriorAggregator;
    use crate::sampler::TreeSample;
    use crate::tree::CloneTree;
    use approx::assert_relative_eq;

    fn fixture() -> (ReadCounts, Clustering, Posterior) {
        let counts = ReadCounts::new(
            vec!["a".into(), "b".into(), "c".into(), "d".into()],
            vec![40, 10, 42, 1],
            vec![100, 100, 100, 100],
        )
        .unwrap();
        let clustering = Clustering {
            labels: vec![1, 2, 1, 3],
            n_clusters: 2,
            noise_label: 3,
            vafs: vec![0.41, 0.1],
            scores: vec![ModelScore::new(3, -20.0, 4, 4)],
            fit: ClusterFit {
                cluster_count: 3,
                restart: 0,
                iterations: 1,
                log_likelihood: -20.0,
                weights: vec![0.5, 0.49, 0.01],
                vafs: vec![0.41, 0.1, 0.001],
                components: vec![0, 1, 0, 2],
            },
        };
        let samples = vec![
            TreeSample {
                chain: 0,
                step: 1,
                log_likelihood: -9.0,
                tree: CloneTree::from_parts(vec![2, 0], vec![0.6, 0.2, 0.2], vec![0, 1]),
            },
            TreeSample {
                chain: 0,
                step: 2,
                log_likelihood: -7.0,
                tree: CloneTree::from_parts(vec![2, 0], vec![0.62, 0.2, 0.18], vec![0, 1]),
            },
        ];
        let posterior = PosteriorAggregator::new(0.0).aggregate(2, samples).unwrap();
        (counts, clustering, posterior)
    }

    #[test]
    fn tree_report_uses_best_member() {
        let (counts, clustering, posterior) = fixture();
        let output = TreeOutputBuilder::new(&posterior, &clustering, &counts)
            .build_best()
            .unwrap();
        assert_relative_eq!(output.tree.log_likelihood, -7.0);
        let normal = output.tree.node(NORMAL_NODE).unwrap();
        assert_eq!(normal.parent, None);
        assert_relative_eq!(normal.cell_fraction, 1.0, epsilon = 1e-12);
        let first = output.tree.node(1).unwrap();
        assert_eq!(first.parent, Some(NORMAL_NODE));
        assert_eq!(first.clusters, vec![1]);
        assert_relative_eq!(first.cell_fraction, 0.82, epsilon = 1e-12);
        let second = output.tree.node(2).unwrap();
        assert_eq!(second.parent, Some(1));
        assert_eq!(second.clusters, vec![2]);
        assert_relative_eq!(second.implied_vaf, 0.1, epsilon = 1e-12);
    }

    #[test]
    fn every_variant_appears_once() {
        let (counts, clustering, posterior) = fixture();
        let output = TreeOutputBuilder::new(&posterior, &clustering, &counts)
            .build_best()
            .unwrap();
        let ids: Vec<&str> = output.assignments.iter().map(|a| a.variant_id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b", "c", "d"]);
        assert_eq!(output.assignments[0].clone, Some(1));
        assert_relative_eq!(output.assignments[0].clone_observed_vaf.unwrap(), 0.41);
        assert_eq!(output.assignments[1].clone, Some(2));
        assert_eq!(output.assignments[3].clone, None);
        assert_eq!(output.assignments[3].clone_vaf, None);
    }

    #[test]
    fn building_twice_is_identical() {
        let (counts, clustering, posterior) = fixture();
        let builder = TreeOutputBuilder::new(&posterior, &clustering, &counts);
        assert_eq!(builder.build(1).unwrap(), builder.build(1).unwrap());
        assert!(builder.build(5).is_err());
    }
}
