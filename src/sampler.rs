//! Metropolis-Hastings sampling of clone trees for a range of clone counts.
//!
//! Each chain jointly moves the topology, the cluster-to-edge assignment and
//! the clone proportions. Chains own their generators and share nothing.

use std::iter;
use std::sync::Arc;
use std::time::Instant;

use indicatif::ProgressBar;
use log::{debug, info, warn};
use rand::Rng;
use rayon::prelude::*;
use serde::Serialize;

use crate::config::{chain_rng, InferenceConfig, MoveProbs};
use crate::error::{CloneError, DivergenceReason, Result, SamplingDivergence, Stage};
use crate::likelihood::ClusterCounts;
use crate::tree::CloneTree;

/// Relative weights of the topology sub-moves: prune and re-attach, swap two
/// node labels, swap two subtrees.
const TOPOLOGY_MOVE_WEIGHTS: [f64; 3] = [0.55, 0.4, 0.05];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum MoveKind {
    Topology,
    Assignment,
    Fractions,
}

impl MoveKind {
    fn index(self) -> usize {
        match self {
            MoveKind::Topology => 0,
            MoveKind::Assignment => 1,
            MoveKind::Fractions => 2,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TopologyMove {
    PruneReattach,
    SwapLabels,
    SwapSubtrees,
}

/// Proposal and acceptance counts per move kind.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MoveStats {
    proposed: [usize; 3],
    accepted: [usize; 3],
}

impl MoveStats {
    pub fn proposed(&self, kind: MoveKind) -> usize {
        self.proposed[kind.index()]
    }

    pub fn accepted(&self, kind: MoveKind) -> usize {
        self.accepted[kind.index()]
    }

    pub fn acceptance_rate(&self, kind: MoveKind) -> f64 {
        let proposed = self.proposed(kind);
        if proposed == 0 {
            0.0
        } else {
            self.accepted(kind) as f64 / proposed as f64
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Termination {
    Converged,
    MaxSteps,
    TimedOut,
}

/// One recorded chain state.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TreeSample {
    pub chain: usize,
    pub step: usize,
    pub log_likelihood: f64,
    pub tree: CloneTree,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChainOutput {
    pub clone_count: usize,
    pub chain: usize,
    pub samples: Vec<TreeSample>,
    pub steps: usize,
    pub termination: Termination,
    pub stats: MoveStats,
    pub divergence: Option<SamplingDivergence>,
}

/// Flat per-chain summary for reporting.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChainDiagnostics {
    pub clone_count: usize,
    pub chain: usize,
    pub steps: usize,
    pub samples: usize,
    pub termination: Termination,
    pub topology_acceptance: f64,
    pub assignment_acceptance: f64,
    pub fractions_acceptance: f64,
    pub divergent: bool,
}

impl ChainOutput {
    pub fn diagnostics(&self) -> ChainDiagnostics {
        ChainDiagnostics {
            clone_count: self.clone_count,
            chain: self.chain,
            steps: self.steps,
            samples: self.samples.len(),
            termination: self.termination,
            topology_acceptance: self.stats.acceptance_rate(MoveKind::Topology),
            assignment_acceptance: self.stats.acceptance_rate(MoveKind::Assignment),
            fractions_acceptance: self.stats.acceptance_rate(MoveKind::Fractions),
            divergent: self.divergence.is_some(),
        }
    }
}

/// Every chain run for one clone count, in chain order.
#[derive(Debug, Clone, PartialEq)]
pub struct ChainSet {
    pub clone_count: usize,
    pub chains: Vec<ChainOutput>,
}

pub struct TreeSampler<'a> {
    config: &'a InferenceConfig,
    clusters: &'a [ClusterCounts],
}

impl<'a> TreeSampler<'a> {
    pub fn new(config: &'a InferenceConfig, clusters: &'a [ClusterCounts]) -> Result<Self> {
        if clusters.is_empty() {
            return Err(CloneError::insufficient(
                Stage::Sampling,
                "no non-noise mutation cluster to place on a tree",
            ));
        }
        Ok(Self { config, clusters })
    }

    /// Sum over clusters of the binomial log-likelihood at the tree-implied VAF.
    pub fn log_likelihood(&self, tree: &CloneTree) -> f64 {
        tree.implied_vafs()
            .iter()
            .zip(self.clusters)
            .map(|(&vaf, cluster)| cluster.ln_likelihood(vaf))
            .sum()
    }

    /// Run every chain for every candidate clone count, in parallel.
    pub fn sample_all(&self) -> Vec<ChainSet> {
        let jobs: Vec<(usize, usize)> = self
            .config
            .clone_counts
            .clone()
            .flat_map(|k| (0..self.config.chains_per_k).map(move |c| (k, c)))
            .collect();

        info!(
            "sampling {} chains over clone counts {:?} for {} clusters",
            jobs.len(),
            self.config.clone_counts,
            self.clusters.len()
        );
        let progress_bar = Arc::new(if self.config.progress {
            ProgressBar::new(jobs.len() as u64)
        } else {
            ProgressBar::hidden()
        });
        let outputs: Vec<ChainOutput> = jobs
            .par_iter()
            .map(|&(k, chain)| {
                let output = self.run_chain(k, chain);
                progress_bar.inc(1);
                output
            })
            .collect();
        progress_bar.finish();

        let mut sets: Vec<ChainSet> = Vec::new();
        for output in outputs {
            match sets.last_mut() {
                Some(set) if set.clone_count == output.clone_count => set.chains.push(output),
                _ => sets.push(ChainSet {
                    clone_count: output.clone_count,
                    chains: vec![output],
                }),
            }
        }
        sets
    }

    /// Run one chain with its own generator.
    pub fn run_chain(&self, k: usize, chain: usize) -> ChainOutput {
        let config = self.config;
        let mut rng = chain_rng(config.seed, k, chain);
        let timeout = config.chain_timeout();
        let started = Instant::now();

        let mut current = CloneTree::random(k, self.clusters.len(), &mut rng);
        let mut current_ll = self.log_likelihood(&current);
        let mut samples = Vec::with_capacity(config.max_steps / config.thinning + 1);
        let mut stats = MoveStats::default();
        let mut termination = Termination::MaxSteps;
        let mut steps = 0;

        for step in 1..=config.max_steps {
            steps = step;
            let kind = sample_move_kind(&config.move_probs, &mut rng);
            stats.proposed[kind.index()] += 1;

            if let Some((proposal, log_correction)) = self.propose(kind, &current, &mut rng) {
                let proposal_ll = self.log_likelihood(&proposal);
                // Metropolis-Hastings acceptance; uniform priors cancel
                let log_ratio = proposal_ll - current_ll + log_correction;
                if rng.gen::<f64>().ln() < log_ratio {
                    current = proposal;
                    current_ll = proposal_ll;
                    stats.accepted[kind.index()] += 1;
                }
            }

            if step % config.thinning == 0 {
                samples.push(TreeSample {
                    chain,
                    step,
                    log_likelihood: current_ll,
                    tree: current.clone(),
                });
                if step >= config.min_steps
                    && has_converged(
                        &samples,
                        config.convergence_window,
                        config.convergence_tolerance,
                    )
                {
                    termination = Termination::Converged;
                    break;
                }
                if timeout.map_or(false, |t| started.elapsed() >= t) {
                    termination = Termination::TimedOut;
                    break;
                }
            }
        }

        let divergence = match current.validate() {
            Err(msg) => Some(DivergenceReason::InvalidTree(msg)),
            Ok(()) if termination != Termination::Converged => {
                Some(DivergenceReason::NotConverged { steps })
            }
            Ok(()) => None,
        }
        .map(|reason| SamplingDivergence {
            clone_count: k,
            chain,
            reason,
        });
        if let Some(d) = &divergence {
            warn!("{}", d);
        }
        debug!(
            "K={} chain {} stopped after {} steps ({:?}), {} samples, final logLik {:.3}, acceptance {:.3}/{:.3}/{:.3}",
            k,
            chain,
            steps,
            termination,
            samples.len(),
            current_ll,
            stats.acceptance_rate(MoveKind::Topology),
            stats.acceptance_rate(MoveKind::Assignment),
            stats.acceptance_rate(MoveKind::Fractions),
        );

        ChainOutput {
            clone_count: k,
            chain,
            samples,
            steps,
            termination,
            stats,
            divergence,
        }
    }

    /// Returns the proposed tree with the log Hastings correction, or `None`
    /// when the move cannot produce a valid, different tree.
    fn propose(
        &self,
        kind: MoveKind,
        tree: &CloneTree,
        rng: &mut impl Rng,
    ) -> Option<(CloneTree, f64)> {
        match kind {
            MoveKind::Topology => propose_topology(tree, rng),
            MoveKind::Assignment => propose_assignment(tree, rng),
            MoveKind::Fractions => propose_fractions(tree, self.config.fraction_step, rng),
        }
    }
}

fn sample_move_kind(probs: &MoveProbs, rng: &mut impl Rng) -> MoveKind {
    let r: f64 = rng.gen();
    if r < probs.topology {
        MoveKind::Topology
    } else if r < probs.topology + probs.assignment {
        MoveKind::Assignment
    } else {
        MoveKind::Fractions
    }
}

fn sample_topology_move(rng: &mut impl Rng) -> TopologyMove {
    let r: f64 = rng.gen();
    if r < TOPOLOGY_MOVE_WEIGHTS[0] {
        TopologyMove::PruneReattach
    } else if r < TOPOLOGY_MOVE_WEIGHTS[0] + TOPOLOGY_MOVE_WEIGHTS[1] {
        TopologyMove::SwapLabels
    } else {
        TopologyMove::SwapSubtrees
    }
}

fn sample_two_distinct(n: usize, rng: &mut impl Rng) -> (usize, usize) {
    let first = rng.gen_range(0..n);
    let mut second = rng.gen_range(0..n - 1);
    if second >= first {
        second += 1;
    }
    (first, second)
}

fn propose_topology(tree: &CloneTree, rng: &mut impl Rng) -> Option<(CloneTree, f64)> {
    let k = tree.n_clones();
    if k < 2 {
        return None;
    }
    let anc = tree.ancestor_matrix();
    let mut proposal = tree.clone();

    match sample_topology_move(rng) {
        TopologyMove::PruneReattach => {
            let node = rng.gen_range(0..k);
            let candidates: Vec<usize> = (0..k)
                .filter(|&j| !anc[node][j])
                .chain(iter::once(k))
                .collect();
            let new_parent = candidates[rng.gen_range(0..candidates.len())];
            if new_parent == tree.parents()[node] {
                return None;
            }
            proposal.parents_mut()[node] = new_parent;
            Some((proposal, 0.0))
        }
        TopologyMove::SwapLabels => {
            let (a, b) = sample_two_distinct(k, rng);
            let swap = |n: usize| {
                if n == a {
                    b
                } else if n == b {
                    a
                } else {
                    n
                }
            };
            let parents = proposal.parents_mut();
            for node in 0..k {
                parents[swap(node)] = swap(tree.parents()[node]);
            }
            Some((proposal, 0.0))
        }
        TopologyMove::SwapSubtrees => {
            let (first, second) = sample_two_distinct(k, rng);
            // node_to_move is never an ancestor of next_node
            let (node_to_move, next_node) = if anc[first][second] {
                (second, first)
            } else {
                (first, second)
            };
            let parents = tree.parents();
            if !anc[next_node][node_to_move] {
                let moved = proposal.parents_mut();
                moved[node_to_move] = parents[next_node];
                moved[next_node] = parents[node_to_move];
                return Some((proposal, 0.0));
            }

            // Same lineage: lift node_to_move into next_node's place, then hang
            // next_node below a random descendant of node_to_move.
            let descendants: Vec<usize> = (0..k).filter(|&j| anc[node_to_move][j]).collect();
            proposal.parents_mut()[node_to_move] = parents[next_node];
            let next_descendants = proposal
                .ancestor_matrix()
                .get(next_node)
                .map(|row| row.iter().filter(|&&d| d).count())
                .unwrap_or(1);
            let chosen = descendants[rng.gen_range(0..descendants.len())];
            proposal.parents_mut()[next_node] = chosen;
            let log_correction = (descendants.len() as f64).ln() - (next_descendants as f64).ln();
            Some((proposal, log_correction))
        }
    }
}

fn propose_assignment(tree: &CloneTree, rng: &mut impl Rng) -> Option<(CloneTree, f64)> {
    let k = tree.n_clones();
    let m = tree.n_clusters();
    if k < 2 || m == 0 {
        return None;
    }
    let cluster = rng.gen_range(0..m);
    let current = tree.node_of_cluster(cluster);
    let mut target = rng.gen_range(0..k - 1);
    if target >= current {
        target += 1;
    }
    let mut proposal = tree.clone();
    proposal.assignment_mut()[cluster] = target;
    Some((proposal, 0.0))
}

/// Move a uniform amount of cell mass between two nodes. Proposals that
/// would leave a node with negative mass are rejected.
fn propose_fractions(tree: &CloneTree, step: f64, rng: &mut impl Rng) -> Option<(CloneTree, f64)> {
    let n = tree.proportions().len();
    if n < 2 {
        return None;
    }
    let (i, j) = sample_two_distinct(n, rng);
    let delta = rng.gen_range(-step..step);
    let mut proposal = tree.clone();
    let proportions = proposal.proportions_mut();
    proportions[i] += delta;
    proportions[j] -= delta;
    if proportions[i] < 0.0 || proportions[j] < 0.0 {
        return None;
    }
    Some((proposal, 0.0))
}

/// Running mean of the last `window` recorded log-likelihoods has stopped
/// moving relative to the window before it.
fn has_converged(samples: &[TreeSample], window: usize, tolerance: f64) -> bool {
    if samples.len() < 2 * window {
        return false;
    }
    let mean = |s: &[TreeSample]| s.iter().map(|x| x.log_likelihood).sum::<f64>() / s.len() as f64;
    let recent = mean(&samples[samples.len() - window..]);
    let previous = mean(&samples[samples.len() - 2 * window..samples.len() - window]);
    (recent - previous).abs() <= tolerance * previous.abs().max(1.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use quickcheck_macros::quickcheck;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    fn clusters() -> Vec<ClusterCounts> {
        vec![
            ClusterCounts::from_variants(1, (0..20).map(|_| (80u64, 200u64))),
            ClusterCounts::from_variants(2, (0..20).map(|_| (20u64, 200u64))),
        ]
    }

    fn quick_config() -> InferenceConfig {
        InferenceConfig {
            clone_counts: 2..=3,
            chains_per_k: 3,
            min_steps: 2_000,
            max_steps: 6_000,
            thinning: 50,
            progress: false,
            seed: 11,
            ..Default::default()
        }
    }

    #[test]
    fn no_clusters_is_insufficient() {
        let config = quick_config();
        let err = TreeSampler::new(&config, &[]).err().unwrap();
        assert_eq!(err.stage(), Some(Stage::Sampling));
    }

    #[test]
    fn chains_are_reproducible_and_independent_of_scheduling() {
        let config = quick_config();
        let clusters = clusters();
        let sampler = TreeSampler::new(&config, &clusters).unwrap();
        let all = sampler.sample_all();
        let single = sampler.run_chain(3, 1);
        assert_eq!(all[1].chains[1], single);
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].clone_count, 2);
        assert_eq!(all[0].chains.len(), 3);
    }

    #[test]
    fn samples_are_thinned_and_valid() {
        let config = quick_config();
        let clusters = clusters();
        let sampler = TreeSampler::new(&config, &clusters).unwrap();
        let output = sampler.run_chain(2, 0);
        assert!(!output.samples.is_empty());
        for (i, sample) in output.samples.iter().enumerate() {
            assert_eq!(sample.step, (i + 1) * config.thinning);
            assert!(sample.tree.validate().is_ok());
            assert_eq!(sample.tree.n_clusters(), 2);
            assert!((sampler.log_likelihood(&sample.tree) - sample.log_likelihood).abs() < 1e-9);
        }
        assert!(output.steps >= config.min_steps);
    }

    #[test]
    fn chain_finds_tree_matching_observed_vafs() {
        let config = quick_config();
        let clusters = clusters();
        let sampler = TreeSampler::new(&config, &clusters).unwrap();
        let best = (0..3)
            .flat_map(|c| sampler.run_chain(2, c).samples)
            .max_by(|a, b| a.log_likelihood.total_cmp(&b.log_likelihood))
            .unwrap();
        let vafs = best.tree.implied_vafs();
        assert!((vafs[0] - 0.4).abs() < 0.05, "implied {:?}", vafs);
        assert!((vafs[1] - 0.1).abs() < 0.05, "implied {:?}", vafs);
    }

    #[test]
    fn timeout_stops_chain_early() {
        let config = InferenceConfig {
            chain_timeout_secs: Some(0),
            ..quick_config()
        };
        let clusters = clusters();
        let output = TreeSampler::new(&config, &clusters).unwrap().run_chain(2, 0);
        assert_eq!(output.termination, Termination::TimedOut);
        assert_eq!(output.samples.len(), 1);
        assert!(matches!(
            output.divergence.map(|d| d.reason),
            Some(DivergenceReason::NotConverged { .. })
        ));
    }

    #[test]
    fn convergence_needs_two_full_windows() {
        let sample = |ll: f64| TreeSample {
            chain: 0,
            step: 0,
            log_likelihood: ll,
            tree: CloneTree::from_parts(vec![1], vec![0.5, 0.5], vec![0]),
        };
        let flat: Vec<TreeSample> = (0..10).map(|_| sample(-100.0)).collect();
        assert!(has_converged(&flat, 5, 1e-3));
        assert!(!has_converged(&flat[..9], 5, 1e-3));
        let rising: Vec<TreeSample> = (0..10).map(|i| sample(-100.0 + 10.0 * i as f64)).collect();
        assert!(!has_converged(&rising, 5, 1e-3));
    }

    #[quickcheck]
    fn proposals_keep_trees_valid(k: u8, seed: u64) -> bool {
        let k = (k % 6) as usize + 1;
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        let mut tree = CloneTree::random(k, 3, &mut rng);
        for _ in 0..200 {
            let proposal = match rng.gen_range(0..3) {
                0 => propose_topology(&tree, &mut rng),
                1 => propose_assignment(&tree, &mut rng),
                _ => propose_fractions(&tree, 0.1, &mut rng),
            };
            if let Some((next, correction)) = proposal {
                if next.validate().is_err() || !correction.is_finite() {
                    return false;
                }
                tree = next;
            }
        }
        true
    }

    #[test]
    fn move_kinds_follow_probabilities() {
        let probs = MoveProbs {
            topology: 0.0,
            assignment: 1.0,
            fractions: 0.0,
        };
        let mut rng = ChaCha8Rng::seed_from_u64(3);
        assert!((0..100).all(|_| sample_move_kind(&probs, &mut rng) == MoveKind::Assignment));
    }
}
