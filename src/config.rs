//! Run configuration and per-task random number generators.

use std::ops::RangeInclusive;
use std::time::Duration;

use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};

use crate::error::{CloneError, Result};

/// Relative probabilities of the three proposal kinds. Must sum to 1.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MoveProbs {
    pub topology: f64,
    pub assignment: f64,
    pub fractions: f64,
}

impl Default for MoveProbs {
    fn default() -> Self {
        Self {
            topology: 0.3,
            assignment: 0.3,
            fractions: 0.4,
        }
    }
}

/// Everything an inference run needs besides the read counts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InferenceConfig {
    /// Candidate mixture sizes, noise component included.
    pub cluster_counts: RangeInclusive<usize>,
    pub cluster_restarts: usize,
    /// Fixed weight of the noise component (tau).
    pub noise_proportion: f64,
    /// Fixed VAF of the noise component (sequencing error rate).
    pub noise_vaf: f64,
    pub em_max_iterations: usize,
    pub em_tolerance: f64,
    /// Candidate numbers of non-root clones (K).
    pub clone_counts: RangeInclusive<usize>,
    pub chains_per_k: usize,
    pub min_steps: usize,
    pub max_steps: usize,
    /// A sample is recorded every `thinning` steps.
    pub thinning: usize,
    /// Recorded samples dropped from the start of each chain.
    pub burnin: usize,
    /// Keep every `post_thin`-th recorded sample after burn-in.
    pub post_thin: usize,
    pub config_cutoff: f64,
    pub move_probs: MoveProbs,
    pub fraction_step: f64,
    pub convergence_window: usize,
    pub convergence_tolerance: f64,
    pub chain_timeout_secs: Option<u64>,
    pub exclude_divergent: bool,
    pub seed: u64,
    pub progress: bool,
}

impl Default for InferenceConfig {
    fn default() -> Self {
        Self {
            cluster_counts: 2..=8,
            cluster_restarts: 10,
            noise_proportion: 0.01,
            noise_vaf: 0.001,
            em_max_iterations: 500,
            em_tolerance: 1e-6,
            clone_counts: 2..=6,
            chains_per_k: 15,
            min_steps: 20_000,
            max_steps: 100_000,
            thinning: 200,
            burnin: 100,
            post_thin: 5,
            config_cutoff: 0.01,
            move_probs: MoveProbs::default(),
            fraction_step: 0.05,
            convergence_window: 20,
            convergence_tolerance: 1e-3,
            chain_timeout_secs: None,
            exclude_divergent: false,
            seed: 42,
            progress: true,
        }
    }
}

impl InferenceConfig {
    pub fn validate(&self) -> Result<()> {
        let bad = |msg: String| Err(CloneError::invalid_input(msg));

        if self.cluster_counts.is_empty() || *self.cluster_counts.start() < 2 {
            return bad(format!(
                "cluster_counts {:?} must be a non-empty range starting at 2 or more (the noise component counts as one)",
                self.cluster_counts
            ));
        }
        if self.clone_counts.is_empty() || *self.clone_counts.start() < 1 {
            return bad(format!(
                "clone_counts {:?} must be a non-empty range starting at 1 or more",
                self.clone_counts
            ));
        }
        if self.cluster_restarts == 0 || self.chains_per_k == 0 {
            return bad("cluster_restarts and chains_per_k must be positive".to_string());
        }
        if !(0.0..1.0).contains(&self.noise_proportion) {
            return bad(format!(
                "noise_proportion {} must lie in [0, 1)",
                self.noise_proportion
            ));
        }
        if !(0.0..1.0).contains(&self.noise_vaf) {
            return bad(format!("noise_vaf {} must lie in [0, 1)", self.noise_vaf));
        }
        if self.thinning == 0 || self.post_thin == 0 {
            return bad("thinning and post_thin must be positive".to_string());
        }
        if self.min_steps > self.max_steps {
            return bad(format!(
                "min_steps {} exceeds max_steps {}",
                self.min_steps, self.max_steps
            ));
        }
        if !(0.0..=1.0).contains(&self.config_cutoff) {
            return bad(format!(
                "config_cutoff {} must lie in [0, 1]",
                self.config_cutoff
            ));
        }
        let MoveProbs {
            topology,
            assignment,
            fractions,
        } = self.move_probs;
        if topology < 0.0 || assignment < 0.0 || fractions < 0.0 {
            return bad(format!("move probabilities must be non-negative: {:?}", self.move_probs));
        }
        if (topology + assignment + fractions - 1.0).abs() > 1e-9 {
            return bad(format!("move probabilities must sum to 1: {:?}", self.move_probs));
        }
        if !(self.fraction_step > 0.0 && self.fraction_step <= 1.0) {
            return bad(format!("fraction_step {} must lie in (0, 1]", self.fraction_step));
        }
        if self.convergence_window == 0 {
            return bad("convergence_window must be positive".to_string());
        }
        Ok(())
    }

    pub fn chain_timeout(&self) -> Option<Duration> {
        self.chain_timeout_secs.map(Duration::from_secs)
    }
}

const CLUSTER_STREAM_TAG: u64 = 1 << 63;

/// Generator for one EM restart of one candidate mixture size.
pub fn restart_rng(seed: u64, cluster_count: usize, restart: usize) -> ChaCha8Rng {
    stream_rng(
        seed,
        CLUSTER_STREAM_TAG | ((cluster_count as u64) << 32) | restart as u64,
    )
}

/// Generator for one MCMC chain of one clone count.
pub fn chain_rng(seed: u64, clone_count: usize, chain: usize) -> ChaCha8Rng {
    stream_rng(seed, ((clone_count as u64) << 32) | chain as u64)
}

fn stream_rng(seed: u64, stream: u64) -> ChaCha8Rng {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    rng.set_stream(stream);
    rng
}
