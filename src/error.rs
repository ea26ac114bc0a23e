//! Error types for the inference engine.

use std::fmt;
use thiserror::Error;

/// Stage of an inference run, reported with fatal errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Clustering,
    Sampling,
    Selection,
    Aggregation,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Clustering => "clustering",
            Stage::Sampling => "sampling",
            Stage::Selection => "selection",
            Stage::Aggregation => "aggregation",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Error)]
pub enum CloneError {
    /// Malformed counts or configuration values
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Too few variants or clusters for the requested model sizes
    #[error("insufficient data during {stage}: {reason}")]
    InsufficientData { stage: Stage, reason: String },

    /// No configuration reached the posterior cutoff
    #[error(
        "no configuration reached posterior cutoff {cutoff} ({n_configurations} configurations over {n_samples} samples); lower config_cutoff or raise max_steps"
    )]
    EmptyPosterior {
        cutoff: f64,
        n_configurations: usize,
        n_samples: usize,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, CloneError>;

impl CloneError {
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput(message.into())
    }

    pub fn insufficient(stage: Stage, reason: impl Into<String>) -> Self {
        Self::InsufficientData {
            stage,
            reason: reason.into(),
        }
    }

    /// Stage that failed, when the error belongs to one.
    pub fn stage(&self) -> Option<Stage> {
        match self {
            CloneError::InsufficientData { stage, .. } => Some(*stage),
            CloneError::EmptyPosterior { .. } => Some(Stage::Aggregation),
            _ => None,
        }
    }
}

/// Why a chain's terminal state is suspect.
#[derive(Debug, Clone, PartialEq)]
pub enum DivergenceReason {
    /// Final tree breaks a structural invariant
    InvalidTree(String),
    /// Running-mean likelihood never stabilised before the chain stopped
    NotConverged { steps: usize },
}

/// Non-fatal warning attached to a chain's output. Its samples are still
/// returned; callers decide whether to drop them.
#[derive(Debug, Clone, PartialEq)]
pub struct SamplingDivergence {
    pub clone_count: usize,
    pub chain: usize,
    pub reason: DivergenceReason,
}

impl fmt::Display for SamplingDivergence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.reason {
            DivergenceReason::InvalidTree(msg) => write!(
                f,
                "chain {} (K={}) ended on an invalid tree: {}",
                self.chain, self.clone_count, msg
            ),
            DivergenceReason::NotConverged { steps } => write!(
                f,
                "chain {} (K={}) did not converge after {} steps",
                self.chain, self.clone_count, steps
            ),
        }
    }
}
