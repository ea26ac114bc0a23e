//! Clonal phylogeny inference from bulk read counts.
//!
//! Variants are clustered by VAF with a binomial mixture, clone trees are
//! sampled by MCMC for a range of clone counts, the clone count is chosen by
//! BIC, and the posterior samples are grouped into ranked configurations.

pub mod bic;
pub mod cluster;
pub mod config;
pub mod error;
pub mod io;
pub mod likelihood;
pub mod output;
pub mod pipeline;
pub mod posterior;
pub mod sampler;
pub mod select;
pub mod tree;
pub mod variant;

pub use cluster::{Clustering, VariantClusterer};
pub use config::{InferenceConfig, MoveProbs};
pub use error::{CloneError, Result, SamplingDivergence, Stage};
pub use output::{TreeOutput, TreeOutputBuilder};
pub use pipeline::{InferenceResult, InferenceRun};
pub use posterior::{Posterior, PosteriorAggregator};
pub use sampler::TreeSampler;
pub use select::ModelSelector;
pub use tree::CloneTree;
pub use variant::{ReadCounts, Variant};
