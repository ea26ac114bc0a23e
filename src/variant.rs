//! Per-variant read counts handed to the engine by the loading collaborator.

use serde::{Deserialize, Serialize};

use crate::error::{CloneError, Result};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Variant {
    pub id: String,
    pub alt: u64,
    pub total: u64,
}

impl Variant {
    pub fn vaf(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            self.alt as f64 / self.total as f64
        }
    }
}

/// Aligned alt/total counts for one bulk sample. Construction validates the
/// alignment, so every `ReadCounts` value is well formed.
#[derive(Debug, Clone, PartialEq)]
pub struct ReadCounts {
    variants: Vec<Variant>,
}

impl ReadCounts {
    pub fn new(variant_ids: Vec<String>, alt_counts: Vec<u64>, total_counts: Vec<u64>) -> Result<Self> {
        if variant_ids.len() != alt_counts.len() || alt_counts.len() != total_counts.len() {
            return Err(CloneError::invalid_input(format!(
                "{} variant ids, {} alt counts and {} total counts are not aligned",
                variant_ids.len(),
                alt_counts.len(),
                total_counts.len()
            )));
        }
        let variants = variant_ids
            .into_iter()
            .zip(alt_counts)
            .zip(total_counts)
            .map(|((id, alt), total)| Variant { id, alt, total })
            .collect();
        Self::from_variants(variants)
    }

    pub fn from_variants(variants: Vec<Variant>) -> Result<Self> {
        let mut seen = std::collections::HashSet::new();
        for v in &variants {
            if v.alt > v.total {
                return Err(CloneError::invalid_input(format!(
                    "variant {} has alt count {} above total count {}",
                    v.id, v.alt, v.total
                )));
            }
            if !seen.insert(v.id.as_str()) {
                return Err(CloneError::invalid_input(format!(
                    "duplicate variant id {}",
                    v.id
                )));
            }
        }
        Ok(Self { variants })
    }

    pub fn len(&self) -> usize {
        self.variants.len()
    }

    pub fn is_empty(&self) -> bool {
        self.variants.is_empty()
    }

    pub fn variants(&self) -> &[Variant] {
        &self.variants
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_misaligned_counts() {
        let err = ReadCounts::new(vec!["a".into()], vec![1, 2], vec![3, 4]);
        assert!(matches!(err, Err(CloneError::InvalidInput(_))));
    }

    #[test]
    fn rejects_alt_above_total() {
        let err = ReadCounts::new(vec!["a".into()], vec![5], vec![4]);
        assert!(matches!(err, Err(CloneError::InvalidInput(_))));
    }

    #[test]
    fn rejects_duplicate_ids() {
        let err = ReadCounts::new(vec!["a".into(), "a".into()], vec![1, 1], vec![2, 2]);
        assert!(matches!(err, Err(CloneError::InvalidInput(_))));
    }

    #[test]
    fn zero_depth_variant_has_zero_vaf() {
        let counts = ReadCounts::new(vec!["a".into()], vec![0], vec![0]).unwrap();
        assert_eq!(counts.variants()[0].vaf(), 0.0);
        assert_eq!(counts.len(), 1);
    }
}
