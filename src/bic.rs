//! BIC scoring shared by cluster-count and clone-count selection.
//!
//! Scores use the reversed sign, `2 ln L - k ln n`, so higher is better at
//! both levels. Ties go to the smaller model.

use serde::Serialize;

pub fn bic(log_likelihood: f64, n_params: usize, n_observations: usize) -> f64 {
    2.0 * log_likelihood - n_params as f64 * (n_observations as f64).ln()
}

/// One scored candidate model size.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ModelScore {
    pub size: usize,
    pub log_likelihood: f64,
    pub n_params: usize,
    pub n_observations: usize,
    pub bic: f64,
}

impl ModelScore {
    pub fn new(size: usize, log_likelihood: f64, n_params: usize, n_observations: usize) -> Self {
        Self {
            size,
            log_likelihood,
            n_params,
            n_observations,
            bic: bic(log_likelihood, n_params, n_observations),
        }
    }
}

/// Index of the highest-scoring candidate; smaller `size` wins ties.
/// Non-finite scores never win over finite ones.
pub fn select_best(scores: &[ModelScore]) -> Option<usize> {
    let mut best: Option<usize> = None;
    for (i, score) in scores.iter().enumerate() {
        if score.bic.is_nan() {
            continue;
        }
        best = match best {
            None => Some(i),
            Some(b) => {
                let current = &scores[b];
                if score.bic > current.bic
                    || (score.bic == current.bic && score.size < current.size)
                {
                    Some(i)
                } else {
                    Some(b)
                }
            }
        };
    }
    best
}

#[cfg(test)]
mod tests {
    use super::*;
    use quickcheck_macros::quickcheck;

    #[test]
    fn higher_score_wins() {
        let scores = vec![
            ModelScore::new(2, -100.0, 2, 10),
            ModelScore::new(3, -50.0, 4, 10),
        ];
        assert_eq!(select_best(&scores), Some(1));
    }

    #[test]
    fn ties_go_to_smaller_model_regardless_of_order() {
        let scores = vec![
            ModelScore::new(4, -10.0, 0, 10),
            ModelScore::new(2, -10.0, 0, 10),
            ModelScore::new(3, -10.0, 0, 10),
        ];
        assert_eq!(scores[select_best(&scores).unwrap()].size, 2);
    }

    #[test]
    fn nan_scores_are_skipped() {
        let scores = vec![
            ModelScore::new(2, f64::NAN, 2, 10),
            ModelScore::new(3, -20.0, 2, 10),
        ];
        assert_eq!(select_best(&scores), Some(1));
        assert_eq!(select_best(&[]), None);
    }

    #[quickcheck]
    fn penalty_grows_with_parameters(ll: i32, k: u8, n: u8) -> bool {
        let n = n as usize + 3;
        let k = k as usize;
        bic(ll as f64, k + 1, n) < bic(ll as f64, k, n)
    }
}
