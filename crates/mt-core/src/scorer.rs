use rustc_hash::FxHashMap;

use crate::feature::FeatureValue;

/// Turns the feature values of one expansion into a score increment.
pub trait Scorer: Send + Sync {
    fn score(&self, features: &[FeatureValue]) -> f64;
}

/// Dot product with a sparse weight vector. Unnamed values carry weight 1,
/// unknown names weight 0.
#[derive(Debug, Clone, Default)]
pub struct LinearScorer {
    weights: FxHashMap<String, f64>,
}

impl LinearScorer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_weight(&mut self, name: &str, weight: f64) {
        self.weights.insert(name.to_string(), weight);
    }

    pub fn weight(&self, name: &str) -> f64 {
        self.weights.get(name).copied().unwrap_or(0.0)
    }

    pub fn len(&self) -> usize {
        self.weights.len()
    }

    pub fn is_empty(&self) -> bool {
        self.weights.is_empty()
    }
}

impl<S: Into<String>> FromIterator<(S, f64)> for LinearScorer {
    fn from_iter<I: IntoIterator<Item = (S, f64)>>(iter: I) -> Self {
        Self {
            weights: iter.into_iter().map(|(n, w)| (n.into(), w)).collect(),
        }
    }
}

impl Scorer for LinearScorer {
    fn score(&self, features: &[FeatureValue]) -> f64 {
        features
            .iter()
            .map(|f| match f.name() {
                Some(name) => self.weight(name) * f.value,
                None => f.value,
            })
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn weighted_sum() {
        let scorer: LinearScorer = [("TM:p", 0.5), ("LM", 2.0)].into_iter().collect();
        let features = vec![
            FeatureValue::new("TM:p", -2.0),
            FeatureValue::new("LM", 1.5),
            FeatureValue::new("unseen", 100.0),
            FeatureValue::unnamed(0.25),
        ];
        assert!((scorer.score(&features) - (-1.0 + 3.0 + 0.25)).abs() < 1e-12);
        assert_eq!(scorer.weight("unseen"), 0.0);
        assert_eq!(scorer.len(), 2);
    }

    #[test]
    fn empty_scorer_counts_unnamed_only() {
        let mut scorer = LinearScorer::new();
        assert!(scorer.is_empty());
        assert_eq!(scorer.score(&[FeatureValue::unnamed(1.5)]), 1.5);
        scorer.set_weight("x", -1.0);
        assert_eq!(scorer.score(&[FeatureValue::new("x", 2.0)]), -2.0);
    }
}
