use crate::feature::{namespaced, FeatureValue};
use crate::hypothesis::Featurizable;
use crate::phrase_table::TranslationOption;

use super::{FeaturizeResult, Featurizer, ScoringMode};

/// Indicator feature for the word-alignment shape inside a phrase pair.
#[derive(Debug, Default, Clone)]
pub struct AlignmentConstellationFeaturizer;

impl AlignmentConstellationFeaturizer {
    pub const PREFIX: &'static str = "ACst";
}

impl Featurizer for AlignmentConstellationFeaturizer {
    fn prefix(&self) -> &str {
        Self::PREFIX
    }

    fn mode(&self) -> ScoringMode {
        ScoringMode::Rule
    }

    fn featurize(&mut self, f: &Featurizable<'_>) -> FeaturizeResult {
        self.rule_featurize(&f.option().option)
    }

    fn rule_featurize(&mut self, option: &TranslationOption) -> FeaturizeResult {
        let name = namespaced(Self::PREFIX, &option.alignment.constellation());
        Ok(Some(vec![FeatureValue::new(name, 1.0)]))
    }

    fn duplicate(&self) -> Box<dyn Featurizer> {
        Box::new(self.clone())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::phrase_table::PhraseAlignment;
    use crate::sequence::tokenize;

    #[test]
    fn fires_one_indicator_per_shape() {
        let option = TranslationOption {
            source: tokenize("kleine haus"),
            target: tokenize("small house"),
            scores: Arc::from(vec![]),
            score_names: Arc::from(vec![]),
            alignment: PhraseAlignment::parse("0-0 1-1", 2).unwrap(),
            table: Arc::from("tm"),
        };
        let values = AlignmentConstellationFeaturizer
            .rule_featurize(&option)
            .unwrap()
            .unwrap();
        assert_eq!(values, vec![FeatureValue::new("ACst:0-0_1-1", 1.0)]);
    }
}
