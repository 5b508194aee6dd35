use std::sync::Arc;

use rustc_hash::FxHashMap;
use tracing::debug;

use crate::error::DecodeError;
use crate::feature::{namespaced, FeatureValue};
use crate::hypothesis::Featurizable;
use crate::phrase_table::TranslationOption;
use crate::sequence::join;
use crate::settings::settings;

use super::{FeaturizeResult, Featurizer, ScoringMode};

/// Maps a phrase table's raw score vector to named `TM:` features.
///
/// Names are `TM:<score>` by default, `TM:<table>:<score>` with
/// `tag_by_table` so several tables stay distinguishable to weight tuning.
/// In reweighting mode each phrase pair instead fires a single
/// `DTM:<src>=><tgt>` indicator.
pub struct PhraseTableScoresFeaturizer {
    tag_by_table: bool,
    reweighting: bool,
    /// table name → feature name per score slot
    names: FxHashMap<Arc<str>, Arc<[Option<Arc<str>>]>>,
}

impl PhraseTableScoresFeaturizer {
    pub const PREFIX: &'static str = "TM";
    pub const REWEIGHTING_PREFIX: &'static str = "DTM";

    pub fn new(tag_by_table: bool, reweighting: bool) -> Self {
        Self {
            tag_by_table,
            reweighting,
            names: FxHashMap::default(),
        }
    }

    pub fn from_settings() -> Self {
        let s = &settings().phrase_table;
        Self::new(s.tag_by_table, s.reweighting)
    }

    fn feature_names(&mut self, option: &TranslationOption) -> Arc<[Option<Arc<str>>]> {
        if let Some(names) = self.names.get(&option.table) {
            return Arc::clone(names);
        }
        debug!(table = &*option.table, "generating feature names");
        let names: Arc<[Option<Arc<str>>]> = option
            .score_names
            .iter()
            .map(|score_name| {
                if score_name.is_empty() {
                    None
                } else if self.tag_by_table {
                    let rest = format!("{}:{}", option.table, score_name);
                    Some(Arc::from(namespaced(Self::PREFIX, &rest)))
                } else {
                    Some(Arc::from(namespaced(Self::PREFIX, score_name)))
                }
            })
            .collect();
        self.names
            .insert(Arc::clone(&option.table), Arc::clone(&names));
        names
    }
}

impl Default for PhraseTableScoresFeaturizer {
    fn default() -> Self {
        Self::new(false, false)
    }
}

impl Featurizer for PhraseTableScoresFeaturizer {
    fn prefix(&self) -> &str {
        if self.reweighting {
            Self::REWEIGHTING_PREFIX
        } else {
            Self::PREFIX
        }
    }

    fn mode(&self) -> ScoringMode {
        ScoringMode::Rule
    }

    fn featurize(&mut self, f: &Featurizable<'_>) -> FeaturizeResult {
        self.rule_featurize(&f.option().option)
    }

    fn rule_featurize(&mut self, option: &TranslationOption) -> FeaturizeResult {
        if option.is_unknown_word() {
            return Ok(None);
        }

        if self.reweighting {
            let rest = format!(
                "{}=>{}",
                join(&option.source, "_"),
                join(&option.target, "_")
            );
            let name = namespaced(Self::REWEIGHTING_PREFIX, &rest);
            return Ok(Some(vec![FeatureValue::new(name, 1.0)]));
        }

        let names = self.feature_names(option);
        if option.scores.len() > names.len() {
            return Err(DecodeError::ScoreCountMismatch {
                table: option.table.to_string(),
                scores: option.scores.len(),
                names: names.len(),
            });
        }
        let values = names
            .iter()
            .enumerate()
            .map(|(i, name)| match (name, option.scores.get(i)) {
                (Some(name), Some(&score)) => FeatureValue {
                    name: Some(Arc::clone(name)),
                    value: score as f64,
                },
                _ => FeatureValue::neutral(),
            })
            .collect();
        Ok(Some(values))
    }

    fn duplicate(&self) -> Box<dyn Featurizer> {
        Box::new(Self::new(self.tag_by_table, self.reweighting))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::phrase_table::PhraseAlignment;
    use crate::sequence::{tokenize, Word};

    fn option(table: &str, names: &[&str], scores: &[f32]) -> TranslationOption {
        TranslationOption {
            source: tokenize("das kleine haus"),
            target: tokenize("the small house"),
            scores: Arc::from(scores),
            score_names: names.iter().map(|s| s.to_string()).collect(),
            alignment: PhraseAlignment::none(),
            table: Arc::from(table),
        }
    }

    fn names(values: &[FeatureValue]) -> Vec<&str> {
        values.iter().filter_map(FeatureValue::name).collect()
    }

    #[test]
    fn default_mode_names() {
        let mut f = PhraseTableScoresFeaturizer::new(false, false);
        let opt = option("tm1", &["p(e|f)", "p(f|e)"], &[-0.5, -1.25]);
        let values = f.rule_featurize(&opt).unwrap().unwrap();
        assert_eq!(names(&values), vec!["TM:p(e|f)", "TM:p(f|e)"]);
        assert_eq!(values[0].value, -0.5);
        assert_eq!(values[1].value, -1.25);
    }

    #[test]
    fn table_tagging_mode_names() {
        let mut f = PhraseTableScoresFeaturizer::new(true, false);
        let opt = option("tm1", &["p(e|f)", "p(f|e)"], &[-0.5, -1.25]);
        let values = f.rule_featurize(&opt).unwrap().unwrap();
        assert_eq!(names(&values), vec!["TM:tm1:p(e|f)", "TM:tm1:p(f|e)"]);
    }

    #[test]
    fn names_cached_per_table() {
        let mut f = PhraseTableScoresFeaturizer::new(true, false);
        let a = f.rule_featurize(&option("tm1", &["p"], &[0.1])).unwrap().unwrap();
        let b = f.rule_featurize(&option("tm1", &["p"], &[0.2])).unwrap().unwrap();
        let c = f.rule_featurize(&option("tm2", &["p"], &[0.3])).unwrap().unwrap();
        assert!(Arc::ptr_eq(
            a[0].name.as_ref().unwrap(),
            b[0].name.as_ref().unwrap()
        ));
        assert_eq!(c[0].name(), Some("TM:tm2:p"));
        assert_eq!(f.names.len(), 2);
    }

    #[test]
    fn unknown_word_contributes_nothing() {
        let mut f = PhraseTableScoresFeaturizer::default();
        let mut unk = TranslationOption::unknown_word(Word::new("zebra"));
        unk.scores = Arc::from(vec![1.0f32, 2.0]);
        unk.score_names = Arc::from(vec!["a".to_string(), "b".to_string()]);
        assert!(f.rule_featurize(&unk).unwrap().is_none());

        let mut rw = PhraseTableScoresFeaturizer::new(false, true);
        assert!(rw.rule_featurize(&unk).unwrap().is_none());
    }

    #[test]
    fn missing_scores_are_neutral() {
        let mut f = PhraseTableScoresFeaturizer::default();
        let opt = option("tm1", &["a", "b", "c"], &[1.0]);
        let values = f.rule_featurize(&opt).unwrap().unwrap();
        assert_eq!(values.len(), 3);
        assert_eq!(values[0], FeatureValue::new("TM:a", 1.0));
        assert_eq!(values[1], FeatureValue::neutral());
        assert_eq!(values[2], FeatureValue::neutral());
    }

    #[test]
    fn extra_scores_are_a_consistency_error() {
        let mut f = PhraseTableScoresFeaturizer::default();
        let opt = option("tm1", &["a"], &[1.0, 2.0]);
        let err = f.rule_featurize(&opt).unwrap_err();
        assert!(matches!(
            err,
            DecodeError::ScoreCountMismatch {
                scores: 2,
                names: 1,
                ..
            }
        ));
    }

    #[test]
    fn reweighting_emits_single_indicator() {
        let mut f = PhraseTableScoresFeaturizer::new(false, true);
        let opt = option("tm1", &["a", "b"], &[1.0, 2.0]);
        let values = f.rule_featurize(&opt).unwrap().unwrap();
        assert_eq!(
            values,
            vec![FeatureValue::new("DTM:das_kleine_haus=>the_small_house", 1.0)]
        );
        assert_eq!(f.prefix(), "DTM");
    }

    #[test]
    fn duplicate_starts_with_empty_name_cache() {
        let mut f = PhraseTableScoresFeaturizer::new(true, false);
        f.rule_featurize(&option("tm1", &["p"], &[0.1])).unwrap();
        assert_eq!(f.names.len(), 1);
        let mut dup = f.duplicate();
        let values = dup.rule_featurize(&option("tm1", &["p"], &[0.1])).unwrap().unwrap();
        assert_eq!(values[0].name(), Some("TM:tm1:p"));
    }
}
