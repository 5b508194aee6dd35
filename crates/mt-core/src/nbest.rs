//! N-best lists and selection of one translation per sentence.

use std::cmp::Ordering;
use std::io::{self, Write};
use std::num::NonZeroUsize;
use std::sync::Arc;

use serde::{Serialize, Serializer};
use tracing::{debug, warn};

use crate::beam::{checked_capacity, Beam};
use crate::error::ConfigError;
use crate::feature::{aggregate, FeatureValue};
use crate::hypothesis::Hypothesis;
use crate::metric::{EvaluationMetric, MultiTranslationState};
use crate::recombination::{MetricRecombinationFilter, RecombinationFilter};
use crate::sequence::{join, Sequence};

/// A complete translation with its accumulated features and model score.
#[derive(Debug, Clone, Serialize)]
pub struct ScoredFeaturizedTranslation {
    #[serde(serialize_with = "serialize_words")]
    pub translation: Sequence,
    pub features: Vec<FeatureValue>,
    pub score: f64,
    /// Lattice node the translation came from, `-1` when not from a lattice.
    pub lattice_source_id: i64,
}

fn serialize_words<S: Serializer>(words: &Sequence, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&join(words, " "))
}

impl ScoredFeaturizedTranslation {
    pub fn new(translation: Sequence, features: Vec<FeatureValue>, score: f64) -> Self {
        Self {
            translation,
            features,
            score,
            lattice_source_id: -1,
        }
    }

    pub fn with_lattice_source_id(mut self, id: i64) -> Self {
        self.lattice_source_id = id;
        self
    }

    /// Higher scores first; NaN sorts last.
    pub fn descending(&self, other: &Self) -> Ordering {
        match (self.score.is_nan(), other.score.is_nan()) {
            (false, false) => other.score.total_cmp(&self.score),
            (a, b) => a.cmp(&b),
        }
    }
}

impl From<&Hypothesis> for ScoredFeaturizedTranslation {
    /// Features are summed over the whole expansion chain.
    fn from(h: &Hypothesis) -> Self {
        let mut chain: Vec<&Hypothesis> = h.ancestors().collect();
        chain.reverse();
        let features = aggregate(chain.iter().flat_map(|a| a.features()));
        Self::new(Arc::clone(h.target_sequence()), features, h.score())
    }
}

/// Ranked translations of one source sentence.
#[derive(Debug, Clone, Serialize)]
pub struct NBestList {
    translation_id: usize,
    entries: Vec<ScoredFeaturizedTranslation>,
}

impl NBestList {
    /// Sorts `entries` best first.
    pub fn new(translation_id: usize, mut entries: Vec<ScoredFeaturizedTranslation>) -> Self {
        entries.sort_by(ScoredFeaturizedTranslation::descending);
        Self {
            translation_id,
            entries,
        }
    }

    /// The `size` best complete hypotheses.
    pub fn from_hypotheses<'a, I>(translation_id: usize, hypotheses: I, size: usize) -> Self
    where
        I: IntoIterator<Item = &'a Arc<Hypothesis>>,
    {
        let entries = hypotheses
            .into_iter()
            .filter(|h| h.is_done())
            .map(|h| ScoredFeaturizedTranslation::from(&**h))
            .collect();
        let mut list = Self::new(translation_id, entries);
        list.entries.truncate(size);
        debug!(translation_id, size = list.len(), "n-best list");
        list
    }

    pub fn translation_id(&self) -> usize {
        self.translation_id
    }

    pub fn entries(&self) -> &[ScoredFeaturizedTranslation] {
        &self.entries
    }

    pub fn best(&self) -> Option<&ScoredFeaturizedTranslation> {
        self.entries.first()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// `<id> ||| <translation> ||| <name>: <value> ... ||| <score>` per entry.
    pub fn write_moses<W: Write>(&self, w: &mut W) -> io::Result<()> {
        for e in &self.entries {
            let features: Vec<String> = e
                .features
                .iter()
                .filter(|f| f.name.is_some())
                .map(ToString::to_string)
                .collect();
            writeln!(
                w,
                "{} ||| {} ||| {} ||| {}",
                self.translation_id,
                join(&e.translation, " "),
                features.join(" "),
                e.score
            )?;
        }
        Ok(())
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

/// Anything exposing one pre-sorted n-best list per sentence.
pub trait NBestListContainer {
    fn nbest_lists(&self) -> Vec<&[ScoredFeaturizedTranslation]>;
}

impl NBestListContainer for [NBestList] {
    fn nbest_lists(&self) -> Vec<&[ScoredFeaturizedTranslation]> {
        self.iter().map(NBestList::entries).collect()
    }
}

impl NBestListContainer for Vec<NBestList> {
    fn nbest_lists(&self) -> Vec<&[ScoredFeaturizedTranslation]> {
        self.as_slice().nbest_lists()
    }
}

impl NBestListContainer for Vec<Vec<ScoredFeaturizedTranslation>> {
    fn nbest_lists(&self) -> Vec<&[ScoredFeaturizedTranslation]> {
        self.iter().map(Vec::as_slice).collect()
    }
}

/// Picks one translation per sentence. Lists are expected to be non-empty;
/// an empty list contributes no selection.
pub trait MultiTranslationMetricMax {
    fn maximize<'a>(
        &self,
        nbest: &'a dyn NBestListContainer,
    ) -> Vec<&'a ScoredFeaturizedTranslation>;
}

/// Model-score top-1 of every list.
#[derive(Debug, Clone, Default)]
pub struct ListTopMultiTranslationMetricMax;

impl MultiTranslationMetricMax for ListTopMultiTranslationMetricMax {
    fn maximize<'a>(
        &self,
        nbest: &'a dyn NBestListContainer,
    ) -> Vec<&'a ScoredFeaturizedTranslation> {
        nbest
            .nbest_lists()
            .into_iter()
            .enumerate()
            .filter_map(|(i, list)| {
                let first = list.first();
                if first.is_none() {
                    warn!(list = i, "empty n-best list");
                }
                first
            })
            .collect()
    }
}

/// Metric-best selection: beam search over the lists in order, one
/// candidate per list, states collapsed by the metric's recombination
/// filter.
pub struct OracleMultiTranslationMetricMax<M> {
    metric: M,
    capacity: NonZeroUsize,
}

impl<M: EvaluationMetric> OracleMultiTranslationMetricMax<M> {
    pub fn new(metric: M, capacity: i64) -> Result<Self, ConfigError> {
        Ok(Self {
            metric,
            capacity: checked_capacity(capacity)?,
        })
    }
}

impl<M: EvaluationMetric> MultiTranslationMetricMax for OracleMultiTranslationMetricMax<M> {
    fn maximize<'a>(
        &self,
        nbest: &'a dyn NBestListContainer,
    ) -> Vec<&'a ScoredFeaturizedTranslation> {
        let lists = nbest.nbest_lists();
        let filter: Arc<dyn RecombinationFilter<MultiTranslationState<M::State>>> = Arc::new(
            MetricRecombinationFilter::new(self.metric.recombination_filter()),
        );

        let mut beam = Beam::new(self.capacity, Arc::clone(&filter));
        beam.insert(Arc::new(MultiTranslationState::new(self.metric.incremental())));
        for list in &lists {
            let mut next = Beam::new(self.capacity, Arc::clone(&filter));
            for state in beam.iter() {
                if list.is_empty() {
                    next.insert(Arc::new(state.skipped()));
                    continue;
                }
                for (i, entry) in list.iter().enumerate() {
                    next.insert(Arc::new(state.extended(i, Some(&entry.translation[..]))));
                }
            }
            beam = next;
        }

        let Some(best) = beam.best() else {
            return Vec::new();
        };
        debug!(metric = self.metric.name(), score = best.score(), "oracle selection");
        lists
            .into_iter()
            .filter(|l| !l.is_empty())
            .zip(best.selected())
            .map(|(list, &i)| &list[i])
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;
    use crate::metric::BleuMetric;
    use crate::sequence::tokenize;

    fn sft(score: f64, text: &str) -> ScoredFeaturizedTranslation {
        ScoredFeaturizedTranslation::new(tokenize(text), Vec::new(), score)
    }

    fn texts(selected: &[&ScoredFeaturizedTranslation]) -> Vec<String> {
        selected.iter().map(|s| join(&s.translation, " ")).collect()
    }

    #[test]
    fn top1_per_list() {
        let lists = vec![
            vec![sft(5.0, "a"), sft(3.0, "b")],
            vec![sft(9.0, "c")],
        ];
        let selected = ListTopMultiTranslationMetricMax.maximize(&lists);
        assert_eq!(texts(&selected), vec!["a", "c"]);
    }

    #[test]
    fn top1_skips_empty_lists() {
        let lists = vec![vec![sft(1.0, "a")], Vec::new(), vec![sft(2.0, "b")]];
        let selected = ListTopMultiTranslationMetricMax.maximize(&lists);
        assert_eq!(texts(&selected), vec!["a", "b"]);
    }

    #[test]
    fn oracle_prefers_metric_over_model_score() {
        let references = vec![
            vec![tokenize("the small house is red")],
            vec![tokenize("it was built in spring")],
        ];
        let metric = BleuMetric::new(&references, true);
        let lists = vec![
            NBestList::new(
                0,
                vec![sft(5.0, "a small house is red"), sft(3.0, "the small house is red")],
            ),
            NBestList::new(
                1,
                vec![sft(2.0, "it was built in spring"), sft(1.0, "it is built in spring")],
            ),
        ];
        let oracle = OracleMultiTranslationMetricMax::new(metric, 4).unwrap();
        let selected = oracle.maximize(&lists);
        assert_eq!(
            texts(&selected),
            vec!["the small house is red", "it was built in spring"]
        );

        let top = ListTopMultiTranslationMetricMax.maximize(&lists);
        assert_eq!(texts(&top)[0], "a small house is red");
    }

    #[test]
    fn oracle_rejects_bad_capacity() {
        let metric = BleuMetric::new(&[], false);
        assert!(matches!(
            OracleMultiTranslationMetricMax::new(metric, 0),
            Err(ConfigError::InvalidBeamCapacity(0))
        ));
    }

    #[test]
    fn lattice_id_defaults_to_minus_one() {
        let t = sft(1.0, "x");
        assert_eq!(t.lattice_source_id, -1);
        assert_eq!(t.with_lattice_source_id(7).lattice_source_id, 7);
    }

    #[test]
    fn moses_and_json_output() {
        let list = NBestList::new(
            3,
            vec![
                ScoredFeaturizedTranslation::new(
                    tokenize("the house"),
                    vec![
                        FeatureValue::new("TM:p", -1.5),
                        FeatureValue::unnamed(0.5),
                    ],
                    -2.25,
                ),
                sft(-1.0, "a house"),
            ],
        );
        let mut out = Vec::new();
        list.write_moses(&mut out).unwrap();
        assert_eq!(
            String::from_utf8(out).unwrap(),
            "3 ||| a house |||  ||| -1\n3 ||| the house ||| TM:p: -1.5 ||| -2.25\n"
        );

        let json: serde_json::Value = serde_json::from_str(&list.to_json().unwrap()).unwrap();
        assert_eq!(json["translation_id"], 3);
        assert_eq!(json["entries"][1]["translation"], "the house");
        assert_eq!(json["entries"][1]["features"][0]["name"], "TM:p");
        assert_eq!(json["entries"][0]["lattice_source_id"], -1);
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(256))]

        #[test]
        fn sorted_lists_are_non_increasing(
            scores in prop::collection::vec(prop::num::f64::ANY, 0..40)
        ) {
            let entries = scores.iter().map(|&s| sft(s, "x")).collect();
            let list = NBestList::new(0, entries);
            let sorted: Vec<f64> = list.entries().iter().map(|e| e.score).collect();
            let finite: Vec<f64> = sorted.iter().copied().filter(|s| !s.is_nan()).collect();
            prop_assert!(finite.windows(2).all(|w| w[0] >= w[1]));
            // NaN scores never precede real ones
            if let Some(first_nan) = sorted.iter().position(|s| s.is_nan()) {
                prop_assert!(sorted[first_nan..].iter().all(|s| s.is_nan()));
            }
        }
    }
}
