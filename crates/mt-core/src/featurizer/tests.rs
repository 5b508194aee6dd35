use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use super::*;
use crate::hypothesis::SentenceContext;
use crate::sequence::tokenize;
use crate::testutil::{chain, phrase};

/// Counts its calls and records the reranking flag it was given.
struct Probe {
    prefix: &'static str,
    mode: ScoringMode,
    calls: Arc<AtomicUsize>,
    reranking: Arc<AtomicBool>,
}

impl Probe {
    fn boxed(prefix: &'static str, mode: ScoringMode) -> (Box<dyn Featurizer>, Arc<AtomicBool>) {
        let reranking = Arc::new(AtomicBool::new(false));
        let probe = Probe {
            prefix,
            mode,
            calls: Arc::new(AtomicUsize::new(0)),
            reranking: Arc::clone(&reranking),
        };
        (Box::new(probe), reranking)
    }
}

impl Featurizer for Probe {
    fn prefix(&self) -> &str {
        self.prefix
    }

    fn mode(&self) -> ScoringMode {
        self.mode
    }

    fn featurize(&mut self, _f: &Featurizable<'_>) -> FeaturizeResult {
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(Some(vec![FeatureValue::new(
            format!("{}:call", self.prefix),
            n as f64 + 1.0,
        )]))
    }

    fn rule_featurize(&mut self, _option: &TranslationOption) -> FeaturizeResult {
        Ok(Some(vec![FeatureValue::new(format!("{}:rule", self.prefix), 1.0)]))
    }

    fn duplicate(&self) -> Box<dyn Featurizer> {
        Box::new(Probe {
            prefix: self.prefix,
            mode: self.mode,
            calls: Arc::new(AtomicUsize::new(0)),
            reranking: Arc::new(AtomicBool::new(false)),
        })
    }

    fn set_reranking(&mut self, reranking: bool) {
        self.reranking.store(reranking, Ordering::SeqCst);
    }
}

#[test]
fn rejects_duplicate_namespace() {
    let (a, _) = Probe::boxed("LM", ScoringMode::Immediate);
    let (b, _) = Probe::boxed("LM", ScoringMode::Rule);
    let err = FeaturizerSet::new(vec![a, b]).err().unwrap();
    assert!(matches!(err, ConfigError::DuplicateNamespace(ref p) if p == "LM"));
}

#[test]
fn featurize_concatenates_in_order() {
    let mut set = FeaturizerSet::new(vec![
        Box::new(PhraseTableScoresFeaturizer::default()),
        Box::new(AlignmentConstellationFeaturizer),
        Probe::boxed("X", ScoringMode::Immediate).0,
    ])
    .unwrap();
    assert_eq!(set.len(), 3);
    assert_eq!(set.prefixes().collect::<Vec<_>>(), vec!["TM", "ACst", "X"]);

    let mut ctx = SentenceContext::new(0, tokenize("das"));
    let hyps = chain(&mut ctx, &[phrase("das", "the", 0)]);
    let values = set.featurize(&hyps[1].featurizable().unwrap()).unwrap();
    let names: Vec<_> = values.iter().filter_map(FeatureValue::name).collect();
    assert_eq!(names, vec!["TM:p", "ACst:none", "X:call"]);
}

#[test]
fn rule_featurize_only_asks_rule_featurizers() {
    let (rule, _) = Probe::boxed("R", ScoringMode::Rule);
    let (imm, _) = Probe::boxed("I", ScoringMode::Immediate);
    let mut set = FeaturizerSet::new(vec![rule, imm]).unwrap();
    let option = phrase("das", "the", 0).option;
    let values = set.rule_featurize(&option).unwrap();
    assert_eq!(values, vec![FeatureValue::new("R:rule", 1.0)]);
}

#[test]
fn reranking_reaches_delayed_featurizers_only() {
    let (delayed, delayed_flag) = Probe::boxed("D", ScoringMode::Delayed);
    let (imm, imm_flag) = Probe::boxed("I", ScoringMode::Immediate);
    let mut set = FeaturizerSet::new(vec![delayed, imm]).unwrap();
    set.set_reranking(true);
    assert!(delayed_flag.load(Ordering::SeqCst));
    assert!(!imm_flag.load(Ordering::SeqCst));
}

#[test]
fn duplicate_is_independent() {
    let mut set = FeaturizerSet::new(vec![Probe::boxed("X", ScoringMode::Immediate).0]).unwrap();
    let mut ctx = SentenceContext::new(0, tokenize("das"));
    let hyps = chain(&mut ctx, &[phrase("das", "the", 0)]);
    let f = hyps[1].featurizable().unwrap();

    set.featurize(&f).unwrap();
    set.featurize(&f).unwrap();
    let mut dup = set.duplicate();
    assert_eq!(dup.featurize(&f).unwrap()[0].value, 1.0);
    assert_eq!(set.featurize(&f).unwrap()[0].value, 3.0);
}

#[test]
fn errors_propagate() {
    let mut set = FeaturizerSet::new(vec![Box::new(PhraseTableScoresFeaturizer::default())])
        .unwrap();
    let mut option = (*phrase("das", "the", 0).option).clone();
    option.scores = Arc::from(vec![1.0f32, 2.0]);
    assert!(matches!(
        set.rule_featurize(&option),
        Err(DecodeError::ScoreCountMismatch { .. })
    ));
}
