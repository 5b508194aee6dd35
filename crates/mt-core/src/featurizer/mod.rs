//! Incremental feature functions.
//!
//! Every featurizer is asked for feature values each time the search layer
//! extends a hypothesis. What it may look at is declared by its
//! `ScoringMode`, and the `FeaturizerSet` dispatches on that tag rather than
//! on concrete types:
//!
//! - `Rule`: the value depends only on the phrase pair, so it can also be
//!   computed per option ahead of search (`FeaturizerSet::rule_featurize`).
//! - `Immediate`: scores the new hypothesis from its own data and ancestors.
//! - `Delayed`: scores the predecessor instead (one-step lookback) and
//!   settles the remaining contribution on the sentence-final hypothesis.
//!   Only delayed featurizers receive `set_reranking`.
//!
//! Per-hypothesis state lives in featurizer-owned caches keyed by hypothesis
//! identity (`IdentityCache`), cleared by `reset` at sentence boundaries.

mod constellation;
pub mod dependency;
mod identity_cache;
mod phrase_table_scores;

use std::collections::HashSet;
use std::sync::Arc;

use tracing::{debug, debug_span};

use crate::error::{ConfigError, DecodeError};
use crate::feature::FeatureValue;
use crate::hypothesis::{Featurizable, Hypothesis};
use crate::phrase_table::{ConcreteOption, TranslationOption};
use crate::recombination::RecombinationFilter;
use crate::sequence::Word;

pub use constellation::AlignmentConstellationFeaturizer;
pub use identity_cache::IdentityCache;
pub use phrase_table_scores::PhraseTableScoresFeaturizer;

/// `Ok(None)` means "no contribution" (a routine condition). `Err` is a
/// consistency violation that aborts the sentence.
pub type FeaturizeResult = Result<Option<Vec<FeatureValue>>, DecodeError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScoringMode {
    Rule,
    Immediate,
    Delayed,
}

pub trait Featurizer: Send + Sync {
    /// Namespace prefix owned by this featurizer (`<PREFIX>:...`).
    fn prefix(&self) -> &str;

    fn mode(&self) -> ScoringMode {
        ScoringMode::Immediate
    }

    /// Called once per sentence before any scoring. May drop or reorder
    /// candidate options.
    fn initialize(&mut self, _options: &mut Vec<ConcreteOption>, _source: &[Word]) {}

    fn featurize(&mut self, f: &Featurizable<'_>) -> FeaturizeResult;

    /// Context-free scoring of a phrase pair. Only `Rule` featurizers answer.
    fn rule_featurize(&mut self, _option: &TranslationOption) -> FeaturizeResult {
        Ok(None)
    }

    /// Clear every per-sentence cache. Must not assume any call ordering.
    fn reset(&mut self) {}

    /// An independent instance with empty caches, sharing only read-only
    /// model data.
    fn duplicate(&self) -> Box<dyn Featurizer>;

    fn set_reranking(&mut self, _reranking: bool) {}

    /// Equivalence this featurizer needs before two hypotheses may be
    /// merged. `None` when it reads nothing beyond what the decoder's own
    /// filter already compares.
    fn recombination_filter(&self) -> Option<Arc<dyn RecombinationFilter<Hypothesis>>> {
        None
    }

    /// Best-effort diagnostics for the 1-best hypothesis.
    fn debug_best(&mut self, _f: &Featurizable<'_>) {}
}

/// The featurizers of one decoder, applied together.
pub struct FeaturizerSet {
    featurizers: Vec<Box<dyn Featurizer>>,
}

impl FeaturizerSet {
    /// Rejects two featurizers claiming the same namespace prefix, since
    /// colliding names would silently share one weight.
    pub fn new(featurizers: Vec<Box<dyn Featurizer>>) -> Result<Self, ConfigError> {
        let mut seen = HashSet::new();
        for f in &featurizers {
            if !seen.insert(f.prefix().to_string()) {
                return Err(ConfigError::DuplicateNamespace(f.prefix().to_string()));
            }
        }
        Ok(Self { featurizers })
    }

    pub fn len(&self) -> usize {
        self.featurizers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.featurizers.is_empty()
    }

    pub fn prefixes(&self) -> impl Iterator<Item = &str> {
        self.featurizers.iter().map(|f| f.prefix())
    }

    /// Recombination requirements declared by the featurizers, in order.
    pub fn recombination_filters(&self) -> Vec<Arc<dyn RecombinationFilter<Hypothesis>>> {
        self.featurizers
            .iter()
            .filter_map(|f| f.recombination_filter())
            .collect()
    }

    pub fn reset(&mut self) {
        for f in &mut self.featurizers {
            f.reset();
        }
    }

    pub fn initialize(&mut self, options: &mut Vec<ConcreteOption>, source: &[Word]) {
        let _span = debug_span!("initialize", options_in = options.len()).entered();
        for f in &mut self.featurizers {
            f.initialize(options, source);
        }
        debug!(options_out = options.len());
    }

    /// All feature values for a new hypothesis, in featurizer order.
    pub fn featurize(&mut self, f: &Featurizable<'_>) -> Result<Vec<FeatureValue>, DecodeError> {
        let _span = debug_span!("featurize", id = f.id(), done = f.done()).entered();
        let mut out = Vec::new();
        for featurizer in &mut self.featurizers {
            if let Some(values) = featurizer.featurize(f)? {
                out.extend(values);
            }
        }
        Ok(out)
    }

    /// Phrase-only scores from the `Rule` featurizers.
    pub fn rule_featurize(
        &mut self,
        option: &TranslationOption,
    ) -> Result<Vec<FeatureValue>, DecodeError> {
        let mut out = Vec::new();
        for featurizer in &mut self.featurizers {
            if featurizer.mode() != ScoringMode::Rule {
                continue;
            }
            if let Some(values) = featurizer.rule_featurize(option)? {
                out.extend(values);
            }
        }
        Ok(out)
    }

    pub fn set_reranking(&mut self, reranking: bool) {
        for f in &mut self.featurizers {
            if f.mode() == ScoringMode::Delayed {
                f.set_reranking(reranking);
            }
        }
    }

    pub fn debug_best(&mut self, f: &Featurizable<'_>) {
        for featurizer in &mut self.featurizers {
            featurizer.debug_best(f);
        }
    }

    pub fn duplicate(&self) -> FeaturizerSet {
        FeaturizerSet {
            featurizers: self.featurizers.iter().map(|f| f.duplicate()).collect(),
        }
    }
}

#[cfg(test)]
mod tests;
