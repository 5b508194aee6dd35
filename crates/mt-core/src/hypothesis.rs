//! Partial translations as a chain of immutable hypothesis nodes.
//!
//! Identities are allocated by the `SentenceContext` that owns a sentence's
//! search graph, never by process-wide state: they start at zero for every
//! sentence and strictly increase along any prior chain, which is what lets
//! `IdentityCache` index per-hypothesis state by id.

use std::sync::Arc;

use crate::coverage::Coverage;
use crate::error::DecodeError;
use crate::feature::FeatureValue;
use crate::phrase_table::{ConcreteOption, PhraseAlignment};
use crate::sequence::{Sequence, Word};

pub type HypothesisId = u64;

#[derive(Debug)]
pub struct Hypothesis {
    id: HypothesisId,
    prior: Option<Arc<Hypothesis>>,
    coverage: Coverage,
    option: Option<ConcreteOption>,
    /// Full partial translation; words are shared with the options.
    target: Sequence,
    score: f64,
    /// Feature values contributed by this expansion only.
    features: Vec<FeatureValue>,
    translation_id: usize,
    source: Sequence,
}

impl Hypothesis {
    pub fn id(&self) -> HypothesisId {
        self.id
    }

    pub fn prior(&self) -> Option<&Arc<Hypothesis>> {
        self.prior.as_ref()
    }

    pub fn coverage(&self) -> &Coverage {
        &self.coverage
    }

    /// The option applied to produce this hypothesis; `None` for the root.
    pub fn option(&self) -> Option<&ConcreteOption> {
        self.option.as_ref()
    }

    pub fn target(&self) -> &[Word] {
        &self.target
    }

    /// The partial translation as a shareable sequence.
    pub fn target_sequence(&self) -> &Sequence {
        &self.target
    }

    pub fn score(&self) -> f64 {
        self.score
    }

    pub fn features(&self) -> &[FeatureValue] {
        &self.features
    }

    pub fn translation_id(&self) -> usize {
        self.translation_id
    }

    pub fn source(&self) -> &[Word] {
        &self.source
    }

    pub fn is_root(&self) -> bool {
        self.prior.is_none()
    }

    /// True once every source position is covered.
    pub fn is_done(&self) -> bool {
        self.coverage.is_complete()
    }

    /// Number of options applied since the root.
    pub fn depth(&self) -> usize {
        self.ancestors().count() - 1
    }

    /// This hypothesis followed by its priors, ending at the root.
    pub fn ancestors(&self) -> impl Iterator<Item = &Hypothesis> {
        std::iter::successors(Some(self), |h| h.prior.as_deref())
    }

    /// The featurizer view; `None` for the root, which has no option.
    pub fn featurizable(&self) -> Option<Featurizable<'_>> {
        self.option.as_ref().map(|option| Featurizable { hyp: self, option })
    }

    /// Attach features and the accumulated score, freezing the hypothesis.
    pub fn finish(mut self, features: Vec<FeatureValue>, score: f64) -> Arc<Hypothesis> {
        self.features = features;
        self.score = score;
        Arc::new(self)
    }
}

/// Per-sentence decoding context: owns the identity counter.
#[derive(Debug)]
pub struct SentenceContext {
    translation_id: usize,
    source: Sequence,
    next_id: HypothesisId,
}

impl SentenceContext {
    pub fn new(translation_id: usize, source: Sequence) -> Self {
        Self {
            translation_id,
            source,
            next_id: 0,
        }
    }

    pub fn translation_id(&self) -> usize {
        self.translation_id
    }

    pub fn source(&self) -> &Sequence {
        &self.source
    }

    /// Identities handed out so far.
    pub fn allocated(&self) -> u64 {
        self.next_id
    }

    fn allocate(&mut self) -> HypothesisId {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    /// The sentence-initial hypothesis: empty coverage, empty translation.
    pub fn root(&mut self) -> Arc<Hypothesis> {
        let id = self.allocate();
        Arc::new(Hypothesis {
            id,
            prior: None,
            coverage: Coverage::new(self.source.len()),
            option: None,
            target: Arc::from(Vec::new()),
            score: 0.0,
            features: Vec::new(),
            translation_id: self.translation_id,
            source: Arc::clone(&self.source),
        })
    }

    /// Apply `option` to `prior`. The result is unscored until `finish`.
    pub fn extend(
        &mut self,
        prior: &Arc<Hypothesis>,
        option: &ConcreteOption,
    ) -> Result<Hypothesis, DecodeError> {
        let len = self.source.len();
        let (start, end) = (option.source_start, option.source_end());
        if prior.is_done() {
            return Err(DecodeError::AlreadyComplete(prior.id));
        }
        if end > len || start >= end || prior.coverage.overlaps(start, end) {
            return Err(DecodeError::InvalidSpan { start, end, len });
        }
        let mut target = Vec::with_capacity(prior.target.len() + option.option.target.len());
        target.extend(prior.target.iter().cloned());
        target.extend(option.option.target.iter().cloned());
        Ok(Hypothesis {
            id: self.allocate(),
            prior: Some(Arc::clone(prior)),
            coverage: prior.coverage.with_span(start, end),
            option: Some(option.clone()),
            target: Arc::from(target),
            score: prior.score,
            features: Vec::new(),
            translation_id: self.translation_id,
            source: Arc::clone(&self.source),
        })
    }
}

/// Read-only view of a hypothesis for feature functions.
#[derive(Clone, Copy)]
pub struct Featurizable<'a> {
    hyp: &'a Hypothesis,
    option: &'a ConcreteOption,
}

impl<'a> Featurizable<'a> {
    pub fn hypothesis(&self) -> &'a Hypothesis {
        self.hyp
    }

    pub fn id(&self) -> HypothesisId {
        self.hyp.id
    }

    pub fn option(&self) -> &'a ConcreteOption {
        self.option
    }

    /// Target position where the new phrase starts.
    pub fn translation_position(&self) -> usize {
        self.hyp.target.len() - self.option.option.target.len()
    }

    pub fn target_phrase(&self) -> &'a [Word] {
        &self.option.option.target
    }

    pub fn source_phrase(&self) -> &'a [Word] {
        &self.option.option.source
    }

    pub fn source_position(&self) -> usize {
        self.option.source_start
    }

    pub fn partial_translation(&self) -> &'a [Word] {
        &self.hyp.target
    }

    /// `partial_translation()[from..]`, empty when `from` is past the end.
    pub fn suffix(&self, from: usize) -> &'a [Word] {
        self.hyp.target.get(from..).unwrap_or(&[])
    }

    pub fn source_sentence(&self) -> &'a [Word] {
        &self.hyp.source
    }

    pub fn done(&self) -> bool {
        self.hyp.is_done()
    }

    pub fn translation_id(&self) -> usize {
        self.hyp.translation_id
    }

    pub fn table_name(&self) -> &'a str {
        &self.option.option.table
    }

    pub fn scores(&self) -> &'a [f32] {
        &self.option.option.scores
    }

    pub fn score_names(&self) -> &'a [String] {
        &self.option.option.score_names
    }

    pub fn alignment(&self) -> &'a PhraseAlignment {
        &self.option.option.alignment
    }

    pub fn coverage(&self) -> &'a Coverage {
        &self.hyp.coverage
    }

    /// The predecessor's view; `None` when the predecessor is the root.
    pub fn prior(&self) -> Option<Featurizable<'a>> {
        self.hyp.prior.as_deref().and_then(Hypothesis::featurizable)
    }

    /// First covered source position after this phrase (a phrase translated
    /// out of order to its right).
    pub fn location_of_swapped_phrase(&self) -> Option<usize> {
        self.hyp
            .coverage
            .next_set_bit(self.source_position() + self.source_phrase().len())
    }

    /// Last position of the covered run starting at
    /// `location_of_swapped_phrase`.
    pub fn end_location_of_swapped_phrase(&self) -> Option<usize> {
        let start = self.location_of_swapped_phrase()?;
        Some(self.hyp.coverage.next_clear_bit(start) - 1)
    }

    pub fn first_untranslated_source_word(&self) -> usize {
        self.hyp.coverage.next_clear_bit(0)
    }
}

impl std::fmt::Debug for Featurizable<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Featurizable")
            .field("id", &self.hyp.id)
            .field("translation_position", &self.translation_position())
            .field("target_phrase", &self.target_phrase())
            .field("done", &self.done())
            .finish()
    }
}
