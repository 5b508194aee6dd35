//! The decoder core handed to the search layer: featurizers, scorer,
//! recombination filter and beams wired together.
//!
//! A search layer drives one sentence at a time:
//!
//! 1. `begin_sentence` resets and initializes the featurizers and returns a
//!    `Sentence` holding the id allocator, the root hypothesis and the beams.
//! 2. `expand` applies an option to a prior, featurizes and scores the result.
//! 3. `insert` routes the new hypothesis to the beam of its coverage rank.
//! 4. `finish` collects the completed hypotheses into an `NBestList`.
//!
//! `decode` runs these steps as an exhaustive stack search, for callers that
//! bring no search layer of their own.

use std::num::NonZeroUsize;
use std::sync::Arc;

use tracing::{debug, debug_span};

use crate::beam::{checked_capacity, BeamManager, Insertion};
use crate::error::{ConfigError, DecodeError};
use crate::featurizer::{Featurizer, FeaturizerSet};
use crate::hypothesis::{Hypothesis, SentenceContext};
use crate::nbest::NBestList;
use crate::phrase_table::ConcreteOption;
use crate::recombination::{
    CombinedRecombinationFilter, NgramRecombinationFilter, RecombinationFilter,
};
use crate::scorer::{LinearScorer, Scorer};
use crate::sequence::Sequence;
use crate::settings::settings;

pub struct DecoderBuilder {
    featurizers: Vec<Box<dyn Featurizer>>,
    scorer: Arc<dyn Scorer>,
    filter: Arc<dyn RecombinationFilter<Hypothesis>>,
    beam_capacity: i64,
    nbest_size: usize,
}

impl DecoderBuilder {
    /// Capacity, n-best size and n-gram order default to the settings; the
    /// scorer starts with no weights.
    pub fn new() -> Self {
        let s = settings();
        Self {
            featurizers: Vec::new(),
            scorer: Arc::new(LinearScorer::new()),
            filter: Arc::new(NgramRecombinationFilter::new(s.recombination.ngram_order)),
            beam_capacity: s.beam.capacity,
            nbest_size: s.nbest.size,
        }
    }

    pub fn featurizer(mut self, featurizer: Box<dyn Featurizer>) -> Self {
        self.featurizers.push(featurizer);
        self
    }

    pub fn scorer(mut self, scorer: Arc<dyn Scorer>) -> Self {
        self.scorer = scorer;
        self
    }

    /// Base filter. Featurizers that read further back than it compares add
    /// their own requirements at build time.
    pub fn recombination_filter(mut self, filter: Arc<dyn RecombinationFilter<Hypothesis>>) -> Self {
        self.filter = filter;
        self
    }

    pub fn beam_capacity(mut self, capacity: i64) -> Self {
        self.beam_capacity = capacity;
        self
    }

    pub fn nbest_size(mut self, size: usize) -> Self {
        self.nbest_size = size;
        self
    }

    pub fn build(self) -> Result<DecoderCore, ConfigError> {
        let capacity = checked_capacity(self.beam_capacity)?;
        let featurizers = FeaturizerSet::new(self.featurizers)?;
        let declared = featurizers.recombination_filters();
        let filter: Arc<dyn RecombinationFilter<Hypothesis>> = if declared.is_empty() {
            self.filter
        } else {
            let mut filters = vec![self.filter];
            filters.extend(declared);
            Arc::new(CombinedRecombinationFilter::new(filters))
        };
        debug!(
            featurizers = featurizers.len(),
            capacity = capacity.get(),
            nbest_size = self.nbest_size,
            "decoder built"
        );
        Ok(DecoderCore {
            featurizers,
            scorer: self.scorer,
            filter,
            capacity,
            nbest_size: self.nbest_size,
        })
    }
}

impl Default for DecoderBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Search state of one sentence. Owned by a single decoding task.
pub struct Sentence {
    ctx: SentenceContext,
    root: Arc<Hypothesis>,
    options: Vec<ConcreteOption>,
    beams: BeamManager<Hypothesis>,
}

impl Sentence {
    pub fn translation_id(&self) -> usize {
        self.ctx.translation_id()
    }

    pub fn source(&self) -> &Sequence {
        self.ctx.source()
    }

    pub fn root(&self) -> &Arc<Hypothesis> {
        &self.root
    }

    /// Candidate options left after featurizer initialization.
    pub fn options(&self) -> &[ConcreteOption] {
        &self.options
    }

    pub fn beams(&self) -> &BeamManager<Hypothesis> {
        &self.beams
    }

    pub fn context_mut(&mut self) -> &mut SentenceContext {
        &mut self.ctx
    }
}

pub struct DecoderCore {
    featurizers: FeaturizerSet,
    scorer: Arc<dyn Scorer>,
    filter: Arc<dyn RecombinationFilter<Hypothesis>>,
    capacity: NonZeroUsize,
    nbest_size: usize,
}

impl DecoderCore {
    pub fn featurizers(&self) -> &FeaturizerSet {
        &self.featurizers
    }

    pub fn beam_capacity(&self) -> usize {
        self.capacity.get()
    }

    pub fn nbest_size(&self) -> usize {
        self.nbest_size
    }

    /// The filter the beams use: the base filter joined with whatever the
    /// featurizers declared.
    pub fn recombination_filter(&self) -> &Arc<dyn RecombinationFilter<Hypothesis>> {
        &self.filter
    }

    /// An independent decoder for another thread: fresh featurizer caches,
    /// shared scorer and filter.
    pub fn duplicate(&self) -> DecoderCore {
        DecoderCore {
            featurizers: self.featurizers.duplicate(),
            scorer: Arc::clone(&self.scorer),
            filter: Arc::clone(&self.filter),
            capacity: self.capacity,
            nbest_size: self.nbest_size,
        }
    }

    pub fn set_reranking(&mut self, reranking: bool) {
        self.featurizers.set_reranking(reranking);
    }

    pub fn begin_sentence(
        &mut self,
        translation_id: usize,
        source: Sequence,
        mut options: Vec<ConcreteOption>,
    ) -> Sentence {
        let _span = debug_span!("begin_sentence", translation_id, len = source.len()).entered();
        self.featurizers.reset();
        self.featurizers.initialize(&mut options, &source);
        let mut ctx = SentenceContext::new(translation_id, source);
        let root = ctx.root();
        let mut beams = BeamManager::with_capacity(self.capacity, Arc::clone(&self.filter));
        beams.insert(0, Arc::clone(&root));
        Sentence {
            ctx,
            root,
            options,
            beams,
        }
    }

    /// Successor of `prior` under `option`, featurized and scored:
    /// `score(prior)` plus the scorer's value of the new features.
    pub fn expand(
        &mut self,
        ctx: &mut SentenceContext,
        prior: &Arc<Hypothesis>,
        option: &ConcreteOption,
    ) -> Result<Arc<Hypothesis>, DecodeError> {
        let hyp = ctx.extend(prior, option)?;
        let features = match hyp.featurizable() {
            Some(f) => self.featurizers.featurize(&f)?,
            None => Vec::new(),
        };
        let score = prior.score() + self.scorer.score(&features);
        Ok(hyp.finish(features, score))
    }

    /// Beams are ranked by the number of covered source words.
    pub fn insert(&self, sentence: &mut Sentence, hyp: Arc<Hypothesis>) -> Insertion<Hypothesis> {
        let rank = hyp.coverage().cardinality();
        sentence.beams.insert(rank, hyp)
    }

    pub fn finish(&mut self, sentence: &Sentence) -> NBestList {
        let len = sentence.source().len();
        let list = match sentence.beams.beam(len) {
            Some(beam) => {
                NBestList::from_hypotheses(sentence.translation_id(), beam.iter(), self.nbest_size)
            }
            None => NBestList::new(sentence.translation_id(), Vec::new()),
        };
        if let Some(f) = sentence
            .beams
            .beam(len)
            .and_then(|b| b.best())
            .and_then(|h| h.featurizable())
        {
            self.featurizers.debug_best(&f);
        }
        debug!(
            translation_id = sentence.translation_id(),
            entries = list.len(),
            recombined = sentence.beams.recombined(),
            evicted = sentence.beams.evicted(),
            "sentence finished"
        );
        list
    }

    /// Expand every beam in rank order with every option that fits.
    pub fn decode(
        &mut self,
        translation_id: usize,
        source: Sequence,
        options: Vec<ConcreteOption>,
    ) -> Result<NBestList, DecodeError> {
        let _span = debug_span!("decode", translation_id).entered();
        let mut sentence = self.begin_sentence(translation_id, source, options);
        let len = sentence.source().len();
        for rank in 0..len {
            let priors: Vec<Arc<Hypothesis>> = match sentence.beams.beam(rank) {
                Some(beam) => beam.iter().cloned().collect(),
                None => continue,
            };
            let candidates = sentence.options.clone();
            for prior in &priors {
                for option in &candidates {
                    if prior.coverage().overlaps(option.source_start, option.source_end()) {
                        continue;
                    }
                    let hyp = self.expand(&mut sentence.ctx, prior, option)?;
                    self.insert(&mut sentence, hyp);
                }
            }
        }
        Ok(self.finish(&sentence))
    }
}
