//! Incremental dependency-model features.
//!
//! Each hypothesis owns a `DependencyScores`: a copy of its predecessor's
//! parse extended by the new phrase, its own contribution (`local`) and the
//! prefix sum along the chain (`total`). States live in an identity-keyed
//! cache; with `cache_partial` a second cache keyed by the surface string
//! lets different segmentations of the same words share one state.
//!
//! Attachment of the last word of a phrase is postponed until the next
//! phrase is known (or the sentence is complete), since the following word
//! may still claim it. In delayed mode the featurizer therefore scores the
//! predecessor of each new hypothesis, and settles the remaining
//! contribution on the sentence-final one.

mod options;
mod parse;
mod recombination;


use std::io::Write;
use std::sync::{Arc, Mutex};

use rustc_hash::FxHashMap;
use tracing::{debug, debug_span, warn};

use crate::error::{ConfigError, DecodeError};
use crate::feature::FeatureValue;
use crate::hypothesis::{Featurizable, Hypothesis, HypothesisId};
use crate::recombination::RecombinationFilter;
use crate::sequence::join;

use super::{FeaturizeResult, Featurizer, IdentityCache, ScoringMode};

pub use options::{DependencyConfig, DependencyOptions};
pub use parse::{
    attach_span, Attachment, EdgeScorer, FullParse, IncrementalParse, ParseToken, SourceParse,
    Tagger, ROOT_FORM, ROOT_TAG,
};
pub use recombination::DependencyRecombinationFilter;

/// Shared sink for `debug_best` reports.
pub type DebugSink = Arc<Mutex<dyn Write + Send>>;

/// Per-hypothesis dependency state.
#[derive(Debug, Clone)]
pub struct DependencyScores {
    pub parse: Arc<IncrementalParse>,
    pub local: Vec<f64>,
    pub total: Vec<f64>,
}

impl DependencyScores {
    fn new(parse: IncrementalParse, local: Vec<f64>, prior: Option<&DependencyScores>) -> Self {
        let total = match prior {
            Some(p) => local.iter().zip(&p.total).map(|(l, t)| l + t).collect(),
            None => local.clone(),
        };
        Self {
            parse: Arc::new(parse),
            local,
            total,
        }
    }

    /// Same parse and totals, with `local` recomputed against another
    /// predecessor.
    fn rebased(&self, prior: Option<&DependencyScores>) -> Self {
        let local = match prior {
            Some(p) => self.total.iter().zip(&p.total).map(|(t, pt)| t - pt).collect(),
            None => self.total.clone(),
        };
        Self {
            parse: Arc::clone(&self.parse),
            local,
            total: self.total.clone(),
        }
    }
}

pub struct DependencyFeaturizer {
    config: DependencyConfig,
    prefix: String,
    feature_names: Vec<Arc<str>>,
    mst_name: Arc<str>,
    tagger: Arc<dyn Tagger>,
    scorer: Arc<dyn EdgeScorer>,
    /// Source parses by translation id; non-empty enables bilingual scoring.
    source_parses: Arc<[Arc<SourceParse>]>,
    states: IdentityCache<Arc<DependencyScores>>,
    partial_cache: FxHashMap<String, Arc<DependencyScores>>,
    /// surface string → exact parse
    full_parse_cache: FxHashMap<String, Option<FullParse>>,
    reranking: bool,
    debug_sink: Option<DebugSink>,
}

impl DependencyFeaturizer {
    pub fn new(
        config: DependencyConfig,
        tagger: Arc<dyn Tagger>,
        scorer: Arc<dyn EdgeScorer>,
    ) -> Self {
        let prefix = config.feature_prefix.clone();
        let dep_name = format!("{prefix}:dep");
        let feature_names = config
            .options
            .local_suffixes()
            .into_iter()
            .map(|suffix| Arc::from(format!("{dep_name}{suffix}")))
            .collect();
        debug!(
            prefix = %prefix,
            cache_partial = config.cache_partial,
            delayed = config.delayed,
            "dependency featurizer"
        );
        Self {
            mst_name: Arc::from(format!("{dep_name}:mst")),
            feature_names,
            prefix,
            config,
            tagger,
            scorer,
            source_parses: Arc::from(Vec::new()),
            states: IdentityCache::new(),
            partial_cache: FxHashMap::default(),
            full_parse_cache: FxHashMap::default(),
            reranking: false,
            debug_sink: None,
        }
    }

    /// Enable bilingual scoring. Target tokens then carry source alignments
    /// that the surface signature does not capture, so this is rejected
    /// together with `cache_partial`.
    pub fn with_source_parses(mut self, parses: Vec<SourceParse>) -> Result<Self, ConfigError> {
        if self.config.cache_partial && !parses.is_empty() {
            return Err(ConfigError::BilingualSignatureCache);
        }
        debug!(count = parses.len(), "bilingual dependency features");
        self.source_parses = parses.into_iter().map(Arc::new).collect();
        Ok(self)
    }

    pub fn with_debug_sink(mut self, sink: DebugSink) -> Self {
        self.debug_sink = Some(sink);
        self
    }

    pub fn is_bilingual(&self) -> bool {
        !self.source_parses.is_empty()
    }

    pub fn feature_names(&self) -> impl Iterator<Item = &str> {
        self.feature_names.iter().map(|n| &**n)
    }

    pub fn mst_feature_name(&self) -> &str {
        &self.mst_name
    }

    /// Cached state of a hypothesis, if it has been computed.
    pub fn state(&self, id: HypothesisId) -> Option<&Arc<DependencyScores>> {
        self.states.get(id)
    }

    fn missing(&self, id: HypothesisId) -> DecodeError {
        DecodeError::MissingState {
            featurizer: self.prefix.clone(),
            id,
        }
    }

    /// State of `f`, computing it from its predecessor's state if needed.
    fn state_for(&mut self, f: &Featurizable<'_>) -> Result<Arc<DependencyScores>, DecodeError> {
        if let Some(state) = self.states.get(f.id()) {
            return Ok(Arc::clone(state));
        }
        let state = Arc::new(self.compute_state(f)?);
        self.states.put(f.id(), Arc::clone(&state));
        Ok(state)
    }

    fn compute_state(&mut self, f: &Featurizable<'_>) -> Result<DependencyScores, DecodeError> {
        let _span = debug_span!("dependency_state", id = f.id()).entered();
        let prior = match f.prior() {
            Some(p) => Some(
                self.states
                    .get(p.id())
                    .cloned()
                    .ok_or_else(|| self.missing(p.id()))?,
            ),
            None => None,
        };

        let signature = self
            .config
            .cache_partial
            .then(|| format!("{} | {}", join(f.partial_translation(), " "), f.done()));
        if let Some(sig) = &signature {
            if let Some(cached) = self.partial_cache.get(sig) {
                debug!(signature = %sig, "partial parse cache hit");
                return Ok(cached.rebased(prior.as_deref()));
            }
        }

        let loc = f.translation_position();
        let phrase = f.target_phrase();
        let partial = f.partial_translation();

        let mut tag_score = 0.0f32;
        let mut tags = Vec::with_capacity(phrase.len());
        for i in 0..phrase.len() {
            let start = (loc + i).saturating_sub(self.config.left_words);
            let (tag, score) = self.tagger.best_tag(&partial[start..loc + i + 1]);
            tag_score += score;
            tags.push(tag);
        }

        let mut parse = match &prior {
            Some(p) => (*p.parse).clone(),
            None => self.root_parse(f.translation_id())?,
        };
        debug_assert_eq!(parse.len(), loc + 1);

        for (i, (word, tag)) in phrase.iter().zip(tags).enumerate() {
            let alignment = if self.is_bilingual() && f.alignment().has_alignment() {
                f.alignment()
                    .e2f(i)?
                    .iter()
                    .map(|&a| a + f.source_position() + 1)
                    .collect()
            } else {
                Vec::new()
            };
            parse.push(word.clone(), tag, alignment);
        }

        // The phrase's last word waits for the next phrase unless the
        // sentence is complete.
        let end = loc + phrase.len() + usize::from(f.done());
        let dep_score = attach_span(&mut parse, self.scorer.as_ref(), loc, end);
        if self.config.options.debug || self.config.options.verbose_debug {
            debug!(dep_score, tag_score, "attached phrase");
        }
        if self.config.options.verbose_debug {
            debug!(conll = %parse.to_conll());
        }

        let local = self
            .config
            .options
            .local_values(tag_score, dep_score)
            .into_iter()
            .map(f64::from)
            .collect();
        let state = DependencyScores::new(parse, local, prior.as_deref());
        if let Some(sig) = signature {
            self.partial_cache.insert(sig, Arc::new(state.clone()));
        }
        Ok(state)
    }

    fn root_parse(&self, translation_id: usize) -> Result<IncrementalParse, DecodeError> {
        let mut parse = IncrementalParse::new();
        if self.is_bilingual() {
            let source = self.source_parses.get(translation_id).ok_or(
                DecodeError::MissingSourceParse {
                    id: translation_id,
                    available: self.source_parses.len(),
                },
            )?;
            parse.set_source(Arc::clone(source));
        }
        Ok(parse)
    }

    fn push_local(&self, local: &[f64], out: &mut Vec<FeatureValue>) {
        for (name, &value) in self.feature_names.iter().zip(local) {
            if value != 0.0 {
                out.push(FeatureValue {
                    name: Some(Arc::clone(name)),
                    value,
                });
            }
        }
    }

    /// Exact parse score of a complete translation, once per surface string.
    fn push_mst(&mut self, parse: &IncrementalParse, out: &mut Vec<FeatureValue>) {
        if !(self.reranking && self.config.options.mst_score) {
            return;
        }
        let sentence = parse.sentence();
        let full = match self.full_parse_cache.get(&sentence) {
            Some(cached) => cached.clone(),
            None => {
                let full = self.scorer.exact_parse(parse);
                if let Some(fp) = &full {
                    debug!(sentence = %sentence, score = fp.score, tree = %fp.tree, "exact parse");
                }
                self.full_parse_cache.insert(sentence, full.clone());
                full
            }
        };
        let Some(full) = full else {
            return;
        };
        let mut score = full.score;
        if self.config.options.normalize {
            score /= parse.len() as f64;
        }
        out.push(FeatureValue {
            name: Some(Arc::clone(&self.mst_name)),
            value: score,
        });
    }

    fn immediate_features(&mut self, f: &Featurizable<'_>) -> FeaturizeResult {
        let state = self.state_for(f)?;
        let mut out = Vec::with_capacity(self.feature_names.len() + 1);
        if f.done() {
            self.push_mst(&state.parse, &mut out);
        }
        self.push_local(&state.local, &mut out);
        Ok(Some(out))
    }

    fn delayed_features(&mut self, f: &Featurizable<'_>) -> FeaturizeResult {
        let mut local = match f.prior() {
            Some(prior) => self.state_for(&prior)?.local.clone(),
            None => vec![0.0; self.feature_names.len()],
        };
        let mut out = Vec::with_capacity(self.feature_names.len() + 1);
        if f.done() {
            let last = self.state_for(f)?;
            for (acc, l) in local.iter_mut().zip(&last.local) {
                *acc += l;
            }
            self.push_mst(&last.parse, &mut out);
        }
        self.push_local(&local, &mut out);
        Ok(Some(out))
    }

    fn report(&self, f: &Featurizable<'_>, state: &DependencyScores) -> String {
        let parse = &state.parse;
        let mut out = String::new();
        out.push_str("sent: ");
        out.push_str(&parse.sentence());
        out.push_str("\npos:");
        for i in 1..parse.len() {
            out.push_str(&format!(" {}/{}", parse.form(i), parse.tag(i)));
        }
        out.push_str("\ndeps:\n");
        out.push_str(&parse.to_conll());
        if self.config.options.matrix {
            out.push_str("head scores:\n");
            let n = parse.len().min(20);
            for m in 1..n {
                let row: Vec<String> = (0..n)
                    .map(|h| {
                        let dir = if h < m {
                            Attachment::LeftHead
                        } else {
                            Attachment::RightHead
                        };
                        format!("{:.2}", self.scorer.edge_score(parse, h, m, dir))
                    })
                    .collect();
                out.push_str(&row.join(" "));
                out.push('\n');
            }
        }
        let mut phrases: Vec<String> =
            std::iter::successors(Some(*f), Featurizable::prior)
                .map(|p| join(p.target_phrase(), " "))
                .collect();
        phrases.reverse();
        for (i, p) in phrases.iter().enumerate() {
            out.push_str(&format!("phrase {i}: {p}\n"));
        }
        out
    }
}

impl Featurizer for DependencyFeaturizer {
    fn prefix(&self) -> &str {
        &self.prefix
    }

    fn mode(&self) -> ScoringMode {
        if self.config.delayed {
            ScoringMode::Delayed
        } else {
            ScoringMode::Immediate
        }
    }

    fn featurize(&mut self, f: &Featurizable<'_>) -> FeaturizeResult {
        if self.config.delayed {
            self.delayed_features(f)
        } else {
            self.immediate_features(f)
        }
    }

    fn reset(&mut self) {
        debug!(
            states = self.states.len(),
            partial = self.partial_cache.len(),
            full = self.full_parse_cache.len(),
            "emptying dependency caches"
        );
        self.states.clear();
        self.partial_cache.clear();
        self.full_parse_cache.clear();
    }

    fn duplicate(&self) -> Box<dyn Featurizer> {
        Box::new(Self {
            config: self.config.clone(),
            prefix: self.prefix.clone(),
            feature_names: self.feature_names.clone(),
            mst_name: Arc::clone(&self.mst_name),
            tagger: Arc::clone(&self.tagger),
            scorer: Arc::clone(&self.scorer),
            source_parses: Arc::clone(&self.source_parses),
            states: IdentityCache::new(),
            partial_cache: FxHashMap::default(),
            full_parse_cache: FxHashMap::default(),
            reranking: self.reranking,
            debug_sink: self.debug_sink.clone(),
        })
    }

    fn set_reranking(&mut self, reranking: bool) {
        self.reranking = reranking;
    }

    fn recombination_filter(&self) -> Option<Arc<dyn RecombinationFilter<Hypothesis>>> {
        Some(Arc::new(DependencyRecombinationFilter::new(
            self.config.delayed,
            self.is_bilingual(),
        )))
    }

    fn debug_best(&mut self, f: &Featurizable<'_>) {
        let Some(state) = self.states.get(f.id()).cloned() else {
            return;
        };
        let report = self.report(f, &state);
        let Some(sink) = &self.debug_sink else {
            debug!(report = %report, "best hypothesis");
            return;
        };
        let result = match sink.lock() {
            Ok(mut w) => w.write_all(report.as_bytes()).and_then(|_| w.flush()),
            Err(_) => {
                warn!("dependency debug sink poisoned");
                return;
            }
        };
        if let Err(e) = result {
            warn!(error = %e, "failed to write dependency debug report");
        }
    }
}
