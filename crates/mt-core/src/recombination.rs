//! Recombination: treating search states as one when no future score can
//! tell them apart.
//!
//! `combinable(a, b)` must imply `recombination_hash(a) == recombination_hash(b)`;
//! equal hashes alone prove nothing, so callers bucket by hash and confirm
//! with `combinable`.

use std::hash::{Hash, Hasher};
use std::sync::Arc;

use rustc_hash::FxHasher;

use crate::hypothesis::Hypothesis;
use crate::metric::{IncrementalMetric, MultiTranslationState};
use crate::sequence::Word;
use crate::settings::settings;

pub trait RecombinationFilter<S: ?Sized>: Send + Sync {
    fn combinable(&self, a: &S, b: &S) -> bool;
    fn recombination_hash(&self, s: &S) -> u64;
}

fn last_source_end(h: &Hypothesis) -> Option<usize> {
    h.option().map(|o| o.source_end())
}

/// Equivalence for n-gram language models with distortion: same coverage,
/// same end of the last source phrase and same last `order - 1` target
/// words.
#[derive(Debug, Clone)]
pub struct NgramRecombinationFilter {
    order: usize,
}

impl NgramRecombinationFilter {
    pub fn new(order: usize) -> Self {
        Self {
            order: order.max(1),
        }
    }

    pub fn from_settings() -> Self {
        Self::new(settings().recombination.ngram_order)
    }

    fn history<'a>(&self, h: &'a Hypothesis) -> &'a [Word] {
        let target = h.target();
        &target[target.len().saturating_sub(self.order - 1)..]
    }
}

impl RecombinationFilter<Hypothesis> for NgramRecombinationFilter {
    fn combinable(&self, a: &Hypothesis, b: &Hypothesis) -> bool {
        a.coverage() == b.coverage()
            && last_source_end(a) == last_source_end(b)
            && self.history(a) == self.history(b)
    }

    fn recombination_hash(&self, h: &Hypothesis) -> u64 {
        let mut hasher = FxHasher::default();
        h.coverage().hash(&mut hasher);
        last_source_end(h).hash(&mut hasher);
        self.history(h).hash(&mut hasher);
        hasher.finish()
    }
}

/// Equivalence on the whole partial translation, for features that look at
/// arbitrarily distant target context.
#[derive(Debug, Clone, Default)]
pub struct TranslationRecombinationFilter;

impl RecombinationFilter<Hypothesis> for TranslationRecombinationFilter {
    fn combinable(&self, a: &Hypothesis, b: &Hypothesis) -> bool {
        a.coverage() == b.coverage()
            && last_source_end(a) == last_source_end(b)
            && a.target() == b.target()
    }

    fn recombination_hash(&self, h: &Hypothesis) -> u64 {
        let mut hasher = FxHasher::default();
        h.coverage().hash(&mut hasher);
        last_source_end(h).hash(&mut hasher);
        h.target().hash(&mut hasher);
        hasher.finish()
    }
}

/// Never merges.
#[derive(Debug, Clone, Default)]
pub struct NoRecombination;

impl RecombinationFilter<Hypothesis> for NoRecombination {
    fn combinable(&self, _a: &Hypothesis, _b: &Hypothesis) -> bool {
        false
    }

    fn recombination_hash(&self, h: &Hypothesis) -> u64 {
        h.id()
    }
}

/// Combinable only if every member filter agrees.
pub struct CombinedRecombinationFilter<S: ?Sized> {
    filters: Vec<Arc<dyn RecombinationFilter<S>>>,
}

impl<S: ?Sized> CombinedRecombinationFilter<S> {
    pub fn new(filters: Vec<Arc<dyn RecombinationFilter<S>>>) -> Self {
        Self { filters }
    }
}

impl<S: ?Sized> RecombinationFilter<S> for CombinedRecombinationFilter<S> {
    fn combinable(&self, a: &S, b: &S) -> bool {
        self.filters.iter().all(|f| f.combinable(a, b))
    }

    fn recombination_hash(&self, s: &S) -> u64 {
        let mut hasher = FxHasher::default();
        for f in &self.filters {
            hasher.write_u64(f.recombination_hash(s));
        }
        hasher.finish()
    }
}

/// Lifts a metric's own state filter to multi-translation search states, so
/// metric-driven selection reuses the beam machinery unchanged.
pub struct MetricRecombinationFilter<S> {
    metric_filter: Arc<dyn RecombinationFilter<S>>,
}

impl<S> MetricRecombinationFilter<S> {
    pub fn new(metric_filter: Arc<dyn RecombinationFilter<S>>) -> Self {
        Self { metric_filter }
    }
}

impl<S: IncrementalMetric> RecombinationFilter<MultiTranslationState<S>>
    for MetricRecombinationFilter<S>
{
    fn combinable(&self, a: &MultiTranslationState<S>, b: &MultiTranslationState<S>) -> bool {
        self.metric_filter.combinable(a.metric(), b.metric())
    }

    fn recombination_hash(&self, s: &MultiTranslationState<S>) -> u64 {
        self.metric_filter.recombination_hash(s.metric())
    }
}
