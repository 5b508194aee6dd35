use std::hash::{Hash, Hasher};

use rustc_hash::FxHasher;

use crate::hypothesis::Hypothesis;
use crate::recombination::{RecombinationFilter, TranslationRecombinationFilter};

/// Equivalence under the dependency model.
///
/// Tags and attachments read the whole partial translation, so the full
/// target must match. A delayed featurizer still owes the predecessor's
/// local score, which depends on where the last phrase started. Bilingual
/// tokens carry source alignments, so there the segmentation must match too.
#[derive(Debug, Clone)]
pub struct DependencyRecombinationFilter {
    delayed: bool,
    bilingual: bool,
}

impl DependencyRecombinationFilter {
    pub fn new(delayed: bool, bilingual: bool) -> Self {
        Self { delayed, bilingual }
    }
}

/// Target position where the hypothesis's own phrase begins.
fn phrase_start(h: &Hypothesis) -> usize {
    h.prior().map_or(0, |p| p.target().len())
}

fn same_segmentation(a: &Hypothesis, b: &Hypothesis) -> bool {
    a.depth() == b.depth()
        && a.ancestors()
            .zip(b.ancestors())
            .all(|(x, y)| match (x.option(), y.option()) {
                (None, None) => true,
                (Some(p), Some(q)) => {
                    p.source_start == q.source_start
                        && p.option.source.len() == q.option.source.len()
                        && p.option.target.len() == q.option.target.len()
                        && p.option.alignment == q.option.alignment
                }
                _ => false,
            })
}

impl RecombinationFilter<Hypothesis> for DependencyRecombinationFilter {
    fn combinable(&self, a: &Hypothesis, b: &Hypothesis) -> bool {
        TranslationRecombinationFilter.combinable(a, b)
            && (!self.delayed || phrase_start(a) == phrase_start(b))
            && (!self.bilingual || same_segmentation(a, b))
    }

    fn recombination_hash(&self, h: &Hypothesis) -> u64 {
        let mut hasher = FxHasher::default();
        hasher.write_u64(TranslationRecombinationFilter.recombination_hash(h));
        if self.delayed {
            phrase_start(h).hash(&mut hasher);
        }
        hasher.finish()
    }
}
