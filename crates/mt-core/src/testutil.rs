//! Shared fixtures: toy phrase pairs, a toy tagger and edge scorer.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::featurizer::dependency::{
    Attachment, EdgeScorer, FullParse, IncrementalParse, Tagger,
};
use crate::hypothesis::{Hypothesis, SentenceContext};
use crate::phrase_table::{ConcreteOption, MemoryPhraseTable, PhraseAlignment, TranslationOption};
use crate::sequence::{tokenize, Word};

pub fn phrase(source: &str, target: &str, start: usize) -> ConcreteOption {
    aligned_phrase(source, target, start, PhraseAlignment::none())
}

pub fn aligned_phrase(
    source: &str,
    target: &str,
    start: usize,
    alignment: PhraseAlignment,
) -> ConcreteOption {
    ConcreteOption::new(
        Arc::new(TranslationOption {
            source: tokenize(source),
            target: tokenize(target),
            scores: Arc::from(vec![-1.0f32]),
            score_names: Arc::from(vec!["p".to_string()]),
            alignment,
            table: Arc::from("tm"),
        }),
        start,
    )
}

/// Apply `options` in order from a fresh root; returns every hypothesis,
/// root first.
pub fn chain(ctx: &mut SentenceContext, options: &[ConcreteOption]) -> Vec<Arc<Hypothesis>> {
    let mut out = vec![ctx.root()];
    for option in options {
        let prior = Arc::clone(out.last().unwrap());
        let next = ctx.extend(&prior, option).unwrap().finish(Vec::new(), 0.0);
        out.push(next);
    }
    out
}

/// German→English toy table with a single `p` score.
pub fn toy_table() -> MemoryPhraseTable {
    let mut pt = MemoryPhraseTable::new("tm", &["p"]);
    for (src, tgt, p, align) in [
        ("das", "the", -0.2, "0-0"),
        ("das", "that", -0.9, "0-0"),
        ("kleine", "small", -0.3, "0-0"),
        ("kleine", "little", -0.6, "0-0"),
        ("haus", "house", -0.1, "0-0"),
        ("das kleine", "the small", -0.4, "0-0 1-1"),
        ("kleine haus", "small house", -0.2, "0-0 1-1"),
        ("ist", "is", -0.1, "0-0"),
    ] {
        pt.add(src, tgt, &[p], Some(align)).unwrap();
    }
    pt
}

/// Tags a word by its length class; the score depends on the window size.
pub struct ToyTagger;

impl Tagger for ToyTagger {
    fn best_tag(&self, context: &[Word]) -> (Word, f32) {
        let last = context.last().map_or(0, |w| w.len());
        let tag = if last <= 3 { "F" } else { "C" };
        (Word::new(tag), -0.1 * context.len() as f32)
    }
}

/// Arc scores from word lengths and distance only; counts exact parses.
#[derive(Default)]
pub struct ToyScorer {
    pub exact_calls: AtomicUsize,
}

impl EdgeScorer for ToyScorer {
    fn edge_score(
        &self,
        parse: &IncrementalParse,
        head: usize,
        modifier: usize,
        direction: Attachment,
    ) -> f32 {
        let h = parse.form(head).len() as f32;
        let m = parse.form(modifier).len() as f32;
        let dist = head.abs_diff(modifier) as f32;
        let bonus = match direction {
            Attachment::LeftHead => 0.25,
            Attachment::RightHead => 0.0,
        };
        -dist + 0.1 * (h - m) + bonus
    }

    fn exact_parse(&self, parse: &IncrementalParse) -> Option<FullParse> {
        self.exact_calls.fetch_add(1, Ordering::SeqCst);
        let mut score = 0.0f64;
        let mut heads = Vec::new();
        for m in 1..parse.len() {
            let (best, s) = (0..parse.len())
                .filter(|&h| h != m)
                .map(|h| {
                    let dir = if h < m {
                        Attachment::LeftHead
                    } else {
                        Attachment::RightHead
                    };
                    (h, self.edge_score(parse, h, m, dir))
                })
                .fold((0, f32::NEG_INFINITY), |a, b| if b.1 > a.1 { b } else { a });
            score += f64::from(s);
            heads.push(best.to_string());
        }
        Some(FullParse {
            tree: heads.join(" "),
            score,
        })
    }
}
