use std::fmt::Write as _;
use std::sync::Arc;

use crate::sequence::Word;

pub const ROOT_FORM: &str = "<root>";
pub const ROOT_TAG: &str = "<root-POS>";

/// Which side of the pair holds the head.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Attachment {
    /// The right word modifies the left word.
    LeftHead,
    /// The left word modifies the right word.
    RightHead,
}

/// Incremental part-of-speech tagger, treated as a pure function.
pub trait Tagger: Send + Sync {
    /// Best tag for the last word of `context`, with its score.
    fn best_tag(&self, context: &[Word]) -> (Word, f32);
}

/// Exact full-sentence parse result.
#[derive(Debug, Clone, PartialEq)]
pub struct FullParse {
    pub tree: String,
    pub score: f64,
}

/// Arc-factored dependency model, treated as a pure function.
pub trait EdgeScorer: Send + Sync {
    fn edge_score(
        &self,
        parse: &IncrementalParse,
        head: usize,
        modifier: usize,
        direction: Attachment,
    ) -> f32;

    /// One exact (non-incremental) parse of a complete sentence. `None` if
    /// the model cannot decode exactly.
    fn exact_parse(&self, parse: &IncrementalParse) -> Option<FullParse>;
}

/// Source-side dependency analysis used by bilingual edge features.
#[derive(Debug, Clone, Default)]
pub struct SourceParse {
    pub forms: Vec<Word>,
    pub tags: Vec<Word>,
    pub heads: Vec<Option<usize>>,
}

#[derive(Debug, Clone)]
pub struct ParseToken {
    pub form: Word,
    pub tag: Word,
    /// Aligned source positions (1-based, 0 is the source root).
    pub alignment: Vec<usize>,
    pub head: Option<usize>,
    pub head_score: f32,
}

/// Dependency structure of a partial translation, grown one phrase at a time.
///
/// Index 0 is the artificial root; word `k` of the translation is token
/// `k + 1`. Heads hold the best-scoring attachment found so far, not a
/// tree-constrained parse.
#[derive(Debug, Clone)]
pub struct IncrementalParse {
    tokens: Vec<ParseToken>,
    source: Option<Arc<SourceParse>>,
}

impl Default for IncrementalParse {
    fn default() -> Self {
        Self::new()
    }
}

impl IncrementalParse {
    pub fn new() -> Self {
        Self {
            tokens: vec![ParseToken {
                form: Word::new(ROOT_FORM),
                tag: Word::new(ROOT_TAG),
                alignment: Vec::new(),
                head: None,
                head_score: f32::NEG_INFINITY,
            }],
            source: None,
        }
    }

    pub fn set_source(&mut self, source: Arc<SourceParse>) {
        self.source = Some(source);
    }

    pub fn source(&self) -> Option<&SourceParse> {
        self.source.as_deref()
    }

    pub fn push(&mut self, form: Word, tag: Word, alignment: Vec<usize>) {
        self.tokens.push(ParseToken {
            form,
            tag,
            alignment,
            head: None,
            head_score: f32::NEG_INFINITY,
        });
    }

    /// Token count including the root.
    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    /// True when only the root is present.
    pub fn is_empty(&self) -> bool {
        self.tokens.len() == 1
    }

    pub fn token(&self, i: usize) -> &ParseToken {
        &self.tokens[i]
    }

    pub fn form(&self, i: usize) -> &Word {
        &self.tokens[i].form
    }

    pub fn tag(&self, i: usize) -> &Word {
        &self.tokens[i].tag
    }

    pub fn head(&self, i: usize) -> Option<usize> {
        self.tokens[i].head
    }

    pub fn head_score(&self, i: usize) -> f32 {
        self.tokens[i].head_score
    }

    pub fn set_head(&mut self, i: usize, head: usize, score: f32) {
        self.tokens[i].head = Some(head);
        self.tokens[i].head_score = score;
    }

    /// Words of the translation, root excluded.
    pub fn forms(&self) -> impl Iterator<Item = &Word> {
        self.tokens[1..].iter().map(|t| &t.form)
    }

    /// Space-joined words, root excluded.
    pub fn sentence(&self) -> String {
        self.forms()
            .map(Word::as_str)
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// CoNLL-style rows: index, form, tag, head (0 = root, `_` if none).
    pub fn to_conll(&self) -> String {
        let mut out = String::new();
        for (i, t) in self.tokens.iter().enumerate().skip(1) {
            let head = t.head.map_or("_".to_string(), |h| h.to_string());
            let _ = writeln!(out, "{i}\t{}\t{}\t{head}\t{:.3}", t.form, t.tag, t.head_score);
        }
        out
    }
}

/// Re-evaluate attachments for modifiers `from..to`, keeping for every token
/// its best head so far. Returns the sum of positive score improvements
/// (the full score for a token's first head); attachments of the root
/// itself are tracked but not counted.
pub fn attach_span(
    parse: &mut IncrementalParse,
    scorer: &dyn EdgeScorer,
    from: usize,
    to: usize,
) -> f32 {
    let mut gain = 0.0f32;
    for j in from..to {
        for i in 0..j {
            let old_left = parse.head_score(i);
            let old_right = parse.head_score(j);
            let s_left = scorer.edge_score(parse, j, i, Attachment::RightHead);
            let s_right = scorer.edge_score(parse, i, j, Attachment::LeftHead);
            if s_left > old_left {
                if i > 0 {
                    gain += improvement(old_left, s_left);
                }
                parse.set_head(i, j, s_left);
            }
            if s_right > old_right {
                gain += improvement(old_right, s_right);
                parse.set_head(j, i, s_right);
            }
        }
    }
    gain
}

fn improvement(old: f32, new: f32) -> f32 {
    if old.is_finite() {
        new - old
    } else {
        new
    }
}
