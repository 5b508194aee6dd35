//! Phrase-table collaborator interface and translation options.
//!
//! The core never parses phrase-table files; `MemoryPhraseTable` exists so
//! callers (and tests) can hand the decoder a small table directly.

use std::sync::Arc;

use rustc_hash::FxHashMap;
use tracing::debug;

use crate::error::DecodeError;
use crate::sequence::{join, tokenize, Sequence, Word};

/// Table name carried by unknown-word pass-through options.
pub const UNKNOWN_PHRASE_TABLE_NAME: &str = "IdentityPhraseGenerator(Dyn)";

/// Word alignment inside a phrase pair: for each target word, the source
/// word offsets (relative to the phrase) it is aligned to.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct PhraseAlignment {
    e2f: Option<Vec<Vec<usize>>>,
}

impl PhraseAlignment {
    pub fn none() -> Self {
        Self { e2f: None }
    }

    pub fn new(e2f: Vec<Vec<usize>>) -> Self {
        Self { e2f: Some(e2f) }
    }

    /// Parse `"0-0 1-2"` (source-target pairs, Moses convention).
    pub fn parse(pairs: &str, target_len: usize) -> Option<Self> {
        let mut e2f = vec![Vec::new(); target_len];
        for pair in pairs.split_whitespace() {
            let (f, e) = pair.split_once('-')?;
            let f: usize = f.parse().ok()?;
            let e: usize = e.parse().ok()?;
            e2f.get_mut(e)?.push(f);
        }
        for links in &mut e2f {
            links.sort_unstable();
        }
        Some(Self::new(e2f))
    }

    pub fn has_alignment(&self) -> bool {
        self.e2f.is_some()
    }

    /// Number of target words the alignment describes.
    pub fn len(&self) -> usize {
        self.e2f.as_ref().map_or(0, Vec::len)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Source offsets aligned to target word `i`.
    pub fn e2f(&self, i: usize) -> Result<&[usize], DecodeError> {
        let e2f = self.e2f.as_deref().unwrap_or(&[]);
        e2f.get(i)
            .map(Vec::as_slice)
            .ok_or(DecodeError::AlignmentOutOfBounds {
                index: i,
                len: e2f.len(),
            })
    }

    /// Canonical rendering used as a feature-name suffix: `t-s` pairs joined
    /// by `_`, or `none` without alignment.
    pub fn constellation(&self) -> String {
        let Some(e2f) = &self.e2f else {
            return "none".to_string();
        };
        let mut parts = Vec::new();
        for (e, links) in e2f.iter().enumerate() {
            for f in links {
                parts.push(format!("{e}-{f}"));
            }
        }
        if parts.is_empty() {
            "empty".to_string()
        } else {
            parts.join("_")
        }
    }
}

/// A phrase-table entry: source phrase → target phrase with its scores.
#[derive(Debug, Clone)]
pub struct TranslationOption {
    pub source: Sequence,
    pub target: Sequence,
    pub scores: Arc<[f32]>,
    pub score_names: Arc<[String]>,
    pub alignment: PhraseAlignment,
    pub table: Arc<str>,
}

impl TranslationOption {
    /// Pass-through option for a word the tables cannot translate.
    pub fn unknown_word(word: Word) -> Self {
        let phrase: Sequence = Arc::from(vec![word]);
        Self {
            source: Arc::clone(&phrase),
            target: phrase,
            scores: Arc::from(Vec::new()),
            score_names: Arc::from(Vec::new()),
            alignment: PhraseAlignment::new(vec![vec![0]]),
            table: Arc::from(UNKNOWN_PHRASE_TABLE_NAME),
        }
    }

    pub fn is_unknown_word(&self) -> bool {
        &*self.table == UNKNOWN_PHRASE_TABLE_NAME
    }
}

/// An option anchored at a source position of the current sentence.
#[derive(Debug, Clone)]
pub struct ConcreteOption {
    pub option: Arc<TranslationOption>,
    pub source_start: usize,
}

impl ConcreteOption {
    pub fn new(option: Arc<TranslationOption>, source_start: usize) -> Self {
        Self {
            option,
            source_start,
        }
    }

    /// Exclusive end of the covered source span.
    pub fn source_end(&self) -> usize {
        self.source_start + self.option.source.len()
    }
}

pub trait PhraseTable: Send + Sync {
    fn translation_options(&self, source: &[Word]) -> Vec<Arc<TranslationOption>>;
    fn longest_source_phrase(&self) -> usize;
    fn score_names(&self) -> &[String];
    fn name(&self) -> &str;

    /// Every option for every span of `sentence`, anchored at its position.
    /// Words with no option of any length get an unknown-word pass-through.
    fn concrete_options(&self, sentence: &[Word]) -> Vec<ConcreteOption> {
        let longest = self.longest_source_phrase();
        let mut out = Vec::new();
        for start in 0..sentence.len() {
            let mut single_word_match = false;
            for end in (start + 1)..=(start + longest).min(sentence.len()) {
                for option in self.translation_options(&sentence[start..end]) {
                    single_word_match |= end == start + 1;
                    out.push(ConcreteOption::new(option, start));
                }
            }
            if !single_word_match {
                let option = TranslationOption::unknown_word(sentence[start].clone());
                out.push(ConcreteOption::new(Arc::new(option), start));
            }
        }
        debug!(table = self.name(), option_count = out.len());
        out
    }
}

/// In-memory phrase table.
pub struct MemoryPhraseTable {
    name: Arc<str>,
    score_names: Arc<[String]>,
    entries: FxHashMap<Vec<Word>, Vec<Arc<TranslationOption>>>,
    longest: usize,
}

impl MemoryPhraseTable {
    pub fn new(name: &str, score_names: &[&str]) -> Self {
        Self {
            name: Arc::from(name),
            score_names: score_names.iter().map(|s| s.to_string()).collect(),
            entries: FxHashMap::default(),
            longest: 0,
        }
    }

    /// Add a phrase pair. `alignment` uses the `"s-t s-t"` notation.
    pub fn add(
        &mut self,
        source: &str,
        target: &str,
        scores: &[f32],
        alignment: Option<&str>,
    ) -> Result<(), DecodeError> {
        if scores.len() != self.score_names.len() {
            return Err(DecodeError::ScoreCountMismatch {
                table: self.name.to_string(),
                scores: scores.len(),
                names: self.score_names.len(),
            });
        }
        let source = tokenize(source);
        let target = tokenize(target);
        let alignment = match alignment {
            Some(a) => PhraseAlignment::parse(a, target.len()).ok_or(
                DecodeError::AlignmentOutOfBounds {
                    index: target.len(),
                    len: target.len(),
                },
            )?,
            None => PhraseAlignment::none(),
        };
        self.longest = self.longest.max(source.len());
        let option = TranslationOption {
            source: Arc::clone(&source),
            target,
            scores: Arc::from(scores),
            score_names: Arc::clone(&self.score_names),
            alignment,
            table: Arc::clone(&self.name),
        };
        self.entries
            .entry(source.to_vec())
            .or_default()
            .push(Arc::new(option));
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.entries.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl PhraseTable for MemoryPhraseTable {
    fn translation_options(&self, source: &[Word]) -> Vec<Arc<TranslationOption>> {
        self.entries.get(source).cloned().unwrap_or_default()
    }

    fn longest_source_phrase(&self) -> usize {
        self.longest
    }

    fn score_names(&self) -> &[String] {
        &self.score_names
    }

    fn name(&self) -> &str {
        &self.name
    }
}

impl std::fmt::Display for TranslationOption {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} => {} [{}]",
            join(&self.source, " "),
            join(&self.target, " "),
            self.table
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_rejects_score_count_mismatch() {
        let mut pt = MemoryPhraseTable::new("tm1", &["p(e|f)", "p(f|e)"]);
        let err = pt.add("das", "the", &[0.5], None).unwrap_err();
        assert!(matches!(
            err,
            DecodeError::ScoreCountMismatch {
                scores: 1,
                names: 2,
                ..
            }
        ));
    }

    #[test]
    fn lookup_and_longest_phrase() {
        let mut pt = MemoryPhraseTable::new("tm1", &["p"]);
        pt.add("das haus", "the house", &[0.5], Some("0-0 1-1")).unwrap();
        pt.add("das", "the", &[0.7], None).unwrap();
        assert_eq!(pt.longest_source_phrase(), 2);
        assert_eq!(pt.len(), 2);
        let opts = pt.translation_options(&tokenize("das haus"));
        assert_eq!(opts.len(), 1);
        assert_eq!(opts[0].to_string(), "das haus => the house [tm1]");
        assert!(pt.translation_options(&tokenize("haus")).is_empty());
    }

    #[test]
    fn concrete_options_add_unknown_words() {
        let mut pt = MemoryPhraseTable::new("tm1", &["p"]);
        pt.add("das haus", "the house", &[0.5], None).unwrap();
        pt.add("ist", "is", &[0.9], None).unwrap();
        let opts = pt.concrete_options(&tokenize("das haus ist"));
        // das haus (0), unknown das (0), unknown haus (1), ist (2)
        assert_eq!(opts.len(), 4);
        let unknown: Vec<usize> = opts
            .iter()
            .filter(|o| o.option.is_unknown_word())
            .map(|o| o.source_start)
            .collect();
        assert_eq!(unknown, vec![0, 1]);
        assert_eq!(opts[0].source_end(), 2);
    }

    #[test]
    fn alignment_parse_and_constellation() {
        let a = PhraseAlignment::parse("1-0 0-1 2-1", 2).unwrap();
        assert_eq!(a.e2f(0).unwrap(), &[1]);
        assert_eq!(a.e2f(1).unwrap(), &[0, 2]);
        assert_eq!(a.constellation(), "0-1_1-0_1-2");
        assert!(matches!(
            a.e2f(2),
            Err(DecodeError::AlignmentOutOfBounds { index: 2, len: 2 })
        ));
        assert!(PhraseAlignment::parse("0-5", 2).is_none());
        assert_eq!(PhraseAlignment::none().constellation(), "none");
    }
}
