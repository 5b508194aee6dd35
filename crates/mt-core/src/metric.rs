//! Evaluation-metric collaborator interface and the built-in BLEU metric.
//!
//! An `IncrementalMetric` is the partial evaluation state of a document
//! being assembled translation by translation. Metric-driven selection
//! searches over these states and collapses equal ones through the metric's
//! own recombination filter.

use std::hash::{Hash, Hasher};
use std::path::Path;
use std::sync::Arc;

use rustc_hash::{FxHashMap, FxHasher};
use tracing::debug;

use crate::error::ConfigError;
use crate::recombination::RecombinationFilter;
use crate::sequence::{tokenize, Sequence, Word};

pub const BLEU: &str = "bleu";
pub const SMOOTH_BLEU: &str = "smoothbleu";

/// Partial metric state over translations `0..len()`.
pub trait IncrementalMetric: Clone + Send + Sync + 'static {
    /// Append the translation of the next sentence (`None` if missing).
    fn add(&mut self, translation: Option<&[Word]>);

    /// Swap the translation at `index`. Out-of-range indices are ignored.
    fn replace(&mut self, index: usize, translation: Option<&[Word]>);

    fn score(&self) -> f64;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

pub trait EvaluationMetric: Send + Sync {
    type State: IncrementalMetric;

    fn name(&self) -> &str;

    /// Empty incremental state.
    fn incremental(&self) -> Self::State;

    fn recombination_filter(&self) -> Arc<dyn RecombinationFilter<Self::State>>;

    /// Corpus score of a complete set of translations.
    fn score(&self, translations: &[Option<&[Word]>]) -> f64 {
        let mut state = self.incremental();
        for t in translations {
            state.add(*t);
        }
        state.score()
    }
}

/// A selection of one translation per sentence plus its metric state.
#[derive(Debug, Clone)]
pub struct MultiTranslationState<S> {
    selected: Vec<usize>,
    metric: S,
}

impl<S: IncrementalMetric> MultiTranslationState<S> {
    pub fn new(metric: S) -> Self {
        Self {
            selected: Vec::new(),
            metric,
        }
    }

    /// Chosen entry per list so far.
    pub fn selected(&self) -> &[usize] {
        &self.selected
    }

    pub fn metric(&self) -> &S {
        &self.metric
    }

    pub fn score(&self) -> f64 {
        self.metric.score()
    }

    /// This selection followed by `choice` for the next sentence.
    pub fn extended(&self, choice: usize, translation: Option<&[Word]>) -> Self {
        let mut next = self.clone();
        next.selected.push(choice);
        next.metric.add(translation);
        next
    }

    /// A sentence with no candidates: counted by the metric, not selected.
    pub fn skipped(&self) -> Self {
        let mut next = self.clone();
        next.metric.add(None);
        next
    }
}

// ---------------------------------------------------------------------------
// BLEU
// ---------------------------------------------------------------------------

const BLEU_ORDER: usize = 4;

#[derive(Debug, Default)]
struct SentenceReferences {
    /// n-gram → highest count in any single reference
    max_counts: FxHashMap<Vec<Word>, u32>,
    lengths: Vec<usize>,
}

impl SentenceReferences {
    fn new(references: &[Sequence], order: usize) -> Self {
        let mut max_counts: FxHashMap<Vec<Word>, u32> = FxHashMap::default();
        for reference in references {
            for (ngram, count) in ngram_counts(reference, order) {
                let slot = max_counts.entry(ngram.to_vec()).or_default();
                *slot = (*slot).max(count);
            }
        }
        Self {
            max_counts,
            lengths: references.iter().map(|r| r.len()).collect(),
        }
    }

    /// Reference length closest to `len`, the shorter one on ties.
    fn closest_length(&self, len: usize) -> usize {
        self.lengths
            .iter()
            .copied()
            .min_by_key(|&r| (r.abs_diff(len), r))
            .unwrap_or(0)
    }
}

fn ngram_counts(words: &[Word], order: usize) -> FxHashMap<&[Word], u32> {
    let mut counts = FxHashMap::default();
    for n in 1..=order {
        for ngram in words.windows(n) {
            *counts.entry(ngram).or_default() += 1;
        }
    }
    counts
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
struct BleuStats {
    matches: [u64; BLEU_ORDER],
    possible: [u64; BLEU_ORDER],
    candidate_len: u64,
    reference_len: u64,
}

impl BleuStats {
    fn of(candidate: &[Word], refs: &SentenceReferences) -> Self {
        let mut stats = Self {
            candidate_len: candidate.len() as u64,
            reference_len: refs.closest_length(candidate.len()) as u64,
            ..Self::default()
        };
        for (ngram, count) in ngram_counts(candidate, BLEU_ORDER) {
            let clip = refs.max_counts.get(ngram).copied().unwrap_or(0);
            stats.matches[ngram.len() - 1] += u64::from(count.min(clip));
        }
        for n in 1..=BLEU_ORDER {
            stats.possible[n - 1] = (candidate.len() + 1).saturating_sub(n) as u64;
        }
        stats
    }

    fn add(&mut self, other: &Self) {
        for n in 0..BLEU_ORDER {
            self.matches[n] += other.matches[n];
            self.possible[n] += other.possible[n];
        }
        self.candidate_len += other.candidate_len;
        self.reference_len += other.reference_len;
    }

    fn sub(&mut self, other: &Self) {
        for n in 0..BLEU_ORDER {
            self.matches[n] -= other.matches[n];
            self.possible[n] -= other.possible[n];
        }
        self.candidate_len -= other.candidate_len;
        self.reference_len -= other.reference_len;
    }
}

/// Corpus BLEU (4-gram, brevity penalty against the closest reference).
/// The smoothed variant adds one to the matched and possible counts of the
/// 2- to 4-gram precisions.
#[derive(Debug, Clone)]
pub struct BleuMetric {
    smooth: bool,
    references: Arc<[SentenceReferences]>,
}

impl BleuMetric {
    pub fn new(references: &[Vec<Sequence>], smooth: bool) -> Self {
        let references = references
            .iter()
            .map(|refs| SentenceReferences::new(refs, BLEU_ORDER))
            .collect();
        Self { smooth, references }
    }

    pub fn is_smooth(&self) -> bool {
        self.smooth
    }

    /// Number of sentences with references.
    pub fn len(&self) -> usize {
        self.references.len()
    }

    pub fn is_empty(&self) -> bool {
        self.references.is_empty()
    }
}

impl EvaluationMetric for BleuMetric {
    type State = BleuState;

    fn name(&self) -> &str {
        if self.smooth {
            SMOOTH_BLEU
        } else {
            BLEU
        }
    }

    fn incremental(&self) -> BleuState {
        BleuState {
            smooth: self.smooth,
            references: Arc::clone(&self.references),
            sentences: Vec::new(),
            totals: BleuStats::default(),
        }
    }

    fn recombination_filter(&self) -> Arc<dyn RecombinationFilter<BleuState>> {
        Arc::new(BleuRecombinationFilter)
    }
}

#[derive(Debug, Clone)]
pub struct BleuState {
    smooth: bool,
    references: Arc<[SentenceReferences]>,
    sentences: Vec<BleuStats>,
    totals: BleuStats,
}

impl BleuState {
    fn stats(&self, index: usize, translation: Option<&[Word]>) -> BleuStats {
        match (translation, self.references.get(index)) {
            (Some(t), Some(refs)) => BleuStats::of(t, refs),
            (Some(t), None) => BleuStats::of(t, &SentenceReferences::default()),
            (None, _) => BleuStats::default(),
        }
    }

    /// Modified n-gram precisions, after smoothing.
    pub fn precisions(&self) -> [f64; BLEU_ORDER] {
        let mut out = [0.0; BLEU_ORDER];
        for (n, p) in out.iter_mut().enumerate() {
            let (mut m, mut t) = (
                self.totals.matches[n] as f64,
                self.totals.possible[n] as f64,
            );
            if self.smooth && n > 0 {
                m += 1.0;
                t += 1.0;
            }
            *p = if t == 0.0 { 0.0 } else { m / t };
        }
        out
    }

    pub fn brevity_penalty(&self) -> f64 {
        let c = self.totals.candidate_len as f64;
        let r = self.totals.reference_len as f64;
        if c == 0.0 {
            0.0
        } else if c < r {
            (1.0 - r / c).exp()
        } else {
            1.0
        }
    }
}

impl IncrementalMetric for BleuState {
    fn add(&mut self, translation: Option<&[Word]>) {
        let stats = self.stats(self.sentences.len(), translation);
        self.totals.add(&stats);
        self.sentences.push(stats);
    }

    fn replace(&mut self, index: usize, translation: Option<&[Word]>) {
        if index >= self.sentences.len() {
            debug!(index, len = self.sentences.len(), "replace out of range");
            return;
        }
        let stats = self.stats(index, translation);
        self.totals.sub(&self.sentences[index]);
        self.totals.add(&stats);
        self.sentences[index] = stats;
    }

    fn score(&self) -> f64 {
        let precisions = self.precisions();
        if precisions.iter().any(|&p| p == 0.0) {
            return 0.0;
        }
        let log_mean = precisions.iter().map(|p| p.ln()).sum::<f64>() / BLEU_ORDER as f64;
        self.brevity_penalty() * log_mean.exp()
    }

    fn len(&self) -> usize {
        self.sentences.len()
    }
}

/// BLEU states with the same aggregate counts score every future extension
/// identically.
#[derive(Debug, Clone, Default)]
pub struct BleuRecombinationFilter;

impl RecombinationFilter<BleuState> for BleuRecombinationFilter {
    fn combinable(&self, a: &BleuState, b: &BleuState) -> bool {
        a.sentences.len() == b.sentences.len() && a.totals == b.totals
    }

    fn recombination_hash(&self, s: &BleuState) -> u64 {
        let mut hasher = FxHasher::default();
        s.sentences.len().hash(&mut hasher);
        s.totals.hash(&mut hasher);
        hasher.finish()
    }
}

// ---------------------------------------------------------------------------
// Factory
// ---------------------------------------------------------------------------

/// Build a metric by name over per-sentence reference lists.
pub fn metric(name: &str, references: &[Vec<Sequence>]) -> Result<BleuMetric, ConfigError> {
    let smooth = match name {
        BLEU => false,
        SMOOTH_BLEU => true,
        _ => return Err(ConfigError::UnknownMetric(name.to_string())),
    };
    debug!(metric = name, sentences = references.len());
    Ok(BleuMetric::new(references, smooth))
}

/// `metric` with references read by `load_references`.
pub fn metric_from_prefix(name: &str, prefix: &str) -> Result<BleuMetric, ConfigError> {
    if name != BLEU && name != SMOOTH_BLEU {
        return Err(ConfigError::UnknownMetric(name.to_string()));
    }
    let references = load_references(prefix)?;
    metric(name, &references)
}

/// Read references from `prefix`, or from `prefix0`, `prefix1`, ... up to the
/// first missing index. One sentence per line; every file must have the
/// same number of lines. Returns the references of each sentence.
pub fn load_references(prefix: &str) -> Result<Vec<Vec<Sequence>>, ConfigError> {
    let files: Vec<String> = if Path::new(prefix).exists() {
        vec![prefix.to_string()]
    } else {
        (0..)
            .map(|i| format!("{prefix}{i}"))
            .take_while(|p| Path::new(p).exists())
            .collect()
    };
    if files.is_empty() {
        return Err(ConfigError::MissingReferences(prefix.to_string()));
    }

    let mut sentences: Vec<Vec<Sequence>> = Vec::new();
    for (i, path) in files.iter().enumerate() {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::ReferenceIo {
            path: path.clone(),
            source,
        })?;
        let lines: Vec<&str> = content.lines().collect();
        if i == 0 {
            sentences = vec![Vec::with_capacity(files.len()); lines.len()];
        } else if lines.len() != sentences.len() {
            return Err(ConfigError::ReferenceLineCount {
                path: path.clone(),
                expected: sentences.len(),
                found: lines.len(),
            });
        }
        for (refs, line) in sentences.iter_mut().zip(lines) {
            refs.push(tokenize(line));
        }
    }
    debug!(prefix, files = files.len(), sentences = sentences.len(), "references loaded");
    Ok(sentences)
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    fn refs(sentences: &[&[&str]]) -> Vec<Vec<Sequence>> {
        sentences
            .iter()
            .map(|rs| rs.iter().map(|r| tokenize(r)).collect())
            .collect()
    }

    fn bleu(metric: &BleuMetric, candidates: &[&str]) -> f64 {
        let seqs: Vec<Sequence> = candidates.iter().map(|c| tokenize(c)).collect();
        let views: Vec<Option<&[Word]>> = seqs.iter().map(|s| Some(&s[..])).collect();
        metric.score(&views)
    }

    #[test]
    fn identical_translation_scores_one() {
        let m = BleuMetric::new(&refs(&[&["the small house is red"]]), false);
        assert!((bleu(&m, &["the small house is red"]) - 1.0).abs() < 1e-12);
    }

    #[test]
    fn brevity_penalty_for_short_output() {
        let m = BleuMetric::new(&refs(&[&["a b c d e f"]]), false);
        let score = bleu(&m, &["a b c d"]);
        assert!((score - (-0.5f64).exp()).abs() < 1e-12);
    }

    #[test]
    fn closest_reference_length_prefers_shorter_on_ties() {
        let r = SentenceReferences::new(&refs(&[&["a b", "a b c d e f"]])[0], BLEU_ORDER);
        assert_eq!(r.closest_length(4), 2);
        assert_eq!(r.closest_length(5), 6);
    }

    #[test]
    fn smoothing_keeps_short_matches_positive() {
        let references = refs(&[&["x y z w"]]);
        let plain = BleuMetric::new(&references, false);
        let smooth = BleuMetric::new(&references, true);
        assert_eq!(bleu(&plain, &["x y q z"]), 0.0);
        assert!(bleu(&smooth, &["x y q z"]) > 0.0);
        assert_eq!(smooth.name(), SMOOTH_BLEU);
    }

    #[test]
    fn counts_are_clipped() {
        let m = BleuMetric::new(&refs(&[&["the cat"]]), false);
        let mut s = m.incremental();
        s.add(Some(&tokenize("the the the")));
        assert_eq!(s.totals.matches[0], 1);
        assert_eq!(s.totals.possible[0], 3);
    }

    #[test]
    fn replace_restores_previous_score() {
        let m = BleuMetric::new(&refs(&[&["a b c d"], &["e f g h"]]), false);
        let mut s = m.incremental();
        s.add(Some(&tokenize("a b c d")));
        s.add(Some(&tokenize("e f g h")));
        let perfect = s.score();
        s.replace(1, Some(&tokenize("e x g h")));
        assert!(s.score() < perfect);
        s.replace(1, Some(&tokenize("e f g h")));
        assert_eq!(s.score(), perfect);
        s.replace(7, None);
        assert_eq!(s.len(), 2);
    }

    #[test]
    fn missing_translation_adds_nothing() {
        let m = BleuMetric::new(&refs(&[&["a b c d"]]), false);
        let mut s = m.incremental();
        s.add(None);
        assert_eq!(s.len(), 1);
        assert_eq!(s.score(), 0.0);
    }

    #[test]
    fn filter_compares_aggregate_counts() {
        let m = BleuMetric::new(&refs(&[&["a b c d"], &["a b c d"]]), false);
        let filter = m.recombination_filter();
        let mut x = m.incremental();
        x.add(Some(&tokenize("a b")));
        x.add(Some(&tokenize("c d")));
        let mut y = m.incremental();
        y.add(Some(&tokenize("c d")));
        y.add(Some(&tokenize("a b")));
        let mut z = m.incremental();
        z.add(Some(&tokenize("a b c")));
        z.add(Some(&tokenize("d")));

        assert!(filter.combinable(&x, &y));
        assert_eq!(filter.recombination_hash(&x), filter.recombination_hash(&y));
        assert!(!filter.combinable(&x, &z));
    }

    #[test]
    fn factory_names() {
        let references = refs(&[&["a"]]);
        assert!(!metric(BLEU, &references).unwrap().is_smooth());
        assert!(metric(SMOOTH_BLEU, &references).unwrap().is_smooth());
        let err = metric("ter", &references).unwrap_err();
        assert!(matches!(err, ConfigError::UnknownMetric(ref n) if n == "ter"));
        assert_eq!(err.to_string(), "unrecognized metric: ter");
    }

    fn write_file(path: &Path, lines: &[&str]) {
        let mut f = std::fs::File::create(path).unwrap();
        for l in lines {
            writeln!(f, "{l}").unwrap();
        }
    }

    #[test]
    fn load_single_reference_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ref");
        write_file(&path, &["a b", "c d e"]);
        let refs = load_references(path.to_str().unwrap()).unwrap();
        assert_eq!(refs.len(), 2);
        assert_eq!(refs[1].len(), 1);
        assert_eq!(refs[1][0].len(), 3);
    }

    #[test]
    fn load_numbered_reference_files() {
        let dir = tempfile::tempdir().unwrap();
        let prefix = dir.path().join("ref.");
        let prefix = prefix.to_str().unwrap();
        write_file(Path::new(&format!("{prefix}0")), &["a b", "c"]);
        write_file(Path::new(&format!("{prefix}1")), &["a x", "c y"]);
        // gap: ref.3 is never read
        write_file(Path::new(&format!("{prefix}3")), &["z"]);
        let refs = load_references(prefix).unwrap();
        assert_eq!(refs.len(), 2);
        assert_eq!(refs[0].len(), 2);
        assert_eq!(refs[1][1].len(), 2);

        let m = metric_from_prefix(BLEU, prefix).unwrap();
        assert_eq!(m.len(), 2);
    }

    #[test]
    fn load_rejects_missing_and_ragged() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nothing");
        let err = load_references(missing.to_str().unwrap()).unwrap_err();
        assert!(matches!(err, ConfigError::MissingReferences(_)));

        let prefix = dir.path().join("r");
        let prefix = prefix.to_str().unwrap();
        write_file(Path::new(&format!("{prefix}0")), &["a", "b"]);
        write_file(Path::new(&format!("{prefix}1")), &["a"]);
        let err = load_references(prefix).unwrap_err();
        assert!(matches!(
            err,
            ConfigError::ReferenceLineCount {
                expected: 2,
                found: 1,
                ..
            }
        ));
    }

    #[test]
    fn unknown_metric_checked_before_io() {
        let err = metric_from_prefix("ter", "/nonexistent/prefix").unwrap_err();
        assert!(matches!(err, ConfigError::UnknownMetric(_)));
    }
}
