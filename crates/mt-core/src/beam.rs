//! Capacity-bounded, score-ordered hypothesis collections.

use std::num::NonZeroUsize;
use std::sync::Arc;

use tracing::debug;

use crate::error::ConfigError;
use crate::hypothesis::Hypothesis;
use crate::metric::{IncrementalMetric, MultiTranslationState};
use crate::recombination::RecombinationFilter;
use crate::settings::settings;

pub trait Scored {
    fn score(&self) -> f64;
}

impl Scored for Hypothesis {
    fn score(&self) -> f64 {
        Hypothesis::score(self)
    }
}

impl<S: IncrementalMetric> Scored for MultiTranslationState<S> {
    fn score(&self) -> f64 {
        MultiTranslationState::score(self)
    }
}

/// What happened to an inserted item.
#[derive(Debug)]
pub enum Insertion<T> {
    Added,
    /// Merged with an equivalent entry; only `kept` stays in the beam.
    Recombined { kept: Arc<T>, dropped: Arc<T> },
    /// The beam overflowed and this item was pruned; it may be the one just
    /// inserted.
    Evicted(Arc<T>),
}

struct BeamEntry<T> {
    hash: u64,
    item: Arc<T>,
}

/// Items sorted by descending score, at most `capacity` of them, no two of
/// them combinable under the beam's filter.
pub struct Beam<T> {
    capacity: usize,
    entries: Vec<BeamEntry<T>>,
    filter: Arc<dyn RecombinationFilter<T>>,
}

impl<T: Scored> Beam<T> {
    pub fn new(capacity: NonZeroUsize, filter: Arc<dyn RecombinationFilter<T>>) -> Self {
        let capacity = capacity.get();
        Self {
            capacity,
            entries: Vec::with_capacity(capacity.min(1024) + 1),
            filter,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Items, best first.
    pub fn iter(&self) -> impl Iterator<Item = &Arc<T>> {
        self.entries.iter().map(|e| &e.item)
    }

    pub fn best(&self) -> Option<&Arc<T>> {
        self.entries.first().map(|e| &e.item)
    }

    pub fn into_sorted_vec(self) -> Vec<Arc<T>> {
        self.entries.into_iter().map(|e| e.item).collect()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Recombine first, then prune to capacity.
    pub fn insert(&mut self, item: Arc<T>) -> Insertion<T> {
        let hash = self.filter.recombination_hash(&item);
        let existing = self
            .entries
            .iter()
            .position(|e| e.hash == hash && self.filter.combinable(&e.item, &item));
        if let Some(i) = existing {
            if item.score() > self.entries[i].item.score() {
                let old = self.entries.remove(i);
                self.place(hash, Arc::clone(&item));
                return Insertion::Recombined {
                    kept: item,
                    dropped: old.item,
                };
            }
            return Insertion::Recombined {
                kept: Arc::clone(&self.entries[i].item),
                dropped: item,
            };
        }

        let pos = self.slot(item.score());
        if pos >= self.capacity {
            return Insertion::Evicted(item);
        }
        self.entries.insert(pos, BeamEntry { hash, item });
        if self.entries.len() > self.capacity {
            if let Some(victim) = self.entries.pop() {
                return Insertion::Evicted(victim.item);
            }
        }
        Insertion::Added
    }

    fn place(&mut self, hash: u64, item: Arc<T>) {
        let pos = self.slot(item.score());
        self.entries.insert(pos, BeamEntry { hash, item });
    }

    /// Insertion index for `score`; NaN sorts after every number.
    fn slot(&self, score: f64) -> usize {
        self.entries
            .partition_point(|e| score.is_nan() || e.item.score() >= score)
    }
}

/// Beam capacities come from configuration as signed values.
pub fn checked_capacity(capacity: i64) -> Result<NonZeroUsize, ConfigError> {
    usize::try_from(capacity)
        .ok()
        .and_then(NonZeroUsize::new)
        .ok_or(ConfigError::InvalidBeamCapacity(capacity))
}

/// One beam per search rank (the decoder ranks hypotheses by the number of
/// covered source words).
pub struct BeamManager<T> {
    capacity: NonZeroUsize,
    filter: Arc<dyn RecombinationFilter<T>>,
    beams: Vec<Beam<T>>,
    recombined: usize,
    evicted: usize,
}

impl<T: Scored> BeamManager<T> {
    pub fn new(capacity: i64, filter: Arc<dyn RecombinationFilter<T>>) -> Result<Self, ConfigError> {
        Ok(Self::with_capacity(checked_capacity(capacity)?, filter))
    }

    pub fn with_capacity(capacity: NonZeroUsize, filter: Arc<dyn RecombinationFilter<T>>) -> Self {
        Self {
            capacity,
            filter,
            beams: Vec::new(),
            recombined: 0,
            evicted: 0,
        }
    }

    pub fn from_settings(filter: Arc<dyn RecombinationFilter<T>>) -> Result<Self, ConfigError> {
        Self::new(settings().beam.capacity, filter)
    }

    pub fn capacity(&self) -> usize {
        self.capacity.get()
    }

    pub fn insert(&mut self, rank: usize, item: Arc<T>) -> Insertion<T> {
        while self.beams.len() <= rank {
            self.beams
                .push(Beam::new(self.capacity, Arc::clone(&self.filter)));
        }
        let outcome = self.beams[rank].insert(item);
        match &outcome {
            Insertion::Added => {}
            Insertion::Recombined { kept, dropped } => {
                self.recombined += 1;
                debug!(rank, kept = kept.score(), dropped = dropped.score(), "recombined");
            }
            Insertion::Evicted(victim) => {
                self.evicted += 1;
                debug!(rank, score = victim.score(), "evicted");
            }
        }
        outcome
    }

    pub fn beam(&self, rank: usize) -> Option<&Beam<T>> {
        self.beams.get(rank)
    }

    /// Ranks seen so far, including empty ones below the highest.
    pub fn ranks(&self) -> usize {
        self.beams.len()
    }

    pub fn recombined(&self) -> usize {
        self.recombined
    }

    pub fn evicted(&self) -> usize {
        self.evicted
    }

    pub fn clear(&mut self) {
        self.beams.clear();
        self.recombined = 0;
        self.evicted = 0;
    }
}
