/// Set of source positions already translated (`true` = covered).
///
/// Fixed length: the source sentence length. Stored as 64-bit blocks so that
/// equality and hashing are cheap for recombination.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Coverage {
    blocks: Vec<u64>,
    len: usize,
}

impl Coverage {
    pub fn new(len: usize) -> Self {
        Self {
            blocks: vec![0; len.div_ceil(64)],
            len,
        }
    }

    /// Source sentence length.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn get(&self, pos: usize) -> bool {
        pos < self.len && self.blocks[pos / 64] & (1 << (pos % 64)) != 0
    }

    /// Number of covered positions.
    pub fn cardinality(&self) -> usize {
        self.blocks.iter().map(|b| b.count_ones() as usize).sum()
    }

    pub fn is_complete(&self) -> bool {
        self.cardinality() == self.len
    }

    /// True if any position in `start..end` is already covered.
    pub fn overlaps(&self, start: usize, end: usize) -> bool {
        (start..end.min(self.len)).any(|p| self.get(p))
    }

    /// Copy with `start..end` marked covered. Caller checks bounds.
    pub fn with_span(&self, start: usize, end: usize) -> Self {
        debug_assert!(
            end <= self.len,
            "span end {end} past coverage length {}",
            self.len
        );
        let mut next = self.clone();
        for pos in start..end {
            next.blocks[pos / 64] |= 1 << (pos % 64);
        }
        next
    }

    /// First covered position at or after `from`.
    pub fn next_set_bit(&self, from: usize) -> Option<usize> {
        (from..self.len).find(|&p| self.get(p))
    }

    /// First uncovered position at or after `from`; `len()` when none is left.
    pub fn next_clear_bit(&self, from: usize) -> usize {
        (from..self.len).find(|&p| !self.get(p)).unwrap_or(self.len.max(from))
    }

    /// True if every position covered by `other` is covered here too.
    pub fn is_superset_of(&self, other: &Coverage) -> bool {
        self.len == other.len
            && self
                .blocks
                .iter()
                .zip(&other.blocks)
                .all(|(mine, theirs)| mine & theirs == *theirs)
    }
}
