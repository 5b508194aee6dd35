use crate::hypothesis::HypothesisId;

/// Per-hypothesis values stored outside the hypothesis, indexed by identity.
///
/// Identities are dense and start at `offset` for the owning sentence, so a
/// `Vec` slot per id is enough. Must be cleared at sentence boundaries:
/// identities restart with every `SentenceContext`.
#[derive(Debug, Clone)]
pub struct IdentityCache<V> {
    offset: HypothesisId,
    values: Vec<Option<V>>,
}

impl<V> Default for IdentityCache<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V> IdentityCache<V> {
    pub fn new() -> Self {
        Self::with_offset(0)
    }

    pub fn with_offset(offset: HypothesisId) -> Self {
        Self {
            offset,
            values: Vec::new(),
        }
    }

    fn slot(&self, id: HypothesisId) -> Option<usize> {
        id.checked_sub(self.offset).map(|i| i as usize)
    }

    /// Store `value` for `id`. Ids below the offset are ignored.
    pub fn put(&mut self, id: HypothesisId, value: V) {
        let Some(idx) = self.slot(id) else {
            return;
        };
        if self.values.len() <= idx {
            self.values.resize_with(idx + 1, || None);
        }
        self.values[idx] = Some(value);
    }

    pub fn get(&self, id: HypothesisId) -> Option<&V> {
        self.slot(id)
            .and_then(|idx| self.values.get(idx))
            .and_then(Option::as_ref)
    }

    pub fn contains(&self, id: HypothesisId) -> bool {
        self.get(id).is_some()
    }

    /// Number of stored values.
    pub fn len(&self) -> usize {
        self.values.iter().filter(|v| v.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.values.iter().all(Option::is_none)
    }

    pub fn clear(&mut self) {
        self.values.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn never_returns_unstored_ids() {
        let mut cache = IdentityCache::new();
        cache.put(5, "five");
        assert_eq!(cache.get(5), Some(&"five"));
        for id in [0, 1, 4, 6, 1000] {
            assert_eq!(cache.get(id), None, "id {id}");
        }
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn offset_and_overwrite() {
        let mut cache = IdentityCache::with_offset(10);
        cache.put(3, 'x');
        assert!(cache.is_empty());
        cache.put(10, 'a');
        cache.put(12, 'b');
        cache.put(12, 'c');
        assert_eq!(cache.get(10), Some(&'a'));
        assert_eq!(cache.get(11), None);
        assert_eq!(cache.get(12), Some(&'c'));
        assert!(cache.contains(10));
        cache.clear();
        assert!(cache.is_empty());
        assert_eq!(cache.get(10), None);
    }
}
