use std::fmt;
use std::ops::Deref;
use std::sync::Arc;

use serde::{Serialize, Serializer};

/// A token. Cloning shares the underlying string, so partial translations
/// can be concatenated without copying word data.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Word(Arc<str>);

impl Word {
    pub fn new(s: &str) -> Self {
        Self(Arc::from(s))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Deref for Word {
    type Target = str;

    fn deref(&self) -> &str {
        &self.0
    }
}

impl From<&str> for Word {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for Word {
    fn from(s: String) -> Self {
        Self(Arc::from(s))
    }
}

impl fmt::Debug for Word {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", &*self.0)
    }
}

impl fmt::Display for Word {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Serialize for Word {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0)
    }
}

/// Immutable, shareable token sequence.
pub type Sequence = Arc<[Word]>;

/// Split whitespace-separated text into a sequence.
pub fn tokenize(text: &str) -> Sequence {
    text.split_whitespace().map(Word::new).collect()
}

/// Join words with a delimiter.
pub fn join(words: &[Word], delimiter: &str) -> String {
    let mut out = String::with_capacity(words.iter().map(|w| w.len() + delimiter.len()).sum());
    for (i, w) in words.iter().enumerate() {
        if i > 0 {
            out.push_str(delimiter);
        }
        out.push_str(w);
    }
    out
}
