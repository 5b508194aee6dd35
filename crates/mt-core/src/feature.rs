use std::fmt;
use std::sync::Arc;

use rustc_hash::FxHashMap;
use serde::Serialize;

/// Separator between the featurizer family prefix and the rest of a name.
pub const NAMESPACE_SEPARATOR: char = ':';

/// A named score contribution.
///
/// `name == None` contributes to the total score but is not tracked
/// individually (and is dropped from sparse output).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FeatureValue {
    #[serde(serialize_with = "serialize_name")]
    pub name: Option<Arc<str>>,
    pub value: f64,
}

fn serialize_name<S: serde::Serializer>(
    name: &Option<Arc<str>>,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    match name {
        Some(n) => serializer.serialize_some(&**n),
        None => serializer.serialize_none(),
    }
}

impl FeatureValue {
    pub fn new(name: impl Into<Arc<str>>, value: f64) -> Self {
        Self {
            name: Some(name.into()),
            value,
        }
    }

    pub fn unnamed(value: f64) -> Self {
        Self { name: None, value }
    }

    /// Placeholder for a requested score that is not available.
    pub fn neutral() -> Self {
        Self::unnamed(0.0)
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// The `<PREFIX>` part of a namespaced name.
    pub fn prefix(&self) -> Option<&str> {
        self.name()
            .and_then(|n| n.split_once(NAMESPACE_SEPARATOR).map(|(p, _)| p))
    }
}

impl fmt::Display for FeatureValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.name {
            Some(n) => write!(f, "{}: {}", n, self.value),
            None => write!(f, "<unnamed>: {}", self.value),
        }
    }
}

/// `<prefix>:<rest>`
pub fn namespaced(prefix: &str, rest: &str) -> String {
    format!("{prefix}{NAMESPACE_SEPARATOR}{rest}")
}

/// Sum feature values by name, keeping the order of first appearance.
///
/// Unnamed values are folded into a single trailing unnamed entry;
/// zero-valued named totals are omitted.
pub fn aggregate<'a, I>(values: I) -> Vec<FeatureValue>
where
    I: IntoIterator<Item = &'a FeatureValue>,
{
    let mut index: FxHashMap<Arc<str>, usize> = FxHashMap::default();
    let mut named: Vec<FeatureValue> = Vec::new();
    let mut unnamed = 0.0;
    let mut saw_unnamed = false;
    for fv in values {
        match &fv.name {
            Some(name) => match index.get(name) {
                Some(&i) => named[i].value += fv.value,
                None => {
                    index.insert(Arc::clone(name), named.len());
                    named.push(fv.clone());
                }
            },
            None => {
                unnamed += fv.value;
                saw_unnamed = true;
            }
        }
    }
    named.retain(|fv| fv.value != 0.0);
    if saw_unnamed && unnamed != 0.0 {
        named.push(FeatureValue::unnamed(unnamed));
    }
    named
}
