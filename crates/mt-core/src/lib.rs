pub mod beam;
pub mod coverage;
pub mod decoder;
pub mod error;
pub mod feature;
pub mod featurizer;
pub mod hypothesis;
pub mod metric;
pub mod nbest;
pub mod phrase_table;
pub mod recombination;
pub mod scorer;
pub mod sequence;
pub mod settings;

#[cfg(test)]
mod testutil;

pub use decoder::{DecoderBuilder, DecoderCore, Sentence};
pub use error::{ConfigError, DecodeError};
pub use feature::FeatureValue;
pub use hypothesis::{Featurizable, Hypothesis, SentenceContext};
pub use nbest::{NBestList, ScoredFeaturizedTranslation};
pub use sequence::{Sequence, Word};
