//! Phrase-based decoding engine: the `mt_core` decoding core plus
//! sentence-parallel decoding and tracing setup.

pub mod parallel;
pub mod trace_init;

pub use mt_core;
pub use mt_core::{
    ConfigError, DecodeError, DecoderBuilder, DecoderCore, FeatureValue, NBestList,
    ScoredFeaturizedTranslation, Sequence, Word,
};
pub use parallel::{DecodeResult, JobError, ParallelDecoder, ParallelError};
pub use trace_init::init_tracing;
