//! Error taxonomy for the decoding core.
//!
//! `ConfigError` is raised while assembling components and aborts the run.
//! `DecodeError` signals a broken invariant between the search layer and the
//! featurizers and aborts the current sentence. Routine conditions such as an
//! unknown-word option or a cache miss are never errors.

use std::io;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid beam capacity, {0}. Beam capacity must be > 0")]
    InvalidBeamCapacity(i64),

    #[error("unrecognized metric: {0}")]
    UnknownMetric(String),

    #[error("unknown option '{option}' in featurizer option string '{input}'")]
    InvalidOption { option: String, input: String },

    #[error("invalid reference prefix: {0} (file/files not found)")]
    MissingReferences(String),

    #[error("reading references from {path}: {source}")]
    ReferenceIo {
        path: String,
        #[source]
        source: io::Error,
    },

    #[error("reference file {path} has {found} lines, expected {expected}")]
    ReferenceLineCount {
        path: String,
        expected: usize,
        found: usize,
    },

    #[error("feature namespace '{0}' is claimed by more than one featurizer")]
    DuplicateNamespace(String),

    #[error("can't cache target-side dependency state when scoring also depends on the source")]
    BilingualSignatureCache,

    #[error(transparent)]
    Settings(#[from] crate::settings::SettingsError),
}

#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("alignment index {index} out of bounds for target phrase of length {len}")]
    AlignmentOutOfBounds { index: usize, len: usize },

    #[error("phrase table '{table}' has {scores} scores but declares {names} score names")]
    ScoreCountMismatch {
        table: String,
        scores: usize,
        names: usize,
    },

    #[error("{featurizer}: no cached state for hypothesis {id}")]
    MissingState { featurizer: String, id: u64 },

    #[error("source span {start}..{end} overlaps coverage or exceeds sentence length {len}")]
    InvalidSpan { start: usize, end: usize, len: usize },

    #[error("hypothesis {0} already covers the whole source sentence")]
    AlreadyComplete(u64),

    #[error("source parse for translation {id} not available ({available} loaded)")]
    MissingSourceParse { id: usize, available: usize },
}
