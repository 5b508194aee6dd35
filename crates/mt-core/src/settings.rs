//! Global settings loaded from TOML.
//!
//! - `init_custom(toml_content)` sets a custom TOML before first `settings()` call
//! - `settings()` returns `&'static Settings` (lazy-init singleton)
//! - Default values are embedded via `include_str!("default_settings.toml")`
//!
//! Settings are read-only once loaded, so every decoding task may consult them.
//! Components take explicit parameters and only fall back to these values.

use std::sync::OnceLock;

use serde::Deserialize;

pub const DEFAULT_SETTINGS_TOML: &str = include_str!("default_settings.toml");

static CUSTOM_TOML: OnceLock<String> = OnceLock::new();

/// Set custom TOML before first `settings()` call.
pub fn init_custom(toml_content: String) -> Result<(), SettingsError> {
    parse_settings_toml(&toml_content)?;
    CUSTOM_TOML
        .set(toml_content)
        .map_err(|_| SettingsError::AlreadyInitialized)
}

/// Get or initialize the global settings singleton.
pub fn settings() -> &'static Settings {
    static INSTANCE: OnceLock<Settings> = OnceLock::new();
    INSTANCE.get_or_init(|| {
        let toml_str = CUSTOM_TOML
            .get()
            .map(|s| s.as_str())
            .unwrap_or(DEFAULT_SETTINGS_TOML);
        parse_settings_toml(toml_str).expect("settings TOML must be valid")
    })
}

/// Returns the embedded default settings TOML content.
pub fn default_toml() -> &'static str {
    DEFAULT_SETTINGS_TOML
}

#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error("TOML parse error: {0}")]
    Parse(String),
    #[error("invalid value for {field}: {reason}")]
    InvalidValue { field: String, reason: String },
    #[error("settings already initialized")]
    AlreadyInitialized,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub beam: BeamSettings,
    pub recombination: RecombinationSettings,
    pub dependency: DependencySettings,
    pub phrase_table: PhraseTableSettings,
    pub nbest: NBestSettings,
    pub trace: TraceSettings,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BeamSettings {
    pub capacity: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RecombinationSettings {
    pub ngram_order: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DependencySettings {
    pub left_words: usize,
    pub cache_partial: bool,
    pub delayed: bool,
    pub feature_prefix: String,
    #[serde(default)]
    pub options: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PhraseTableSettings {
    pub tag_by_table: bool,
    pub reweighting: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NBestSettings {
    pub size: usize,
}

/// Used by the `trace` feature of the engine crate.
#[derive(Debug, Clone, Deserialize)]
pub struct TraceSettings {
    /// Log file created inside the directory given to `init_tracing`.
    pub file_name: String,
    /// Filter directives applied when `RUST_LOG` is unset.
    pub filter: String,
}

pub fn parse_settings_toml(toml_str: &str) -> Result<Settings, SettingsError> {
    let s: Settings =
        toml::from_str(toml_str).map_err(|e| SettingsError::Parse(e.to_string()))?;
    validate(&s)?;
    Ok(s)
}

fn validate(s: &Settings) -> Result<(), SettingsError> {
    macro_rules! check_positive_usize {
        ($section:ident . $field:ident) => {
            if s.$section.$field == 0 {
                return Err(SettingsError::InvalidValue {
                    field: concat!(stringify!($section), ".", stringify!($field)).to_string(),
                    reason: "must be positive".to_string(),
                });
            }
        };
    }

    if s.beam.capacity <= 0 {
        return Err(SettingsError::InvalidValue {
            field: "beam.capacity".to_string(),
            reason: format!("beam capacity must be > 0, got {}", s.beam.capacity),
        });
    }
    check_positive_usize!(recombination.ngram_order);
    check_positive_usize!(dependency.left_words);
    check_positive_usize!(nbest.size);

    if s.dependency.feature_prefix.is_empty() || s.dependency.feature_prefix.contains(':') {
        return Err(SettingsError::InvalidValue {
            field: "dependency.feature_prefix".to_string(),
            reason: "must be a non-empty name without ':'".to_string(),
        });
    }

    let file_name = &s.trace.file_name;
    if file_name.is_empty() || file_name.contains(|c: char| c == '/' || c == '\\') {
        return Err(SettingsError::InvalidValue {
            field: "trace.file_name".to_string(),
            reason: format!("must be a plain file name, got {file_name:?}"),
        });
    }

    Ok(())
}
