use crate::error::ConfigError;
use crate::settings::settings;

/// Flags parsed from the colon-separated dependency option string.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DependencyOptions {
    /// Keep the raw `:argmax` score next to the normalised ones.
    pub both: bool,
    pub local: bool,
    pub local_inv: bool,
    pub normalize: bool,
    pub mst_score: bool,
    pub pos_score: bool,
    pub debug: bool,
    pub verbose_debug: bool,
    pub matrix: bool,
}

impl DependencyOptions {
    /// Parse e.g. `"local:mstScore"`. Empty segments are ignored.
    pub fn parse(input: &str) -> Result<Self, ConfigError> {
        let mut opts = Self::default();
        for token in input.split(':').map(str::trim).filter(|t| !t.is_empty()) {
            let flag = match token {
                "both" => &mut opts.both,
                "local" => &mut opts.local,
                "localInv" => &mut opts.local_inv,
                "normalize" => &mut opts.normalize,
                "mstScore" => &mut opts.mst_score,
                "posScore" => &mut opts.pos_score,
                "debug" => &mut opts.debug,
                "verboseDebug" => &mut opts.verbose_debug,
                "matrix" => &mut opts.matrix,
                _ => {
                    return Err(ConfigError::InvalidOption {
                        option: token.to_string(),
                        input: input.to_string(),
                    })
                }
            };
            *flag = true;
        }
        Ok(opts)
    }

    /// The raw argmax score is dropped only when both normalised variants
    /// replace it.
    pub fn raw_argmax(&self) -> bool {
        self.both || !self.local || !self.local_inv
    }

    /// Local sub-feature suffixes, in value order.
    pub fn local_suffixes(&self) -> Vec<&'static str> {
        let mut out = Vec::with_capacity(4);
        if self.raw_argmax() {
            out.push(":argmax");
        }
        if self.local {
            out.push(":largmax");
        }
        if self.local_inv {
            out.push(":nlargmax");
        }
        if self.pos_score {
            out.push(":pos");
        }
        out
    }

    /// Local values for one expansion, aligned with `local_suffixes`.
    pub fn local_values(&self, tag_score: f32, dep_score: f32) -> Vec<f32> {
        let mut out = Vec::with_capacity(4);
        if self.raw_argmax() {
            out.push(dep_score);
        }
        if self.local {
            out.push(log_sigmoid(dep_score));
        }
        if self.local_inv {
            out.push(log_sigmoid(-dep_score));
        }
        if self.pos_score {
            out.push(tag_score);
        }
        out
    }
}

fn log_sigmoid(v: f32) -> f32 {
    // log(e^v / (1 + e^v)), split by sign so exp never overflows
    if v >= 0.0 {
        -(-v).exp().ln_1p()
    } else {
        v - v.exp().ln_1p()
    }
}

#[derive(Debug, Clone)]
pub struct DependencyConfig {
    /// Tagger left-context window.
    pub left_words: usize,
    pub cache_partial: bool,
    pub delayed: bool,
    pub feature_prefix: String,
    pub options: DependencyOptions,
}

impl DependencyConfig {
    pub fn from_settings() -> Result<Self, ConfigError> {
        let s = &settings().dependency;
        Ok(Self {
            left_words: s.left_words,
            cache_partial: s.cache_partial,
            delayed: s.delayed,
            feature_prefix: s.feature_prefix.clone(),
            options: DependencyOptions::parse(&s.options)?,
        })
    }
}

impl Default for DependencyConfig {
    fn default() -> Self {
        Self {
            left_words: 3,
            cache_partial: false,
            delayed: true,
            feature_prefix: "DLM".to_string(),
            options: DependencyOptions::default(),
        }
    }
}
