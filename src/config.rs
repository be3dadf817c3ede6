//! Configuration (§6 expansion): CLI flags > `logpress.toml` > built-in
//! defaults, the same three-tier precedence the CLI config in this
//! codebase's lineage uses.

use std::fs;
use std::path::Path;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{IngestError, LogPressError};
use crate::semantic::{Priority, RecognizerBuilder, DEFAULT_THRESHOLD};
use crate::template::DEFAULT_MIN_SUPPORT;

/// One user-defined semantic rule, as it appears in `logpress.toml` or is
/// built up by repeated `--custom-type` flags (§9 Open Questions).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CustomTypeSpec {
    pub name: String,
    pub pattern: String,
    #[serde(default = "default_confidence")]
    pub confidence: f64,
    #[serde(default)]
    pub before_builtins: bool,
}

fn default_confidence() -> f64 {
    0.9
}

fn default_threshold() -> f64 {
    DEFAULT_THRESHOLD
}

fn default_min_support() -> usize {
    DEFAULT_MIN_SUPPORT
}

fn default_max_line_bytes() -> usize {
    crate::lexer::DEFAULT_MAX_LINE_BYTES
}

/// On-disk config file shape, loaded from `logpress.toml` (§6 expansion,
/// "Configuration").
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FileConfig {
    pub min_support: Option<usize>,
    pub threshold: Option<f64>,
    pub max_line_bytes: Option<usize>,
    pub entropy_level: Option<u8>,
    #[serde(default)]
    pub custom_types: Vec<CustomTypeSpec>,
}

impl FileConfig {
    pub fn load(path: &Path) -> Result<Self, LogPressError> {
        let text = fs::read_to_string(path).map_err(IngestError::Io)?;
        toml::from_str(&text)
            .map_err(|e| LogPressError::Usage(format!("invalid config file {}: {e}", path.display())))
    }

    pub fn load_if_exists(path: &Path) -> Result<Self, LogPressError> {
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }
}

/// Fully resolved options driving one compression run, after merging CLI
/// flags over a `FileConfig` over built-in defaults.
#[derive(Debug, Clone)]
pub struct CompressOptions {
    pub min_support: usize,
    pub threshold: f64,
    pub max_line_bytes: usize,
    /// `None` disables entropy coding entirely; `Some(0..=11)` sets Brotli quality.
    pub entropy_level: Option<u8>,
    pub custom_types: Vec<CustomTypeSpec>,
}

impl Default for CompressOptions {
    fn default() -> Self {
        CompressOptions {
            min_support: default_min_support(),
            threshold: default_threshold(),
            max_line_bytes: default_max_line_bytes(),
            entropy_level: Some(9),
            custom_types: Vec::new(),
        }
    }
}

impl CompressOptions {
    /// Merges a loaded file config over these defaults. CLI flags are
    /// applied afterward by the binary, one field at a time, so they always
    /// win (§6 expansion precedence).
    pub fn merge_file(mut self, file: FileConfig) -> Self {
        if let Some(v) = file.min_support {
            self.min_support = v;
        }
        if let Some(v) = file.threshold {
            self.threshold = v;
        }
        if let Some(v) = file.max_line_bytes {
            self.max_line_bytes = v;
        }
        if let Some(v) = file.entropy_level {
            self.entropy_level = Some(v);
        }
        if !file.custom_types.is_empty() {
            self.custom_types = file.custom_types;
        }
        self
    }

    pub fn build_recognizer(&self) -> Result<crate::semantic::Recognizer, LogPressError> {
        let mut builder = RecognizerBuilder::new().with_threshold(self.threshold);
        for spec in &self.custom_types {
            let pattern = Regex::new(&spec.pattern)
                .map_err(|e| LogPressError::Usage(format!("invalid pattern for {}: {e}", spec.name)))?;
            let priority = if spec.before_builtins {
                Priority::Before
            } else {
                Priority::After
            };
            builder = builder.with_custom_rule(spec.name.clone(), pattern, spec.confidence, priority);
        }
        Ok(builder.build())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_constants() {
        let opts = CompressOptions::default();
        assert_eq!(opts.min_support, DEFAULT_MIN_SUPPORT);
        assert_eq!(opts.threshold, DEFAULT_THRESHOLD);
    }

    #[test]
    fn file_config_overrides_defaults_selectively() {
        let file = FileConfig {
            min_support: Some(5),
            threshold: None,
            max_line_bytes: None,
            entropy_level: Some(3),
            custom_types: Vec::new(),
        };
        let opts = CompressOptions::default().merge_file(file);
        assert_eq!(opts.min_support, 5);
        assert_eq!(opts.threshold, DEFAULT_THRESHOLD);
        assert_eq!(opts.entropy_level, Some(3));
    }

    #[test]
    fn custom_type_builds_into_recognizer() {
        let opts = CompressOptions {
            custom_types: vec![CustomTypeSpec {
                name: "ORDER_ID".into(),
                pattern: r"^ORDER-\d+$".into(),
                confidence: 0.95,
                before_builtins: true,
            }],
            ..CompressOptions::default()
        };
        let recognizer = opts.build_recognizer().unwrap();
        assert_eq!(recognizer.custom_name(0), "ORDER_ID");
    }

    #[test]
    fn missing_config_file_falls_back_to_defaults() {
        let file = FileConfig::load_if_exists(Path::new("/nonexistent/logpress.toml")).unwrap();
        assert!(file.custom_types.is_empty());
    }
}
