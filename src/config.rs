//! Mapper settings, layered loading, API key resolution and startup validation.

use std::env;
use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use serde_json::{Map, Value};
use thiserror::Error;
use url::Url;

use crate::splitter::{SplitterConfig, SplitterError};

/// Plugin name reported by `--about` and used to namespace environment variables.
pub const PLUGIN_NAME: &str = "map-openai-embeddings";
/// Prefix for settings read from the environment with `--config ENV`.
pub const PLUGIN_ENV_PREFIX: &str = "MAP_OPENAI_EMBEDDINGS_";
/// Generic OpenAI credential variable.
pub const OPENAI_API_KEY_ENV: &str = "OPENAI_API_KEY";
/// Plugin-namespaced credential variable.
pub const PLUGIN_API_KEY_ENV: &str = "MAP_OPENAI_EMBEDDINGS_OPENAI_API_KEY";
/// Embedding model used when none is configured (1536 dimensions).
pub const DEFAULT_MODEL: &str = "text-embedding-ada-002";
/// OpenAI API root used when none is configured.
pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

/// JSON type of a setting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SettingKind {
    /// JSON string.
    String,
    /// JSON boolean.
    Boolean,
    /// Non-negative JSON integer.
    Integer,
    /// JSON object.
    Object,
}

impl SettingKind {
    /// JSON Schema type name.
    pub fn json_type(self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Boolean => "boolean",
            Self::Integer => "integer",
            Self::Object => "object",
        }
    }
}

/// Declared setting, used for environment loading and `--about` output.
#[derive(Debug, Clone, Copy)]
pub struct SettingSpec {
    /// Setting key.
    pub name: &'static str,
    /// Value type.
    pub kind: SettingKind,
    /// Default as a JSON literal.
    pub default: Option<&'static str>,
    /// Whether the value must be kept out of logs.
    pub secret: bool,
    /// Human readable description.
    pub description: &'static str,
}

/// Every setting the mapper recognizes.
pub const SETTINGS: &[SettingSpec] = &[
    SettingSpec {
        name: "document_text_property",
        kind: SettingKind::String,
        default: Some("\"page_content\""),
        secret: false,
        description: "Record property holding the document text to split and embed.",
    },
    SettingSpec {
        name: "document_metadata_property",
        kind: SettingKind::String,
        default: Some("\"metadata\""),
        secret: false,
        description: "Record property holding per-document metadata.",
    },
    SettingSpec {
        name: "openai_api_key",
        kind: SettingKind::String,
        default: None,
        secret: true,
        description: "OpenAI API key. Optional if `OPENAI_API_KEY` env var is set.",
    },
    SettingSpec {
        name: "split_documents",
        kind: SettingKind::Boolean,
        default: Some("true"),
        secret: false,
        description: "Split documents into segments before embedding.",
    },
    SettingSpec {
        name: "splitter_config",
        kind: SettingKind::Object,
        default: Some("{\"chunk_size\": 1000, \"chunk_overlap\": 200}"),
        secret: false,
        description: "Text splitter options: chunk_size, chunk_overlap, separators, \
                      keep_separator, strip_whitespace, add_start_index.",
    },
    SettingSpec {
        name: "openai_model",
        kind: SettingKind::String,
        default: Some("\"text-embedding-ada-002\""),
        secret: false,
        description: "Embedding model identifier.",
    },
    SettingSpec {
        name: "openai_base_url",
        kind: SettingKind::String,
        default: Some("\"https://api.openai.com/v1\""),
        secret: false,
        description: "Base URL of the OpenAI-compatible API.",
    },
    SettingSpec {
        name: "openai_timeout_secs",
        kind: SettingKind::Integer,
        default: Some("60"),
        secret: false,
        description: "Seconds to wait for each embedding request.",
    },
];

/// Where a configuration layer is read from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigSource {
    /// JSON config file.
    File(PathBuf),
    /// `MAP_OPENAI_EMBEDDINGS_*` environment variables.
    Env,
}

impl ConfigSource {
    /// Interprets a `--config` argument; the literal `ENV` selects the environment.
    pub fn parse(arg: &str) -> Self {
        if arg == "ENV" {
            Self::Env
        } else {
            Self::File(PathBuf::from(arg))
        }
    }
}

/// Errors raised while loading or validating settings.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// No API key is resolvable from any accepted source.
    #[error(
        "Must set at least one of the following: `openai_api_key` setting, \
         `MAP_OPENAI_EMBEDDINGS_OPENAI_API_KEY` env var, or `OPENAI_API_KEY` env var."
    )]
    MissingApiKey,
    /// A config file could not be read.
    #[error("failed to read config file {path:?}")]
    Read {
        /// File path.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: io::Error,
    },
    /// A config file was not valid JSON.
    #[error("config file {path:?} is not valid JSON")]
    Parse {
        /// File path.
        path: PathBuf,
        /// Underlying parse error.
        #[source]
        source: serde_json::Error,
    },
    /// A config file held something other than a JSON object.
    #[error("config file {path:?} must contain a JSON object")]
    NotAnObject {
        /// File path.
        path: PathBuf,
    },
    /// An environment variable could not be read as its setting's type.
    #[error("environment variable {var} must be a valid {expected}")]
    InvalidEnv {
        /// Variable name.
        var: String,
        /// Expected JSON type.
        expected: &'static str,
    },
    /// Merged settings did not match the expected shape.
    #[error("invalid mapper settings")]
    Deserialize(#[source] serde_json::Error),
    /// Splitter settings cannot produce segments.
    #[error("invalid splitter_config")]
    Splitter(#[from] SplitterError),
    /// One or more settings failed validation.
    #[error("config validation failed: {0}")]
    Invalid(String),
}

/// Outcome of a non-raising validation pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidationReport {
    /// Problems that do not stop the mapper.
    pub warnings: Vec<String>,
    /// Problems that would stop the mapper.
    pub errors: Vec<String>,
}

impl ValidationReport {
    /// True when nothing was reported.
    pub fn is_empty(&self) -> bool {
        self.warnings.is_empty() && self.errors.is_empty()
    }
}

/// Immutable mapper settings, built once at startup.
#[derive(Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct MapperConfig {
    /// Record property holding the text to split and embed.
    pub document_text_property: String,
    /// Record property holding per-document metadata.
    pub document_metadata_property: String,
    /// Explicit API credential.
    pub openai_api_key: Option<String>,
    /// Whether documents are split before embedding.
    pub split_documents: bool,
    /// Splitter options.
    pub splitter_config: SplitterConfig,
    /// Embedding model identifier.
    pub openai_model: String,
    /// API root, without the `/embeddings` suffix.
    pub openai_base_url: String,
    /// Per-request timeout in seconds.
    pub openai_timeout_secs: u64,
}

impl Default for MapperConfig {
    fn default() -> Self {
        Self {
            document_text_property: "page_content".to_string(),
            document_metadata_property: "metadata".to_string(),
            openai_api_key: None,
            split_documents: true,
            splitter_config: SplitterConfig::default(),
            openai_model: DEFAULT_MODEL.to_string(),
            openai_base_url: DEFAULT_BASE_URL.to_string(),
            openai_timeout_secs: 60,
        }
    }
}

impl fmt::Debug for MapperConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MapperConfig")
            .field("document_text_property", &self.document_text_property)
            .field("document_metadata_property", &self.document_metadata_property)
            .field("openai_api_key", &self.openai_api_key.as_ref().map(|_| "<redacted>"))
            .field("split_documents", &self.split_documents)
            .field("splitter_config", &self.splitter_config)
            .field("openai_model", &self.openai_model)
            .field("openai_base_url", &self.openai_base_url)
            .field("openai_timeout_secs", &self.openai_timeout_secs)
            .finish()
    }
}

impl MapperConfig {
    /// Loads settings from the given layers, later layers overriding earlier keys.
    pub fn load(sources: &[ConfigSource]) -> Result<Self, ConfigError> {
        Self::load_with(sources, env_lookup)
    }

    /// Same as [`MapperConfig::load`] with an explicit environment lookup.
    pub fn load_with<F>(sources: &[ConfigSource], lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut merged = Map::new();
        for source in sources {
            let layer = match source {
                ConfigSource::File(path) => read_config_file(path)?,
                ConfigSource::Env => env_layer(&lookup)?,
            };
            merged.extend(layer);
        }
        Self::from_json(Value::Object(merged))
    }

    /// Builds settings from a JSON object, filling in defaults.
    pub fn from_json(value: Value) -> Result<Self, ConfigError> {
        serde_json::from_value(value).map_err(ConfigError::Deserialize)
    }

    /// Request timeout for embedding calls.
    pub fn openai_timeout(&self) -> Duration {
        Duration::from_secs(self.openai_timeout_secs)
    }

    /// Resolves the API key from the setting or the process environment.
    pub fn resolve_api_key(&self) -> Option<String> {
        self.resolve_api_key_with(env_lookup)
    }

    /// Resolves the API key: explicit setting, then the plugin variable, then the generic one.
    pub fn resolve_api_key_with<F>(&self, lookup: F) -> Option<String>
    where
        F: Fn(&str) -> Option<String>,
    {
        non_blank(self.openai_api_key.clone())
            .or_else(|| non_blank(lookup(PLUGIN_API_KEY_ENV)))
            .or_else(|| non_blank(lookup(OPENAI_API_KEY_ENV)))
    }

    /// Validates settings against the process environment.
    pub fn validate(&self, raise_errors: bool) -> Result<ValidationReport, ConfigError> {
        self.validate_with(raise_errors, env_lookup)
    }

    /// Validates settings.
    ///
    /// The credential check only runs when `raise_errors` is set; a
    /// non-raising caller never fails and receives the report instead.
    pub fn validate_with<F>(
        &self,
        raise_errors: bool,
        lookup: F,
    ) -> Result<ValidationReport, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut report = ValidationReport::default();

        if let Err(err) = self.splitter_config.check() {
            report.errors.push(format!("splitter_config: {err}"));
        }
        for option in self.splitter_config.unrecognized_options() {
            report
                .warnings
                .push(format!("splitter_config option `{option}` is not recognized and was ignored"));
        }
        if !self.split_documents && self.splitter_config != SplitterConfig::default() {
            report
                .warnings
                .push("splitter_config is ignored because split_documents is false".to_string());
        }
        if self.openai_model.trim().is_empty() {
            report.errors.push("openai_model must not be empty".to_string());
        }
        match Url::parse(&self.openai_base_url) {
            Ok(url) if matches!(url.scheme(), "http" | "https") => {}
            _ => report.errors.push(format!(
                "openai_base_url must be an http(s) URL, got {:?}",
                self.openai_base_url
            )),
        }
        if self.openai_timeout_secs == 0 {
            report
                .errors
                .push("openai_timeout_secs must be greater than zero".to_string());
        }

        if raise_errors {
            if self.resolve_api_key_with(&lookup).is_none() {
                return Err(ConfigError::MissingApiKey);
            }
            if !report.errors.is_empty() {
                return Err(ConfigError::Invalid(report.errors.join("; ")));
            }
        }
        Ok(report)
    }
}

fn env_lookup(name: &str) -> Option<String> {
    env::var(name).ok()
}

fn read_config_file(path: &Path) -> Result<Map<String, Value>, ConfigError> {
    let raw = fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let value: Value = serde_json::from_str(&raw).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })?;
    match value {
        Value::Object(map) => Ok(map),
        _ => Err(ConfigError::NotAnObject {
            path: path.to_path_buf(),
        }),
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|key| key.trim().to_string())
        .filter(|key| !key.is_empty())
}

fn env_layer<F>(lookup: &F) -> Result<Map<String, Value>, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let mut layer = Map::new();
    for setting in SETTINGS {
        let var = format!("{PLUGIN_ENV_PREFIX}{}", setting.name.to_ascii_uppercase());
        if let Some(raw) = lookup(&var) {
            layer.insert(setting.name.to_string(), parse_env_value(setting, &var, &raw)?);
        }
    }
    Ok(layer)
}

fn parse_env_value(setting: &SettingSpec, var: &str, raw: &str) -> Result<Value, ConfigError> {
    let invalid = || ConfigError::InvalidEnv {
        var: var.to_string(),
        expected: setting.kind.json_type(),
    };
    match setting.kind {
        SettingKind::String => Ok(Value::String(raw.to_string())),
        SettingKind::Boolean => match raw.trim().to_ascii_lowercase().as_str() {
            "true" | "1" | "yes" | "on" => Ok(Value::Bool(true)),
            "false" | "0" | "no" | "off" => Ok(Value::Bool(false)),
            _ => Err(invalid()),
        },
        SettingKind::Integer => raw.trim().parse::<u64>().map(Value::from).map_err(|_| invalid()),
        SettingKind::Object => serde_json::from_str::<Value>(raw)
            .ok()
            .filter(Value::is_object)
            .ok_or_else(invalid),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::HashMap;
    use std::io::Write;

    fn lookup_from(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name: &str| vars.get(name).cloned()
    }

    #[test]
    fn defaults_match_documented_settings() {
        let config = MapperConfig::from_json(json!({})).expect("config");

        assert_eq!(config.document_text_property, "page_content");
        assert_eq!(config.document_metadata_property, "metadata");
        assert!(config.split_documents);
        assert_eq!(config.splitter_config.chunk_size, 1000);
        assert_eq!(config.splitter_config.chunk_overlap, 200);
        assert_eq!(config.openai_model, DEFAULT_MODEL);
        assert_eq!(config.openai_timeout(), Duration::from_secs(60));
    }

    #[test]
    fn partial_splitter_config_keeps_other_defaults() {
        let config = MapperConfig::from_json(json!({
            "document_text_property": "body",
            "splitter_config": {"chunk_size": 300}
        }))
        .expect("config");

        assert_eq!(config.document_text_property, "body");
        assert_eq!(config.splitter_config.chunk_size, 300);
        assert_eq!(config.splitter_config.chunk_overlap, 200);
    }

    #[test]
    fn api_key_resolution_order() {
        let explicit = MapperConfig {
            openai_api_key: Some("from-config".to_string()),
            ..MapperConfig::default()
        };
        let implicit = MapperConfig::default();
        let both = lookup_from(&[
            (PLUGIN_API_KEY_ENV, "from-plugin-env"),
            (OPENAI_API_KEY_ENV, "from-generic-env"),
        ]);

        assert_eq!(
            explicit.resolve_api_key_with(&both).as_deref(),
            Some("from-config")
        );
        assert_eq!(
            implicit.resolve_api_key_with(&both).as_deref(),
            Some("from-plugin-env")
        );
        assert_eq!(
            implicit
                .resolve_api_key_with(lookup_from(&[(OPENAI_API_KEY_ENV, "from-generic-env")]))
                .as_deref(),
            Some("from-generic-env")
        );
        assert_eq!(implicit.resolve_api_key_with(lookup_from(&[])), None);
    }

    #[test]
    fn blank_api_key_counts_as_missing() {
        let config = MapperConfig {
            openai_api_key: Some("   ".to_string()),
            ..MapperConfig::default()
        };
        assert_eq!(config.resolve_api_key_with(lookup_from(&[])), None);
    }

    #[test]
    fn blank_sources_fall_through_to_the_next() {
        let blank_setting = MapperConfig {
            openai_api_key: Some(String::new()),
            ..MapperConfig::default()
        };
        assert_eq!(
            blank_setting
                .resolve_api_key_with(lookup_from(&[(OPENAI_API_KEY_ENV, "sk-env")]))
                .as_deref(),
            Some("sk-env")
        );
        assert_eq!(
            blank_setting
                .resolve_api_key_with(lookup_from(&[(PLUGIN_API_KEY_ENV, "sk-plugin")]))
                .as_deref(),
            Some("sk-plugin")
        );

        let blank_plugin_env =
            lookup_from(&[(PLUGIN_API_KEY_ENV, " "), (OPENAI_API_KEY_ENV, "sk-env")]);
        assert_eq!(
            MapperConfig::default()
                .resolve_api_key_with(blank_plugin_env)
                .as_deref(),
            Some("sk-env")
        );
    }

    #[test]
    fn strict_validation_accepts_generic_key_behind_blank_setting() {
        let config = MapperConfig {
            openai_api_key: Some("  ".to_string()),
            ..MapperConfig::default()
        };
        let report = config
            .validate_with(true, lookup_from(&[(OPENAI_API_KEY_ENV, "sk-env")]))
            .expect("generic key satisfies validation");
        assert!(report.errors.is_empty());
    }

    #[test]
    fn strict_validation_requires_api_key() {
        let err = MapperConfig::default()
            .validate_with(true, lookup_from(&[]))
            .unwrap_err();

        assert!(matches!(err, ConfigError::MissingApiKey));
        let message = err.to_string();
        assert!(message.contains("`openai_api_key` setting"));
        assert!(message.contains(PLUGIN_API_KEY_ENV));
        assert!(message.contains(OPENAI_API_KEY_ENV));
    }

    #[test]
    fn lenient_validation_is_silent_about_missing_key() {
        let report = MapperConfig::default()
            .validate_with(false, lookup_from(&[]))
            .expect("non-raising validation");
        assert!(report.is_empty());
    }

    #[test]
    fn strict_validation_passes_with_generic_env_key() {
        let report = MapperConfig::default()
            .validate_with(true, lookup_from(&[(OPENAI_API_KEY_ENV, "sk-test")]))
            .expect("valid config");
        assert!(report.is_empty());
    }

    #[test]
    fn reports_bad_splitter_settings_and_unknown_options() {
        let config = MapperConfig::from_json(json!({
            "splitter_config": {"chunk_size": 10, "chunk_overlap": 50, "length_function": "len"}
        }))
        .expect("config");

        let report = config
            .validate_with(false, lookup_from(&[]))
            .expect("report");
        assert_eq!(report.errors.len(), 1);
        assert!(report.errors[0].contains("chunk_overlap (50)"));
        assert_eq!(report.warnings.len(), 1);
        assert!(report.warnings[0].contains("length_function"));

        let err = config
            .validate_with(true, lookup_from(&[(OPENAI_API_KEY_ENV, "sk-test")]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn rejects_non_http_base_url() {
        let config = MapperConfig {
            openai_base_url: "ftp://example.com".to_string(),
            ..MapperConfig::default()
        };
        let report = config
            .validate_with(false, lookup_from(&[]))
            .expect("report");
        assert_eq!(report.errors.len(), 1);
        assert!(report.errors[0].contains("openai_base_url"));
    }

    #[test]
    fn later_files_override_earlier_keys() {
        let mut base = tempfile::NamedTempFile::new().expect("temp file");
        write!(
            base,
            "{}",
            json!({"document_text_property": "body", "openai_model": "text-embedding-3-small"})
        )
        .expect("write");
        let mut overlay = tempfile::NamedTempFile::new().expect("temp file");
        write!(overlay, "{}", json!({"document_text_property": "content"})).expect("write");

        let config = MapperConfig::load_with(
            &[
                ConfigSource::File(base.path().to_path_buf()),
                ConfigSource::File(overlay.path().to_path_buf()),
            ],
            lookup_from(&[]),
        )
        .expect("config");

        assert_eq!(config.document_text_property, "content");
        assert_eq!(config.openai_model, "text-embedding-3-small");
    }

    #[test]
    fn env_layer_parses_typed_settings() {
        let lookup = lookup_from(&[
            ("MAP_OPENAI_EMBEDDINGS_SPLIT_DOCUMENTS", "false"),
            ("MAP_OPENAI_EMBEDDINGS_OPENAI_TIMEOUT_SECS", "15"),
            ("MAP_OPENAI_EMBEDDINGS_SPLITTER_CONFIG", r#"{"chunk_size": 400}"#),
            ("MAP_OPENAI_EMBEDDINGS_DOCUMENT_TEXT_PROPERTY", "text"),
        ]);
        let config = MapperConfig::load_with(&[ConfigSource::Env], lookup).expect("config");

        assert!(!config.split_documents);
        assert_eq!(config.openai_timeout_secs, 15);
        assert_eq!(config.splitter_config.chunk_size, 400);
        assert_eq!(config.document_text_property, "text");
    }

    #[test]
    fn env_layer_rejects_malformed_boolean() {
        let lookup = lookup_from(&[("MAP_OPENAI_EMBEDDINGS_SPLIT_DOCUMENTS", "maybe")]);
        let err = MapperConfig::load_with(&[ConfigSource::Env], lookup).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidEnv { expected: "boolean", .. }));
    }

    #[test]
    fn config_file_must_be_an_object() {
        let mut file = tempfile::NamedTempFile::new().expect("temp file");
        write!(file, "[1, 2, 3]").expect("write");
        let err = MapperConfig::load_with(
            &[ConfigSource::File(file.path().to_path_buf())],
            lookup_from(&[]),
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::NotAnObject { .. }));
    }

    #[test]
    fn debug_output_redacts_api_key() {
        let config = MapperConfig {
            openai_api_key: Some("sk-secret".to_string()),
            ..MapperConfig::default()
        };
        let rendered = format!("{config:?}");
        assert!(!rendered.contains("sk-secret"));
        assert!(rendered.contains("<redacted>"));
    }

    #[test]
    fn parses_config_source_arguments() {
        assert_eq!(ConfigSource::parse("ENV"), ConfigSource::Env);
        assert_eq!(
            ConfigSource::parse("config.json"),
            ConfigSource::File(PathBuf::from("config.json"))
        );
    }
}
