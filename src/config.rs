//! Configuration management for SpatialMind
//!
//! This module handles loading, parsing, validating, and managing
//! configuration from files, environment variables, and CLI overrides.
//!
//! Two layers live here:
//!
//! - [`Config`]: process-wide settings (server, model backends, timeouts,
//!   logging) loaded once at startup from YAML.
//! - [`DatabaseConfig`] and [`PipelineConfig`]: per-session settings supplied
//!   by the caller of `initialize`.

use crate::database::schema::SchemaDetail;
use crate::error::{Result, SpatialMindError};
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

/// Main configuration structure for SpatialMind
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// HTTP API settings
    #[serde(default)]
    pub server: ServerConfig,
    /// Model backend settings
    #[serde(default)]
    pub providers: ProvidersConfig,
    /// Rephrase/answer pipeline settings
    #[serde(default)]
    pub pipeline: PipelineSettings,
    /// Connection pool and statement settings
    #[serde(default)]
    pub database: DatabaseSettings,
    /// Log output settings
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// HTTP API server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Interface to bind
    #[serde(default = "default_server_host")]
    pub host: String,
    /// Port to bind
    #[serde(default = "default_server_port")]
    pub port: u16,
}

fn default_server_host() -> String {
    "127.0.0.1".to_string()
}

fn default_server_port() -> u16 {
    8000
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_server_host(),
            port: default_server_port(),
        }
    }
}

/// Model backend configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProvidersConfig {
    /// Ollama configuration
    #[serde(default)]
    pub ollama: OllamaConfig,
    /// Gemini configuration
    #[serde(default)]
    pub gemini: GeminiConfig,
}

/// Ollama provider configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OllamaConfig {
    /// Ollama server host
    #[serde(default = "default_ollama_host")]
    pub host: String,

    /// Model to use for Ollama
    #[serde(default = "default_ollama_model")]
    pub model: String,

    /// Sampling temperature
    #[serde(default = "default_ollama_temperature")]
    pub temperature: f32,
}

fn default_ollama_host() -> String {
    "http://localhost:11434".to_string()
}

fn default_ollama_model() -> String {
    "llama3.1:8b".to_string()
}

fn default_ollama_temperature() -> f32 {
    0.8
}

impl Default for OllamaConfig {
    fn default() -> Self {
        Self {
            host: default_ollama_host(),
            model: default_ollama_model(),
            temperature: default_ollama_temperature(),
        }
    }
}

/// Gemini provider configuration
#[derive(Clone, Serialize, Deserialize)]
pub struct GeminiConfig {
    /// Base URL of the Generative Language API (overridable for tests)
    #[serde(default = "default_gemini_api_base")]
    pub api_base: String,

    /// Model to use for Gemini
    #[serde(default = "default_gemini_model")]
    pub model: String,

    /// Sampling temperature
    #[serde(default = "default_gemini_temperature")]
    pub temperature: f32,

    /// API key; normally taken from `GEMINI_API_KEY` or `GOOGLE_API_KEY`
    #[serde(default, skip_serializing)]
    pub api_key: Option<String>,
}

fn default_gemini_api_base() -> String {
    "https://generativelanguage.googleapis.com".to_string()
}

fn default_gemini_model() -> String {
    "gemini-2.5-pro".to_string()
}

fn default_gemini_temperature() -> f32 {
    0.2
}

impl Default for GeminiConfig {
    fn default() -> Self {
        Self {
            api_base: default_gemini_api_base(),
            model: default_gemini_model(),
            temperature: default_gemini_temperature(),
            api_key: None,
        }
    }
}

impl fmt::Debug for GeminiConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GeminiConfig")
            .field("api_base", &self.api_base)
            .field("model", &self.model)
            .field("temperature", &self.temperature)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// Rephrase/answer pipeline settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineSettings {
    /// Timeout for each model completion call (seconds)
    #[serde(default = "default_request_timeout")]
    pub request_timeout_seconds: u64,

    /// Conversation history settings
    #[serde(default)]
    pub history: HistoryConfig,
}

fn default_request_timeout() -> u64 {
    120
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            request_timeout_seconds: default_request_timeout(),
            history: HistoryConfig::default(),
        }
    }
}

impl PipelineSettings {
    /// Model call timeout as a [`Duration`]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_seconds)
    }
}

/// Conversation history settings
///
/// `max_turns: None` keeps every turn. With a bound, the oldest turn is
/// dropped when a new one would exceed it.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HistoryConfig {
    /// Maximum number of retained turns
    #[serde(default)]
    pub max_turns: Option<usize>,
}

/// Connection pool and statement settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseSettings {
    /// Timeout for establishing a connection (seconds)
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_seconds: u64,

    /// Server-side statement timeout and client-side execute limit (seconds)
    #[serde(default = "default_statement_timeout")]
    pub statement_timeout_seconds: u64,

    /// Maximum connections per pooled database
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    /// How long close waits for in-flight statements (seconds)
    #[serde(default = "default_close_timeout")]
    pub close_timeout_seconds: u64,
}

fn default_connect_timeout() -> u64 {
    10
}

fn default_statement_timeout() -> u64 {
    60
}

fn default_max_connections() -> u32 {
    5
}

fn default_close_timeout() -> u64 {
    5
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        Self {
            connect_timeout_seconds: default_connect_timeout(),
            statement_timeout_seconds: default_statement_timeout(),
            max_connections: default_max_connections(),
            close_timeout_seconds: default_close_timeout(),
        }
    }
}

impl DatabaseSettings {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_seconds)
    }

    pub fn statement_timeout(&self) -> Duration {
        Duration::from_secs(self.statement_timeout_seconds)
    }

    pub fn close_timeout(&self) -> Duration {
        Duration::from_secs(self.close_timeout_seconds)
    }
}

/// Log output settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Emit JSON lines instead of human-readable output
    #[serde(default)]
    pub json: bool,
}

impl Config {
    /// Load configuration from file with environment and CLI overrides
    ///
    /// # Arguments
    ///
    /// * `path` - Path to configuration file
    /// * `cli` - CLI arguments for overrides
    ///
    /// # Errors
    ///
    /// Returns error if file exists but cannot be read or parsed
    pub fn load(path: &str, cli: &crate::cli::Cli) -> Result<Self> {
        let mut config = if Path::new(path).exists() {
            Self::from_file(path)?
        } else {
            tracing::warn!("Config file not found at {}, using defaults", path);
            Self::default()
        };

        config.apply_env_vars();
        config.apply_cli_overrides(cli);

        Ok(config)
    }

    fn from_file(path: &str) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| SpatialMindError::Config(format!("Failed to read config file: {}", e)))?;
        serde_yaml::from_str(&contents)
            .map_err(|e| SpatialMindError::Config(format!("Failed to parse config: {}", e)).into())
    }

    fn apply_env_vars(&mut self) {
        if let Ok(host) = std::env::var("SPATIALMIND_SERVER_HOST") {
            self.server.host = host;
        }

        if let Ok(port) = std::env::var("SPATIALMIND_SERVER_PORT") {
            match port.parse() {
                Ok(value) => self.server.port = value,
                Err(_) => tracing::warn!("Invalid SPATIALMIND_SERVER_PORT: {}", port),
            }
        }

        if let Ok(ollama_host) = std::env::var("OLLAMA_HOST") {
            self.providers.ollama.host = ollama_host;
        }

        if let Ok(ollama_model) = std::env::var("SPATIALMIND_OLLAMA_MODEL") {
            self.providers.ollama.model = ollama_model;
        }

        if let Ok(gemini_model) = std::env::var("SPATIALMIND_GEMINI_MODEL") {
            self.providers.gemini.model = gemini_model;
        }

        if let Some(key) = std::env::var("GEMINI_API_KEY")
            .ok()
            .or_else(|| std::env::var("GOOGLE_API_KEY").ok())
            .filter(|k| !k.is_empty())
        {
            self.providers.gemini.api_key = Some(key);
        }

        if let Ok(max_turns) = std::env::var("SPATIALMIND_HISTORY_MAX_TURNS") {
            match max_turns.parse::<usize>() {
                Ok(value) => {
                    self.pipeline.history.max_turns = Some(value);
                    tracing::debug!(
                        max_turns = value,
                        "Env override: SPATIALMIND_HISTORY_MAX_TURNS"
                    );
                }
                Err(_) => tracing::warn!("Invalid SPATIALMIND_HISTORY_MAX_TURNS: {}", max_turns),
            }
        }

        if let Ok(json_logs) = std::env::var("SPATIALMIND_LOG_JSON") {
            match json_logs.parse::<bool>() {
                Ok(v) => self.logging.json = v,
                Err(_) => tracing::warn!("Invalid value for SPATIALMIND_LOG_JSON: {}", json_logs),
            }
        }
    }

    fn apply_cli_overrides(&mut self, cli: &crate::cli::Cli) {
        if cli.verbose {
            tracing::debug!("Verbose mode enabled");
        }

        if let crate::cli::Commands::Serve { host, port } = &cli.command {
            if let Some(host) = host {
                self.server.host = host.clone();
            }
            if let Some(port) = port {
                self.server.port = *port;
            }
        }
    }

    /// Validate the configuration
    ///
    /// # Errors
    ///
    /// Returns a configuration error if any check fails
    pub fn validate(&self) -> Result<()> {
        if self.server.host.trim().is_empty() {
            return Err(SpatialMindError::Config("server.host cannot be empty".to_string()).into());
        }

        if self.server.port == 0 {
            return Err(
                SpatialMindError::Config("server.port must be greater than 0".to_string()).into(),
            );
        }

        url::Url::parse(&self.providers.ollama.host).map_err(|e| {
            SpatialMindError::Config(format!(
                "providers.ollama.host is not a valid URL ({}): {}",
                self.providers.ollama.host, e
            ))
        })?;

        url::Url::parse(&self.providers.gemini.api_base).map_err(|e| {
            SpatialMindError::Config(format!(
                "providers.gemini.api_base is not a valid URL ({}): {}",
                self.providers.gemini.api_base, e
            ))
        })?;

        for (name, temperature) in [
            ("providers.ollama.temperature", self.providers.ollama.temperature),
            ("providers.gemini.temperature", self.providers.gemini.temperature),
        ] {
            if !(0.0..=2.0).contains(&temperature) {
                return Err(SpatialMindError::Config(format!(
                    "{} must be between 0.0 and 2.0",
                    name
                ))
                .into());
            }
        }

        if self.pipeline.request_timeout_seconds == 0 {
            return Err(SpatialMindError::Config(
                "pipeline.request_timeout_seconds must be greater than 0".to_string(),
            )
            .into());
        }

        if self.pipeline.history.max_turns == Some(0) {
            return Err(SpatialMindError::Config(
                "pipeline.history.max_turns must be greater than 0 when set".to_string(),
            )
            .into());
        }

        if self.database.max_connections == 0 {
            return Err(SpatialMindError::Config(
                "database.max_connections must be greater than 0".to_string(),
            )
            .into());
        }

        if self.database.connect_timeout_seconds == 0 || self.database.statement_timeout_seconds == 0
        {
            return Err(SpatialMindError::Config(
                "database timeouts must be greater than 0".to_string(),
            )
            .into());
        }

        Ok(())
    }
}

/// Supported database backends
const SUPPORTED_DB_TYPES: &[&str] = &["postgresql"];

/// Per-session database connection settings
///
/// Field names follow the wire format accepted by `POST /initialize`.
/// The password never appears in `Debug` output or in serialized form.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Backend tag; only `postgresql` is supported
    #[serde(default = "default_db_type")]
    pub db_type: String,
    pub db_name: String,
    pub db_user: String,
    #[serde(skip_serializing, default)]
    pub db_password: String,
    pub db_host: String,
    /// Accepts either a number or a numeric string
    #[serde(deserialize_with = "deserialize_port")]
    pub db_port: u16,
}

fn default_db_type() -> String {
    "postgresql".to_string()
}

fn deserialize_port<'de, D>(deserializer: D) -> std::result::Result<u16, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum PortRepr {
        Number(u16),
        Text(String),
    }

    match PortRepr::deserialize(deserializer)? {
        PortRepr::Number(port) => Ok(port),
        PortRepr::Text(text) => text
            .trim()
            .parse()
            .map_err(|_| serde::de::Error::custom(format!("invalid port: {}", text))),
    }
}

impl DatabaseConfig {
    /// Check the backend tag and required fields
    ///
    /// # Errors
    ///
    /// Returns a configuration error for an unsupported `db_type` or
    /// a missing name, user, or host
    pub fn validate(&self) -> Result<()> {
        let db_type = self.db_type.to_lowercase();
        if !SUPPORTED_DB_TYPES.contains(&db_type.as_str()) {
            return Err(SpatialMindError::Config(format!(
                "Unsupported database type: {}. Must be one of: {}",
                self.db_type,
                SUPPORTED_DB_TYPES.join(", ")
            ))
            .into());
        }

        for (field, value) in [
            ("db_name", &self.db_name),
            ("db_user", &self.db_user),
            ("db_host", &self.db_host),
        ] {
            if value.trim().is_empty() {
                return Err(
                    SpatialMindError::Config(format!("{} cannot be empty", field)).into(),
                );
            }
        }

        if self.db_port == 0 {
            return Err(SpatialMindError::Config("db_port must be greater than 0".to_string()).into());
        }

        Ok(())
    }

    /// Connection target without credentials, safe for logs
    pub fn redacted(&self) -> String {
        format!(
            "postgresql://{}@{}:{}/{}",
            self.db_user, self.db_host, self.db_port, self.db_name
        )
    }
}

impl fmt::Debug for DatabaseConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DatabaseConfig")
            .field("db_type", &self.db_type)
            .field("db_name", &self.db_name)
            .field("db_user", &self.db_user)
            .field("db_password", &"<redacted>")
            .field("db_host", &self.db_host)
            .field("db_port", &self.db_port)
            .finish()
    }
}

/// Model backend family
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    Gemini,
    Ollama,
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Gemini => write!(f, "gemini"),
            Self::Ollama => write!(f, "ollama"),
        }
    }
}

/// What a pipeline accepts as input
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    /// Text questions only
    Text,
    /// Text questions with an optional attached image
    TextImage,
}

impl Capability {
    pub fn accepts_images(&self) -> bool {
        matches!(self, Self::TextImage)
    }
}

/// Per-session model pipeline selection
///
/// Parsed from a tag such as `gemini_text` or `ollama_vision`.
///
/// # Examples
///
/// ```
/// use spatialmind::config::{Capability, PipelineConfig, ProviderKind};
///
/// let config: PipelineConfig = "gemini_vision".parse().unwrap();
/// assert_eq!(config.provider, ProviderKind::Gemini);
/// assert_eq!(config.capability, Capability::TextImage);
/// assert_eq!(config.tag(), "gemini_vision");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineConfig {
    pub provider: ProviderKind,
    pub capability: Capability,
    /// Model override; `None` uses the configured default for the provider
    #[serde(default)]
    pub model: Option<String>,
}

/// Accepted pipeline tags
pub const PIPELINE_TAGS: &[&str] = &["gemini_text", "gemini_vision", "ollama_text", "ollama_vision"];

impl PipelineConfig {
    pub fn new(provider: ProviderKind, capability: Capability) -> Self {
        Self {
            provider,
            capability,
            model: None,
        }
    }

    /// Set or clear the model override
    pub fn with_model(mut self, model: Option<String>) -> Self {
        self.model = model.filter(|m| !m.trim().is_empty());
        self
    }

    /// Canonical tag for this pipeline
    pub fn tag(&self) -> &'static str {
        match (self.provider, self.capability) {
            (ProviderKind::Gemini, Capability::Text) => "gemini_text",
            (ProviderKind::Gemini, Capability::TextImage) => "gemini_vision",
            (ProviderKind::Ollama, Capability::Text) => "ollama_text",
            (ProviderKind::Ollama, Capability::TextImage) => "ollama_vision",
        }
    }

    /// How much schema detail the answer prompt carries
    ///
    /// Local models get the compact rendering without sample rows.
    pub fn schema_detail(&self) -> SchemaDetail {
        match self.provider {
            ProviderKind::Gemini => SchemaDetail::Full,
            ProviderKind::Ollama => SchemaDetail::Short,
        }
    }
}

impl FromStr for PipelineConfig {
    type Err = SpatialMindError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let config = match s.trim().to_lowercase().as_str() {
            "gemini_text" => Self::new(ProviderKind::Gemini, Capability::Text),
            "gemini_vision" => Self::new(ProviderKind::Gemini, Capability::TextImage),
            "ollama_text" => Self::new(ProviderKind::Ollama, Capability::Text),
            "ollama_vision" => Self::new(ProviderKind::Ollama, Capability::TextImage),
            other => {
                return Err(SpatialMindError::Config(format!(
                    "Unsupported chatbot type: {}. Must be one of: {}",
                    other,
                    PIPELINE_TAGS.join(", ")
                )))
            }
        };
        Ok(config)
    }
}
