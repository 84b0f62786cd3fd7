//! Configuration for the generate/execute/verify loop.
//!
//! Loaded from TOML with per-field defaults, then overridden from the
//! environment. Validated before a run to catch errors early.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Environment variable overriding the local model endpoint.
pub const LOCAL_ENDPOINT_ENV: &str = "OLLAMA_BASE_URL";

/// Environment variable overriding the attempt ceiling.
pub const MAX_ATTEMPTS_ENV: &str = "CODEOPS_MAX_ATTEMPTS";

/// Validation result containing all found issues.
#[derive(Debug, Clone, Default)]
pub struct ValidationResult {
    /// List of validation errors (fatal).
    pub errors: Vec<String>,
    /// List of validation warnings (non-fatal).
    pub warnings: Vec<String>,
}

impl ValidationResult {
    /// Returns true if validation passed (no errors).
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn add_error(&mut self, msg: impl Into<String>) {
        self.errors.push(msg.into());
    }

    pub fn add_warning(&mut self, msg: impl Into<String>) {
        self.warnings.push(msg.into());
    }

    /// Merges another validation result into this one.
    pub fn merge(&mut self, other: ValidationResult) {
        self.errors.extend(other.errors);
        self.warnings.extend(other.warnings);
    }

    /// Converts to a Result, failing if there are errors.
    pub fn into_result(self) -> Result<Vec<String>> {
        if self.is_valid() {
            Ok(self.warnings)
        } else {
            Err(Error::Config(self.errors.join("; ")))
        }
    }
}

/// Trait for validatable configuration types.
pub trait Validate {
    /// Validates the configuration and returns any issues found.
    fn validate(&self) -> ValidationResult;
}

/// Settings for the retry state machine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControllerConfig {
    /// Attempt ceiling per task.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
}

fn default_max_attempts() -> u32 {
    3
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
        }
    }
}

/// The local model backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocalProviderConfig {
    #[serde(default = "default_local_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_local_model")]
    pub model: String,
}

fn default_local_endpoint() -> String {
    "http://host.docker.internal:11434".to_string()
}

fn default_local_model() -> String {
    "qwen2.5-coder:7b".to_string()
}

impl Default for LocalProviderConfig {
    fn default() -> Self {
        Self {
            endpoint: default_local_endpoint(),
            model: default_local_model(),
        }
    }
}

/// One cloud candidate, in fallback priority order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CloudModelConfig {
    pub name: String,
    /// Whether the model accepts inline image parts.
    #[serde(default = "default_true")]
    pub multimodal: bool,
}

impl CloudModelConfig {
    pub fn new(name: impl Into<String>, multimodal: bool) -> Self {
        Self {
            name: name.into(),
            multimodal,
        }
    }
}

fn default_true() -> bool {
    true
}

/// The cloud provider chain.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CloudProviderConfig {
    #[serde(default = "default_cloud_endpoint")]
    pub endpoint: String,
    /// Name of the environment variable holding the API key.
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_cloud_models")]
    pub models: Vec<CloudModelConfig>,
}

fn default_cloud_endpoint() -> String {
    "https://generativelanguage.googleapis.com".to_string()
}

fn default_api_key_env() -> String {
    "GOOGLE_API_KEY".to_string()
}

fn default_cloud_models() -> Vec<CloudModelConfig> {
    vec![
        CloudModelConfig::new("gemini-1.5-flash", true),
        CloudModelConfig::new("gemini-2.0-flash-exp", true),
        CloudModelConfig::new("gemini-pro", true),
    ]
}

impl Default for CloudProviderConfig {
    fn default() -> Self {
        Self {
            endpoint: default_cloud_endpoint(),
            api_key_env: default_api_key_env(),
            models: default_cloud_models(),
        }
    }
}

impl CloudProviderConfig {
    /// Reads the credential from the configured environment variable.
    pub fn api_key(&self) -> Option<String> {
        std::env::var(&self.api_key_env)
            .ok()
            .filter(|key| !key.trim().is_empty())
    }
}

/// Settings for the provider chain.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProvidersConfig {
    /// Wait after a failed cloud candidate, in milliseconds.
    #[serde(default = "default_backoff_ms")]
    pub backoff_ms: u64,
    /// Upper bound for a growing backoff; equal to `backoff_ms` when unset.
    #[serde(default)]
    pub backoff_max_ms: Option<u64>,
    /// Per-request HTTP timeout in seconds.
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
    #[serde(default)]
    pub local: LocalProviderConfig,
    #[serde(default)]
    pub cloud: CloudProviderConfig,
}

fn default_backoff_ms() -> u64 {
    1000
}

fn default_request_timeout() -> u64 {
    120
}

impl Default for ProvidersConfig {
    fn default() -> Self {
        Self {
            backoff_ms: default_backoff_ms(),
            backoff_max_ms: None,
            request_timeout_secs: default_request_timeout(),
            local: LocalProviderConfig::default(),
            cloud: CloudProviderConfig::default(),
        }
    }
}

impl ProvidersConfig {
    pub fn backoff_interval(&self) -> Duration {
        Duration::from_millis(self.backoff_ms)
    }

    pub fn backoff_max(&self) -> Duration {
        Duration::from_millis(self.backoff_max_ms.unwrap_or(self.backoff_ms))
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

/// Settings for the execution sandbox.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SandboxConfig {
    /// Base execution image reference.
    #[serde(default = "default_image")]
    pub image: String,
    /// Hard memory ceiling in runtime notation (e.g. `512m`).
    #[serde(default = "default_memory_limit")]
    pub memory_limit: String,
    /// Must stay true: sessions always run without networking.
    #[serde(default = "default_true")]
    pub network_disabled: bool,
    /// Working directory; the only writable path inside a session.
    #[serde(default = "default_work_dir")]
    pub work_dir: String,
    /// Interpreter invoked against the injected script.
    #[serde(default = "default_interpreter")]
    pub interpreter: String,
    #[serde(default = "default_script_name")]
    pub script_name: String,
    /// Idle process keeping the container alive between exec calls.
    #[serde(default = "default_keep_alive")]
    pub keep_alive: String,
    /// Container runtime CLI binary.
    #[serde(default = "default_runtime_cli")]
    pub runtime_cli: String,
}

fn default_image() -> String {
    "python:3.11-slim".to_string()
}

fn default_memory_limit() -> String {
    "512m".to_string()
}

fn default_work_dir() -> String {
    "/app".to_string()
}

fn default_interpreter() -> String {
    "python".to_string()
}

fn default_script_name() -> String {
    "script.py".to_string()
}

fn default_keep_alive() -> String {
    "tail -f /dev/null".to_string()
}

fn default_runtime_cli() -> String {
    "docker".to_string()
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            image: default_image(),
            memory_limit: default_memory_limit(),
            network_disabled: true,
            work_dir: default_work_dir(),
            interpreter: default_interpreter(),
            script_name: default_script_name(),
            keep_alive: default_keep_alive(),
            runtime_cli: default_runtime_cli(),
        }
    }
}

impl SandboxConfig {
    /// Language tag used for fenced code blocks, derived from the interpreter.
    pub fn language(&self) -> &str {
        let name = self
            .interpreter
            .rsplit('/')
            .next()
            .unwrap_or(&self.interpreter);
        if name.starts_with("python") {
            "python"
        } else if name == "node" {
            "javascript"
        } else if name == "bash" || name == "sh" {
            "bash"
        } else {
            name
        }
    }
}

/// Audit persistence settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AuditConfig {
    /// JSONL file receiving one record per run. Disabled when unset.
    #[serde(default)]
    pub path: Option<std::path::PathBuf>,
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub controller: ControllerConfig,
    #[serde(default)]
    pub providers: ProvidersConfig,
    #[serde(default)]
    pub sandbox: SandboxConfig,
    #[serde(default)]
    pub audit: AuditConfig,
}

impl Config {
    /// Parses configuration from a TOML string.
    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| Error::Config(format!("invalid config: {}", e)))
    }

    /// Loads configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("cannot read config file {}: {}", path.display(), e))
        })?;
        Self::from_toml(&content)
    }

    /// Loads from `path` if given, otherwise defaults, then applies environment overrides.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::load(path)?,
            None => Self::default(),
        };
        config.apply_env_overrides()?;
        Ok(config)
    }

    /// Applies environment variable overrides.
    pub fn apply_env_overrides(&mut self) -> Result<()> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    /// Applies overrides read through `lookup`, keyed by environment variable name.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(endpoint) = lookup(LOCAL_ENDPOINT_ENV) {
            if !endpoint.trim().is_empty() {
                self.providers.local.endpoint = endpoint;
            }
        }

        if let Some(value) = lookup(MAX_ATTEMPTS_ENV) {
            self.controller.max_attempts = value.trim().parse().map_err(|_| {
                Error::Config(format!("{} must be a positive integer", MAX_ATTEMPTS_ENV))
            })?;
        }

        Ok(())
    }
}

impl Validate for ControllerConfig {
    fn validate(&self) -> ValidationResult {
        let mut result = ValidationResult::default();

        if self.max_attempts == 0 {
            result.add_error("max_attempts must be at least 1");
        }

        if self.max_attempts > 10 {
            result.add_warning("max_attempts > 10 may lead to excessive model calls");
        }

        result
    }
}

impl Validate for ProvidersConfig {
    fn validate(&self) -> ValidationResult {
        let mut result = ValidationResult::default();

        if self.cloud.models.is_empty() && self.local.model.trim().is_empty() {
            result.add_error("at least one local or cloud model must be configured");
        }

        for model in &self.cloud.models {
            if model.name.trim().is_empty() {
                result.add_error("cloud model names cannot be empty");
            }
        }

        if !self.cloud.models.is_empty() && self.cloud.api_key().is_none() {
            result.add_warning(format!(
                "{} is not set; cloud providers will fail",
                self.cloud.api_key_env
            ));
        }

        if self.backoff_ms > 60_000 {
            result.add_warning("backoff_ms over 60 seconds may indicate a misconfiguration");
        }

        if self.request_timeout_secs == 0 {
            result.add_error("request_timeout_secs must be at least 1");
        }

        result
    }
}

impl Validate for SandboxConfig {
    fn validate(&self) -> ValidationResult {
        let mut result = ValidationResult::default();

        if self.image.trim().is_empty() {
            result.add_error("sandbox image cannot be empty");
        }

        if self.interpreter.trim().is_empty() {
            result.add_error("sandbox interpreter cannot be empty");
        }

        if self.script_name.trim().is_empty() {
            result.add_error("sandbox script_name cannot be empty");
        } else if self.script_name.contains('/') || self.script_name.contains('\\') {
            result.add_error("sandbox script_name must not contain a path separator");
        }

        if !self.work_dir.starts_with('/') {
            result.add_error("sandbox work_dir must be an absolute path");
        }

        if !self.network_disabled {
            result.add_error("sandbox network_disabled cannot be turned off");
        }

        if !is_valid_memory_limit(&self.memory_limit) {
            result.add_error(format!(
                "sandbox memory_limit '{}' must be a positive size such as 512m or 1g",
                self.memory_limit
            ));
        }

        result
    }
}

/// Accepts runtime size notation: digits with an optional `b`, `k`, `m` or `g` suffix.
fn is_valid_memory_limit(limit: &str) -> bool {
    let limit = limit.trim();
    let digits =
        limit.trim_end_matches(|c: char| matches!(c.to_ascii_lowercase(), 'b' | 'k' | 'm' | 'g'));
    if limit.len() - digits.len() > 1 {
        return false;
    }
    matches!(digits.parse::<u64>(), Ok(n) if n > 0)
}

impl Validate for Config {
    fn validate(&self) -> ValidationResult {
        let mut result = self.controller.validate();
        result.merge(self.providers.validate());
        result.merge(self.sandbox.validate());
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_toml_yields_defaults() {
        let config = Config::from_toml("").unwrap();

        assert_eq!(config.controller.max_attempts, 3);
        assert_eq!(config.providers.backoff_interval(), Duration::from_secs(1));
        assert_eq!(config.providers.backoff_max(), Duration::from_secs(1));
        assert_eq!(config.providers.local.model, "qwen2.5-coder:7b");
        assert_eq!(config.providers.cloud.models.len(), 3);
        assert_eq!(config.providers.cloud.models[0].name, "gemini-1.5-flash");
        assert_eq!(config.sandbox.image, "python:3.11-slim");
        assert_eq!(config.sandbox.memory_limit, "512m");
        assert!(config.sandbox.network_disabled);
        assert!(config.audit.path.is_none());
        assert!(config.validate().errors.is_empty());
    }

    #[test]
    fn toml_overrides_selected_fields() {
        let config = Config::from_toml(
            r#"
            [controller]
            max_attempts = 5

            [providers]
            backoff_ms = 250
            backoff_max_ms = 2000

            [[providers.cloud.models]]
            name = "text-only"
            multimodal = false

            [sandbox]
            interpreter = "node"
            script_name = "main.js"
            "#,
        )
        .unwrap();

        assert_eq!(config.controller.max_attempts, 5);
        assert_eq!(config.providers.backoff_max(), Duration::from_secs(2));
        assert_eq!(
            config.providers.cloud.models,
            vec![CloudModelConfig::new("text-only", false)]
        );
        assert_eq!(config.sandbox.language(), "javascript");
        assert_eq!(config.sandbox.image, "python:3.11-slim");
    }

    #[test]
    fn invalid_toml_is_config_error() {
        let err = Config::from_toml("controller = 3").unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn load_reads_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("codeops.toml");
        std::fs::write(&path, "[sandbox]\nmemory_limit = \"256m\"\n").unwrap();

        let config = Config::load(&path).unwrap();
        assert_eq!(config.sandbox.memory_limit, "256m");
    }

    #[test]
    fn load_missing_file_fails() {
        let dir = tempfile::tempdir().unwrap();
        assert!(Config::load(&dir.path().join("missing.toml")).is_err());
    }

    #[test]
    fn zero_attempts_is_rejected() {
        let mut config = Config::default();
        config.controller.max_attempts = 0;

        let result = config.validate();
        assert!(!result.is_valid());
        assert!(result.errors.iter().any(|e| e.contains("max_attempts")));
    }

    #[test]
    fn script_name_with_separator_is_rejected() {
        let config = SandboxConfig {
            script_name: "../escape.py".to_string(),
            ..Default::default()
        };
        assert!(!config.validate().is_valid());
    }

    #[test]
    fn enabled_network_is_rejected() {
        let config = Config::from_toml("[sandbox]\nnetwork_disabled = false\n").unwrap();

        let result = config.validate();
        assert!(!result.is_valid());
        assert!(result.errors.iter().any(|e| e.contains("network_disabled")));
    }

    #[test]
    fn empty_memory_limit_is_rejected() {
        let config = Config::from_toml("[sandbox]\nmemory_limit = \"\"\n").unwrap();

        let result = config.validate();
        assert!(!result.is_valid());
        assert!(result.errors.iter().any(|e| e.contains("memory_limit")));
    }

    #[test]
    fn memory_limit_notation() {
        for limit in ["512m", "1g", "1G", "268435456", "64k", "100b"] {
            assert!(is_valid_memory_limit(limit), "{} should be accepted", limit);
        }
        for limit in ["", "m", "0m", "-1g", "512mb", "lots", "1.5g"] {
            assert!(!is_valid_memory_limit(limit), "{} should be rejected", limit);
        }
    }

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: std::collections::HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn overrides_replace_endpoint_and_attempts() {
        let mut config = Config::default();
        config
            .apply_overrides(lookup(&[
                (LOCAL_ENDPOINT_ENV, "http://ollama:11434"),
                (MAX_ATTEMPTS_ENV, " 5 "),
            ]))
            .unwrap();

        assert_eq!(config.providers.local.endpoint, "http://ollama:11434");
        assert_eq!(config.controller.max_attempts, 5);
    }

    #[test]
    fn blank_endpoint_override_is_ignored() {
        let mut config = Config::default();
        config
            .apply_overrides(lookup(&[(LOCAL_ENDPOINT_ENV, "  ")]))
            .unwrap();

        assert_eq!(config.providers.local.endpoint, "http://host.docker.internal:11434");
        assert_eq!(config.controller.max_attempts, 3);
    }

    #[test]
    fn non_numeric_attempts_override_fails() {
        let mut config = Config::default();
        let err = config
            .apply_overrides(lookup(&[(MAX_ATTEMPTS_ENV, "three")]))
            .unwrap_err();

        assert!(matches!(err, Error::Config(msg) if msg.contains(MAX_ATTEMPTS_ENV)));
        assert_eq!(config.controller.max_attempts, 3);
    }

    #[test]
    fn overrides_apply_after_file_values() {
        let mut config = Config::from_toml("[controller]\nmax_attempts = 7\n").unwrap();
        config
            .apply_overrides(lookup(&[(MAX_ATTEMPTS_ENV, "2")]))
            .unwrap();

        assert_eq!(config.controller.max_attempts, 2);
    }

    #[test]
    fn relative_work_dir_is_rejected() {
        let config = SandboxConfig {
            work_dir: "app".to_string(),
            ..Default::default()
        };
        assert!(!config.validate().is_valid());
    }

    #[test]
    fn python_variants_map_to_python_language() {
        let config = SandboxConfig {
            interpreter: "/usr/local/bin/python3".to_string(),
            ..Default::default()
        };
        assert_eq!(config.language(), "python");
    }

    #[test]
    fn into_result_joins_errors() {
        let mut result = ValidationResult::default();
        result.add_error("a");
        result.add_error("b");
        match result.into_result() {
            Err(Error::Config(msg)) => assert_eq!(msg, "a; b"),
            other => panic!("expected config error, got {:?}", other),
        }
    }
}
