//! Configuration loading.
//!
//! Settings are merged from three sources, later ones winning:
//! 1. `.forge/codegen.toml` (or the file passed with `--config`)
//! 2. Environment variables (`CODEGEN_*`, `ANTHROPIC_BASE_URL`)
//! 3. CLI arguments, applied by the binary
//!
//! Every field has a default, so a missing file is not an error.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::agent::AgentConfig;
use crate::errors::GatewayError;
use crate::logging::LoggingConfig;
use crate::sandbox::{DEFAULT_TEMPLATE, RetryPolicy};
use crate::tiers::{GenerationModelTier, TierOverride, TierTable};
use crate::validate::ValidationConfig;

pub const DEFAULT_CONFIG_PATH: &str = ".forge/codegen.toml";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 3141,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    pub base_url: String,
    /// Name of the environment variable holding the API key.
    pub api_key_env: String,
    pub max_tokens: u32,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.anthropic.com".to_string(),
            api_key_env: "ANTHROPIC_API_KEY".to_string(),
            max_tokens: 16_000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SandboxConfig {
    /// Where the local provider keeps sandbox directories.
    pub root: PathBuf,
    /// Optional directory of template skeletons, one subdirectory each.
    pub templates_dir: Option<PathBuf>,
    pub idle_timeout_secs: u64,
    pub cache_ttl_secs: u64,
    pub sweep_interval_secs: u64,
    /// Template tried once when the framework template cannot be
    /// provisioned. Empty disables the fallback.
    pub fallback_template: String,
    pub retry: RetryPolicy,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from(".forge/sandboxes"),
            templates_dir: None,
            idle_timeout_secs: 30 * 60,
            cache_ttl_secs: 5 * 60,
            sweep_interval_secs: 60,
            fallback_template: DEFAULT_TEMPLATE.to_string(),
            retry: RetryPolicy::default(),
        }
    }
}

impl SandboxConfig {
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs.max(1))
    }

    pub fn fallback(&self) -> Option<&str> {
        let name = self.fallback_template.trim();
        (!name.is_empty()).then_some(name)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ArtifactsConfig {
    pub dir: PathBuf,
}

impl Default for ArtifactsConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from(".forge/artifacts"),
        }
    }
}

/// The complete `codegen.toml` structure.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CodegenConfig {
    pub server: ServerConfig,
    pub gateway: GatewayConfig,
    /// Per-tier model overrides keyed by tier name.
    pub models: HashMap<String, TierOverride>,
    pub agent: AgentConfig,
    pub sandbox: SandboxConfig,
    pub validation: ValidationConfig,
    pub artifacts: ArtifactsConfig,
    pub logging: LoggingConfig,
}

impl CodegenConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        Self::parse(&content).with_context(|| format!("Invalid config file: {}", path.display()))
    }

    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse codegen.toml")
    }

    /// Load from `path`, or from the default location. A missing default
    /// file yields defaults; a missing explicit file is an error.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::load(path),
            None => {
                let default = Path::new(DEFAULT_CONFIG_PATH);
                if default.exists() {
                    Self::load(default)
                } else {
                    Ok(Self::default())
                }
            }
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self).context("Failed to serialize codegen.toml")?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))
    }

    /// Apply environment overrides from the process environment.
    pub fn apply_env(&mut self) {
        self.apply_env_from(|key| std::env::var(key).ok());
    }

    pub fn apply_env_from(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(host) = lookup("CODEGEN_HOST") {
            self.server.host = host;
        }
        if let Some(port) = lookup("CODEGEN_PORT") {
            match port.parse() {
                Ok(port) => self.server.port = port,
                Err(_) => tracing::warn!(value = %port, "ignoring invalid CODEGEN_PORT"),
            }
        }
        if let Some(url) = lookup("ANTHROPIC_BASE_URL") {
            self.gateway.base_url = url;
        }
        if let Some(root) = lookup("CODEGEN_SANDBOX_ROOT") {
            self.sandbox.root = PathBuf::from(root);
        }
        if let Some(dir) = lookup("CODEGEN_ARTIFACTS_DIR") {
            self.artifacts.dir = PathBuf::from(dir);
        }
    }

    /// The tier table with `[models.<tier>]` overrides applied.
    pub fn tier_table(&self) -> TierTable {
        let mut overrides: HashMap<GenerationModelTier, TierOverride> = HashMap::new();
        for (name, tier_override) in &self.models {
            match name.parse::<GenerationModelTier>() {
                Ok(tier) => {
                    overrides.insert(tier, tier_override.clone());
                }
                Err(_) => tracing::warn!(tier = %name, "ignoring override for unknown tier"),
            }
        }
        TierTable::with_overrides(&overrides)
    }

    pub fn api_key(&self) -> Result<String, GatewayError> {
        self.api_key_from(|key| std::env::var(key).ok())
    }

    pub fn api_key_from(
        &self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<String, GatewayError> {
        lookup(&self.gateway.api_key_env)
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| GatewayError::MissingApiKey(self.gateway.api_key_env.clone()))
    }

    /// Non-fatal problems worth a warning at startup.
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();
        for name in self.models.keys() {
            if name.parse::<GenerationModelTier>().is_err() {
                warnings.push(format!("Unknown tier '{}' in [models]", name));
            }
        }
        if self.agent.max_iterations == 0 {
            warnings.push("agent.max_iterations is 0: the model will never be called".to_string());
        }
        if self.sandbox.retry.max_attempts == 0 {
            warnings.push(
                "sandbox.retry.max_attempts is 0: treated as 1, sandbox creation is never retried"
                    .to_string(),
            );
        }
        if self.sandbox.cache_ttl_secs > self.sandbox.idle_timeout_secs {
            warnings.push(format!(
                "sandbox.cache_ttl_secs ({}) exceeds idle_timeout_secs ({}): cached handles may outlive their sandbox",
                self.sandbox.cache_ttl_secs, self.sandbox.idle_timeout_secs
            ));
        }
        warnings
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::validate::FailurePolicy;

    #[test]
    fn empty_file_is_all_defaults() {
        let config = CodegenConfig::parse("").unwrap();
        assert_eq!(config, CodegenConfig::default());
        assert_eq!(config.agent.max_iterations, 20);
        assert_eq!(config.validation.max_fix_attempts, 2);
        assert_eq!(config.sandbox.idle_timeout(), Duration::from_secs(1800));
        assert_eq!(config.sandbox.cache_ttl(), Duration::from_secs(300));
        assert_eq!(config.sandbox.fallback(), Some("codegen-base"));
        assert!(config.validate().is_empty());
    }

    #[test]
    fn parses_full_file() {
        let config = CodegenConfig::parse(
            r#"
            [server]
            port = 8080

            [gateway]
            api_key_env = "MY_KEY"

            [models.complex]
            model = "claude-opus-test"

            [models.code-focused]
            temperature = 0.1

            [agent]
            max_iterations = 5
            workspace_root = "/workspace"

            [sandbox]
            fallback_template = ""

            [sandbox.retry]
            max_attempts = 5
            base_delay_ms = 250

            [validation]
            max_fix_attempts = 1
            unrecognized_failures = "conservative"

            [logging]
            format = "json"
            "#,
        )
        .unwrap();

        assert_eq!(config.server.port, 8080);
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.agent.max_iterations, 5);
        assert_eq!(config.agent.read_timeout_ms, 3_000);
        assert_eq!(config.sandbox.fallback(), None);
        assert_eq!(config.sandbox.retry.max_attempts, 5);
        assert_eq!(config.sandbox.retry.base_delay, Duration::from_millis(250));
        assert_eq!(config.sandbox.retry.max_delay, Duration::from_secs(10));
        assert_eq!(
            config.validation.unrecognized_failures,
            FailurePolicy::Conservative
        );

        let tiers = config.tier_table();
        assert_eq!(tiers.spec(GenerationModelTier::Complex).model, "claude-opus-test");
        assert_eq!(tiers.spec(GenerationModelTier::CodeFocused).temperature, 0.1);
    }

    #[test]
    fn invalid_toml_is_an_error() {
        assert!(CodegenConfig::parse("[agent\nmax_iterations = ").is_err());
        assert!(CodegenConfig::parse("[agent]\nmax_iterations = \"many\"").is_err());
    }

    #[test]
    fn missing_explicit_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(CodegenConfig::load_or_default(Some(&dir.path().join("nope.toml"))).is_err());
    }

    #[test]
    fn save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".forge/codegen.toml");
        let mut config = CodegenConfig::default();
        config.server.port = 9999;
        config.save(&path).unwrap();
        assert_eq!(CodegenConfig::load(&path).unwrap().server.port, 9999);
    }

    #[test]
    fn env_overrides_file() {
        let mut config = CodegenConfig::default();
        config.apply_env_from(|key| match key {
            "CODEGEN_PORT" => Some("4000".into()),
            "CODEGEN_SANDBOX_ROOT" => Some("/tmp/sbx".into()),
            _ => None,
        });
        assert_eq!(config.server.port, 4000);
        assert_eq!(config.sandbox.root, PathBuf::from("/tmp/sbx"));

        config.apply_env_from(|key| (key == "CODEGEN_PORT").then(|| "not-a-port".to_string()));
        assert_eq!(config.server.port, 4000);
    }

    #[test]
    fn api_key_lookup() {
        let config = CodegenConfig::default();
        let err = config.api_key_from(|_| None).unwrap_err();
        assert!(matches!(err, GatewayError::MissingApiKey(ref name) if name == "ANTHROPIC_API_KEY"));
        assert!(config.api_key_from(|_| Some("  ".into())).is_err());
        assert_eq!(config.api_key_from(|_| Some("sk-1".into())).unwrap(), "sk-1");
    }

    #[test]
    fn warnings_for_suspicious_values() {
        let mut config = CodegenConfig::default();
        config.models.insert("huge".into(), TierOverride::default());
        config.sandbox.cache_ttl_secs = 7200;
        let warnings = config.validate();
        assert_eq!(warnings.len(), 2);
        assert!(warnings[0].contains("huge"));
    }

    #[test]
    fn zero_retry_attempts_warns_about_single_try() {
        let mut config = CodegenConfig::default();
        config.sandbox.retry.max_attempts = 0;
        let warnings = config.validate();
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].contains("treated as 1"));
    }
}
