// Copyright 2025 Sushanth (https://github.com/sushanthpy)
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! Process-wide run configuration
//!
//! Settings are built once (defaults, TOML file, environment) and then shared
//! read-only by every operator through an `Arc<Settings>`. A configuration change
//! means a new `Settings` and a new run.
//!
//! Environment variables:
//! - `OPENAI_API_KEY`, `ANTHROPIC_API_KEY`
//! - `EVALGRAPH_LLM_PROVIDER` (`openai` | `anthropic`), `EVALGRAPH_MODEL`, `EVALGRAPH_LLM_BASE_URL`
//! - `EVALGRAPH_CONCURRENCY`, `EVALGRAPH_TIMEOUT_SECS`
//! - `EVALGRAPH_CACHE` (`true`/`false`), `EVALGRAPH_CACHE_TTL_SECS`, `EVALGRAPH_CACHE_DIR`
//! - `EVALGRAPH_LOG`

use crate::error::{EvalGraphError, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// LLM backend used by judge operators
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum LlmProvider {
    #[default]
    Openai,
    Anthropic,
}

impl LlmProvider {
    /// Judge model used when none is configured
    pub fn default_model(&self) -> &'static str {
        match self {
            LlmProvider::Openai => "gpt-4o-mini",
            LlmProvider::Anthropic => "claude-3-5-haiku-20241022",
        }
    }
}

impl std::str::FromStr for LlmProvider {
    type Err = EvalGraphError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "openai" => Ok(LlmProvider::Openai),
            "anthropic" => Ok(LlmProvider::Anthropic),
            other => Err(EvalGraphError::Configuration(format!(
                "Unknown LLM provider: {}",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Credential for the OpenAI API
    pub openai_api_key: Option<String>,

    /// Credential for the Anthropic API
    pub anthropic_api_key: Option<String>,

    pub llm_provider: LlmProvider,

    /// Judge model name; unset means the provider's default
    pub model: Option<String>,

    /// Override for the provider's API base URL
    pub llm_base_url: Option<String>,

    /// Upper bound on in-flight work across a whole run
    pub concurrency_limit: usize,

    /// Timeout in seconds for each row, or each reader/writer invocation
    pub timeout_secs: u64,

    pub cache_enabled: bool,

    /// Cache TTL in seconds
    pub cache_ttl_secs: u64,

    /// Directory for the on-disk result cache layer
    pub cache_dir: Option<PathBuf>,

    /// Default log filter for the command line front-end
    pub log_level: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            openai_api_key: None,
            anthropic_api_key: None,
            llm_provider: LlmProvider::Openai,
            model: None,
            llm_base_url: None,
            concurrency_limit: 10,
            timeout_secs: 30,
            cache_enabled: true,
            cache_ttl_secs: 3600, // 1 hour
            cache_dir: None,
            log_level: "info".to_string(),
        }
    }
}

impl Settings {
    /// Defaults overridden by environment variables
    pub fn from_env() -> Result<Self> {
        let mut settings = Self::default();
        settings.apply_env()?;
        Ok(settings)
    }

    /// Load a TOML settings file, then apply environment overrides
    pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path.as_ref())?;
        let mut settings: Settings = toml::from_str(&raw)?;
        settings.apply_env()?;
        Ok(settings)
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(key) = env::var("OPENAI_API_KEY") {
            self.openai_api_key = Some(key);
        }
        if let Ok(key) = env::var("ANTHROPIC_API_KEY") {
            self.anthropic_api_key = Some(key);
        }
        if let Ok(provider) = env::var("EVALGRAPH_LLM_PROVIDER") {
            self.llm_provider = provider.parse()?;
        }
        if let Ok(model) = env::var("EVALGRAPH_MODEL") {
            self.model = Some(model);
        }
        if let Ok(url) = env::var("EVALGRAPH_LLM_BASE_URL") {
            self.llm_base_url = Some(url);
        }
        if let Ok(v) = env::var("EVALGRAPH_CONCURRENCY") {
            self.concurrency_limit = parse_env("EVALGRAPH_CONCURRENCY", &v)?;
        }
        if let Ok(v) = env::var("EVALGRAPH_TIMEOUT_SECS") {
            self.timeout_secs = parse_env("EVALGRAPH_TIMEOUT_SECS", &v)?;
        }
        if let Ok(v) = env::var("EVALGRAPH_CACHE") {
            self.cache_enabled = v == "true" || v == "1";
        }
        if let Ok(v) = env::var("EVALGRAPH_CACHE_TTL_SECS") {
            self.cache_ttl_secs = parse_env("EVALGRAPH_CACHE_TTL_SECS", &v)?;
        }
        if let Ok(dir) = env::var("EVALGRAPH_CACHE_DIR") {
            self.cache_dir = Some(PathBuf::from(dir));
        }
        if let Ok(level) = env::var("EVALGRAPH_LOG") {
            self.log_level = level;
        }
        Ok(())
    }

    pub fn with_openai_api_key(mut self, key: impl Into<String>) -> Self {
        self.openai_api_key = Some(key.into());
        self
    }

    pub fn with_anthropic_api_key(mut self, key: impl Into<String>) -> Self {
        self.anthropic_api_key = Some(key.into());
        self.llm_provider = LlmProvider::Anthropic;
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    /// Point the LLM client at an alternative endpoint (proxies, test servers)
    pub fn with_llm_base_url(mut self, url: impl Into<String>) -> Self {
        self.llm_base_url = Some(url.into());
        self
    }

    pub fn with_concurrency_limit(mut self, limit: usize) -> Self {
        self.concurrency_limit = limit;
        self
    }

    pub fn with_timeout_secs(mut self, secs: u64) -> Self {
        self.timeout_secs = secs;
        self
    }

    pub fn with_cache(mut self, enabled: bool) -> Self {
        self.cache_enabled = enabled;
        self
    }

    pub fn with_cache_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cache_dir = Some(dir.into());
        self
    }

    /// Check invariants that every run relies on
    pub fn validate(&self) -> Result<()> {
        if self.concurrency_limit == 0 {
            return Err(EvalGraphError::Configuration(
                "concurrency_limit must be at least 1".to_string(),
            ));
        }
        if self.timeout_secs == 0 {
            return Err(EvalGraphError::Configuration(
                "timeout_secs must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Credential for the configured LLM provider
    pub fn require_llm_key(&self) -> Result<&str> {
        let (key, var) = match self.llm_provider {
            LlmProvider::Openai => (self.openai_api_key.as_deref(), "OPENAI_API_KEY"),
            LlmProvider::Anthropic => (self.anthropic_api_key.as_deref(), "ANTHROPIC_API_KEY"),
        };
        key.filter(|k| !k.trim().is_empty()).ok_or_else(|| {
            EvalGraphError::Configuration(format!(
                "{:?} API key is required (set {})",
                self.llm_provider, var
            ))
        })
    }

    /// The configured model, or the provider's default
    pub fn model(&self) -> &str {
        self.model
            .as_deref()
            .unwrap_or_else(|| self.llm_provider.default_model())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

fn parse_env<T: std::str::FromStr>(name: &str, value: &str) -> Result<T> {
    value
        .trim()
        .parse()
        .map_err(|_| EvalGraphError::Configuration(format!("Invalid value for {}: {}", name, value)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_settings() {
        let settings = Settings::default();
        assert_eq!(settings.concurrency_limit, 10);
        assert_eq!(settings.timeout_secs, 30);
        assert!(settings.cache_enabled);
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_zero_concurrency() {
        let settings = Settings::default().with_concurrency_limit(0);
        assert!(matches!(
            settings.validate(),
            Err(EvalGraphError::Configuration(_))
        ));
    }

    #[test]
    fn test_require_llm_key() {
        let settings = Settings::default();
        assert!(settings.require_llm_key().is_err());

        let settings = settings.with_openai_api_key("sk-test");
        assert_eq!(settings.require_llm_key().unwrap(), "sk-test");

        let settings = Settings::default().with_anthropic_api_key("  ");
        assert!(settings.require_llm_key().is_err());
    }

    #[test]
    fn test_toml_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("evalgraph.toml");
        std::fs::write(
            &path,
            "model = \"gpt-4o\"\nconcurrency_limit = 4\nllm_provider = \"anthropic\"\n",
        )
        .unwrap();

        let settings = Settings::from_toml_file(&path).unwrap();
        assert_eq!(settings.model(), "gpt-4o");
        assert_eq!(settings.concurrency_limit, 4);
        assert_eq!(settings.llm_provider, LlmProvider::Anthropic);
        assert_eq!(settings.timeout_secs, 30);
    }

    #[test]
    fn test_default_model_follows_provider() {
        let settings = Settings::default();
        assert_eq!(settings.model(), "gpt-4o-mini");

        let settings = settings.with_anthropic_api_key("ak-test");
        assert_eq!(settings.model(), "claude-3-5-haiku-20241022");

        let settings = settings.with_model("claude-3-5-sonnet-20241022");
        assert_eq!(settings.model(), "claude-3-5-sonnet-20241022");
    }

    #[test]
    fn test_provider_parse() {
        assert_eq!("OpenAI".parse::<LlmProvider>().unwrap(), LlmProvider::Openai);
        assert!("cohere".parse::<LlmProvider>().is_err());
    }
}
