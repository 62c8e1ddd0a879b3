//! CLI configuration.
//!
//! Loaded from `config.toml` in the data directory. API keys come from the
//! environment, never from the config file.

use std::path::{Path, PathBuf};

use anyhow::{Context as _, Result, bail};
use serde::Deserialize;

use scribe_types::{AutoApprovalSettings, Model, ModelInfo};

pub const CONFIG_FILE: &str = "config.toml";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    Anthropic,
    OpenAi,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ScribeConfig {
    pub provider: ProviderKind,
    pub model_id: String,
    pub context_window: u32,
    pub max_tokens: u32,
    pub supports_images: bool,
    /// Dollars per million tokens; zero when unknown.
    pub input_price: f64,
    pub output_price: f64,
    pub auto_approval: AutoApprovalSettings,
    pub shell: Option<String>,
    pub custom_instructions: Option<String>,
}

impl Default for ScribeConfig {
    fn default() -> Self {
        Self {
            provider: ProviderKind::Anthropic,
            model_id: "claude-sonnet-4-20250514".to_string(),
            context_window: 200_000,
            max_tokens: 8_192,
            supports_images: true,
            input_price: 3.0,
            output_price: 15.0,
            auto_approval: AutoApprovalSettings::default(),
            shell: None,
            custom_instructions: None,
        }
    }
}

impl ScribeConfig {
    pub fn load(data_dir: &Path) -> Result<Self> {
        let path = data_dir.join(CONFIG_FILE);
        match std::fs::read_to_string(&path) {
            Ok(raw) => toml::from_str(&raw)
                .with_context(|| format!("invalid config at {}", path.display())),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => Err(e).with_context(|| format!("failed to read {}", path.display())),
        }
    }

    #[must_use]
    pub fn model(&self) -> Model {
        Model {
            id: self.model_id.clone(),
            info: ModelInfo {
                context_window: self.context_window,
                max_tokens: self.max_tokens,
                supports_images: self.supports_images,
                input_price: self.input_price,
                output_price: self.output_price,
                cache_writes_price: 0.0,
                cache_reads_price: 0.0,
            },
        }
    }

    pub fn api_key(&self) -> Result<String> {
        let var = match self.provider {
            ProviderKind::Anthropic => "ANTHROPIC_API_KEY",
            ProviderKind::OpenAi => "OPENAI_API_KEY",
        };
        match std::env::var(var) {
            Ok(key) if !key.trim().is_empty() => Ok(key),
            _ => bail!("set {var} to use the configured provider"),
        }
    }
}

/// Data directory for config, logs, and persisted tasks.
#[must_use]
pub fn data_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("scribe")
}
