use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use toolchat_history::StorageKind;

fn default_app_name() -> String {
    "toolchat".into()
}

fn default_api_base() -> String {
    "https://api.openai.com/v1".into()
}

fn default_model() -> String {
    "gpt-4o-mini".into()
}

fn default_timeout_secs() -> u64 {
    60
}

fn default_history_dir() -> PathBuf {
    PathBuf::from("data/history")
}

fn default_max_tokens() -> u32 {
    1024
}

fn default_reply_max_tokens() -> u32 {
    300
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default = "default_app_name")]
    pub name: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            name: default_app_name(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    #[serde(default = "default_api_base")]
    pub api_base: String,
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            api_base: default_api_base(),
            api_key: String::new(),
            model: default_model(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryConfig {
    #[serde(default)]
    pub backend: StorageKind,
    #[serde(default = "default_history_dir")]
    pub dir: PathBuf,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            backend: StorageKind::default(),
            dir: default_history_dir(),
        }
    }
}

impl HistoryConfig {
    /// Relative directories are taken relative to `root`.
    pub fn resolve_dir(&self, root: &Path) -> PathBuf {
        if self.dir.is_absolute() {
            self.dir.clone()
        } else {
            root.join(&self.dir)
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_reply_max_tokens")]
    pub reply_max_tokens: u32,
    #[serde(default)]
    pub system_prompt: Option<String>,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_tokens: default_max_tokens(),
            reply_max_tokens: default_reply_max_tokens(),
            system_prompt: None,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TelegramConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub token: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ToolchatConfig {
    #[serde(default)]
    pub app: AppConfig,
    #[serde(default)]
    pub provider: ProviderConfig,
    #[serde(default)]
    pub history: HistoryConfig,
    #[serde(default)]
    pub orchestrator: OrchestratorConfig,
    #[serde(default)]
    pub telegram: TelegramConfig,
}

/// Expand `${VAR}` placeholders from the environment.
///
/// Unset variables expand to nothing; an unclosed `${` is kept verbatim.
pub fn resolve_env_var(raw: &str) -> String {
    let mut output = String::new();
    let mut rest = raw;

    while let Some(start) = rest.find("${") {
        output.push_str(&rest[..start]);

        let candidate = &rest[start + 2..];
        let Some(end) = candidate.find('}') else {
            output.push_str(&rest[start..]);
            return output;
        };

        let key = &candidate[..end];
        output.push_str(&std::env::var(key).unwrap_or_default());
        rest = &candidate[end + 1..];
    }

    output.push_str(rest);
    output
}

/// Load and validate `<dir>/main.yaml`.
pub fn load_config(dir: &Path) -> Result<ToolchatConfig> {
    let mut config: ToolchatConfig = read_yaml_file(&dir.join("main.yaml"))?;
    resolve_config_env(&mut config);
    validate_config(&config)?;
    Ok(config)
}

pub fn validate_config(config: &ToolchatConfig) -> Result<()> {
    if config.provider.model.trim().is_empty() {
        return Err(anyhow!("provider.model must not be empty"));
    }
    if config.provider.timeout_secs == 0 {
        return Err(anyhow!("provider.timeout_secs must be greater than zero"));
    }
    if config.orchestrator.max_tokens == 0 || config.orchestrator.reply_max_tokens == 0 {
        return Err(anyhow!("orchestrator token budgets must be greater than zero"));
    }
    if config.telegram.enabled && config.telegram.token.trim().is_empty() {
        return Err(anyhow!("telegram is enabled but telegram.token is empty"));
    }
    Ok(())
}

fn read_yaml_file<T>(path: &Path) -> Result<T>
where
    T: for<'de> Deserialize<'de>,
{
    let content = fs::read_to_string(path)
        .with_context(|| format!("failed to read config file: {}", path.display()))?;
    serde_yaml::from_str(&content)
        .with_context(|| format!("failed to parse yaml file: {}", path.display()))
}

fn resolve_config_env(config: &mut ToolchatConfig) {
    config.app.name = resolve_env_var(&config.app.name);
    config.provider.api_base = resolve_env_var(&config.provider.api_base);
    config.provider.api_key = resolve_env_var(&config.provider.api_key);
    config.provider.model = resolve_env_var(&config.provider.model);
    config.telegram.token = resolve_env_var(&config.telegram.token);
    if let Some(prompt) = &mut config.orchestrator.system_prompt {
        *prompt = resolve_env_var(prompt);
    }
}
