use anyhow::{Context, Result, anyhow};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const API_KEY_ENV: &str = "ADJUTANT_API_KEY";

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    pub api_host: String,
    pub api_port: u16,
    pub workspace_dir: Option<PathBuf>,
    pub prompts_dir: Option<PathBuf>,
    pub provider: ProviderConfig,
    pub gateway: GatewayConfig,
    pub queue: QueueConfig,
    pub router: RouterConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_host: "127.0.0.1".to_string(),
            api_port: 8787,
            workspace_dir: None,
            prompts_dir: None,
            provider: ProviderConfig::default(),
            gateway: GatewayConfig::default(),
            queue: QueueConfig::default(),
            router: RouterConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    pub base_url: String,
    pub model: String,
    pub api_key: Option<String>,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.openai.com/v1/chat/completions".to_string(),
            model: "gpt-4o-mini".to_string(),
            api_key: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    pub pacing_ms: u64,
    pub cache_ttl_secs: u64,
    pub cache_max_entries: usize,
    pub idle_threshold_secs: u64,
    pub probe_interval_secs: u64,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            pacing_ms: 1000,
            cache_ttl_secs: 300,
            cache_max_entries: 1024,
            idle_threshold_secs: 30 * 60,
            probe_interval_secs: 60,
        }
    }
}

impl GatewayConfig {
    pub fn pacing(&self) -> Duration {
        Duration::from_millis(self.pacing_ms)
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }

    pub fn idle_threshold(&self) -> Duration {
        Duration::from_secs(self.idle_threshold_secs)
    }

    pub fn probe_interval(&self) -> Duration {
        Duration::from_secs(self.probe_interval_secs)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    pub workers: usize,
    pub max_attempts: u32,
    pub retry_base_ms: u64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            workers: 2,
            max_attempts: 3,
            retry_base_ms: 500,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RouterConfig {
    pub context_turns: usize,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self { context_turns: 20 }
    }
}

impl Config {
    /// Load `adjutant.toml` from the workspace if present, otherwise defaults.
    /// Environment variables win over the file for credentials.
    pub fn load(workspace_dir: &Path) -> Result<Self> {
        let path = workspace_dir.join("adjutant.toml");
        let mut config: Config = if path.exists() {
            let raw = std::fs::read_to_string(&path)
                .with_context(|| format!("failed to read {}", path.display()))?;
            toml::from_str(&raw).with_context(|| format!("invalid config {}", path.display()))?
        } else {
            Config::default()
        };

        if let Ok(key) = std::env::var(API_KEY_ENV)
            && !key.is_empty()
        {
            config.provider.api_key = Some(key);
        }
        config.workspace_dir = Some(workspace_dir.to_path_buf());
        Ok(config)
    }

    pub fn workspace_dir(&self) -> PathBuf {
        self.workspace_dir.clone().unwrap_or_else(default_workspace)
    }

    pub fn prompts_dir(&self) -> PathBuf {
        self.prompts_dir
            .clone()
            .unwrap_or_else(|| self.workspace_dir().join("prompts"))
    }

    /// Startup-class validation. A missing generation-service credential is a
    /// hard failure surfaced once here, never per-call.
    pub fn validate(&self) -> Result<()> {
        match self.provider.api_key.as_deref() {
            Some(key) if !key.trim().is_empty() => Ok(()),
            _ => Err(anyhow!(
                "no generation service credential configured; set {} or provider.api_key in adjutant.toml",
                API_KEY_ENV
            )),
        }
    }
}

pub fn default_workspace() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("adjutant")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let config = Config::default();
        assert_eq!(config.gateway.pacing(), Duration::from_secs(1));
        assert_eq!(config.gateway.cache_ttl(), Duration::from_secs(300));
        assert_eq!(config.queue.max_attempts, 3);
        assert_eq!(config.router.context_turns, 20);
    }

    #[test]
    fn validate_rejects_missing_credential() {
        let config = Config::default();
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.provider.api_key = Some("sk-test".to_string());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn file_overrides_defaults() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("adjutant.toml"),
            "api_port = 9100\n[gateway]\npacing_ms = 250\n",
        )
        .unwrap();
        let config = Config::load(dir.path()).unwrap();
        assert_eq!(config.api_port, 9100);
        assert_eq!(config.gateway.pacing_ms, 250);
        assert_eq!(config.queue.workers, 2);
    }
}
