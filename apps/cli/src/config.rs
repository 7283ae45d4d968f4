use std::path::{Path, PathBuf};

use anyhow::{bail, Context};
use dubsync_engine::SyncConfig;
use dubsync_rewrite::LlmConfig;
use dubsync_synthesis::minimax::MiniMaxConfig;
use serde::{Deserialize, Serialize};

/// Settings file, usually `dubsync.yml`. Every section is optional.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub timing: SyncConfig,
    pub voice: String,
    pub language: String,
    pub minimax: MiniMaxConfig,
    pub rewriter: RewriterConfig,
    pub cache: CacheConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            timing: SyncConfig::default(),
            voice: "male-qn-qingse".to_string(),
            language: "en".to_string(),
            minimax: MiniMaxConfig::default(),
            rewriter: RewriterConfig::default(),
            cache: CacheConfig::default(),
        }
    }
}

impl AppConfig {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config {}", path.display()))?;
        let config: Self = serde_yml::from_str(&raw)
            .with_context(|| format!("invalid config {}", path.display()))?;
        Ok(config)
    }

    /// Load `path` if given, else defaults.
    pub fn load_or_default(path: Option<&Path>) -> anyhow::Result<Self> {
        match path {
            Some(path) => Self::load(path),
            None => Ok(Self::default()),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RewriterKind {
    None,
    #[default]
    Heuristic,
    /// LLM first, heuristic when the LLM is unreachable.
    Llm,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RewriterConfig {
    pub kind: RewriterKind,
    pub llm: LlmConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub enabled: bool,
    pub path: Option<PathBuf>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            path: None,
        }
    }
}

impl CacheConfig {
    pub fn resolved_path(&self) -> PathBuf {
        self.path.clone().unwrap_or_else(default_cache_path)
    }
}

pub fn default_cache_path() -> PathBuf {
    dirs::cache_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("dubsync")
        .join("clips.sqlite")
}

/// Service credentials, read from the environment only.
#[derive(Debug, Clone, Default)]
pub struct Credentials {
    pub minimax_primary: Option<String>,
    pub minimax_secondary: Option<String>,
    pub minimax_group_id: Option<String>,
    pub openai: Option<String>,
}

impl Credentials {
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let get = |name: &str| lookup(name).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        Self {
            minimax_primary: get("MINIMAX_API_KEY"),
            minimax_secondary: get("MINIMAX_API_KEY_2"),
            minimax_group_id: get("MINIMAX_GROUP_ID"),
            openai: get("OPENAI_API_KEY"),
        }
    }

    pub fn require_minimax(&self) -> anyhow::Result<&str> {
        match self.minimax_primary.as_deref() {
            Some(key) => Ok(key),
            None => bail!("MINIMAX_API_KEY is not set (use --stub for an offline dry run)"),
        }
    }
}
