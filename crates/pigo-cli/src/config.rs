//! Configuration: `~/.pigo/config.json` with environment fallback.
//!
//! File values take priority over environment variables. A missing file is
//! fine; an unreadable or malformed one is a fatal startup error, as is a
//! missing API key.

use std::path::PathBuf;

use anyhow::{anyhow, Context, Result};
use serde::Deserialize;

use pigo_providers::{ApiType, DEFAULT_BASE_URL, DEFAULT_EMBED_MODEL, DEFAULT_MODEL};

/// Raw shape of `config.json`. Unknown keys are ignored.
#[derive(Debug, Default, Deserialize)]
pub struct FileConfig {
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub api_type: Option<String>,
    #[serde(default)]
    pub embed_model: Option<String>,
    #[serde(default)]
    pub plugins: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub api_key: String,
    pub base_url: String,
    pub model: String,
    pub api_type: ApiType,
    pub embed_model: String,
    /// Extra skill directories.
    pub plugins: Vec<PathBuf>,
    /// `~/.pigo`
    pub home: PathBuf,
}

impl Config {
    pub fn pigo_home() -> Result<PathBuf> {
        let home = dirs::home_dir().ok_or_else(|| anyhow!("could not determine home directory"))?;
        Ok(home.join(".pigo"))
    }

    pub fn load() -> Result<Self> {
        let home = Self::pigo_home()?;
        let file = Self::read_file(&home.join("config.json"))?;
        Self::resolve(file, home)
    }

    fn read_file(path: &PathBuf) -> Result<FileConfig> {
        if !path.exists() {
            return Ok(FileConfig::default());
        }
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        serde_json::from_str(&contents)
            .with_context(|| format!("failed to parse {}", path.display()))
    }

    fn resolve(file: FileConfig, home: PathBuf) -> Result<Self> {
        let env = |name: &str| std::env::var(name).ok().filter(|v| !v.is_empty());

        let api_key = file
            .api_key
            .or_else(|| env("OPENAI_API_KEY"))
            .ok_or_else(|| {
                anyhow!("no API key: set OPENAI_API_KEY or add api_key to ~/.pigo/config.json")
            })?;

        let api_type_raw = file.api_type.or_else(|| env("OPENAI_API_TYPE"));
        let api_type = match api_type_raw {
            Some(raw) => ApiType::parse(&raw)
                .ok_or_else(|| anyhow!("invalid api_type '{}': expected chat or responses", raw))?,
            None => ApiType::Chat,
        };

        if env("PIGO_MEMPROFILE").is_some() {
            // The original runtime dumped a heap profile at exit; there is
            // no equivalent here.
            tracing::warn!("PIGO_MEMPROFILE is recognized but not supported; ignoring");
        }

        Ok(Self {
            api_key,
            base_url: file
                .base_url
                .or_else(|| env("OPENAI_BASE_URL"))
                .unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            model: file
                .model
                .or_else(|| env("PIGO_MODEL"))
                .unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            api_type,
            embed_model: file
                .embed_model
                .or_else(|| env("PIGO_EMBED_MODEL"))
                .unwrap_or_else(|| DEFAULT_EMBED_MODEL.to_string()),
            plugins: file.plugins.into_iter().map(PathBuf::from).collect(),
            home,
        })
    }

    pub fn sessions_dir(&self) -> PathBuf {
        self.home.join("sessions")
    }

    pub fn memory_path(&self) -> PathBuf {
        self.home.join("memory.jsonl")
    }

    pub fn skills_dir(&self) -> PathBuf {
        self.home.join("skills")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn file(json: &str) -> FileConfig {
        serde_json::from_str(json).unwrap()
    }

    // One test covers both env fallback and file priority: env mutation
    // in parallel tests would race otherwise.
    #[test]
    fn test_resolution_order() {
        std::env::set_var("PIGO_MODEL", "env-model");
        let config = Config::resolve(
            file(r#"{"api_key":"sk-file","model":"file-model"}"#),
            PathBuf::from("/tmp/.pigo"),
        )
        .unwrap();
        assert_eq!(config.api_key, "sk-file");
        assert_eq!(config.model, "file-model");

        let config = Config::resolve(
            file(r#"{"api_key":"sk-file"}"#),
            PathBuf::from("/tmp/.pigo"),
        )
        .unwrap();
        assert_eq!(config.model, "env-model");
        std::env::remove_var("PIGO_MODEL");

        let config = Config::resolve(
            file(r#"{"api_key":"sk-x"}"#),
            PathBuf::from("/tmp/.pigo"),
        )
        .unwrap();
        assert_eq!(config.base_url, DEFAULT_BASE_URL);
        assert_eq!(config.model, DEFAULT_MODEL);
        assert_eq!(config.embed_model, DEFAULT_EMBED_MODEL);
        assert_eq!(config.api_type, ApiType::Chat);
    }

    #[test]
    fn test_missing_api_key_is_fatal() {
        std::env::remove_var("OPENAI_API_KEY");
        let err = Config::resolve(file("{}"), PathBuf::from("/tmp/.pigo")).unwrap_err();
        assert!(err.to_string().contains("API key"));
    }

    #[test]
    fn test_invalid_api_type_is_fatal() {
        let err = Config::resolve(
            file(r#"{"api_key":"sk-x","api_type":"grpc"}"#),
            PathBuf::from("/tmp/.pigo"),
        )
        .unwrap_err();
        assert!(err.to_string().contains("api_type"));
    }

    #[test]
    fn test_unknown_keys_ignored() {
        let config = file(r#"{"api_key":"sk-x","future_flag":true}"#);
        assert_eq!(config.api_key.as_deref(), Some("sk-x"));
    }
}
