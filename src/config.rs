use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;

// ── Endpoints ─────────────────────────────────────────────────────────────────

/// Backend endpoint configuration. The response shapes are part of the core's
/// contract; the exact paths are deployment configuration, so they live here
/// with sensible defaults and can be overridden per install.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Endpoints {
    /// Base URL of the backend, e.g. "https://api.shikshagpt.example"
    pub base_url: String,
    /// School list shown on the login screen (no auth required)
    #[serde(default = "default_entities_path")]
    pub entities_path: String,
    /// Credential exchange — returns access_token + user payload
    #[serde(default = "default_login_path")]
    pub login_path: String,
    /// Full profile of the bearer-token holder
    #[serde(default = "default_current_user_path")]
    pub current_user_path: String,
    /// Conversation listing; `{path}/{id}` fetches one conversation's messages
    #[serde(default = "default_conversations_path")]
    pub conversations_path: String,
    /// Message send endpoint
    #[serde(default = "default_chat_path")]
    pub chat_path: String,
}

fn default_entities_path() -> String {
    "/entities".to_string()
}

fn default_login_path() -> String {
    "/auth/login".to_string()
}

fn default_current_user_path() -> String {
    "/users/me".to_string()
}

fn default_conversations_path() -> String {
    "/conversations".to_string()
}

fn default_chat_path() -> String {
    "/chat".to_string()
}

impl Default for Endpoints {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8000".to_string(),
            entities_path: default_entities_path(),
            login_path: default_login_path(),
            current_user_path: default_current_user_path(),
            conversations_path: default_conversations_path(),
            chat_path: default_chat_path(),
        }
    }
}

impl Endpoints {
    fn join(&self, path: &str) -> String {
        format!(
            "{}/{}",
            self.base_url.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }

    pub fn entities_url(&self) -> String {
        self.join(&self.entities_path)
    }

    pub fn login_url(&self) -> String {
        self.join(&self.login_path)
    }

    pub fn current_user_url(&self) -> String {
        self.join(&self.current_user_path)
    }

    pub fn conversations_url(&self) -> String {
        self.join(&self.conversations_path)
    }

    pub fn conversation_url(&self, id: &str) -> String {
        format!("{}/{id}", self.conversations_url())
    }

    pub fn chat_url(&self) -> String {
        self.join(&self.chat_path)
    }
}

// ── Config file ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ConfigFile {
    #[serde(default)]
    pub endpoints: Endpoints,
}

impl ConfigFile {
    /// Load from disk, or return a default config if the file doesn't exist yet.
    pub fn load() -> Result<Self> {
        Self::load_from(&config_path())
    }

    pub fn load_from(path: &PathBuf) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let raw = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file at {}", path.display()))?;
        toml::from_str(&raw)
            .with_context(|| format!("Failed to parse config file at {}", path.display()))
    }

    /// Write a starter config file to disk (only if it doesn't exist).
    pub fn write_default_if_missing() -> Result<PathBuf> {
        let path = config_path();
        if path.exists() {
            return Ok(path);
        }
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&path, DEFAULT_CONFIG_TOML)?;
        Ok(path)
    }
}

// ── Paths ─────────────────────────────────────────────────────────────────────

pub fn config_path() -> PathBuf {
    dirs_config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("shiksha")
        .join("config.toml")
}

fn dirs_config_dir() -> Option<PathBuf> {
    // XDG_CONFIG_HOME or ~/.config on Linux/macOS
    std::env::var("XDG_CONFIG_HOME")
        .ok()
        .map(PathBuf::from)
        .or_else(|| {
            std::env::var("HOME")
                .ok()
                .map(|h| PathBuf::from(h).join(".config"))
        })
}

// ── Default config template written on first run ──────────────────────────────

const DEFAULT_CONFIG_TOML: &str = r#"# ShikshaGPT client configuration

[endpoints]
base_url           = "http://localhost:8000"
entities_path      = "/entities"
login_path         = "/auth/login"
current_user_path  = "/users/me"
conversations_path = "/conversations"
chat_path          = "/chat"
"#;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_urls() {
        let ep = Endpoints::default();
        assert_eq!(ep.entities_url(), "http://localhost:8000/entities");
        assert_eq!(ep.login_url(), "http://localhost:8000/auth/login");
        assert_eq!(ep.conversation_url("abc"), "http://localhost:8000/conversations/abc");
    }

    #[test]
    fn test_join_handles_slashes() {
        let ep = Endpoints {
            base_url: "https://api.example.com/".to_string(),
            ..Default::default()
        };
        assert_eq!(ep.chat_url(), "https://api.example.com/chat");
    }

    #[test]
    fn test_missing_file_yields_defaults() {
        let cfg = ConfigFile::load_from(&PathBuf::from("/nonexistent/config.toml")).unwrap();
        assert_eq!(cfg.endpoints.base_url, "http://localhost:8000");
    }

    #[test]
    fn test_default_template_parses() {
        let cfg: ConfigFile = toml::from_str(DEFAULT_CONFIG_TOML).unwrap();
        assert_eq!(cfg.endpoints.current_user_url(), "http://localhost:8000/users/me");
    }

    #[test]
    fn test_partial_config_fills_defaults() {
        let cfg: ConfigFile =
            toml::from_str("[endpoints]\nbase_url = \"https://b.example\"\n").unwrap();
        assert_eq!(cfg.endpoints.login_url(), "https://b.example/auth/login");
    }
}
