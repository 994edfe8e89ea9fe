use crate::error::AuthError;
use serde::Deserialize;
use std::path::PathBuf;

/// Subpath under the per-user config directory holding the encrypted store.
const STORE_SUBPATH: &str = "rcc/credentials";

/// PKCE challenge derivation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum PkceMethod {
    /// SHA-256 over the verifier bytes (RFC 7636).
    #[default]
    S256,
    /// SHA-256 over the base64 encoding of the verifier.
    Legacy,
}

impl std::str::FromStr for PkceMethod {
    type Err = AuthError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "s256" => Ok(PkceMethod::S256),
            "legacy" => Ok(PkceMethod::Legacy),
            other => Err(AuthError::Config(format!("unknown pkce method '{}'", other))),
        }
    }
}

/// Cloud authorization settings
#[derive(Debug, Clone, Deserialize)]
pub struct CloudConfig {
    /// Base URL of the authorization server (no trailing slash)
    #[serde(default = "default_base_url")]
    pub base_url: String,

    #[serde(default = "default_client_id")]
    pub client_id: String,

    /// Space separated scopes requested at login
    #[serde(default = "default_scope")]
    pub scope: String,

    /// Fixed loopback port registered as the redirect URI
    #[serde(default = "default_callback_port")]
    pub callback_port: u16,

    /// Explicit store location; resolved from the config dir when unset
    #[serde(default)]
    pub store_path: Option<PathBuf>,

    /// How long to wait for the browser redirect (0 = no limit)
    #[serde(default = "default_callback_timeout")]
    pub callback_timeout_seconds: u64,

    #[serde(default)]
    pub pkce_method: PkceMethod,
}

fn default_base_url() -> String {
    "https://cloud.rocket.chat".to_string()
}

fn default_client_id() -> String {
    "rc-apps-cli".to_string()
}

fn default_scope() -> String {
    "offline_access marketplace:read marketplace:write".to_string()
}

fn default_callback_port() -> u16 {
    3005
}

fn default_callback_timeout() -> u64 {
    300
}

impl Default for CloudConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            client_id: default_client_id(),
            scope: default_scope(),
            callback_port: default_callback_port(),
            store_path: None,
            callback_timeout_seconds: default_callback_timeout(),
            pkce_method: PkceMethod::default(),
        }
    }
}

impl CloudConfig {
    /// Build from env vars, falling back to defaults.
    pub fn from_env() -> Result<Self, AuthError> {
        let mut cfg = Self::default();
        cfg.apply_env()?;
        Ok(cfg)
    }

    /// Overlay `RCC_*` environment variables onto this config.
    pub fn apply_env(&mut self) -> Result<(), AuthError> {
        if let Ok(v) = std::env::var("RCC_CLOUD_URL") {
            self.base_url = v.trim_end_matches('/').to_string();
        }
        if let Ok(v) = std::env::var("RCC_CLIENT_ID") {
            self.client_id = v;
        }
        if let Ok(v) = std::env::var("RCC_SCOPE") {
            self.scope = v;
        }
        if let Ok(v) = std::env::var("RCC_CALLBACK_PORT") {
            self.callback_port = v
                .parse()
                .map_err(|_| AuthError::Config(format!("RCC_CALLBACK_PORT is not a port: {}", v)))?;
        }
        if let Some(v) = std::env::var_os("RCC_STORE_PATH") {
            self.store_path = Some(PathBuf::from(v));
        }
        if let Ok(v) = std::env::var("RCC_CALLBACK_TIMEOUT_SECONDS") {
            self.callback_timeout_seconds = v.parse().map_err(|_| {
                AuthError::Config(format!("RCC_CALLBACK_TIMEOUT_SECONDS is not a number: {}", v))
            })?;
        }
        if let Ok(v) = std::env::var("RCC_PKCE_METHOD") {
            self.pkce_method = v.parse()?;
        }
        Ok(())
    }

    pub fn redirect_uri(&self) -> String {
        format!("http://localhost:{}/callback", self.callback_port)
    }

    pub fn authorize_url(&self) -> String {
        format!("{}/authorize", self.base_url)
    }

    pub fn token_path(&self) -> &'static str {
        "/api/oauth/token"
    }

    pub fn revoke_path(&self) -> &'static str {
        "/api/oauth/revoke"
    }

    /// Location of the encrypted credential file.
    ///
    /// The explicit `store_path` wins; otherwise the platform config dir
    /// (`XDG_CONFIG_HOME`, `APPDATA`, `~/Library/Application Support`).
    pub fn resolve_store_path(&self) -> Result<PathBuf, AuthError> {
        if let Some(path) = &self.store_path {
            return Ok(path.clone());
        }

        let base = dirs::config_dir()
            .or_else(|| dirs::home_dir().map(|h| h.join(".config")))
            .ok_or_else(|| AuthError::Config("cannot determine config directory".to_string()))?;

        Ok(base.join(STORE_SUBPATH))
    }
}

/// Load configuration from TOML file, then apply environment overrides
pub fn load_config(path: &str) -> anyhow::Result<CloudConfig> {
    use anyhow::Context;

    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file {}", path))?;
    let mut config: CloudConfig =
        toml::from_str(&contents).with_context(|| format!("Failed to parse config file {}", path))?;
    config.base_url = config.base_url.trim_end_matches('/').to_string();
    config.apply_env()?;
    Ok(config)
}
