//! Server configuration: TOML file + CLI overrides.

use lmi_core::{LmiError, LmiResult};
use serde::Deserialize;
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use tracing::info;

/// Top-level config file structure.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConfigFile {
    #[serde(default)]
    pub server: ServerSection,
    #[serde(default)]
    pub auth: AuthSection,
    #[serde(default)]
    pub database: DatabaseSection,
}

/// `[server]` section of the config TOML.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerSection {
    #[serde(default = "default_bind")]
    pub bind: IpAddr,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_shell")]
    pub shell: String,
    #[serde(default = "default_static_dir")]
    pub static_dir: String,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            port: default_port(),
            shell: default_shell(),
            static_dir: default_static_dir(),
        }
    }
}

/// `[auth]` section of the config TOML.
#[derive(Debug, Clone, Deserialize)]
pub struct AuthSection {
    /// Hex-encoded HMAC secret for access tokens.
    #[serde(default)]
    pub token_secret: Option<String>,
    #[serde(default = "default_access_token_ttl")]
    pub access_token_ttl: i64,
    #[serde(default = "default_login_refresh_ttl")]
    pub login_refresh_ttl: i64,
    #[serde(default = "default_rotation_refresh_ttl")]
    pub rotation_refresh_ttl: i64,
    /// Absolute lifetime of a refresh chain in seconds; 0 disables the limit.
    #[serde(default = "default_refresh_chain_max_age")]
    pub refresh_chain_max_age: i64,
    #[serde(default)]
    pub pepper: String,
    #[serde(default = "default_pbkdf2_iterations")]
    pub pbkdf2_iterations: u32,
    #[serde(default = "default_login_attempts")]
    pub login_attempts_per_minute: u32,
}

impl Default for AuthSection {
    fn default() -> Self {
        Self {
            token_secret: None,
            access_token_ttl: default_access_token_ttl(),
            login_refresh_ttl: default_login_refresh_ttl(),
            rotation_refresh_ttl: default_rotation_refresh_ttl(),
            refresh_chain_max_age: default_refresh_chain_max_age(),
            pepper: String::new(),
            pbkdf2_iterations: default_pbkdf2_iterations(),
            login_attempts_per_minute: default_login_attempts(),
        }
    }
}

/// `[database]` section of the config TOML.
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseSection {
    #[serde(default = "default_database_url")]
    pub url: String,
}

impl Default for DatabaseSection {
    fn default() -> Self {
        Self {
            url: default_database_url(),
        }
    }
}

fn default_bind() -> IpAddr {
    IpAddr::from([0, 0, 0, 0])
}
fn default_port() -> u16 {
    8080
}
fn default_shell() -> String {
    std::env::var("SHELL").unwrap_or_else(|_| "/bin/bash".to_string())
}
fn default_static_dir() -> String {
    "./static".to_string()
}
fn default_access_token_ttl() -> i64 {
    lmi_core::token::ACCESS_TOKEN_TTL_SECS
}
fn default_login_refresh_ttl() -> i64 {
    24 * 60 * 60
}
fn default_rotation_refresh_ttl() -> i64 {
    7 * 24 * 60 * 60
}
fn default_refresh_chain_max_age() -> i64 {
    30 * 24 * 60 * 60
}
fn default_pbkdf2_iterations() -> u32 {
    100_000
}
fn default_login_attempts() -> u32 {
    10
}
fn default_database_url() -> String {
    "sqlite://~/.lmi/let-me-in.db".to_string()
}

/// Values given on the command line; each one overrides the file.
#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    pub bind: Option<IpAddr>,
    pub port: Option<u16>,
    pub shell: Option<String>,
    pub static_dir: Option<String>,
    pub database_url: Option<String>,
    pub token_secret: Option<String>,
    pub pepper: Option<String>,
}

/// Resolved server configuration (paths expanded, CLI overrides applied).
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind: IpAddr,
    pub port: u16,
    pub shell: String,
    pub static_dir: PathBuf,
    pub token_secret: Option<Vec<u8>>,
    pub access_token_ttl: i64,
    pub login_refresh_ttl: i64,
    pub rotation_refresh_ttl: i64,
    pub refresh_chain_max_age: i64,
    pub pepper: String,
    pub pbkdf2_iterations: u32,
    pub login_attempts_per_minute: u32,
    pub database_url: String,
}

impl ServerConfig {
    /// Load config from TOML file, then apply CLI overrides.
    pub fn load(config_path: Option<&Path>, cli: &CliOverrides) -> LmiResult<Self> {
        let file_config = match config_path {
            Some(path) => {
                let expanded = expand_tilde(path);
                if expanded.exists() {
                    info!(path = %expanded.display(), "loading config file");
                    let content = std::fs::read_to_string(&expanded)?;
                    toml::from_str::<ConfigFile>(&content)
                        .map_err(|e| LmiError::Other(format!("config parse error: {e}")))?
                } else {
                    info!(path = %expanded.display(), "config file not found, using defaults");
                    ConfigFile::default()
                }
            }
            None => ConfigFile::default(),
        };
        Self::resolve(file_config, cli)
    }

    /// Merge a parsed file with CLI overrides.
    pub fn resolve(file: ConfigFile, cli: &CliOverrides) -> LmiResult<Self> {
        let secret_hex = cli.token_secret.clone().or(file.auth.token_secret);
        let token_secret = match secret_hex {
            Some(hex_str) if !hex_str.is_empty() => Some(
                hex::decode(hex_str.trim())
                    .map_err(|e| LmiError::Other(format!("token_secret must be hex: {e}")))?,
            ),
            _ => None,
        };

        let static_dir = cli.static_dir.clone().unwrap_or(file.server.static_dir);
        let database_url = cli.database_url.clone().unwrap_or(file.database.url);

        Ok(Self {
            bind: cli.bind.unwrap_or(file.server.bind),
            port: cli.port.unwrap_or(file.server.port),
            shell: cli.shell.clone().unwrap_or(file.server.shell),
            static_dir: expand_tilde_str(&static_dir),
            token_secret,
            access_token_ttl: file.auth.access_token_ttl,
            login_refresh_ttl: file.auth.login_refresh_ttl,
            rotation_refresh_ttl: file.auth.rotation_refresh_ttl,
            refresh_chain_max_age: file.auth.refresh_chain_max_age,
            pepper: cli.pepper.clone().unwrap_or(file.auth.pepper),
            pbkdf2_iterations: file.auth.pbkdf2_iterations,
            login_attempts_per_minute: file.auth.login_attempts_per_minute,
            database_url: expand_database_url(&database_url),
        })
    }
}

/// Expand `~` to the user's home directory.
fn expand_tilde(path: &Path) -> PathBuf {
    let s = path.to_string_lossy();
    expand_tilde_str(&s)
}

fn expand_tilde_str(s: &str) -> PathBuf {
    if let Some(rest) = s.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(s)
}

/// Expand `~` inside a `sqlite://` URL.
fn expand_database_url(url: &str) -> String {
    match url.strip_prefix("sqlite://") {
        Some(path) if path.starts_with("~/") => {
            format!("sqlite://{}", expand_tilde_str(path).display())
        }
        _ => url.to_string(),
    }
}
