use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

pub use common::config::{StorageBackendConfig, StorageConfig};

#[derive(Debug, Deserialize, Clone)]
pub struct CorsConfig {
    pub allow_origins: Vec<String>,
    pub max_age: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub cors: CorsConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseConfig {
    pub url: String,
}

/// Argon2id cost parameters.
#[derive(Debug, Deserialize, Clone, Copy)]
pub struct Argon2Config {
    /// Memory cost in KiB. Default: 19456 (19 MiB).
    #[serde(default = "default_argon2_memory_kib")]
    pub memory_kib: u32,
    /// Number of passes. Default: 2.
    #[serde(default = "default_argon2_iterations")]
    pub iterations: u32,
    /// Degree of parallelism. Default: 1.
    #[serde(default = "default_argon2_parallelism")]
    pub parallelism: u32,
}

fn default_argon2_memory_kib() -> u32 {
    19456
}
fn default_argon2_iterations() -> u32 {
    2
}
fn default_argon2_parallelism() -> u32 {
    1
}

impl Default for Argon2Config {
    fn default() -> Self {
        Self {
            memory_kib: default_argon2_memory_kib(),
            iterations: default_argon2_iterations(),
            parallelism: default_argon2_parallelism(),
        }
    }
}

/// Account created (or promoted) to admin on startup.
#[derive(Debug, Deserialize, Clone)]
pub struct BootstrapAdminConfig {
    pub email: String,
    pub password: String,
    #[serde(default = "default_admin_display_name")]
    pub display_name: String,
}

fn default_admin_display_name() -> String {
    "Administrator".into()
}

#[derive(Debug, Deserialize, Clone)]
pub struct AuthConfig {
    pub jwt_secret: String,
    /// Lifetime of issued access tokens. Default: 30.
    #[serde(default = "default_token_ttl_minutes")]
    pub token_ttl_minutes: i64,
    /// Name of the cookie carrying the access token. Default: "access_token".
    #[serde(default = "default_cookie_name")]
    pub cookie_name: String,
    /// Set the `Secure` attribute on auth cookies. Default: false.
    #[serde(default)]
    pub cookie_secure: bool,
    #[serde(default)]
    pub argon2: Argon2Config,
    #[serde(default)]
    pub bootstrap_admin: Option<BootstrapAdminConfig>,
}

fn default_token_ttl_minutes() -> i64 {
    30
}
fn default_cookie_name() -> String {
    "access_token".into()
}

/// OAuth2 authorization-code provider. Defaults point at Google.
#[derive(Debug, Deserialize, Clone)]
pub struct OAuthConfig {
    pub client_id: String,
    pub client_secret: String,
    pub redirect_uri: String,
    #[serde(default = "default_authorize_url")]
    pub authorize_url: String,
    #[serde(default = "default_token_url")]
    pub token_url: String,
    #[serde(default = "default_userinfo_url")]
    pub userinfo_url: String,
    #[serde(default = "default_oauth_scopes")]
    pub scopes: String,
}

fn default_authorize_url() -> String {
    "https://accounts.google.com/o/oauth2/v2/auth".into()
}
fn default_token_url() -> String {
    "https://oauth2.googleapis.com/token".into()
}
fn default_userinfo_url() -> String {
    "https://openidconnect.googleapis.com/v1/userinfo".into()
}
fn default_oauth_scopes() -> String {
    "openid email profile".into()
}

#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub auth: AuthConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub oauth: Option<OAuthConfig>,
}

impl AppConfig {
    pub fn load() -> Result<Self, ConfigError> {
        let config_path =
            std::env::var("DOCVAULT_CONFIG").unwrap_or_else(|_| "config/config".to_string());

        let s = Config::builder()
            .set_default("server.host", "127.0.0.1")?
            .set_default("server.port", 3000)?
            .set_default("server.cors.allow_origins", Vec::<String>::new())?
            .set_default("server.cors.max_age", 3600)?
            .set_default("database.url", "sqlite://docvault.db?mode=rwc")?
            .set_default("storage.backend", "filesystem")?
            .set_default("storage.path", "./data/blobs")?
            // Load from config/config.toml
            .add_source(File::with_name(&config_path).required(false))
            // Override from environment (e.g., DOCVAULT__AUTH__JWT_SECRET)
            .add_source(
                Environment::with_prefix("DOCVAULT")
                    .separator("__")
                    .list_separator(",")
                    .with_list_parse_key("server.cors.allow_origins")
                    .with_list_parse_key("storage.allowed_extensions")
                    .try_parsing(true),
            )
            .build()?;

        s.try_deserialize()
    }
}
