use clap::Parser;
use serde::Deserialize;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "folio", about = "A server-rendered blog with user profiles")]
pub struct Cli {
    /// Path to config file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Host to bind to
    #[arg(long)]
    pub host: Option<String>,

    /// Port to bind to
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Path to data directory
    #[arg(long)]
    pub data_dir: Option<PathBuf>,

    /// Base URL of the hosted backend
    #[arg(long)]
    pub backend_url: Option<String>,

    /// Public (anon) API key of the hosted backend
    #[arg(long, env = "FOLIO_BACKEND_KEY", hide_env_values = true)]
    pub backend_key: Option<String>,
}

#[derive(Deserialize, Debug, Clone, Default)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub backend: BackendConfig,
    pub auth: AuthConfig,
    pub profile: ProfileConfig,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Origin the browser reaches us on; used to build OAuth redirect URLs.
    pub public_url: String,
}

#[derive(Deserialize, Debug, Clone, Default)]
#[serde(default)]
pub struct DatabaseConfig {
    pub path: Option<PathBuf>,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct BackendConfig {
    pub url: String,
    pub anon_key: String,
    pub timeout_secs: u64,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct AuthConfig {
    pub cookie_name: String,
    pub session_hours: u64,
    pub oauth_providers: Vec<String>,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct ProfileConfig {
    pub save_debounce_ms: u64,
    pub max_avatar_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            public_url: "http://localhost:3000".to_string(),
        }
    }
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            url: "http://localhost:54321".to_string(),
            anon_key: String::new(),
            timeout_secs: 30,
        }
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            cookie_name: "folio_session".to_string(),
            session_hours: 720,
            oauth_providers: vec!["google".to_string()],
        }
    }
}

impl Default for ProfileConfig {
    fn default() -> Self {
        Self {
            save_debounce_ms: 500,
            max_avatar_bytes: 5 * 1024 * 1024,
        }
    }
}

impl Config {
    pub fn load(cli: &Cli) -> anyhow::Result<Self> {
        let data_dir = Self::data_dir(cli);
        let config_path = cli
            .config
            .clone()
            .unwrap_or_else(|| data_dir.join("config.toml"));

        let mut config = if config_path.exists() {
            let content = std::fs::read_to_string(&config_path)?;
            toml::from_str(&content)?
        } else {
            Config::default()
        };

        // CLI overrides
        if let Some(ref host) = cli.host {
            config.server.host = host.clone();
        }
        if let Some(port) = cli.port {
            config.server.port = port;
        }
        if let Some(ref url) = cli.backend_url {
            config.backend.url = url.clone();
        }
        if let Some(ref key) = cli.backend_key {
            config.backend.anon_key = key.clone();
        }

        if config.database.path.is_none() {
            config.database.path = Some(data_dir.join("folio.db"));
        }

        if config.backend.anon_key.is_empty() {
            tracing::warn!("No backend key configured; requests will be sent without one");
        }

        Ok(config)
    }

    pub fn data_dir(cli: &Cli) -> PathBuf {
        cli.data_dir.clone().unwrap_or_else(|| {
            dirs::home_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join(".folio")
        })
    }

    pub fn db_path(&self) -> PathBuf {
        self.database
            .path
            .clone()
            .unwrap_or_else(|| PathBuf::from("folio.db"))
    }

    /// Where the OAuth provider sends the browser back to.
    pub fn oauth_callback_url(&self) -> String {
        format!(
            "{}/auth/callback",
            self.server.public_url.trim_end_matches('/')
        )
    }

    pub fn oauth_enabled(&self, provider: &str) -> bool {
        self.auth.oauth_providers.iter().any(|p| p == provider)
    }
}
