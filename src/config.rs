use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::provider::digitalocean::{DEFAULT_API_URL, DEFAULT_DROPLET_PASSWORD};
use crate::provider::ProviderError;

/// Runtime configuration: defaults, then the YAML file, then env vars.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub digitalocean: DigitalOceanConfig,
    #[serde(default)]
    pub ssh: SshConfig,
    #[serde(default)]
    pub dispatch: DispatchConfig,
    #[serde(default)]
    pub sentry_dsn: Option<String>,
    #[serde(default = "default_environment")]
    pub environment: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DigitalOceanConfig {
    pub token: Option<String>,
    pub api_url: String,
    /// Password set on the `op` user of every spawned droplet.
    pub password: String,
    pub region: String,
    pub size: String,
    pub image: String,
    pub ssh_fingerprint: String,
    pub tags: Vec<String>,
}

impl Default for DigitalOceanConfig {
    fn default() -> Self {
        Self {
            token: None,
            api_url: DEFAULT_API_URL.to_string(),
            password: DEFAULT_DROPLET_PASSWORD.to_string(),
            region: "nyc1".to_string(),
            size: "s-1vcpu-1gb".to_string(),
            image: "ubuntu-22-04-x64".to_string(),
            ssh_fingerprint: String::new(),
            tags: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SshConfig {
    pub port: u16,
    pub username: String,
    pub password: Option<String>,
    pub timeout_secs: Option<u64>,
    pub max_output_bytes: usize,
}

impl Default for SshConfig {
    fn default() -> Self {
        Self {
            port: 22,
            username: "op".to_string(),
            password: None,
            timeout_secs: None,
            max_output_bytes: 1024 * 1024,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    /// Global cap on simultaneous remote sessions; `None` or 0 is unbounded.
    pub max_concurrency: Option<usize>,
}

fn default_environment() -> String {
    "local".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            digitalocean: DigitalOceanConfig::default(),
            ssh: SshConfig::default(),
            dispatch: DispatchConfig::default(),
            sentry_dsn: None,
            environment: default_environment(),
        }
    }
}

/// Raw environment values, captured once so tests never touch the
/// process-global environment.
#[derive(Debug, Clone, Default)]
pub struct RawEnv {
    pub config_path: Option<String>,
    pub token: Option<String>,
    pub api_url: Option<String>,
    pub droplet_password: Option<String>,
    pub ssh_port: Option<String>,
    pub ssh_username: Option<String>,
    pub ssh_password: Option<String>,
    pub ssh_timeout_secs: Option<String>,
    pub max_concurrency: Option<String>,
    pub sentry_dsn: Option<String>,
    pub environment: Option<String>,
}

impl RawEnv {
    pub fn from_env() -> Self {
        let var = |k: &str| std::env::var(k).ok().filter(|v| !v.is_empty());
        Self {
            config_path: var("BOXFLEET_CONFIG"),
            token: var("DIGITALOCEAN_TOKEN"),
            api_url: var("DIGITALOCEAN_API_URL"),
            droplet_password: var("DIGITALOCEAN_PASSWORD"),
            ssh_port: var("BOXFLEET_SSH_PORT"),
            ssh_username: var("BOXFLEET_SSH_USERNAME"),
            ssh_password: var("BOXFLEET_SSH_PASSWORD"),
            ssh_timeout_secs: var("BOXFLEET_SSH_TIMEOUT_SECS"),
            max_concurrency: var("BOXFLEET_MAX_CONCURRENCY"),
            sentry_dsn: var("SENTRY_DSN"),
            environment: var("ENVIRONMENT"),
        }
    }
}

impl Config {
    /// Load from `explicit` (or the default location) and overlay `env`.
    pub fn load(explicit: Option<&Path>, env: &RawEnv) -> Result<Self> {
        let path = explicit
            .map(Path::to_path_buf)
            .or_else(|| env.config_path.as_ref().map(PathBuf::from))
            .or_else(default_path);

        let mut config = match path {
            Some(p) if p.exists() => Self::from_file(&p)?,
            Some(p) if explicit.is_some() => {
                anyhow::bail!("config file not found: {}", p.display())
            }
            _ => Self::default(),
        };
        config.apply_env(env);
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file: {}", path.display()))?;
        let config: Config = serde_yaml::from_str(&content)
            .with_context(|| format!("failed to parse config file: {}", path.display()))?;
        Ok(config)
    }

    /// Overlay set env values. Unparseable numbers keep the current value.
    pub fn apply_env(&mut self, env: &RawEnv) {
        if let Some(token) = &env.token {
            self.digitalocean.token = Some(token.clone());
        }
        if let Some(url) = &env.api_url {
            self.digitalocean.api_url = url.clone();
        }
        if let Some(pw) = &env.droplet_password {
            self.digitalocean.password = pw.clone();
        }
        if let Some(port) = env.ssh_port.as_deref().and_then(|v| v.parse().ok()) {
            self.ssh.port = port;
        }
        if let Some(user) = &env.ssh_username {
            self.ssh.username = user.clone();
        }
        if let Some(pw) = &env.ssh_password {
            self.ssh.password = Some(pw.clone());
        }
        if let Some(secs) = env.ssh_timeout_secs.as_deref().and_then(|v| v.parse().ok()) {
            self.ssh.timeout_secs = Some(secs);
        }
        if let Some(n) = env.max_concurrency.as_deref().and_then(|v| v.parse().ok()) {
            self.dispatch.max_concurrency = Some(n);
        }
        if let Some(dsn) = &env.sentry_dsn {
            self.sentry_dsn = Some(dsn.clone());
        }
        if let Some(environment) = &env.environment {
            self.environment = environment.clone();
        }
        self.sentry_dsn = self.sentry_dsn.take().filter(|s| !s.is_empty());
    }

    pub fn token(&self) -> Result<&str, ProviderError> {
        self.digitalocean
            .token
            .as_deref()
            .filter(|t| !t.is_empty())
            .ok_or(ProviderError::MissingCredentials("DIGITALOCEAN_TOKEN"))
    }
}

fn default_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("boxfleet").join("config.yaml"))
}
