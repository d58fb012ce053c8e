use anyhow::Result;
use serde::Deserialize;
use std::path::Path;

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub ssh: SshConfig,
    pub limits: LimitsConfig,
    pub logging: LoggingConfig,
}

/// Bind addresses for the three transports.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub tcp_bind: String,
    pub ssh_bind: String,
    pub ws_bind: String,
    pub worker_id: u16,
    pub idle_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub path: String,
    pub snapshot_interval_secs: u64,
    pub read_pool_max_connections: u32,
    pub read_pool_max_idle: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SshConfig {
    pub host_key_path: String,
}

/// Tunables announced to clients via `ServerConfig(0x98)` (spec §6).
#[derive(Debug, Clone, Deserialize)]
pub struct LimitsConfig {
    pub max_message_rate_per_min: u32,
    pub max_channel_creates_per_day: u32,
    pub inactive_cleanup_days: u32,
    pub max_connections_per_ip: u32,
    pub max_message_length: u32,
    pub max_thread_subscriptions: u32,
    pub max_channel_subscriptions: u32,
    pub directory_enabled: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    pub format: String,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_message_rate_per_min: 10,
            max_channel_creates_per_day: 10,
            inactive_cleanup_days: 30,
            max_connections_per_ip: 10,
            max_message_length: 4096,
            max_thread_subscriptions: 50,
            max_channel_subscriptions: 20,
            directory_enabled: false,
        }
    }
}

impl AppConfig {
    /// Load configuration from `superchat.toml`, with environment variable overrides.
    ///
    /// Precedence (low to high): built-in defaults < config file < `SUPERCHAT__*` env vars.
    pub fn load() -> Result<Self> {
        let config_path =
            std::env::var("SUPERCHAT_CONFIG").unwrap_or_else(|_| "superchat.toml".to_string());

        let builder = config::Config::builder()
            .set_default("server.tcp_bind", "0.0.0.0:6465")?
            .set_default("server.ssh_bind", "0.0.0.0:6466")?
            .set_default("server.ws_bind", "0.0.0.0:6467")?
            .set_default("server.worker_id", 0)?
            .set_default("server.idle_timeout_secs", 600)?
            .set_default("database.path", "superchat.db")?
            .set_default("database.snapshot_interval_secs", 60)?
            .set_default("database.read_pool_max_connections", 25)?
            .set_default("database.read_pool_max_idle", 5)?
            .set_default("ssh.host_key_path", "superchat_host_key")?
            .set_default("limits.max_message_rate_per_min", 10)?
            .set_default("limits.max_channel_creates_per_day", 10)?
            .set_default("limits.inactive_cleanup_days", 30)?
            .set_default("limits.max_connections_per_ip", 10)?
            .set_default("limits.max_message_length", 4096)?
            .set_default("limits.max_thread_subscriptions", 50)?
            .set_default("limits.max_channel_subscriptions", 20)?
            .set_default("limits.directory_enabled", false)?
            .set_default("logging.level", "info")?
            .set_default("logging.format", "pretty")?;

        let builder = if Path::new(&config_path).exists() {
            builder.add_source(config::File::with_name(&config_path))
        } else {
            tracing::warn!("config file '{}' not found, using defaults", config_path);
            builder
        };

        let settings = builder
            .add_source(
                config::Environment::with_prefix("SUPERCHAT")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let config: AppConfig = settings.try_deserialize()?;
        Ok(config)
    }
}
