use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::info;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub attendance: AttendanceConfig,
    #[serde(default)]
    pub leave: LeaveConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    /// Optional directory of static files served as the fallback route
    pub static_dir: Option<PathBuf>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            data_dir: default_data_dir(),
            static_dir: None,
        }
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    3000
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("./data")
}

#[derive(Debug, Clone, Deserialize)]
pub struct AuthConfig {
    /// HMAC secret for access tokens
    #[serde(default = "default_jwt_secret")]
    pub jwt_secret: String,
    #[serde(default = "default_token_ttl_hours")]
    pub token_ttl_hours: i64,
    /// Sessions are purged this many days after creation
    #[serde(default = "default_session_ttl_days")]
    pub session_ttl_days: i64,
    /// Bootstrap super admin, created on first start when set
    pub admin_email: Option<String>,
    pub admin_password: Option<String>,
    #[serde(default = "default_admin_first_name")]
    pub admin_first_name: String,
    #[serde(default = "default_admin_last_name")]
    pub admin_last_name: String,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            jwt_secret: default_jwt_secret(),
            token_ttl_hours: default_token_ttl_hours(),
            session_ttl_days: default_session_ttl_days(),
            admin_email: None,
            admin_password: None,
            admin_first_name: default_admin_first_name(),
            admin_last_name: default_admin_last_name(),
        }
    }
}

fn default_jwt_secret() -> String {
    // Generate a random secret if not provided
    uuid::Uuid::new_v4().to_string()
}

fn default_token_ttl_hours() -> i64 {
    24
}

fn default_session_ttl_days() -> i64 {
    30
}

fn default_admin_first_name() -> String {
    "System".to_string()
}

fn default_admin_last_name() -> String {
    "Administrator".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct AttendanceConfig {
    /// Offset of the civil day boundary from UTC, in minutes (330 = IST)
    #[serde(default = "default_utc_offset_minutes")]
    pub utc_offset_minutes: i32,
    #[serde(default = "default_true")]
    pub auto_checkout_enabled: bool,
    /// Six-field cron expression evaluated in the civil offset
    #[serde(default = "default_auto_checkout_cron")]
    pub auto_checkout_cron: String,
}

impl Default for AttendanceConfig {
    fn default() -> Self {
        Self {
            utc_offset_minutes: default_utc_offset_minutes(),
            auto_checkout_enabled: true,
            auto_checkout_cron: default_auto_checkout_cron(),
        }
    }
}

fn default_utc_offset_minutes() -> i32 {
    330
}

fn default_true() -> bool {
    true
}

fn default_auto_checkout_cron() -> String {
    "0 0 0 * * *".to_string()
}

/// Yearly leave allocation per category
#[derive(Debug, Clone, Deserialize)]
pub struct LeaveConfig {
    #[serde(default = "default_annual")]
    pub annual: i64,
    #[serde(default = "default_casual")]
    pub casual: i64,
    #[serde(default = "default_sick")]
    pub sick: i64,
    #[serde(default = "default_other")]
    pub other: i64,
}

impl Default for LeaveConfig {
    fn default() -> Self {
        Self {
            annual: default_annual(),
            casual: default_casual(),
            sick: default_sick(),
            other: default_other(),
        }
    }
}

impl LeaveConfig {
    pub fn total(&self) -> i64 {
        self.annual + self.casual + self.sick + self.other
    }
}

fn default_annual() -> i64 {
    21
}

fn default_casual() -> i64 {
    7
}

fn default_sick() -> i64 {
    10
}

fn default_other() -> i64 {
    5
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        if path.exists() {
            info!("Loading configuration from {}", path.display());
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file: {}", path.display()))?;
            let config: Config = toml::from_str(&content)
                .with_context(|| "Failed to parse configuration file")?;
            Ok(config)
        } else {
            info!("No config file found, using defaults");
            Ok(Config::default())
        }
    }

    pub fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            auth: AuthConfig::default(),
            attendance: AttendanceConfig::default(),
            leave: LeaveConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}
