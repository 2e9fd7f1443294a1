use std::env;
use std::path::PathBuf;

use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

use crate::pipeline::ResendPolicy;

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub redis: RedisConfig,
    #[serde(default)]
    pub subscriptions: SubscriptionsConfig,
    #[serde(default)]
    pub resend: ResendPolicy,
    #[serde(default)]
    pub mail: MailConfig,
    #[serde(default)]
    pub log: LogConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RedisConfig {
    #[serde(default = "default_redis_url")]
    pub url: String,
    /// Key prefix for exchange lists
    #[serde(default = "default_redis_prefix")]
    pub prefix: String,
    /// How long a consumer blocks on an empty exchange before polling again
    #[serde(default = "default_block_timeout")]
    pub block_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SubscriptionsConfig {
    /// Root of the `<exchange>/<action>.json` handler tree and its templates
    #[serde(default = "default_subscriptions_path")]
    pub path: PathBuf,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MailConfig {
    /// "smtp" or "memory"
    #[serde(default = "default_mail_transport")]
    pub transport: String,
    #[serde(default = "default_smtp_host")]
    pub smtp_host: String,
    #[serde(default = "default_smtp_port")]
    pub smtp_port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
    /// Use an implicit-TLS relay instead of a plain connection
    #[serde(default)]
    pub tls: bool,
    /// Sender used when a handler does not set one
    #[serde(default = "default_mail_from")]
    pub from: String,
    /// Subject used when a handler does not set one
    #[serde(default)]
    pub default_subject: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LogConfig {
    /// "pretty" or "json"
    #[serde(default = "default_log_format")]
    pub format: String,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8082
}

fn default_redis_url() -> String {
    "redis://localhost:6379".to_string()
}

fn default_redis_prefix() -> String {
    "mailer".to_string()
}

fn default_block_timeout() -> u64 {
    1
}

fn default_subscriptions_path() -> PathBuf {
    PathBuf::from("subscriptions")
}

fn default_mail_transport() -> String {
    "smtp".to_string()
}

fn default_smtp_host() -> String {
    "localhost".to_string()
}

fn default_smtp_port() -> u16 {
    25
}

fn default_mail_from() -> String {
    "noreply@localhost".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

impl Settings {
    pub fn new() -> Result<Self, ConfigError> {
        // Load .env file if exists
        let _ = dotenvy::dotenv();

        let run_mode = env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

        let builder = Config::builder()
            .set_default("server.host", default_host())?
            .set_default("server.port", 8082)?
            .set_default("redis.url", default_redis_url())?
            .set_default("subscriptions.path", "subscriptions")?
            .set_default("resend.enabled", true)?
            .set_default("resend.interval_ms", 120_000)?
            .set_default("resend.max_tries", 3)?
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name(&format!("config/{}", run_mode)).required(false))
            // MAILER_REDIS__URL, MAILER_RESEND__INTERVAL_MS, MAILER_MAIL__SMTP_HOST, ...
            .add_source(
                Environment::with_prefix("MAILER")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            );

        builder.build()?.try_deserialize()
    }

    pub fn server_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: default_redis_url(),
            prefix: default_redis_prefix(),
            block_timeout_secs: default_block_timeout(),
        }
    }
}

impl Default for SubscriptionsConfig {
    fn default() -> Self {
        Self {
            path: default_subscriptions_path(),
        }
    }
}

impl Default for MailConfig {
    fn default() -> Self {
        Self {
            transport: default_mail_transport(),
            smtp_host: default_smtp_host(),
            smtp_port: default_smtp_port(),
            username: None,
            password: None,
            tls: false,
            from: default_mail_from(),
            default_subject: String::new(),
        }
    }
}

impl LogConfig {
    pub fn is_json(&self) -> bool {
        self.format.eq_ignore_ascii_case("json")
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            format: default_log_format(),
        }
    }
}
