use std::time::Duration;

use services::services::mailer::SmtpConfig;

/// Server configuration, loaded from `MAILROOM_*` environment variables.
/// Every knob has a default so a bare `cargo run` works against a local
/// SQLite file.
#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub bind_addr: String,
    pub worker_tick_interval: Duration,
    /// Base send allowance per hour before history adjustments.
    pub base_hourly_rate: f64,
    /// How long an activated capacity boost lasts.
    pub boost_duration: chrono::Duration,
    pub smtp: Option<SmtpConfig>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_url: "sqlite://mailroom.db?mode=rwc".to_string(),
            bind_addr: "127.0.0.1:8450".to_string(),
            worker_tick_interval: Duration::from_secs(1),
            base_hourly_rate: 10_000.0,
            boost_duration: chrono::Duration::hours(1),
            smtp: None,
        }
    }
}

fn env_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn parse_env<T: std::str::FromStr>(name: &str, default: T) -> T {
    match env_var(name) {
        Some(raw) => raw.parse().unwrap_or_else(|_| {
            tracing::warn!("invalid value for {name}, using default");
            default
        }),
        None => default,
    }
}

impl Config {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let smtp = env_var("MAILROOM_SMTP_HOST").map(|host| SmtpConfig {
            host,
            port: parse_env("MAILROOM_SMTP_PORT", 587),
            username: env_var("MAILROOM_SMTP_USERNAME").unwrap_or_default(),
            password: env_var("MAILROOM_SMTP_PASSWORD").unwrap_or_default(),
            sender_email: env_var("MAILROOM_SMTP_SENDER_EMAIL")
                .unwrap_or_else(|| "no-reply@example.com".to_string()),
            sender_name: env_var("MAILROOM_SMTP_SENDER_NAME")
                .unwrap_or_else(|| "Mailroom".to_string()),
        });

        Self {
            database_url: env_var("MAILROOM_DATABASE_URL").unwrap_or(defaults.database_url),
            bind_addr: env_var("MAILROOM_BIND_ADDR").unwrap_or(defaults.bind_addr),
            worker_tick_interval: Duration::from_millis(parse_env(
                "MAILROOM_WORKER_TICK_MS",
                defaults.worker_tick_interval.as_millis() as u64,
            )),
            base_hourly_rate: parse_env("MAILROOM_BASE_HOURLY_RATE", defaults.base_hourly_rate),
            boost_duration: chrono::Duration::seconds(parse_env(
                "MAILROOM_BOOST_DURATION_SECS",
                defaults.boost_duration.num_seconds(),
            )),
            smtp,
        }
    }
}
