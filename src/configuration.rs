use std::str::FromStr;
use std::time::Duration;

use secrecy::ExposeSecret;
use secrecy::Secret;
use serde::Deserialize;
use serde_aux::field_attributes::deserialize_number_from_string;
use sqlx::postgres::PgConnectOptions;
use sqlx::postgres::PgSslMode;

#[derive(Deserialize, Clone)]
pub struct Settings {
    pub application: ApplicationSettings,
    pub database: DatabaseSettings,
    pub delivery: DeliverySettings,
}

#[derive(Deserialize, Clone)]
pub struct ApplicationSettings {
    pub host: String,
    #[serde(deserialize_with = "deserialize_number_from_string")]
    pub port: u16,
}

#[derive(Deserialize, Clone)]
pub struct DatabaseSettings {
    pub username: String,
    pub password: Secret<String>,
    /// Port of the postgres instance, not of the relay itself
    #[serde(deserialize_with = "deserialize_number_from_string")]
    pub port: u16,
    pub host: String,
    pub database_name: String,
    pub require_ssl: bool,
    /// A full connection string (`DATABASE_URL`); when set, it supersedes the
    /// host/port/credential fields. Validated by `get_configuration`.
    pub url: Option<Secret<String>>,
}

/// Knobs for the fan-out/delivery pipeline
#[derive(Deserialize, Clone)]
pub struct DeliverySettings {
    /// Total delivery attempts per job, including the first
    #[serde(deserialize_with = "deserialize_number_from_string")]
    pub max_retry_attempts: i32,
    #[serde(deserialize_with = "deserialize_number_from_string")]
    pub worker_concurrency: usize,
    /// Per-attempt timeout for the outbound POST
    #[serde(deserialize_with = "deserialize_number_from_string")]
    pub timeout_milliseconds: u64,
    /// Base of the exponential backoff between attempts; the wait after a
    /// failed attempt n is roughly base * 2^(n-1) seconds
    #[serde(deserialize_with = "deserialize_number_from_string")]
    pub retry_backoff_seconds: u64,
}

impl DeliverySettings {
    pub fn timeout(&self) -> Duration { Duration::from_millis(self.timeout_milliseconds) }
}

impl DatabaseSettings {
    pub fn connection(&self) -> PgConnectOptions {
        if let Some(url) = &self.url {
            return PgConnectOptions::from_str(url.expose_secret())
                .expect("DATABASE_URL was validated at configuration load time");
        }
        let ssl_mode = if self.require_ssl {
            PgSslMode::Require
        } else {
            PgSslMode::Prefer
        };
        PgConnectOptions::new()
            .host(&self.host)
            .username(&self.username)
            .password(self.password.expose_secret())
            .port(self.port)
            .ssl_mode(ssl_mode)
            .database(&self.database_name)
    }

    /// Connection to the postgres instance itself, without selecting a
    /// database. Used by tests to create throwaway databases.
    pub fn connection_without_db(&self) -> PgConnectOptions {
        let ssl_mode = if self.require_ssl {
            PgSslMode::Require
        } else {
            PgSslMode::Prefer
        };
        PgConnectOptions::new()
            .host(&self.host)
            .username(&self.username)
            .password(self.password.expose_secret())
            .port(self.port)
            .ssl_mode(ssl_mode)
    }
}

/// Runtime environment, selected with `APP_ENVIRONMENT`. Controls which yaml
/// layer is applied on top of `base.yaml`.
pub enum Environment {
    Local,
    Production,
}

impl Environment {
    pub fn as_str(&self) -> &'static str {
        match self {
            Environment::Local => "local",
            Environment::Production => "production",
        }
    }
}

impl TryFrom<String> for Environment {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        match value.to_lowercase().as_str() {
            "local" => Ok(Self::Local),
            "production" => Ok(Self::Production),
            other => Err(format!(
                "{other} is not a supported environment; use `local` or `production`"
            )),
        }
    }
}

/// Layered configuration: `configuration/base.yaml`, then the
/// `APP_ENVIRONMENT` file, then `APP__`-prefixed environment variables
/// (e.g. `APP__DELIVERY__WORKER_CONCURRENCY=8`), then the flat variables
/// (`DATABASE_URL`, `PORT`, `MAX_RETRY_ATTEMPTS`, `WEBHOOK_CONCURRENCY`,
/// `WEBHOOK_TIMEOUT`) applied last.
pub fn get_configuration() -> Result<Settings, anyhow::Error> {
    let base_path = std::env::current_dir()?;
    let configuration_dir = base_path.join("configuration");

    let environment: Environment = std::env::var("APP_ENVIRONMENT")
        .unwrap_or_else(|_| "local".into())
        .try_into()
        .map_err(|e: String| anyhow::anyhow!(e))?;
    let environment_file = format!("{}.yaml", environment.as_str());

    let settings = config::Config::builder()
        .add_source(config::File::from(configuration_dir.join("base.yaml")))
        .add_source(config::File::from(configuration_dir.join(environment_file)))
        .add_source(
            config::Environment::with_prefix("APP")
                .prefix_separator("_")
                .separator("__"),
        )
        .build()?;
    let mut settings: Settings = settings.try_deserialize()?;

    apply_flat_overrides(&mut settings)?;

    if let Some(url) = &settings.database.url {
        PgConnectOptions::from_str(url.expose_secret())
            .map_err(|e| anyhow::anyhow!("invalid DATABASE_URL: {e}"))?;
    }

    Ok(settings)
}

fn apply_flat_overrides(settings: &mut Settings) -> Result<(), anyhow::Error> {
    fn parsed<T: FromStr>(name: &str) -> Result<Option<T>, anyhow::Error>
    where
        <T as FromStr>::Err: std::fmt::Display,
    {
        match std::env::var(name) {
            Ok(raw) => raw
                .parse()
                .map(Some)
                .map_err(|e| anyhow::anyhow!("invalid {name}: {e}")),
            Err(_) => Ok(None),
        }
    }

    if let Ok(url) = std::env::var("DATABASE_URL") {
        settings.database.url = Some(Secret::new(url));
    }
    if let Some(port) = parsed("PORT")? {
        settings.application.port = port;
    }
    if let Some(attempts) = parsed("MAX_RETRY_ATTEMPTS")? {
        settings.delivery.max_retry_attempts = attempts;
    }
    if let Some(concurrency) = parsed("WEBHOOK_CONCURRENCY")? {
        settings.delivery.worker_concurrency = concurrency;
    }
    if let Some(timeout_ms) = parsed("WEBHOOK_TIMEOUT")? {
        settings.delivery.timeout_milliseconds = timeout_ms;
    }
    Ok(())
}
