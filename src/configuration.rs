use crate::{
    campaign_renderer::TrackingLinks, domain::SubscriberEmail, email_client::EmailClient,
    tracking::LinkSigner,
};
use secrecy::{ExposeSecret, Secret};
use serde::Deserialize;
use serde_aux::field_attributes::deserialize_number_from_string;
use sqlx::{
    postgres::{PgConnectOptions, PgSslMode},
    ConnectOptions,
};
use std::time::Duration;
use tracing_log::log::LevelFilter;

#[derive(Clone, Debug, Deserialize)]
pub struct Settings {
    pub application: ApplicationSettings,
    pub database: DatabaseSettings,
    pub email_client: EmailClientSettings,
    pub dispatcher: DispatcherSettings,
    pub campaigns: CampaignSettings,
}

#[derive(Clone, Debug, Deserialize)]
pub struct ApplicationSettings {
    pub host: String,
    #[serde(deserialize_with = "deserialize_number_from_string")]
    pub port: u16,
    /// Public address used in confirmation, unsubscribe and tracking links.
    pub base_url: String,
    pub hmac_secret: Secret<String>,
}

impl ApplicationSettings {
    pub fn link_signer(&self) -> Result<LinkSigner, anyhow::Error> {
        LinkSigner::new(&self.hmac_secret)
    }

    pub fn tracking_links(&self) -> Result<TrackingLinks, anyhow::Error> {
        TrackingLinks::new(&self.base_url, self.link_signer()?)
    }
}

#[derive(Clone, Debug, Deserialize)]
pub struct DatabaseSettings {
    pub host: String,
    #[serde(deserialize_with = "deserialize_number_from_string")]
    pub port: u16,
    pub username: String,
    pub password: Secret<String>,
    pub database_name: String,
    pub require_ssl: bool,
}

impl DatabaseSettings {
    pub fn with_db(&self) -> PgConnectOptions {
        self.without_db()
            .database(&self.database_name)
            .log_statements(LevelFilter::Trace)
    }

    pub fn without_db(&self) -> PgConnectOptions {
        let ssl_mode = if self.require_ssl {
            PgSslMode::Require
        } else {
            PgSslMode::Prefer
        };

        PgConnectOptions::new()
            .host(&self.host)
            .port(self.port)
            .username(&self.username)
            .password(self.password.expose_secret())
            .ssl_mode(ssl_mode)
    }
}

#[derive(Clone, Debug, Deserialize)]
pub struct EmailClientSettings {
    pub base_url: String,
    sender_email: String,
    pub authorization_token: Secret<String>,
    #[serde(deserialize_with = "deserialize_number_from_string")]
    pub timeout_milliseconds: u64,
}

impl EmailClientSettings {
    pub fn client(&self) -> Result<EmailClient, anyhow::Error> {
        let sender = self.sender().map_err(|e| anyhow::anyhow!(e))?;

        EmailClient::new(
            self.base_url.clone(),
            sender,
            self.authorization_token.clone(),
            self.timeout(),
        )
    }

    pub fn sender(&self) -> Result<SubscriberEmail, String> {
        SubscriberEmail::parse(self.sender_email.clone())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_milliseconds)
    }
}

#[derive(Clone, Debug, Deserialize)]
pub struct DispatcherSettings {
    #[serde(deserialize_with = "deserialize_number_from_string")]
    pub batch_size: u16,
    #[serde(deserialize_with = "deserialize_number_from_string")]
    pub inter_batch_delay_milliseconds: u64,
    #[serde(deserialize_with = "deserialize_number_from_string")]
    pub poll_interval_milliseconds: u64,
    #[serde(deserialize_with = "deserialize_number_from_string")]
    pub max_retries: u8,
    #[serde(deserialize_with = "deserialize_number_from_string")]
    pub backoff_base_milliseconds: u64,
    #[serde(deserialize_with = "deserialize_number_from_string")]
    pub visibility_timeout_seconds: u64,
    pub recheck_eligibility_before_send: bool,
}

impl DispatcherSettings {
    /// A dispatcher that claims nothing or never retries cannot make progress.
    pub fn validate(&self) -> Result<(), String> {
        if self.batch_size == 0 {
            return Err("dispatcher.batch_size must be at least 1".into());
        }
        if self.max_retries == 0 {
            return Err("dispatcher.max_retries must be at least 1".into());
        }
        Ok(())
    }

    pub fn inter_batch_delay(&self) -> Duration {
        Duration::from_millis(self.inter_batch_delay_milliseconds)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_milliseconds)
    }

    pub fn backoff_base(&self) -> Duration {
        Duration::from_millis(self.backoff_base_milliseconds)
    }

    pub fn visibility_timeout(&self) -> Duration {
        Duration::from_secs(self.visibility_timeout_seconds)
    }
}

impl Default for DispatcherSettings {
    fn default() -> Self {
        Self {
            batch_size: 10,
            inter_batch_delay_milliseconds: 1000,
            poll_interval_milliseconds: 10_000,
            max_retries: 3,
            backoff_base_milliseconds: 30_000,
            visibility_timeout_seconds: 300,
            recheck_eligibility_before_send: true,
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
pub struct CampaignSettings {
    #[serde(deserialize_with = "deserialize_number_from_string")]
    pub max_attachments_bytes: i64,
}

pub fn get_configuration() -> Result<Settings, config::ConfigError> {
    let config_dir = std::env::current_dir()
        .map(|dir| dir.join("configuration"))
        .map_err(|e| {
            config::ConfigError::Message(format!("Failed to determine the current directory: {e}"))
        })?;

    let environment: Environment = std::env::var("APP_ENVIRONMENT")
        .unwrap_or_else(|_| "local".into())
        .try_into()
        .map_err(config::ConfigError::Message)?;

    let env_config = format!("{}.yaml", environment.as_str());

    let settings = config::Config::builder()
        .add_source(config::File::from(config_dir.join("base.yaml")))
        .add_source(config::File::from(config_dir.join(env_config)))
        .add_source(
            config::Environment::with_prefix("APP")
                .prefix_separator("_")
                .separator("__"),
        )
        .build()?;

    let settings: Settings = settings.try_deserialize()?;
    settings
        .dispatcher
        .validate()
        .map_err(config::ConfigError::Message)?;

    Ok(settings)
}

#[derive(Debug)]
pub enum Environment {
    Local,
    Production,
}

impl Environment {
    fn as_str(&self) -> &'static str {
        match self {
            Environment::Local => "local",
            Environment::Production => "production",
        }
    }
}

impl TryFrom<String> for Environment {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        match s.to_lowercase().as_str() {
            "local" => Ok(Environment::Local),
            "production" => Ok(Environment::Production),
            other => Err(format!(
                "`{other}` is not a supported environment. Use either `local` or `production`."
            )),
        }
    }
}
