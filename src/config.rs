use config::{Config, ConfigError, File};
use secrecy::{ExposeSecret, Secret};
use serde_aux::field_attributes::deserialize_number_from_string;
use sqlx::{
    postgres::{PgConnectOptions, PgSslMode},
    ConnectOptions,
};
use std::time;

use crate::domain::recipient_email::RecipientEmail;
use crate::mail_rule::RuleId;

#[derive(Debug)]
pub enum Environment {
    Development,
    Production,
}

#[derive(serde::Deserialize, Clone)]
pub struct Settings {
    pub application: ApplicationSettings,
    pub database: DatabaseSettings,
    pub email_client: EmailClientSettings,
    pub mail_rule: MailRuleSettings,
    pub message_store: MessageStoreSettings,
    pub forwarding: ForwardingSettings,
    pub orders: OrderSettings,
    pub sweeper: SweeperSettings,
}

#[derive(serde::Deserialize, Clone)]
pub struct ApplicationSettings {
    #[serde(deserialize_with = "deserialize_number_from_string")]
    pub port: u16,
    pub host: String,
    pub base_url: String,
}

#[derive(serde::Deserialize, Clone)]
pub struct EmailClientSettings {
    pub base_url: String,
    pub sender_email: String,
    pub api_key: Secret<String>,
    pub intro_template: String,
    #[serde(deserialize_with = "deserialize_number_from_string")]
    pub max_batch_size: usize,
    #[serde(deserialize_with = "deserialize_number_from_string")]
    pub timeout_milliseconds: u64,
}

#[derive(serde::Deserialize, Clone)]
pub struct DatabaseSettings {
    pub username: String,
    // secrecy protects secret information and prevents them to be exposed (eg: via logs)
    pub password: Secret<String>,
    #[serde(deserialize_with = "deserialize_number_from_string")]
    pub port: u16,
    pub host: String,
    pub name: String,
    pub require_ssl: bool,
}

/// Location of the inbound mail-acceptance rule.
#[derive(serde::Deserialize, Clone)]
pub struct MailRuleSettings {
    pub base_url: String,
    pub rule_name: String,
    pub rule_set_name: String,
    pub api_key: Secret<String>,
}

#[derive(serde::Deserialize, Clone)]
pub struct MessageStoreSettings {
    pub base_url: String,
}

#[derive(serde::Deserialize, Clone)]
pub struct ForwardingSettings {
    pub domain: String,
}

#[derive(serde::Deserialize, Clone)]
pub struct OrderSettings {
    // Flat price in cents, there is no pricing logic yet
    #[serde(deserialize_with = "deserialize_number_from_string")]
    pub price: i64,
}

#[derive(serde::Deserialize, Clone)]
pub struct SweeperSettings {
    #[serde(deserialize_with = "deserialize_number_from_string")]
    pub interval_seconds: u64,
}

/// Identifiers every component needs at runtime. Built once from [`Settings`] at start up and
/// handed explicitly to the lifecycle, the dispatcher and the routes.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub domain: String,
    pub rule: RuleId,
    pub intro_template: String,
    pub base_url: String,
}

impl ServiceConfig {
    /// Forwarding address of an account, `<id>@<domain>`.
    pub fn address_of(&self, account_id: &uuid::Uuid) -> String {
        format!("{}@{}", account_id, self.domain)
    }
}

impl Settings {
    pub fn get_address(&self) -> String {
        format!(
            "{}:{}",
            self.application.get_host(),
            self.application.get_port()
        )
    }

    pub fn get_app_base_url(&self) -> String {
        self.application.get_base_url()
    }

    pub fn get_db_options(&self) -> PgConnectOptions {
        self.database.get_db_options()
    }

    pub fn get_email_client_sender(&self) -> Result<RecipientEmail, String> {
        self.email_client.get_sender_email()
    }

    pub fn get_email_client_base_url(&self) -> String {
        self.email_client.get_base_url()
    }

    pub fn get_email_client_api(&self) -> Secret<String> {
        self.email_client.get_api_key()
    }

    pub fn get_email_client_timeout(&self) -> time::Duration {
        time::Duration::from_millis(self.email_client.timeout_milliseconds)
    }

    pub fn set_email_client_base_url(&mut self, new_base_url: String) {
        self.email_client.set_base_url(new_base_url)
    }

    pub fn set_email_client_max_batch_size(&mut self, max_batch_size: usize) {
        self.email_client.max_batch_size = max_batch_size
    }

    pub fn set_app_port(&mut self, port: u16) {
        self.application.port = port;
    }

    pub fn get_sweeper_interval(&self) -> time::Duration {
        time::Duration::from_secs(self.sweeper.interval_seconds)
    }

    pub fn get_service_config(&self) -> ServiceConfig {
        ServiceConfig {
            domain: self.forwarding.domain.clone(),
            rule: self.mail_rule.get_rule_id(),
            intro_template: self.email_client.intro_template.clone(),
            base_url: self.application.get_base_url(),
        }
    }
}

impl DatabaseSettings {
    pub fn get_db_options(&self) -> PgConnectOptions {
        let ssl_mode = if self.require_ssl {
            PgSslMode::Require
        } else {
            PgSslMode::Prefer
        };

        let mut db_options = PgConnectOptions::new()
            .host(&self.host)
            .password(self.password.expose_secret())
            .username(&self.username)
            .port(self.port)
            .database(&self.name)
            .ssl_mode(ssl_mode);

        db_options.log_statements(tracing::log::LevelFilter::Trace);

        db_options
    }
}

impl ApplicationSettings {
    pub fn get_port(&self) -> u16 {
        self.port
    }

    pub fn get_host(&self) -> String {
        self.host.clone()
    }

    pub fn get_base_url(&self) -> String {
        self.base_url.clone()
    }
}

impl EmailClientSettings {
    pub fn get_sender_email(&self) -> Result<RecipientEmail, String> {
        RecipientEmail::parse(self.sender_email.clone())
    }

    pub fn get_base_url(&self) -> String {
        self.base_url.clone()
    }

    pub fn get_api_key(&self) -> Secret<String> {
        self.api_key.clone()
    }

    pub fn set_base_url(&mut self, new_base_url: String) {
        self.base_url = new_base_url
    }
}

impl MailRuleSettings {
    pub fn get_rule_id(&self) -> RuleId {
        RuleId {
            rule_name: self.rule_name.clone(),
            rule_set_name: self.rule_set_name.clone(),
        }
    }
}

impl Environment {
    pub fn as_str(&self) -> &'static str {
        match self {
            Environment::Development => "development",
            Environment::Production => "production",
        }
    }
}

impl TryFrom<String> for Environment {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        match value.to_lowercase().as_str() {
            "development" => Ok(Self::Development),
            "production" => Ok(Self::Production),
            unknown_env => Err(format!(
                "{} is not supported environment. Use either 'development' or 'production'.",
                unknown_env
            )),
        }
    }
}

pub fn get_configuration() -> Result<Settings, ConfigError> {
    let root_path = std::env::current_dir().map_err(|err| {
        ConfigError::Message(format!("Failed to determine the current directory: {}", err))
    })?;
    let config_directory = root_path.join("config");
    // Uses development environment by default
    let environment: Environment = std::env::var("APP_ENVIRONMENT")
        .unwrap_or_else(|_| "development".into())
        .try_into()
        .map_err(ConfigError::Message)?;
    let config_base_filepath = config_directory.join("base");
    let config_env_filepath = config_directory.join(environment.as_str());

    // It merges the base configuration file with the one from the specific environment (development or production)
    let settings = Config::builder()
        .add_source(File::from(config_base_filepath).required(true))
        .add_source(File::from(config_env_filepath).required(true))
        // Merge settings from environment variables with a prefix of APP and "__" separator
        // E.g APP_FORWARDING__DOMAIN would set Settings.forwarding.domain
        .add_source(config::Environment::with_prefix("app").separator("__"))
        .build()?;

    tracing::info!("Application environment = {:?}", environment);

    settings.try_deserialize()
}
