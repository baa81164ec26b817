use envconfig::Envconfig;
use url::Url;

use relay_common::config::{require, ConfigError, EnvMsDuration, NonEmptyString, StoreConfig};

#[derive(Envconfig, Clone)]
pub struct Config {
    #[envconfig(from = "BIND_HOST", default = "::")]
    pub host: String,

    #[envconfig(from = "BIND_PORT", default = "3301")]
    pub port: u16,

    #[envconfig(nested = true)]
    pub store: StoreConfig,

    #[envconfig(nested = true)]
    pub api: ApiConfig,

    #[envconfig(default = "relay-notifier")]
    pub worker_name: String,

    #[envconfig(default = "100")]
    pub poll_interval: EnvMsDuration,

    #[envconfig(default = "5000")]
    pub request_timeout: EnvMsDuration,

    #[envconfig(default = "10")]
    pub dequeue_batch_size: u32,

    /// Failed deliveries an event survives before it is dropped from the feed.
    #[envconfig(default = "10")]
    pub max_delivery_attempts: i32,
}

impl Config {
    /// Produce a host:port address for binding a TcpListener.
    pub fn bind(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Where and as whom to reach the ITSM API.
#[derive(Envconfig, Clone, Default)]
pub struct ApiConfig {
    #[envconfig(from = "SNOW_URL")]
    pub url: Option<NonEmptyString>,

    #[envconfig(from = "SNOW_USERNAME")]
    pub username: Option<NonEmptyString>,

    #[envconfig(from = "SNOW_PASSWORD")]
    pub password: Option<NonEmptyString>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiCredentials {
    pub url: Url,
    pub username: String,
    pub password: String,
}

impl TryFrom<&ApiConfig> for ApiCredentials {
    type Error = ConfigError;

    fn try_from(config: &ApiConfig) -> Result<Self, Self::Error> {
        let url = require(&config.url, "SNOW_URL")?;
        let url = Url::parse(url).map_err(|e| ConfigError::Invalid {
            name: "SNOW_URL",
            reason: e.to_string(),
        })?;

        Ok(Self {
            url,
            username: require(&config.username, "SNOW_USERNAME")?.to_owned(),
            password: require(&config.password, "SNOW_PASSWORD")?.to_owned(),
        })
    }
}
