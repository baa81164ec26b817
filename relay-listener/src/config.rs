use chrono_tz::Tz;
use envconfig::Envconfig;

use relay_common::config::{require, ConfigError, NonEmptyString, StoreConfig};

use crate::normalize::{FieldMap, Normalizer};

#[derive(Envconfig)]
pub struct Config {
    #[envconfig(from = "BIND_HOST", default = "::")]
    pub host: String,

    #[envconfig(from = "BIND_PORT", default = "3300")]
    pub port: u16,

    #[envconfig(nested = true)]
    pub store: StoreConfig,

    #[envconfig(nested = true)]
    pub fields: FieldConfig,

    /// Base URL of the service desk, used to link back to the ticket from its description.
    #[envconfig(from = "JSD_URL", default = "")]
    pub service_url: String,

    #[envconfig(default = "Europe/London")]
    pub target_timezone: String,

    #[envconfig(default = "1000000")]
    pub max_body_size: usize,

    #[envconfig(default = "100")]
    pub concurrency_limit: usize,
}

/// Where each field of a change ticket lives in the inbound webhook payload, as dotted paths.
#[derive(Envconfig, Clone, Default)]
pub struct FieldConfig {
    pub issue_id_field: Option<NonEmptyString>,
    pub status_field: Option<NonEmptyString>,
    pub summary_field: Option<NonEmptyString>,
    pub description_field: Option<NonEmptyString>,
    pub start_time_field: Option<NonEmptyString>,
    pub finish_time_field: Option<NonEmptyString>,
}

impl Config {
    pub fn bind(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Build the normalizer, failing if any part of its configuration is missing.
    pub fn normalizer(&self) -> Result<Normalizer, ConfigError> {
        let fields = FieldMap::try_from(&self.fields)?;
        self.store.table()?;
        let timezone = parse_timezone(&self.target_timezone)?;

        Ok(Normalizer::new(fields, &self.service_url, timezone))
    }
}

impl TryFrom<&FieldConfig> for FieldMap {
    type Error = ConfigError;

    fn try_from(config: &FieldConfig) -> Result<Self, Self::Error> {
        Ok(FieldMap {
            issue_id: require(&config.issue_id_field, "ISSUE_ID_FIELD")?.to_owned(),
            status: require(&config.status_field, "STATUS_FIELD")?.to_owned(),
            summary: require(&config.summary_field, "SUMMARY_FIELD")?.to_owned(),
            description: require(&config.description_field, "DESCRIPTION_FIELD")?.to_owned(),
            start_time: require(&config.start_time_field, "START_TIME_FIELD")?.to_owned(),
            finish_time: require(&config.finish_time_field, "FINISH_TIME_FIELD")?.to_owned(),
        })
    }
}

pub fn parse_timezone(name: &str) -> Result<Tz, ConfigError> {
    name.parse::<Tz>().map_err(|error| ConfigError::Invalid {
        name: "TARGET_TIMEZONE",
        reason: error.to_string(),
    })
}
