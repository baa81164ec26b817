//! Turn an inbound service desk webhook payload into a `Record`.
use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use chrono_tz::Tz;
use serde_json::Value;
use thiserror::Error;

use relay_common::record::Record;

/// Timestamps arrive in UTC as e.g. `2020-09-01T18:30:00.000+0000`, always with millisecond
/// precision and a literal `+0000` offset.
const SOURCE_TIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.3f";
const SOURCE_TIME_OFFSET: &str = "+0000";
/// The ITSM system expects local wall-clock time, e.g. `2020-09-01 19:30:00`.
const TARGET_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

#[derive(Error, Debug, PartialEq, Eq)]
pub enum NormalizeError {
    #[error("missing value in payload: {field} at {path}")]
    MissingField { field: &'static str, path: String },
    #[error("cannot parse {field} timestamp {value:?}")]
    TimeParse { field: &'static str, value: String },
}

/// Dotted payload paths for the six fields we extract, e.g. `issue.fields.status.name`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldMap {
    pub issue_id: String,
    pub status: String,
    pub summary: String,
    pub description: String,
    pub start_time: String,
    pub finish_time: String,
}

impl FieldMap {
    fn paths(&self) -> [(&'static str, &str); 6] {
        [
            ("issue id", &self.issue_id),
            ("status", &self.status),
            ("summary", &self.summary),
            ("description", &self.description),
            ("start time", &self.start_time),
            ("finish time", &self.finish_time),
        ]
    }
}

pub struct Normalizer {
    fields: FieldMap,
    service_url: String,
    timezone: Tz,
}

impl Normalizer {
    pub fn new(fields: FieldMap, service_url: &str, timezone: Tz) -> Self {
        Self {
            fields,
            service_url: service_url.to_owned(),
            timezone,
        }
    }

    /// Extract, validate and normalize a record from `payload`.
    ///
    /// Every configured path must resolve before anything else is looked at, so a payload missing
    /// any field never yields a partial record.
    pub fn normalize(&self, payload: &Value) -> Result<Record, NormalizeError> {
        for (field, path) in self.fields.paths() {
            if lookup(payload, path).is_none() {
                return Err(NormalizeError::MissingField {
                    field,
                    path: path.to_owned(),
                });
            }
        }

        let text = |path: &str| lookup(payload, path).unwrap_or_default();

        let supplier_ref = text(&self.fields.issue_id);
        let description = format!(
            "For the most up-to-date info, visit {}/{}\n{}",
            self.service_url,
            supplier_ref,
            text(&self.fields.description)
        );
        let start_time = self.to_local_time("start time", &text(&self.fields.start_time))?;
        let end_time = self.to_local_time("finish time", &text(&self.fields.finish_time))?;

        Ok(Record {
            status: text(&self.fields.status),
            title: text(&self.fields.summary),
            supplier_ref,
            description,
            start_time,
            end_time,
            internal_identifier: None,
        })
    }

    fn to_local_time(&self, field: &'static str, value: &str) -> Result<String, NormalizeError> {
        let parsed = parse_source_time(value).ok_or_else(|| NormalizeError::TimeParse {
            field,
            value: value.to_owned(),
        })?;

        Ok(parsed
            .with_timezone(&self.timezone)
            .format(TARGET_TIME_FORMAT)
            .to_string())
    }
}

/// Parse a source timestamp. Chrono is lenient about fraction width, so the shape
/// `YYYY-MM-DDTHH:MM:SS.mmm` is checked before handing the value over.
fn parse_source_time(value: &str) -> Option<DateTime<Utc>> {
    let local = value.strip_suffix(SOURCE_TIME_OFFSET)?;
    let (_, millis) = local.rsplit_once('.')?;
    if local.len() != 23 || millis.len() != 3 || !millis.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }

    let naive = NaiveDateTime::parse_from_str(local, SOURCE_TIME_FORMAT).ok()?;
    Some(Utc.from_utc_datetime(&naive))
}

/// Resolve a dotted path such as `issue.fields.labels.0` against a JSON value.
/// Strings are returned as-is and other scalars or containers as their JSON text; `null` and
/// absent keys resolve to `None`.
fn lookup(value: &Value, path: &str) -> Option<String> {
    let found = path
        .split('.')
        .try_fold(value, |current, segment| match current {
            Value::Object(map) => map.get(segment),
            Value::Array(items) => segment
                .parse::<usize>()
                .ok()
                .and_then(|index| items.get(index)),
            _ => None,
        })?;

    match found {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}
