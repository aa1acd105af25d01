//! Telemetry points and the API they are submitted to.
//!
//! [`Metric`]'s own serde form is what travels in job bodies. The HTTP API
//! expects a different JSON shape, built by [`TelemetryBody`]: fields carry
//! their kind as `type` next to a bare `value`, and absent tags or timestamps
//! are omitted.

use std::collections::BTreeMap;

use async_trait::async_trait;
use reqwest::Client;
use serde::ser::SerializeStruct;
use serde::{Deserialize, Serialize, Serializer};
use tracing::debug;
use url::Url;

use crate::error::Result;

/// Value of a single metric field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldValue {
    /// Text value.
    String(String),
    /// Flag value.
    Boolean(bool),
    /// Floating point value.
    Float(f64),
    /// Integer value.
    Integer(i64),
}

impl FieldValue {
    /// Kind name used by the telemetry API.
    #[must_use]
    pub const fn type_name(&self) -> &'static str {
        match self {
            Self::String(_) => "string",
            Self::Boolean(_) => "boolean",
            Self::Float(_) => "float",
            Self::Integer(_) => "integer",
        }
    }
}

/// Named field of a metric.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Field {
    /// Field name.
    pub name: String,
    /// Field value.
    pub value: FieldValue,
}

impl Field {
    /// Create a field.
    pub fn new(name: impl Into<String>, value: FieldValue) -> Self {
        Self {
            name: name.into(),
            value,
        }
    }
}

/// One telemetry point.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Metric {
    /// Measurement name.
    pub measurement: String,
    /// Indexed tags.
    #[serde(default)]
    pub tags: BTreeMap<String, String>,
    /// Measured fields.
    pub fields: Vec<Field>,
    /// Milliseconds since the Unix epoch, if the point carries one.
    #[serde(default)]
    pub timestamp: Option<u64>,
}

impl Metric {
    /// Point without tags or timestamp.
    pub fn new(measurement: impl Into<String>, fields: Vec<Field>) -> Self {
        Self {
            measurement: measurement.into(),
            tags: BTreeMap::new(),
            fields,
            timestamp: None,
        }
    }

    /// Add a tag.
    #[must_use]
    pub fn with_tag(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(name.into(), value.into());
        self
    }

    /// Set the timestamp.
    #[must_use]
    pub const fn with_timestamp(mut self, timestamp: u64) -> Self {
        self.timestamp = Some(timestamp);
        self
    }
}

/// JSON body of a telemetry submission: `{ "points": [...] }`.
#[derive(Debug, Serialize)]
pub struct TelemetryBody<'a> {
    points: Vec<ApiMetric<'a>>,
}

impl<'a> TelemetryBody<'a> {
    /// Body for `points`.
    #[must_use]
    pub fn new(points: &'a [Metric]) -> Self {
        Self {
            points: points.iter().map(ApiMetric::from).collect(),
        }
    }
}

#[derive(Debug, Serialize)]
struct ApiMetric<'a> {
    measurement: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    tags: Option<&'a BTreeMap<String, String>>,
    fields: Vec<ApiField<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    timestamp: Option<u64>,
}

impl<'a> From<&'a Metric> for ApiMetric<'a> {
    fn from(metric: &'a Metric) -> Self {
        Self {
            measurement: &metric.measurement,
            tags: (!metric.tags.is_empty()).then_some(&metric.tags),
            fields: metric.fields.iter().map(ApiField).collect(),
            timestamp: metric.timestamp,
        }
    }
}

/// `{ "name": ..., "type": ..., "value": ... }`
#[derive(Debug)]
struct ApiField<'a>(&'a Field);

impl Serialize for ApiField<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let field = self.0;
        let mut state = serializer.serialize_struct("Field", 3)?;
        state.serialize_field("name", &field.name)?;
        state.serialize_field("type", field.value.type_name())?;
        match &field.value {
            FieldValue::String(v) => state.serialize_field("value", v)?,
            FieldValue::Boolean(v) => state.serialize_field("value", v)?,
            FieldValue::Float(v) => state.serialize_field("value", v)?,
            FieldValue::Integer(v) => state.serialize_field("value", v)?,
        }
        state.end()
    }
}

/// Destination for telemetry points.
#[async_trait]
pub trait TelemetryApi: Send + Sync + 'static {
    /// Submit a batch of points.
    ///
    /// # Errors
    ///
    /// Returns an error if the points could not be delivered.
    async fn submit_telemetry(&self, points: &[Metric]) -> Result<()>;
}

/// HTTP client for the public API.
#[derive(Debug, Clone)]
pub struct WebApi {
    client: Client,
    host: Url,
}

impl WebApi {
    /// Default API host.
    pub const DEFAULT_HOST: &'static str = "https://api.ironfish.network";

    /// Client for `host`.
    ///
    /// # Errors
    ///
    /// Returns an error if `host` is not a valid URL.
    pub fn new(host: &str) -> Result<Self> {
        Ok(Self {
            client: Client::new(),
            host: Url::parse(host)?,
        })
    }

    /// API host.
    #[must_use]
    pub const fn host(&self) -> &Url {
        &self.host
    }

    /// Endpoint telemetry is posted to.
    ///
    /// # Errors
    ///
    /// Returns an error if the host cannot be joined with the endpoint path.
    pub fn telemetry_url(&self) -> Result<Url> {
        Ok(self.host.join("telemetry")?)
    }
}

#[async_trait]
impl TelemetryApi for WebApi {
    async fn submit_telemetry(&self, points: &[Metric]) -> Result<()> {
        let url = self.telemetry_url()?;
        debug!("submitting {} telemetry points to {url}", points.len());

        self.client
            .post(url)
            .json(&TelemetryBody::new(points))
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }
}
