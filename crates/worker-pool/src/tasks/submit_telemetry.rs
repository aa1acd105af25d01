use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use tracing::debug;

use crate::error::Result;
use crate::job::{SerializableJob, WorkerTask};
use crate::message::WorkerMessageType;
use crate::telemetry::{Metric, TelemetryApi, WebApi};

/// Batch of points to forward to the telemetry API.
#[derive(Debug, Clone, PartialEq)]
pub struct SubmitTelemetryRequest {
    /// Job id.
    pub job_id: u64,
    /// Points to submit.
    pub points: Vec<Metric>,
}

impl SubmitTelemetryRequest {
    /// Create a request.
    #[must_use]
    pub const fn new(job_id: u64, points: Vec<Metric>) -> Self {
        Self { job_id, points }
    }
}

impl SerializableJob for SubmitTelemetryRequest {
    fn job_id(&self) -> u64 {
        self.job_id
    }

    fn serialize(&self) -> Result<Bytes> {
        Ok(Bytes::from(bincode::serialize(&self.points)?))
    }

    fn deserialize(job_id: u64, bytes: &[u8]) -> Result<Self> {
        Ok(Self {
            job_id,
            points: bincode::deserialize(bytes)?,
        })
    }
}

/// Acknowledges a submitted batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmitTelemetryResponse {
    /// Job id.
    pub job_id: u64,
}

impl SerializableJob for SubmitTelemetryResponse {
    fn job_id(&self) -> u64 {
        self.job_id
    }

    fn serialize(&self) -> Result<Bytes> {
        Ok(Bytes::new())
    }

    fn deserialize(job_id: u64, _bytes: &[u8]) -> Result<Self> {
        Ok(Self { job_id })
    }
}

/// Submits telemetry through a [`TelemetryApi`].
pub struct SubmitTelemetryTask<A = WebApi> {
    api: Arc<A>,
}

impl<A: TelemetryApi> SubmitTelemetryTask<A> {
    /// Task submitting through `api`.
    pub fn new(api: A) -> Self {
        Self { api: Arc::new(api) }
    }

    /// Task sharing an existing API client.
    pub const fn with_shared(api: Arc<A>) -> Self {
        Self { api }
    }
}

#[async_trait]
impl<A: TelemetryApi> WorkerTask for SubmitTelemetryTask<A> {
    type Request = SubmitTelemetryRequest;
    type Response = SubmitTelemetryResponse;

    fn message_type(&self) -> WorkerMessageType {
        WorkerMessageType::SubmitTelemetry
    }

    async fn execute(&self, request: SubmitTelemetryRequest) -> Result<SubmitTelemetryResponse> {
        debug!(job_id = request.job_id, points = request.points.len(), "submitting telemetry");
        self.api.submit_telemetry(&request.points).await?;
        Ok(SubmitTelemetryResponse {
            job_id: request.job_id,
        })
    }
}
