use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::Result;
use crate::job::{SerializableJob, WorkerTask};
use crate::message::WorkerMessageType;

/// Sleep for `duration`, then answer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SleepRequest {
    /// Job id.
    pub job_id: u64,
    /// How long to sleep.
    pub duration: Duration,
    /// Fail with this message after sleeping.
    pub error: Option<String>,
}

impl SleepRequest {
    /// Request that sleeps and succeeds.
    #[must_use]
    pub const fn new(job_id: u64, duration: Duration) -> Self {
        Self {
            job_id,
            duration,
            error: None,
        }
    }

    /// Request that sleeps and then fails with `error`.
    #[must_use]
    pub fn failing(job_id: u64, duration: Duration, error: impl Into<String>) -> Self {
        Self {
            job_id,
            duration,
            error: Some(error.into()),
        }
    }
}

impl SerializableJob for SleepRequest {
    fn job_id(&self) -> u64 {
        self.job_id
    }

    fn serialize(&self) -> Result<Bytes> {
        #[allow(clippy::cast_possible_truncation)]
        let millis = self.duration.as_millis() as u64;
        Ok(Bytes::from(bincode::serialize(&(millis, &self.error))?))
    }

    fn deserialize(job_id: u64, bytes: &[u8]) -> Result<Self> {
        let (millis, error): (u64, Option<String>) = bincode::deserialize(bytes)?;
        Ok(Self {
            job_id,
            duration: Duration::from_millis(millis),
            error,
        })
    }
}

/// Answer to a [`SleepRequest`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SleepResponse {
    /// Job id.
    pub job_id: u64,
}

impl SerializableJob for SleepResponse {
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

/// Sleeps on request. Useful to exercise dispatch and cancellation.
#[derive(Debug, Default, Clone, Copy)]
pub struct SleepTask;

#[async_trait]
impl WorkerTask for SleepTask {
    type Request = SleepRequest;
    type Response = SleepResponse;

    fn message_type(&self) -> WorkerMessageType {
        WorkerMessageType::Sleep
    }

    async fn execute(&self, request: SleepRequest) -> Result<SleepResponse> {
        tokio::time::sleep(request.duration).await;

        match request.error {
            Some(error) => Err(crate::Error::Task(error)),
            None => Ok(SleepResponse {
                job_id: request.job_id,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_roundtrip() {
        let request = SleepRequest::failing(4, Duration::from_millis(250), "nope");
        let bytes = request.serialize().unwrap();

        assert_eq!(SleepRequest::deserialize(4, &bytes).unwrap(), request);
    }

    #[tokio::test]
    async fn test_execute() {
        let response = SleepTask
            .execute(SleepRequest::new(2, Duration::ZERO))
            .await
            .unwrap();
        assert_eq!(response, SleepResponse { job_id: 2 });

        let err = SleepTask
            .execute(SleepRequest::failing(3, Duration::ZERO, "nope"))
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "Task error: nope");
    }
}
