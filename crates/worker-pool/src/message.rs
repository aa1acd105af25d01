//! Job messages and their wire framing.
//!
//! ```text
//! [u32 length][u64 job id][u8 message type][body]
//! ```
//!
//! `length` counts the job id, the type byte and the body. Integers are
//! big-endian.

use std::fmt;

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::error::{Error, ProtocolError, Result};

/// Maximum frame length (64MB).
pub const MAX_JOB_FRAME_SIZE: usize = 64 * 1024 * 1024;

const LENGTH_SIZE: usize = 4;
const JOB_HEADER_SIZE: usize = 8 + 1;

/// Kind of job a message belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum WorkerMessageType {
    /// Cancel a running job.
    JobAborted = 0,
    /// A job failed; the body carries the error text.
    JobError = 1,
    /// Sleep for a while, then answer.
    Sleep = 2,
    /// Forward telemetry points to the API.
    SubmitTelemetry = 3,
}

impl WorkerMessageType {
    /// Name used in logs and errors.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::JobAborted => "jobAborted",
            Self::JobError => "jobError",
            Self::Sleep => "sleep",
            Self::SubmitTelemetry => "submitTelemetry",
        }
    }
}

impl fmt::Display for WorkerMessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl TryFrom<u8> for WorkerMessageType {
    type Error = ProtocolError;

    fn try_from(value: u8) -> std::result::Result<Self, ProtocolError> {
        match value {
            0 => Ok(Self::JobAborted),
            1 => Ok(Self::JobError),
            2 => Ok(Self::Sleep),
            3 => Ok(Self::SubmitTelemetry),
            other => Err(ProtocolError::UnknownMessageType(other)),
        }
    }
}

/// One message exchanged between a pool and a worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerMessage {
    /// Job this message belongs to.
    pub job_id: u64,
    /// Kind of job.
    pub message_type: WorkerMessageType,
    /// Serialized request or response.
    pub body: Bytes,
}

impl WorkerMessage {
    /// Create a message.
    #[must_use]
    pub const fn new(job_id: u64, message_type: WorkerMessageType, body: Bytes) -> Self {
        Self {
            job_id,
            message_type,
            body,
        }
    }

    /// Error answer for `job_id`.
    #[must_use]
    pub fn job_error(job_id: u64, message: impl Into<String>) -> Self {
        Self::new(
            job_id,
            WorkerMessageType::JobError,
            Bytes::from(message.into()),
        )
    }

    /// Request to cancel `job_id`.
    #[must_use]
    pub const fn job_aborted(job_id: u64) -> Self {
        Self::new(job_id, WorkerMessageType::JobAborted, Bytes::new())
    }

    /// Length field this message is framed with.
    #[must_use]
    pub const fn frame_len(&self) -> usize {
        JOB_HEADER_SIZE + self.body.len()
    }

    /// Error text of a `JobError` message.
    #[must_use]
    pub fn error_message(&self) -> Option<String> {
        (self.message_type == WorkerMessageType::JobError)
            .then(|| String::from_utf8_lossy(&self.body).into_owned())
    }
}

/// Codec for [`WorkerMessage`]s.
#[derive(Debug, Clone)]
pub struct JobCodec {
    max_frame_size: usize,
}

impl JobCodec {
    /// Create a codec with the default size limit.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            max_frame_size: MAX_JOB_FRAME_SIZE,
        }
    }

    /// Create a codec with a custom size limit.
    #[must_use]
    pub const fn with_max_frame_size(max_frame_size: usize) -> Self {
        Self { max_frame_size }
    }
}

impl Default for JobCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for JobCodec {
    type Item = WorkerMessage;
    type Error = Error;

    fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<Self::Item>> {
        if buf.len() < LENGTH_SIZE {
            return Ok(None);
        }

        let length = (&buf[..LENGTH_SIZE]).get_u32() as usize;
        if length > self.max_frame_size {
            return Err(ProtocolError::FrameTooLarge {
                size: length,
                max: self.max_frame_size,
            }
            .into());
        }
        if length < JOB_HEADER_SIZE {
            return Err(ProtocolError::FrameTooShort(length).into());
        }
        if buf.len() < LENGTH_SIZE + length {
            buf.reserve(LENGTH_SIZE + length - buf.len());
            return Ok(None);
        }

        // Validate the type before consuming anything
        let message_type = WorkerMessageType::try_from(buf[LENGTH_SIZE + 8])?;

        buf.advance(LENGTH_SIZE);
        let job_id = buf.get_u64();
        buf.advance(1);
        let body = buf.split_to(length - JOB_HEADER_SIZE).freeze();

        Ok(Some(WorkerMessage {
            job_id,
            message_type,
            body,
        }))
    }
}

impl Encoder<WorkerMessage> for JobCodec {
    type Error = Error;

    fn encode(&mut self, message: WorkerMessage, buf: &mut BytesMut) -> Result<()> {
        let length = message.frame_len();
        if length > self.max_frame_size {
            return Err(ProtocolError::FrameTooLarge {
                size: length,
                max: self.max_frame_size,
            }
            .into());
        }

        buf.reserve(LENGTH_SIZE + length);
        #[allow(clippy::cast_possible_truncation)]
        buf.put_u32(length as u32);
        buf.put_u64(message.job_id);
        buf.put_u8(message.message_type as u8);
        buf.extend_from_slice(&message.body);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn encode(message: WorkerMessage) -> BytesMut {
        let mut buf = BytesMut::new();
        JobCodec::new().encode(message, &mut buf).unwrap();
        buf
    }

    #[test]
    fn test_layout() {
        let buf = encode(WorkerMessage::new(
            0x0102,
            WorkerMessageType::Sleep,
            Bytes::from_static(b"ab"),
        ));

        assert_eq!(
            &buf[..],
            &[0, 0, 0, 11, 0, 0, 0, 0, 0, 0, 1, 2, 2, b'a', b'b']
        );
    }

    #[test]
    fn test_partial_input_is_not_consumed() {
        let full = encode(WorkerMessage::new(
            9,
            WorkerMessageType::SubmitTelemetry,
            Bytes::from_static(b"points"),
        ));

        for cut in 0..full.len() {
            let mut partial = BytesMut::from(&full[..cut]);
            assert!(JobCodec::new().decode(&mut partial).unwrap().is_none());
            assert_eq!(partial.len(), cut);
        }
    }

    #[test]
    fn test_back_to_back_messages() {
        let mut buf = encode(WorkerMessage::job_aborted(1));
        buf.extend_from_slice(&encode(WorkerMessage::job_error(2, "boom")));

        let mut codec = JobCodec::new();
        let first = codec.decode(&mut buf).unwrap().unwrap();
        let second = codec.decode(&mut buf).unwrap().unwrap();

        assert_eq!(first, WorkerMessage::job_aborted(1));
        assert_eq!(second.error_message().as_deref(), Some("boom"));
        assert!(buf.is_empty());
    }

    #[test]
    fn test_unknown_message_type() {
        let mut buf = encode(WorkerMessage::job_aborted(1));
        buf[LENGTH_SIZE + 8] = 0xff;

        let err = JobCodec::new().decode(&mut buf).unwrap_err();
        assert!(matches!(
            err,
            Error::Protocol(ProtocolError::UnknownMessageType(0xff))
        ));
    }

    #[test]
    fn test_frame_limits() {
        let message = WorkerMessage::new(1, WorkerMessageType::Sleep, Bytes::from(vec![0; 64]));
        let mut codec = JobCodec::with_max_frame_size(32);

        let mut buf = BytesMut::new();
        assert!(matches!(
            codec.encode(message.clone(), &mut buf),
            Err(Error::Protocol(ProtocolError::FrameTooLarge { .. }))
        ));

        let mut buf = encode(message);
        assert!(matches!(
            codec.decode(&mut buf),
            Err(Error::Protocol(ProtocolError::FrameTooLarge { .. }))
        ));

        let mut short = BytesMut::from(&[0u8, 0, 0, 3, 1, 2, 3][..]);
        assert!(matches!(
            JobCodec::new().decode(&mut short),
            Err(Error::Protocol(ProtocolError::FrameTooShort(3)))
        ));
    }

    proptest! {
        #[test]
        fn prop_messages_survive_the_codec(
            job_id in any::<u64>(),
            type_byte in 0u8..4,
            body in proptest::collection::vec(any::<u8>(), 0..512),
        ) {
            let message = WorkerMessage::new(
                job_id,
                WorkerMessageType::try_from(type_byte).unwrap(),
                Bytes::from(body),
            );

            let mut buf = encode(message.clone());
            let decoded = JobCodec::new().decode(&mut buf).unwrap().unwrap();
            prop_assert_eq!(decoded, message);
            prop_assert!(buf.is_empty());
        }
    }
}
