//! Job contracts shared by the pool and its workers.

use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::Result;
use crate::message::WorkerMessageType;

/// A request or response that crosses the worker boundary.
///
/// Implementations must round-trip:
/// `T::deserialize(value.job_id(), &value.serialize()?)` equals `value`.
pub trait SerializableJob: Sized {
    /// Job this value belongs to.
    fn job_id(&self) -> u64;

    /// Encode the body. The job id travels in the frame, not the body.
    ///
    /// # Errors
    ///
    /// Returns an error if the body cannot be encoded.
    fn serialize(&self) -> Result<Bytes>;

    /// Decode a body received for `job_id`.
    ///
    /// # Errors
    ///
    /// Returns an error if `bytes` is not a valid body.
    fn deserialize(job_id: u64, bytes: &[u8]) -> Result<Self>;
}

/// Work a worker knows how to perform.
#[async_trait]
pub trait WorkerTask: Send + Sync + 'static {
    /// Request this task accepts.
    type Request: SerializableJob + Send + 'static;

    /// Response this task produces.
    type Response: SerializableJob + Send + 'static;

    /// Message type this task serves.
    fn message_type(&self) -> WorkerMessageType;

    /// Run the job.
    ///
    /// # Errors
    ///
    /// Any error is reported back to the pool as a job error.
    async fn execute(&self, request: Self::Request) -> Result<Self::Response>;
}

/// Hands out job ids, strictly increasing from 1.
#[derive(Debug)]
pub struct JobIdAllocator {
    next: AtomicU64,
}

impl JobIdAllocator {
    /// Create an allocator starting at 1.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            next: AtomicU64::new(1),
        }
    }

    /// Next unused id.
    pub fn next_id(&self) -> u64 {
        self.next.fetch_add(1, Ordering::Relaxed)
    }
}

impl Default for JobIdAllocator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::sync::Arc;

    use super::*;

    #[test]
    fn test_ids_increase() {
        let ids = JobIdAllocator::new();
        assert_eq!(ids.next_id(), 1);
        assert_eq!(ids.next_id(), 2);
        assert_eq!(ids.next_id(), 3);
    }

    #[test]
    fn test_ids_unique_across_threads() {
        let ids = Arc::new(JobIdAllocator::new());
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let ids = Arc::clone(&ids);
                std::thread::spawn(move || (0..250).map(|_| ids.next_id()).collect::<Vec<_>>())
            })
            .collect();

        let mut seen = HashSet::new();
        for handle in handles {
            for id in handle.join().unwrap() {
                assert!(seen.insert(id));
            }
        }
        assert_eq!(seen.len(), 1000);
    }
}
