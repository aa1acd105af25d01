//! Submitting side: sends jobs to a worker and awaits their answers.

use std::sync::Arc;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::codec::{FramedRead, FramedWrite};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::{Error, ProtocolError, Result};
use crate::job::{JobIdAllocator, SerializableJob, WorkerTask};
use crate::message::{JobCodec, MAX_JOB_FRAME_SIZE, WorkerMessage, WorkerMessageType};

type PendingJobs = DashMap<u64, oneshot::Sender<WorkerMessage>>;

/// Connection to one worker.
///
/// Jobs are matched to answers by job id, so any number may be in flight.
pub struct WorkerHandle {
    ids: JobIdAllocator,
    pending: Arc<PendingJobs>,
    outbound: mpsc::UnboundedSender<WorkerMessage>,
    closed: CancellationToken,
    max_frame_size: usize,
    reader: JoinHandle<()>,
    writer: JoinHandle<()>,
}

impl WorkerHandle {
    /// Attach to a worker served on the other end of `stream`.
    pub fn new<S>(stream: S) -> Self
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        Self::with_max_frame_size(stream, MAX_JOB_FRAME_SIZE)
    }

    /// Attach to a worker, refusing jobs whose frame exceeds `max_frame_size`.
    pub fn with_max_frame_size<S>(stream: S, max_frame_size: usize) -> Self
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (read_half, write_half) = tokio::io::split(stream);
        let pending = Arc::new(PendingJobs::new());
        let (outbound, mut rx) = mpsc::unbounded_channel::<WorkerMessage>();
        let closed = CancellationToken::new();

        let writer = tokio::spawn({
            let pending = Arc::clone(&pending);
            let closed = closed.clone();
            async move {
                let mut sink =
                    FramedWrite::new(write_half, JobCodec::with_max_frame_size(max_frame_size));
                while let Some(message) = rx.recv().await {
                    if let Err(e) = sink.send(message).await {
                        warn!("failed to send job: {e}");
                        // Nothing more reaches the worker, so fail every waiting job
                        closed.cancel();
                        pending.clear();
                        break;
                    }
                }
                let _ = sink.close().await;
            }
        });

        let reader = tokio::spawn({
            let pending = Arc::clone(&pending);
            let closed = closed.clone();
            async move {
                let mut frames = FramedRead::new(read_half, JobCodec::new());
                while let Some(frame) = frames.next().await {
                    match frame {
                        Ok(message) => match pending.remove(&message.job_id) {
                            Some((_, tx)) => {
                                let _ = tx.send(message);
                            }
                            None => debug!(job_id = message.job_id, "answer for unknown job"),
                        },
                        Err(e) => {
                            warn!("worker stream failed: {e}");
                            break;
                        }
                    }
                }
                closed.cancel();
                // Dropping the senders fails every waiting job
                pending.clear();
            }
        });

        Self {
            ids: JobIdAllocator::new(),
            pending,
            outbound,
            closed,
            max_frame_size,
            reader,
            writer,
        }
    }

    /// Allocate an id for a new job.
    pub fn next_job_id(&self) -> u64 {
        self.ids.next_id()
    }

    /// Whether the connection to the worker is gone.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }

    /// Jobs waiting for an answer.
    #[must_use]
    pub fn pending_jobs(&self) -> usize {
        self.pending.len()
    }

    /// Run `request` on the worker's task for `task`'s message type.
    ///
    /// # Errors
    ///
    /// Returns [`Error::JobFailed`] when the worker answers with an error,
    /// [`Error::JobAborted`] if the job is aborted, [`ProtocolError::FrameTooLarge`]
    /// if the request does not fit in a frame, or [`Error::ChannelClosed`] if
    /// the connection drops first.
    pub async fn execute<T: WorkerTask>(&self, task: &T, request: T::Request) -> Result<T::Response> {
        self.submit(task.message_type(), request).await
    }

    /// Send `request` as a `message_type` job and decode the answer.
    ///
    /// # Errors
    ///
    /// See [`WorkerHandle::execute`].
    pub async fn submit<Req, Resp>(&self, message_type: WorkerMessageType, request: Req) -> Result<Resp>
    where
        Req: SerializableJob,
        Resp: SerializableJob,
    {
        let job_id = request.job_id();
        let message = WorkerMessage::new(job_id, message_type, request.serialize()?);
        let size = message.frame_len();
        if size > self.max_frame_size {
            return Err(ProtocolError::FrameTooLarge {
                size,
                max: self.max_frame_size,
            }
            .into());
        }

        let (tx, rx) = oneshot::channel();
        match self.pending.entry(job_id) {
            Entry::Occupied(_) => return Err(Error::DuplicateJobId(job_id)),
            Entry::Vacant(entry) => {
                entry.insert(tx);
            }
        }

        // The reader may have cleared the table before our insert
        if self.closed.is_cancelled()
            || self.outbound.send(message).is_err()
        {
            self.pending.remove(&job_id);
            return Err(Error::ChannelClosed);
        }

        let answer = rx.await.map_err(|_| {
            if self.closed.is_cancelled() || self.outbound.is_closed() {
                Error::ChannelClosed
            } else {
                Error::JobAborted(job_id)
            }
        })?;

        if let Some(message) = answer.error_message() {
            return Err(Error::JobFailed { job_id, message });
        }
        Resp::deserialize(job_id, &answer.body)
    }

    /// Cancel a job. Its waiter fails with [`Error::JobAborted`].
    ///
    /// # Errors
    ///
    /// Returns [`Error::ChannelClosed`] if the connection is gone.
    pub fn abort(&self, job_id: u64) -> Result<()> {
        self.pending.remove(&job_id);
        self.outbound
            .send(WorkerMessage::job_aborted(job_id))
            .map_err(|_| Error::ChannelClosed)
    }
}

impl Drop for WorkerHandle {
    fn drop(&mut self) {
        self.reader.abort();
        self.writer.abort();
    }
}
