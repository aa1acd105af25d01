//! Serving side: runs jobs received over a byte stream.

use std::any::Any;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use bytes::Bytes;
use futures::future::BoxFuture;
use futures::{FutureExt, SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::task::{AbortHandle, JoinSet};
use tokio_util::codec::{FramedRead, FramedWrite};
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};

use crate::error::{Error, Result};
use crate::job::{SerializableJob, WorkerTask};
use crate::message::{JobCodec, WorkerMessage, WorkerMessageType};

/// Type-erased task, decoding its own request and encoding its own response.
trait ErasedTask: Send + Sync {
    fn run(&self, job_id: u64, body: Bytes) -> BoxFuture<'static, Result<Bytes>>;
}

struct TypedTask<T>(Arc<T>);

impl<T: WorkerTask> ErasedTask for TypedTask<T> {
    fn run(&self, job_id: u64, body: Bytes) -> BoxFuture<'static, Result<Bytes>> {
        let task = Arc::clone(&self.0);
        async move {
            let request = T::Request::deserialize(job_id, &body)?;
            let response = task.execute(request).await?;
            response.serialize()
        }
        .boxed()
    }
}

/// Runs registered tasks for jobs arriving on a stream.
///
/// Every job runs on its own task. Answers carry the job id and message type
/// of the request; failures are answered with a `JobError` message holding
/// the error text. A `JobAborted` message cancels the running job with that
/// id without answering it.
#[derive(Default)]
pub struct Worker {
    tasks: HashMap<WorkerMessageType, Arc<dyn ErasedTask>>,
}

impl Worker {
    /// Worker without tasks.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a task for its message type.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DuplicateTask`] if the message type already has a task.
    pub fn register<T: WorkerTask>(&mut self, task: T) -> Result<&mut Self> {
        let message_type = task.message_type();
        if self.tasks.contains_key(&message_type) {
            return Err(Error::DuplicateTask(message_type.to_string()));
        }
        self.tasks
            .insert(message_type, Arc::new(TypedTask(Arc::new(task))));
        Ok(self)
    }

    /// Builder form of [`Worker::register`].
    ///
    /// # Errors
    ///
    /// Returns [`Error::DuplicateTask`] if the message type already has a task.
    pub fn with_task<T: WorkerTask>(mut self, task: T) -> Result<Self> {
        self.register(task)?;
        Ok(self)
    }

    /// Whether a task serves `message_type`.
    #[must_use]
    pub fn handles(&self, message_type: WorkerMessageType) -> bool {
        self.tasks.contains_key(&message_type)
    }

    /// Serve jobs from `stream` until it closes or `shutdown` fires.
    ///
    /// On end of stream the jobs still running are allowed to finish and
    /// their answers are flushed. On shutdown they are aborted.
    ///
    /// # Errors
    ///
    /// Returns an error if the stream carries a malformed frame or cannot be
    /// written.
    #[instrument(skip_all)]
    pub async fn serve<S>(&self, stream: S, shutdown: CancellationToken) -> Result<()>
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (read_half, write_half) = tokio::io::split(stream);
        let mut reader = FramedRead::new(read_half, JobCodec::new());
        let mut writer = FramedWrite::new(write_half, JobCodec::new());

        let mut jobs: JoinSet<(u64, WorkerMessage)> = JoinSet::new();
        let mut running: HashMap<u64, AbortHandle> = HashMap::new();

        let result = loop {
            tokio::select! {
                () = shutdown.cancelled() => {
                    debug!("worker shutting down with {} running jobs", running.len());
                    jobs.shutdown().await;
                    break Ok(());
                }
                Some(joined) = jobs.join_next(), if !jobs.is_empty() => {
                    // Aborted jobs were already removed from `running`
                    if let Ok((job_id, answer)) = joined {
                        running.remove(&job_id);
                        writer.send(answer).await?;
                    }
                }
                next = reader.next() => match next {
                    Some(Ok(message)) => {
                        if let Some(answer) = self.accept(message, &mut jobs, &mut running) {
                            writer.send(answer).await?;
                        }
                    }
                    Some(Err(e)) => break Err(e),
                    None => {
                        debug!("job stream closed, finishing {} running jobs", running.len());
                        while let Some(joined) = jobs.join_next().await {
                            if let Ok((_, answer)) = joined {
                                writer.send(answer).await?;
                            }
                        }
                        break Ok(());
                    }
                }
            }
        };

        if let Err(e) = writer.close().await {
            debug!("failed to close job stream: {e}");
        }
        result
    }

    /// Start a job, or return an immediate answer.
    fn accept(
        &self,
        message: WorkerMessage,
        jobs: &mut JoinSet<(u64, WorkerMessage)>,
        running: &mut HashMap<u64, AbortHandle>,
    ) -> Option<WorkerMessage> {
        let WorkerMessage {
            job_id,
            message_type,
            body,
        } = message;

        match message_type {
            WorkerMessageType::JobAborted => {
                if let Some(handle) = running.remove(&job_id) {
                    debug!(job_id, "aborting job");
                    handle.abort();
                }
                None
            }
            WorkerMessageType::JobError => {
                warn!(job_id, "ignoring job error sent to worker");
                None
            }
            _ if running.contains_key(&job_id) => Some(WorkerMessage::job_error(
                job_id,
                Error::DuplicateJobId(job_id).to_string(),
            )),
            _ => {
                let Some(task) = self.tasks.get(&message_type) else {
                    return Some(WorkerMessage::job_error(
                        job_id,
                        format!("No task registered for {message_type}"),
                    ));
                };

                let job = AssertUnwindSafe(task.run(job_id, body)).catch_unwind();
                let handle = jobs.spawn(async move {
                    let answer = match job.await {
                        Ok(Ok(body)) => WorkerMessage::new(job_id, message_type, body),
                        Ok(Err(e)) => WorkerMessage::job_error(job_id, e.to_string()),
                        Err(panic) => WorkerMessage::job_error(job_id, panic_message(&*panic)),
                    };
                    (job_id, answer)
                });
                running.insert(job_id, handle);
                None
            }
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    panic
        .downcast_ref::<&str>()
        .map(ToString::to_string)
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "job panicked".to_string())
}
