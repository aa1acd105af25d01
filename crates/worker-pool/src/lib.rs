//! Job dispatch between a node and its workers.
//!
//! Jobs travel as length-prefixed [`WorkerMessage`]s tagged with a job id and
//! a [`WorkerMessageType`]. A [`Worker`] serves registered [`WorkerTask`]s on
//! one end of a stream; a [`WorkerHandle`] submits jobs on the other end and
//! matches answers to jobs by id.
//!
//! # Example
//!
//! ```no_run
//! use std::time::Duration;
//!
//! use ironfish_worker_pool::{SleepRequest, SleepTask, Worker, WorkerHandle};
//! use tokio_util::sync::CancellationToken;
//!
//! async fn example() -> ironfish_worker_pool::Result<()> {
//!     let (pool_end, worker_end) = tokio::io::duplex(64 * 1024);
//!
//!     let worker = Worker::new().with_task(SleepTask)?;
//!     tokio::spawn(async move { worker.serve(worker_end, CancellationToken::new()).await });
//!
//!     let handle = WorkerHandle::new(pool_end);
//!     let request = SleepRequest::new(handle.next_job_id(), Duration::from_millis(10));
//!     let response = handle.execute(&SleepTask, request).await?;
//!     println!("job {} done", response.job_id);
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

pub mod error;
pub mod job;
pub mod message;
pub mod pool;
pub mod tasks;
pub mod telemetry;
pub mod worker;

pub use error::{Error, ProtocolError, Result};
pub use job::{JobIdAllocator, SerializableJob, WorkerTask};
pub use message::{JobCodec, WorkerMessage, WorkerMessageType};
pub use pool::WorkerHandle;
pub use tasks::{
    SleepRequest, SleepResponse, SleepTask, SubmitTelemetryRequest, SubmitTelemetryResponse,
    SubmitTelemetryTask,
};
pub use telemetry::{Field, FieldValue, Metric, TelemetryApi, TelemetryBody, WebApi};
pub use worker::Worker;
