//! Tasks a worker can run.

mod sleep;
mod submit_telemetry;

pub use sleep::{SleepRequest, SleepResponse, SleepTask};
pub use submit_telemetry::{SubmitTelemetryRequest, SubmitTelemetryResponse, SubmitTelemetryTask};
