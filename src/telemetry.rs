//! Tracing subscriber setup and per-request trace correlation.
//!
//! Every request runs inside a task-local [`RequestTrace`] scope installed
//! by the router middleware; error responses pick the id up through
//! [`active_trace_id`] so operators can correlate a 5xx body with its log
//! lines.

use std::any::type_name_of_val;
use std::sync::atomic::{AtomicBool, Ordering};

use log::LevelFilter;
use thiserror::Error;
use tokio::task_local;
use tracing_log::LogTracer;
use tracing_subscriber::{
    EnvFilter, fmt,
    layer::Layer,
    layer::SubscriberExt,
    util::{SubscriberInitExt, TryInitError},
};

use crate::config::AppConfig;

/// Correlation metadata for one in-flight request.
#[derive(Debug, Clone)]
pub struct RequestTrace {
    pub trace_id: String,
}

impl RequestTrace {
    pub fn generate() -> Self {
        Self {
            trace_id: uuid::Uuid::new_v4().to_string(),
        }
    }
}

task_local! {
    static CURRENT_TRACE: RequestTrace;
}

#[derive(Debug, Error)]
pub enum TelemetryInitError {
    #[error("failed to install log tracer bridge: {0}")]
    LogTracer(#[from] log::SetLoggerError),
    #[error("failed to install tracing subscriber: {0}")]
    Subscriber(#[from] TryInitError),
}

static SUBSCRIBER_INSTALLED: AtomicBool = AtomicBool::new(false);

/// Install the global tracing pipeline once. `log::` macros from sqlx and
/// friends are bridged into tracing; the output format follows
/// `FLEETSYNC_LOG_FORMAT` (json unless set to `pretty`).
pub fn init_tracing(config: &AppConfig) -> Result<(), TelemetryInitError> {
    if SUBSCRIBER_INSTALLED
        .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
        .is_err()
    {
        return Ok(());
    }

    // Bridge first, so anything logging during subscriber setup is captured.
    if let Err(err) = LogTracer::builder()
        .with_max_level(LevelFilter::Trace)
        .init()
    {
        // A LogTracer already installed (tests) is fine; anything else means
        // legacy log macros go nowhere, which is worth a stderr note.
        if !type_name_of_val(log::logger()).contains("LogTracer") {
            eprintln!("Warning: log bridge unavailable ({err}); `log::` macros will be dropped");
        }
    }

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));
    let output = match config.log_format.as_str() {
        "pretty" => fmt::layer().pretty().boxed(),
        _ => fmt::layer().json().boxed(),
    };

    if let Err(err) = tracing_subscriber::registry()
        .with(filter)
        .with(output)
        .try_init()
    {
        SUBSCRIBER_INSTALLED.store(false, Ordering::SeqCst);
        eprintln!("Warning: tracing subscriber not installed ({err})");
    }

    Ok(())
}

/// Run `future` with `trace` as the task-local request trace.
pub async fn scoped<Fut, R>(trace: RequestTrace, future: Fut) -> R
where
    Fut: std::future::Future<Output = R>,
{
    CURRENT_TRACE.scope(trace, future).await
}

/// The trace id of the current request scope, if inside one.
pub fn active_trace_id() -> Option<String> {
    CURRENT_TRACE.try_with(|trace| trace.trace_id.clone()).ok()
}
