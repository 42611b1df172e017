use std::future::Future;
use std::time::Duration;

use converge_core::{ConvergeError, ConvergeResult, ErrorClass, RemoteError};
use metrics::counter;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::CancelToken;

/// Deadline and fixed retry interval for one invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InvokeSpec {
    pub deadline: Duration,
    pub interval: Duration,
}

impl InvokeSpec {
    pub fn new(deadline: Duration, interval: Duration) -> Self { Self { deadline, interval } }
}

/// Run `call` until it succeeds, returns an error `classify` calls fatal, or
/// the deadline passes. Every attempt is exactly one call; nothing is issued
/// after a fatal error, past the deadline, or once `cancel` fired.
pub async fn invoke<T, C, F, Fut>(
    what: &str,
    spec: &InvokeSpec,
    cancel: &CancelToken,
    classify: C,
    mut call: F,
) -> ConvergeResult<T>
where
    C: Fn(&RemoteError) -> ErrorClass,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, RemoteError>>,
{
    let t0 = Instant::now();
    let deadline = t0 + spec.deadline;
    let mut attempt: u32 = 0;
    let mut last_err: Option<RemoteError> = None;
    let timed_out = |last_err: Option<RemoteError>, attempt: u32| ConvergeError::ConvergenceTimeout {
        what: what.to_string(),
        elapsed: t0.elapsed(),
        last_state: None,
        detail: format!("{} attempt(s)", attempt),
        last_error: last_err,
    };
    loop {
        if cancel.is_cancelled() {
            return Err(ConvergeError::Cancelled { what: what.to_string() });
        }
        if attempt > 0 && Instant::now() >= deadline {
            return Err(timed_out(last_err, attempt));
        }
        attempt += 1;
        counter!("converge_invoke_attempts_total", 1u64);
        let res = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(ConvergeError::Cancelled { what: what.to_string() }),
            r = tokio::time::timeout_at(deadline, call()) => r,
        };
        let err = match res {
            Ok(Ok(v)) => {
                debug!(what = %what, attempt, took_ms = %t0.elapsed().as_millis(), "invoke ok");
                return Ok(v);
            }
            Ok(Err(e)) => e,
            Err(_) => return Err(timed_out(last_err, attempt)),
        };
        match classify(&err) {
            ErrorClass::Fatal => {
                warn!(what = %what, attempt, code = %err.code, error = %err.message, "invoke failed (fatal)");
                return Err(ConvergeError::FatalRemote { what: what.to_string(), source: err });
            }
            ErrorClass::Retryable => {
                counter!("converge_invoke_retries_total", 1u64);
                warn!(what = %what, attempt, code = %err.code, error = %err.message, "invoke failed (retryable) - will retry");
                last_err = Some(err);
            }
        }
        let now = Instant::now();
        if now >= deadline {
            return Err(timed_out(last_err, attempt));
        }
        let nap = spec.interval.min(deadline - now);
        tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(ConvergeError::Cancelled { what: what.to_string() }),
            _ = tokio::time::sleep(nap) => {}
        }
    }
}
