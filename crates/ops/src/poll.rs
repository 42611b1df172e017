use std::future::Future;

use converge_core::{ConvergeError, ConvergeResult, Observation, PollSpec, RemoteError, StateClass};
use metrics::{counter, histogram};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::CancelToken;

/// Fetch a status until its label classifies as success or failure.
///
/// Fetch errors are retried like transient labels and the last one is kept for
/// the timeout report. The deadline runs from the first fetch; a fetch in
/// flight when it passes is abandoned.
pub async fn poll_until<F, Fut>(spec: &PollSpec, cancel: &CancelToken, mut fetch: F) -> ConvergeResult<Observation>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<Observation, RemoteError>>,
{
    let t0 = Instant::now();
    let deadline = t0 + spec.deadline;
    let mut last: Option<Observation> = None;
    let mut last_err: Option<RemoteError> = None;
    let mut tick: u32 = 0;
    let timed_out = |last: Option<Observation>, last_err: Option<RemoteError>| {
        histogram!("converge_poll_ms", t0.elapsed().as_secs_f64() * 1000.0, "outcome" => "timeout");
        warn!(what = %spec.what, last_state = ?last.as_ref().map(|o| o.label.as_str()), "poll timed out");
        let (last_state, detail) = match last {
            Some(o) => (Some(o.label), o.detail),
            None => (None, String::new()),
        };
        ConvergeError::ConvergenceTimeout { what: spec.what.clone(), elapsed: t0.elapsed(), last_state, detail, last_error: last_err }
    };
    loop {
        if cancel.is_cancelled() {
            return Err(ConvergeError::Cancelled { what: spec.what.clone() });
        }
        if tick > 0 && Instant::now() >= deadline {
            return Err(timed_out(last, last_err));
        }
        tick += 1;
        counter!("converge_poll_ticks_total", 1u64);
        let fetched = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(ConvergeError::Cancelled { what: spec.what.clone() }),
            r = tokio::time::timeout_at(deadline, fetch()) => r,
        };
        match fetched {
            Err(_) => return Err(timed_out(last, last_err)),
            Ok(Err(e)) => {
                warn!(what = %spec.what, tick, code = %e.code, error = %e.message, "status fetch failed - will retry");
                last_err = Some(e);
            }
            Ok(Ok(obs)) => match spec.classify(&obs.label) {
                StateClass::Success => {
                    histogram!("converge_poll_ms", t0.elapsed().as_secs_f64() * 1000.0, "outcome" => "success");
                    info!(what = %spec.what, state = %obs.label, ticks = tick, took_ms = %t0.elapsed().as_millis(), "converged");
                    return Ok(obs);
                }
                StateClass::Failure => {
                    histogram!("converge_poll_ms", t0.elapsed().as_secs_f64() * 1000.0, "outcome" => "failure");
                    warn!(what = %spec.what, state = %obs.label, detail = %obs.detail, "reached failure state");
                    return Err(ConvergeError::ConvergenceFailure { what: spec.what.clone(), state: obs.label, detail: obs.detail });
                }
                StateClass::Transient => {
                    if spec.is_known(&obs.label) {
                        debug!(what = %spec.what, tick, state = %obs.label, "still converging");
                    } else {
                        warn!(what = %spec.what, tick, state = %obs.label, "unknown state label; treating as transient");
                    }
                    last = Some(obs);
                }
            },
        }
        let now = Instant::now();
        if now >= deadline {
            return Err(timed_out(last, last_err));
        }
        let nap = spec.interval.min(deadline - now);
        tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(ConvergeError::Cancelled { what: spec.what.clone() }),
            _ = tokio::time::sleep(nap) => {}
        }
    }
}
