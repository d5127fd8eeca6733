//! Per-call deadlines for external calls.
//!
//! Blocking collaborators cannot be interrupted, so each call runs on its
//! own helper thread and the caller waits on a bounded channel. When the
//! deadline passes the caller gives up and the helper's eventual result
//! (and any session it holds) is dropped on the helper thread.

use crate::error::{TriageError, TriageResult};
use crossbeam_channel::RecvTimeoutError;
use std::time::Duration;

pub fn call_with_timeout<T, F>(call: &str, timeout: Duration, f: F) -> TriageResult<T>
where
    T: Send + 'static,
    F: FnOnce() -> TriageResult<T> + Send + 'static,
{
    let (tx, rx) = crossbeam_channel::bounded(1);
    std::thread::Builder::new()
        .name(format!("call-{call}"))
        .spawn(move || {
            let _ = tx.send(f());
        })
        .map_err(|e| TriageError::Other(anyhow::anyhow!("cannot spawn call thread: {e}")))?;

    match rx.recv_timeout(timeout) {
        Ok(result) => result,
        Err(RecvTimeoutError::Timeout) => {
            log::warn!("{call} exceeded {}ms, abandoning", timeout.as_millis());
            Err(TriageError::Timeout {
                call:       call.to_string(),
                timeout_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
            })
        }
        Err(RecvTimeoutError::Disconnected) => {
            Err(TriageError::upstream(call, "call terminated without a result"))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fast_call_returns_its_result() {
        let out = call_with_timeout("fast", Duration::from_secs(1), || Ok(7u32)).unwrap();
        assert_eq!(out, 7);
    }

    #[test]
    fn slow_call_is_classified_as_timeout() {
        let err = call_with_timeout("slow", Duration::from_millis(20), || {
            std::thread::sleep(Duration::from_millis(500));
            Ok(())
        })
        .unwrap_err();
        assert_eq!(err.kind(), "timeout");
    }

    #[test]
    fn panicking_call_is_upstream_failure() {
        let err = call_with_timeout::<(), _>("boom", Duration::from_secs(1), || panic!("boom"))
            .unwrap_err();
        assert_eq!(err.kind(), "upstream_unavailable");
    }
}
