//! Time helpers and bounded blocking calls.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{mpsc, Arc};
use std::thread;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use chrono::{SecondsFormat, Utc};

use crate::common::error::{ServeError, ServeResult};

/// Current timestamp in milliseconds since the Unix epoch.
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Current UTC time as an ISO-8601 string, e.g. `2026-10-19T08:00:00.123456+00:00`.
pub fn now_iso8601() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, false)
}

const RUNNING: u8 = 0;
const COMMITTING: u8 = 1;
const ABANDONED: u8 = 2;

/// Handshake between a bounded call and its worker thread.
///
/// Exactly one side wins: either the worker starts its final, externally
/// visible step, or the caller gives up on it. A worker that loses must not
/// make its work visible.
#[derive(Clone, Debug, Default)]
pub struct Cancellation(Arc<AtomicU8>);

impl Cancellation {
    /// Claim the right to publish results. Returns `false` once the caller has timed out.
    pub fn begin_commit(&self) -> bool {
        self.0
            .compare_exchange(RUNNING, COMMITTING, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Token whose caller has already given up.
    #[cfg(test)]
    pub(crate) fn abandoned() -> Self {
        Self(Arc::new(AtomicU8::new(ABANDONED)))
    }

    fn abandon(&self) -> bool {
        self.0
            .compare_exchange(RUNNING, ABANDONED, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}

/// Run a blocking operation on a helper thread and give up after `timeout`.
///
/// On timeout the worker is detached and told so through its `Cancellation`.
/// If it had already begun committing, the call waits for that commit to
/// finish and returns its result instead of a timeout.
pub fn with_timeout<T, F>(op: &'static str, timeout: Duration, f: F) -> ServeResult<T>
where
    T: Send + 'static,
    F: FnOnce(Cancellation) -> ServeResult<T> + Send + 'static,
{
    let cancel = Cancellation::default();
    let worker_cancel = cancel.clone();
    let (tx, rx) = mpsc::sync_channel(1);
    thread::Builder::new()
        .name(format!("store-{op}"))
        .spawn(move || {
            let _ = tx.send(f(worker_cancel));
        })
        .map_err(|e| ServeError::io(op, e))?;

    let panicked = || ServeError::Connection(format!("{op} worker panicked"));
    match rx.recv_timeout(timeout) {
        Ok(result) => result,
        Err(mpsc::RecvTimeoutError::Timeout) => {
            if cancel.abandon() {
                tracing::warn!(
                    op,
                    timeout_ms = timeout.as_millis() as u64,
                    "artifact store call timed out"
                );
                return Err(ServeError::Connection(format!("{op} timed out")));
            }
            // The worker is already committing; its outcome is the real one.
            rx.recv().unwrap_or_else(|_| Err(panicked()))
        }
        Err(mpsc::RecvTimeoutError::Disconnected) => Err(panicked()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn returns_value_within_deadline() {
        let v = with_timeout("quick", Duration::from_secs(1), |_| Ok(7)).unwrap();
        assert_eq!(v, 7);
    }

    #[test]
    fn times_out_slow_operations() {
        let err = with_timeout("slow", Duration::from_millis(20), |_| {
            thread::sleep(Duration::from_millis(500));
            Ok(())
        })
        .unwrap_err();
        assert_eq!(err.to_string(), "artifact store unavailable: slow timed out");
    }

    #[test]
    fn abandoned_workers_cannot_commit() {
        let (tx, rx) = mpsc::channel();
        let err = with_timeout("slow commit", Duration::from_millis(20), move |cancel| {
            thread::sleep(Duration::from_millis(200));
            let _ = tx.send(cancel.begin_commit());
            Ok(())
        })
        .unwrap_err();
        assert!(matches!(err, ServeError::Connection(_)));
        assert_eq!(rx.recv_timeout(Duration::from_secs(5)), Ok(false));
    }

    #[test]
    fn a_started_commit_is_awaited_past_the_deadline() {
        let v = with_timeout("commit", Duration::from_millis(100), |cancel| {
            assert!(cancel.begin_commit());
            thread::sleep(Duration::from_millis(400));
            Ok(11)
        })
        .unwrap();
        assert_eq!(v, 11);
    }

    #[test]
    fn iso_timestamps_are_utc() {
        assert!(now_iso8601().ends_with("+00:00"));
    }
}
