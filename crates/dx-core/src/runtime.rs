use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use crate::error::XaiError;

/// Jeton d'annulation partagé. Vérifié entre deux unités de travail, jamais
/// pendant une inférence.
///
/// # Example
/// ```
/// use dx_core::runtime::CancelToken;
/// let token = CancelToken::new();
/// let clone = token.clone();
/// clone.cancel();
/// assert!(token.is_cancelled());
/// assert!(token.check("lime").is_err());
/// ```
#[derive(Clone, Debug, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    /// Fresh, non-cancelled token.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation.
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Release);
    }

    /// True once [`CancelToken::cancel`] was called.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Acquire)
    }

    /// Fail with `XaiError::Cancelled` if cancellation was requested.
    ///
    /// # Errors
    /// Returns `XaiError::Cancelled { stage }` when cancelled.
    pub fn check(&self, stage: &'static str) -> Result<(), XaiError> {
        if self.is_cancelled() {
            return Err(XaiError::Cancelled { stage });
        }
        Ok(())
    }
}

/// Run `work` on a worker thread and wait at most `limit` for its result.
///
/// The worker is detached on expiry; it runs to completion and its result is
/// dropped.
///
/// # Errors
/// Returns `XaiError::Timeout` on expiry, or the error produced by `work`.
///
/// # Example
/// ```
/// use dx_core::runtime::run_with_timeout;
/// use std::time::Duration;
/// let v = run_with_timeout("sum", Duration::from_secs(5), || Ok(2 + 2)).unwrap();
/// assert_eq!(v, 4);
/// ```
pub fn run_with_timeout<T, F>(stage: &'static str, limit: Duration, work: F) -> Result<T, XaiError>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T, XaiError> + Send + 'static,
{
    let (tx, rx) = flume::bounded(1);
    std::thread::Builder::new()
        .name(format!("dx-{stage}"))
        .spawn(move || {
            // Receiver may be gone after a timeout.
            let _ = tx.send(work());
        })
        .map_err(|e| XaiError::Io(format!("cannot spawn worker for {stage}: {e}")))?;

    match rx.recv_timeout(limit) {
        Ok(result) => result,
        Err(flume::RecvTimeoutError::Timeout) => {
            log::warn!("{stage} exceeded {limit:?}");
            Err(XaiError::Timeout { stage, limit })
        }
        Err(flume::RecvTimeoutError::Disconnected) => Err(XaiError::Io(format!(
            "worker for {stage} terminated without a result"
        ))),
    }
}
