use std::time::Duration;

use thiserror::Error;

use crate::svc::SvcError;

/// Default budget for waiting on a remote operation. Generous, but finite:
/// a stalled install surfaces as `TimedOut` instead of hanging the caller.
pub const DEFAULT_WAIT: Duration = Duration::from_secs(120);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    Ready,
    TimedOut,
}

/// One outstanding asynchronous remote operation (an update install or a
/// manifest fetch). `take_result` is only meaningful after `wait` reported
/// `Ready`; `close` releases the underlying wait primitive and must run
/// exactly once. Use through [`AsyncHandle`], which enforces both.
pub trait AsyncOp {
    fn wait(&mut self, timeout: Duration) -> Result<WaitOutcome, SvcError>;
    fn take_result(&mut self) -> Result<Vec<u8>, SvcError>;
    fn close(&mut self);
}

#[derive(Debug, Error)]
pub enum AsyncError {
    /// Retryable: the operation may still complete later.
    #[error("remote operation still pending after {0:?}")]
    TimedOut(Duration),
    #[error(transparent)]
    Remote(#[from] SvcError),
}

/// Scoped owner of an [`AsyncOp`]. Closes the operation on every exit path,
/// including early drops, so the kernel handle behind it never leaks.
pub struct AsyncHandle {
    op: Box<dyn AsyncOp>,
}

impl AsyncHandle {
    pub fn new(op: Box<dyn AsyncOp>) -> Self {
        Self { op }
    }

    /// Wait for completion and pull the result bytes out.
    pub fn finish(mut self, timeout: Duration) -> Result<Vec<u8>, AsyncError> {
        match self.op.wait(timeout)? {
            WaitOutcome::TimedOut => Err(AsyncError::TimedOut(timeout)),
            WaitOutcome::Ready => Ok(self.op.take_result()?),
        }
    }
}

impl Drop for AsyncHandle {
    fn drop(&mut self) {
        self.op.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    struct ProbeOp {
        ready: bool,
        closes: Arc<AtomicU32>,
    }

    impl AsyncOp for ProbeOp {
        fn wait(&mut self, _timeout: Duration) -> Result<WaitOutcome, SvcError> {
            Ok(if self.ready {
                WaitOutcome::Ready
            } else {
                WaitOutcome::TimedOut
            })
        }

        fn take_result(&mut self) -> Result<Vec<u8>, SvcError> {
            Ok(vec![1, 2, 3])
        }

        fn close(&mut self) {
            self.closes.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn finish_closes_exactly_once() {
        let closes = Arc::new(AtomicU32::new(0));
        let handle = AsyncHandle::new(Box::new(ProbeOp {
            ready: true,
            closes: closes.clone(),
        }));
        let bytes = handle.finish(DEFAULT_WAIT).unwrap();
        assert_eq!(bytes, vec![1, 2, 3]);
        assert_eq!(closes.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn timeout_is_a_distinct_outcome_and_still_closes() {
        let closes = Arc::new(AtomicU32::new(0));
        let handle = AsyncHandle::new(Box::new(ProbeOp {
            ready: false,
            closes: closes.clone(),
        }));
        let err = handle.finish(Duration::from_millis(5)).unwrap_err();
        assert!(matches!(err, AsyncError::TimedOut(_)));
        assert_eq!(closes.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn abandoned_handle_closes_on_drop() {
        let closes = Arc::new(AtomicU32::new(0));
        {
            let _handle = AsyncHandle::new(Box::new(ProbeOp {
                ready: true,
                closes: closes.clone(),
            }));
        }
        assert_eq!(closes.load(Ordering::SeqCst), 1);
    }
}
