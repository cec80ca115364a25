use std::time::Duration;

/// Total attempts for a transient-failing storage operation.
const MAX_ATTEMPTS: u32 = 5;
const INITIAL_DELAY_MS: u64 = 100;
const MAX_DELAY_MS: u64 = 2000;

/// Whether an I/O error is transient and worth retrying.
pub fn is_retryable_io(err: &std::io::Error) -> bool {
    matches!(
        err.kind(),
        std::io::ErrorKind::ConnectionReset
            | std::io::ErrorKind::ConnectionAborted
            | std::io::ErrorKind::BrokenPipe
            | std::io::ErrorKind::UnexpectedEof
            | std::io::ErrorKind::TimedOut
            | std::io::ErrorKind::Interrupted
    )
}

/// Retry a closure on transient I/O errors with exponential backoff plus
/// jitter. Non-transient errors propagate immediately.
pub fn with_retry<T>(
    op_name: &str,
    mut f: impl FnMut() -> std::io::Result<T>,
) -> std::io::Result<T> {
    let mut delay_ms = INITIAL_DELAY_MS;
    let mut last_err = None;

    for attempt in 0..MAX_ATTEMPTS {
        if attempt > 0 {
            let jitter = rand::random::<u64>() % delay_ms.max(1);
            std::thread::sleep(Duration::from_millis(delay_ms + jitter));
            delay_ms = (delay_ms * 2).min(MAX_DELAY_MS);
        }
        match f() {
            Ok(val) => return Ok(val),
            Err(e) if is_retryable_io(&e) && attempt + 1 < MAX_ATTEMPTS => {
                tracing::warn!(
                    "{op_name}: transient I/O error (attempt {}/{MAX_ATTEMPTS}), retrying: {e}",
                    attempt + 1,
                );
                last_err = Some(e);
            }
            Err(e) => return Err(e),
        }
    }
    Err(last_err.expect("retry loop exited without error"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_io_errors() {
        let retryable_kinds = [
            std::io::ErrorKind::ConnectionReset,
            std::io::ErrorKind::ConnectionAborted,
            std::io::ErrorKind::BrokenPipe,
            std::io::ErrorKind::UnexpectedEof,
            std::io::ErrorKind::TimedOut,
            std::io::ErrorKind::Interrupted,
        ];
        for kind in retryable_kinds {
            let err = std::io::Error::new(kind, "test");
            assert!(is_retryable_io(&err), "{kind:?} should be retryable");
        }
    }

    #[test]
    fn non_retryable_io_errors() {
        let non_retryable_kinds = [
            std::io::ErrorKind::NotFound,
            std::io::ErrorKind::PermissionDenied,
            std::io::ErrorKind::InvalidData,
            std::io::ErrorKind::AlreadyExists,
        ];
        for kind in non_retryable_kinds {
            let err = std::io::Error::new(kind, "test");
            assert!(!is_retryable_io(&err), "{kind:?} should NOT be retryable");
        }
    }

    #[test]
    fn permanent_error_fails_first_attempt() {
        let mut calls = 0;
        let result: std::io::Result<()> = with_retry("test", || {
            calls += 1;
            Err(std::io::Error::new(std::io::ErrorKind::NotFound, "gone"))
        });
        assert!(result.is_err());
        assert_eq!(calls, 1);
    }

    #[test]
    fn transient_error_recovers() {
        let mut calls = 0;
        let result = with_retry("test", || {
            calls += 1;
            if calls < 3 {
                Err(std::io::Error::new(
                    std::io::ErrorKind::Interrupted,
                    "flaky",
                ))
            } else {
                Ok(42)
            }
        });
        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls, 3);
    }
}
