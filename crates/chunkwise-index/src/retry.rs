//! Retry policy for calls to model services.
//!
//! Timeouts, connection failures, `429` and `5xx` responses are transient and
//! retried with exponential backoff (or the server's `Retry-After`). Anything
//! else fails immediately.

use std::future::Future;
use std::time::Duration;

use reqwest::header::HeaderMap;
use reqwest::StatusCode;

/// Cap on the backoff exponent so delays stay bounded.
const MAX_BACKOFF_SHIFT: u32 = 10;

/// Longest response body echoed into an error message.
const MAX_BODY_IN_ERROR: usize = 300;

/// Why a single attempt failed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AttemptError {
    /// Trying again may succeed.
    #[error("{message}")]
    Transient {
        message: String,
        /// Delay requested by the server, if any.
        retry_after: Option<Duration>,
    },
    /// Trying again will not help.
    #[error("{0}")]
    Fatal(String),
}

impl AttemptError {
    /// Classify a transport-level failure.
    pub fn from_transport(service: &str, err: &reqwest::Error) -> Self {
        let message = format!("{service} request failed: {err}");
        if err.is_timeout() || err.is_connect() || err.is_request() {
            AttemptError::Transient {
                message,
                retry_after: None,
            }
        } else {
            AttemptError::Fatal(message)
        }
    }

    /// Classify a non-success HTTP status.
    ///
    /// # Examples
    ///
    /// ```
    /// use chunkwise_index::retry::AttemptError;
    /// use reqwest::StatusCode;
    ///
    /// let busy = AttemptError::from_status("ollama", StatusCode::SERVICE_UNAVAILABLE, "", None);
    /// assert!(busy.is_transient());
    /// let bad = AttemptError::from_status("ollama", StatusCode::BAD_REQUEST, "no", None);
    /// assert!(!bad.is_transient());
    /// ```
    pub fn from_status(
        service: &str,
        status: StatusCode,
        body: &str,
        retry_after: Option<Duration>,
    ) -> Self {
        let body: String = body.chars().take(MAX_BODY_IN_ERROR).collect();
        let message = format!("{service} returned {status}: {body}");
        if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
            AttemptError::Transient {
                message,
                retry_after,
            }
        } else {
            AttemptError::Fatal(message)
        }
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, AttemptError::Transient { .. })
    }
}

/// Parse a `Retry-After` header given in whole seconds.
pub fn retry_after(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get(reqwest::header::RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}

/// Delay before retry number `attempt` (zero-based): `base_ms * 2^attempt`.
pub fn backoff_delay(base_ms: u64, attempt: u32) -> Duration {
    Duration::from_millis(base_ms.saturating_mul(1u64 << attempt.min(MAX_BACKOFF_SHIFT)))
}

/// Run `f` until it succeeds, fails fatally, or `max_retries` retries are spent.
///
/// # Errors
///
/// Returns the last [`AttemptError`] when retries are exhausted or the
/// failure is not transient.
pub async fn with_retry<T, F, Fut>(
    service: &str,
    max_retries: u32,
    base_ms: u64,
    mut f: F,
) -> Result<T, AttemptError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, AttemptError>>,
{
    let mut attempt = 0;
    loop {
        match f().await {
            Ok(value) => return Ok(value),
            Err(AttemptError::Transient {
                message,
                retry_after,
            }) if attempt < max_retries => {
                let delay = retry_after.unwrap_or_else(|| backoff_delay(base_ms, attempt));
                tracing::warn!(
                    service,
                    attempt = attempt + 1,
                    max_retries,
                    delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                    error = %message,
                    "transient failure, retrying"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn transient() -> AttemptError {
        AttemptError::Transient {
            message: "busy".into(),
            retry_after: None,
        }
    }

    #[test]
    fn backoff_doubles_and_is_capped() {
        assert_eq!(backoff_delay(500, 0), Duration::from_millis(500));
        assert_eq!(backoff_delay(500, 1), Duration::from_millis(1000));
        assert_eq!(backoff_delay(500, 3), Duration::from_millis(4000));
        assert_eq!(backoff_delay(1, 40), backoff_delay(1, MAX_BACKOFF_SHIFT));
    }

    #[test]
    fn status_classification() {
        let cases = [
            (StatusCode::TOO_MANY_REQUESTS, true),
            (StatusCode::INTERNAL_SERVER_ERROR, true),
            (StatusCode::BAD_GATEWAY, true),
            (StatusCode::BAD_REQUEST, false),
            (StatusCode::NOT_FOUND, false),
            (StatusCode::UNAUTHORIZED, false),
        ];
        for (status, retryable) in cases {
            let err = AttemptError::from_status("svc", status, "", None);
            assert_eq!(err.is_transient(), retryable, "{status}");
        }
    }

    #[test]
    fn long_bodies_are_clipped() {
        let body = "x".repeat(5000);
        let err = AttemptError::from_status("svc", StatusCode::BAD_REQUEST, &body, None);
        assert!(err.to_string().len() < 400);
    }

    #[test]
    fn retry_after_header_in_seconds() {
        let mut headers = HeaderMap::new();
        headers.insert(reqwest::header::RETRY_AFTER, "7".parse().unwrap());
        assert_eq!(retry_after(&headers), Some(Duration::from_secs(7)));

        headers.insert(
            reqwest::header::RETRY_AFTER,
            "Wed, 21 Oct 2015 07:28:00 GMT".parse().unwrap(),
        );
        assert_eq!(retry_after(&headers), None);
    }

    #[tokio::test]
    async fn transient_failures_are_retried_until_success() {
        let calls = AtomicU32::new(0);
        let result = with_retry("svc", 3, 1, || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(transient())
                } else {
                    Ok(n)
                }
            }
        })
        .await;
        assert_eq!(result, Ok(2));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn fatal_failures_are_not_retried() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = with_retry("svc", 5, 1, || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(AttemptError::Fatal("bad request".into())) }
        })
        .await;
        assert!(matches!(result, Err(AttemptError::Fatal(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn retries_are_bounded() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = with_retry("svc", 2, 1, || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(transient()) }
        })
        .await;
        assert!(result.unwrap_err().is_transient());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }
}
