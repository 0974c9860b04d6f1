use thiserror::Error;

/// Errors from the LLM chat-completion service (spec §7: `LLMTransient`,
/// `LLMMalformed`).
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum LlmError {
    /// HTTP/network request failed (timeout, connection reset).
    #[error("request failed: {0}")]
    RequestFailed(String),

    /// The provider rate-limited the request.
    #[error("rate limited")]
    RateLimited,

    /// The provider returned a server error (5xx).
    #[error("server error: {0}")]
    ServerError(String),

    /// The provider's response didn't parse or didn't validate against the
    /// fixed schema the caller expects.
    #[error("invalid response: {0}")]
    InvalidResponse(String),

    /// Catch-all for other errors.
    #[error("{0}")]
    Other(#[from] Box<dyn std::error::Error + Send + Sync>),
}

impl LlmError {
    /// Whether retrying this request might succeed. Per spec §4.2/§4.3 both
    /// transient failures (timeout, 5xx, rate limit) and malformed responses
    /// are retried up to `llm_max_retries`; only after the cap is exhausted
    /// does the caller treat the shard/incident as failed. The `Other`
    /// catch-all is treated conservatively as non-retryable.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            LlmError::RateLimited
                | LlmError::RequestFailed(_)
                | LlmError::ServerError(_)
                | LlmError::InvalidResponse(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rate_limited_is_retryable() {
        assert!(LlmError::RateLimited.is_retryable());
    }

    #[test]
    fn invalid_response_is_retryable_per_spec_llm_malformed() {
        assert!(LlmError::InvalidResponse("bad json".into()).is_retryable());
    }

    #[test]
    fn other_catch_all_is_not_retryable() {
        let err = LlmError::Other(Box::from("opaque"));
        assert!(!err.is_retryable());
    }

    #[test]
    fn server_error_is_retryable() {
        assert!(LlmError::ServerError("503".into()).is_retryable());
    }
}
