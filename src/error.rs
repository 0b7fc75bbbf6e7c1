use thiserror::Error;

#[derive(Error, Debug)]
pub enum VanityError {
    #[error("Invalid key: {0}")]
    InvalidKey(String),

    #[error("Invalid pattern: {0}")]
    InvalidPattern(String),

    #[error("Invalid job id: {0}")]
    InvalidJobId(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Job not found: {0}")]
    JobNotFound(String),

    #[error("Job already exists: {0}")]
    JobExists(String),

    #[error("Unauthorized")]
    Unauthorized,

    #[error("Rate limited, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("No pooled address and on-demand search exhausted after {attempts} attempts")]
    PoolExhausted { attempts: u64 },

    #[error("Store error: {0}")]
    Store(String),

    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl VanityError {
    /// Validation and capacity errors are the caller's to fix; everything
    /// else is an infrastructure failure.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            VanityError::InvalidKey(_)
                | VanityError::InvalidPattern(_)
                | VanityError::InvalidJobId(_)
                | VanityError::InvalidRequest(_)
                | VanityError::JobNotFound(_)
                | VanityError::JobExists(_)
                | VanityError::Unauthorized
                | VanityError::RateLimited { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, VanityError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rate_limited_message_includes_delay() {
        let err = VanityError::RateLimited {
            retry_after_secs: 7,
        };
        assert_eq!(err.to_string(), "Rate limited, retry after 7s");
        assert!(err.is_client_error());
    }

    #[test]
    fn store_errors_are_not_client_errors() {
        assert!(!VanityError::Store("down".into()).is_client_error());
        assert!(!VanityError::Internal("boom".into()).is_client_error());
    }
}
