//! Error types for aspen-platform.

use thiserror::Error;

/// Errors from platform API calls.
///
/// Transient errors (timeouts, platform-side rate limits) may succeed on a
/// later cycle; permanent errors (bad entity, missing permission) will not.
#[derive(Debug, Clone, Error)]
pub enum PlatformError {
    /// The call did not complete within the deadline.
    #[error("platform call timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    /// The platform throttled us.
    #[error("rate limited by platform: {0}")]
    RateLimited(String),

    /// The entity does not exist on the platform.
    #[error("entity not found on platform: {0}")]
    EntityNotFound(String),

    /// The connection's credential lacks the required permission.
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    /// The provider does not support mutations at this level.
    #[error("unsupported level {level} for provider {provider}")]
    UnsupportedLevel { provider: String, level: String },

    /// Any other platform response.
    #[error("platform api error: {0}")]
    Api(String),
}

impl PlatformError {
    /// Whether retrying on a later cycle could succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            PlatformError::Timeout { .. } | PlatformError::RateLimited(_)
        )
    }
}

/// Result type for platform operations.
pub type PlatformResult<T> = Result<T, PlatformError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transience() {
        assert!(PlatformError::Timeout { timeout_ms: 5000 }.is_transient());
        assert!(PlatformError::RateLimited("slow down".into()).is_transient());
        assert!(!PlatformError::EntityNotFound("c1".into()).is_transient());
        assert!(!PlatformError::PermissionDenied("no ads_write".into()).is_transient());
    }
}
