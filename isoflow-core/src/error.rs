//! Error taxonomy and the caller-visible error vocabulary.

use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Why a flow refused to start. Reported before any worker is loaded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadinessReason {
    KillSwitch,
    PersonalizationDisabled,
    InvalidArguments,
    InvalidToken,
    ManifestMisconfigured,
    ServiceNotFound,
}

impl fmt::Display for ReadinessReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            ReadinessReason::KillSwitch => "global kill switch is on",
            ReadinessReason::PersonalizationDisabled => "personalization is disabled",
            ReadinessReason::InvalidArguments => "invalid request arguments",
            ReadinessReason::InvalidToken => "token could not be decoded",
            ReadinessReason::ManifestMisconfigured => "manifest does not declare the service",
            ReadinessReason::ServiceNotFound => "service package not found",
        };
        f.write_str(text)
    }
}

/// What the caller's `on_failure` receives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    Readiness(ReadinessReason),
    Load,
    Timeout,
    Run,
    Extraction,
    Internal,
}

impl ErrorCode {
    pub const STATUS_INTERNAL_ERROR: i32 = 100;
    pub const STATUS_NAME_NOT_FOUND: i32 = 101;
    pub const STATUS_SERVICE_FAILED: i32 = 102;
    pub const STATUS_PERSONALIZATION_DISABLED: i32 = 103;
    pub const STATUS_MANIFEST_MISCONFIGURED: i32 = 104;
    pub const STATUS_LOADING_FAILED: i32 = 105;
    pub const STATUS_TIMEOUT: i32 = 106;

    /// Stable numeric status for callers that speak integers.
    pub fn status_code(&self) -> i32 {
        match self {
            ErrorCode::Readiness(ReadinessReason::PersonalizationDisabled) => {
                Self::STATUS_PERSONALIZATION_DISABLED
            }
            ErrorCode::Readiness(ReadinessReason::ManifestMisconfigured) => {
                Self::STATUS_MANIFEST_MISCONFIGURED
            }
            ErrorCode::Readiness(ReadinessReason::ServiceNotFound) => Self::STATUS_NAME_NOT_FOUND,
            ErrorCode::Readiness(_) => Self::STATUS_INTERNAL_ERROR,
            ErrorCode::Load => Self::STATUS_LOADING_FAILED,
            ErrorCode::Timeout => Self::STATUS_TIMEOUT,
            ErrorCode::Run | ErrorCode::Extraction => Self::STATUS_SERVICE_FAILED,
            ErrorCode::Internal => Self::STATUS_INTERNAL_ERROR,
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorCode::Readiness(reason) => write!(f, "readiness failure ({reason})"),
            ErrorCode::Load => f.write_str("load failure"),
            ErrorCode::Timeout => f.write_str("timeout"),
            ErrorCode::Run => f.write_str("run failure"),
            ErrorCode::Extraction => f.write_str("extraction failure"),
            ErrorCode::Internal => f.write_str("internal error"),
        }
    }
}

#[derive(Debug, Error)]
pub enum FlowError {
    #[error("readiness check failed: {0}")]
    Readiness(ReadinessReason),

    #[error("failed to load worker {target}: {cause:#}")]
    Load {
        target: String,
        cause: anyhow::Error,
    },

    #[error("worker did not finish within {deadline:?}")]
    Timeout { deadline: Duration },

    #[error("failed to build parameters: {0:#}")]
    Parameters(anyhow::Error),

    #[error("worker run failed: {0:#}")]
    Run(anyhow::Error),

    #[error("result extraction failed: {0:#}")]
    Extraction(anyhow::Error),

    #[error("failed to unload worker: {0:#}")]
    Unload(anyhow::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

impl FlowError {
    pub fn code(&self) -> ErrorCode {
        match self {
            FlowError::Readiness(reason) => ErrorCode::Readiness(*reason),
            FlowError::Load { .. } => ErrorCode::Load,
            FlowError::Timeout { .. } => ErrorCode::Timeout,
            FlowError::Parameters(_) | FlowError::Run(_) => ErrorCode::Run,
            FlowError::Extraction(_) => ErrorCode::Extraction,
            // never reaches a caller; mapped for completeness
            FlowError::Unload(_) | FlowError::Internal(_) => ErrorCode::Internal,
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, FlowError::Timeout { .. })
    }
}

/// The single terminal result handed to the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutionOutcome<T> {
    Success(T),
    Failure(ErrorCode),
}

impl<T> ExecutionOutcome<T> {
    pub fn is_success(&self) -> bool {
        matches!(self, ExecutionOutcome::Success(_))
    }

    pub fn error_code(&self) -> Option<ErrorCode> {
        match self {
            ExecutionOutcome::Success(_) => None,
            ExecutionOutcome::Failure(code) => Some(*code),
        }
    }
}

impl<T> From<Result<T, FlowError>> for ExecutionOutcome<T> {
    fn from(result: Result<T, FlowError>) -> Self {
        match result {
            Ok(value) => ExecutionOutcome::Success(value),
            Err(err) => ExecutionOutcome::Failure(err.code()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes_follow_taxonomy() {
        let load = FlowError::Load {
            target: "com.vendor/Service".into(),
            cause: anyhow::anyhow!("not installed"),
        };
        assert_eq!(load.code(), ErrorCode::Load);
        let timeout = FlowError::Timeout {
            deadline: Duration::from_secs(2),
        };
        assert_eq!(timeout.code(), ErrorCode::Timeout);
        assert_eq!(FlowError::Parameters(anyhow::anyhow!("x")).code(), ErrorCode::Run);
        assert_eq!(FlowError::Extraction(anyhow::anyhow!("x")).code(), ErrorCode::Extraction);
        assert_eq!(
            FlowError::Readiness(ReadinessReason::KillSwitch).code(),
            ErrorCode::Readiness(ReadinessReason::KillSwitch)
        );
    }

    #[test]
    fn test_status_codes() {
        assert_eq!(ErrorCode::Timeout.status_code(), ErrorCode::STATUS_TIMEOUT);
        assert_eq!(ErrorCode::Run.status_code(), ErrorCode::STATUS_SERVICE_FAILED);
        assert_eq!(
            ErrorCode::Readiness(ReadinessReason::InvalidToken).status_code(),
            ErrorCode::STATUS_INTERNAL_ERROR
        );
        assert_eq!(
            ErrorCode::Readiness(ReadinessReason::ServiceNotFound).status_code(),
            ErrorCode::STATUS_NAME_NOT_FOUND
        );
    }

    #[test]
    fn test_outcome_from_result() {
        let ok: ExecutionOutcome<u32> = Ok::<_, FlowError>(7).into();
        assert_eq!(ok, ExecutionOutcome::Success(7));

        let failed: ExecutionOutcome<u32> = Err(FlowError::Timeout {
            deadline: Duration::from_secs(1),
        })
        .into();
        assert_eq!(failed.error_code(), Some(ErrorCode::Timeout));
        assert!(!failed.is_success());
    }

    #[test]
    fn test_load_error_message_keeps_source() {
        let err = FlowError::Load {
            target: "com.vendor/Service".into(),
            cause: anyhow::anyhow!("package not installed"),
        };
        assert_eq!(
            err.to_string(),
            "failed to load worker com.vendor/Service: package not installed"
        );
    }
}
