//! Client-side failure taxonomy.

use std::fmt;

use thiserror::Error;

/// Outcome of one coordinator call, as seen by the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StatusCode {
    Success,
    /// Missing or rejected bearer token (HTTP 401), or no token could be minted.
    Unauthenticated,
    /// Token accepted but not allowed to charge the claimed origin (HTTP 403).
    Unauthorized,
    /// Coordinator unreachable, timed out, or answered 5xx.
    Unavailable,
    /// Unexpected response shape or a 4xx other than auth.
    Internal,
}

impl StatusCode {
    /// Classify an HTTP status from a coordinator.
    pub fn from_http(status: u16) -> Self {
        match status {
            200..=299 => Self::Success,
            401 => Self::Unauthenticated,
            403 => Self::Unauthorized,
            500..=599 => Self::Unavailable,
            _ => Self::Internal,
        }
    }

    pub fn is_retryable(self) -> bool {
        matches!(self, Self::Unavailable)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Success => "SUCCESS",
            Self::Unauthenticated => "UNAUTHENTICATED",
            Self::Unauthorized => "UNAUTHORIZED",
            Self::Unavailable => "UNAVAILABLE",
            Self::Internal => "INTERNAL",
        }
    }
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Failure of a single per-coordinator call.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{code}: {message}")]
pub struct BudgetServiceError {
    pub code: StatusCode,
    pub message: String,
}

impl BudgetServiceError {
    pub fn new(code: StatusCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

/// Closed classification of why budget clearance did not succeed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Reporting window outside the freshness range; detected locally.
    InvalidWindow,
    /// Request malformed before any coordinator was contacted.
    InvalidRequest,
    Unauthenticated,
    Unavailable,
    Internal,
    /// At least one coordinator answered and at least one failed.
    PartialCoordinatorFailure,
}

impl From<StatusCode> for ErrorKind {
    fn from(code: StatusCode) -> Self {
        match code {
            StatusCode::Unauthenticated | StatusCode::Unauthorized => Self::Unauthenticated,
            StatusCode::Unavailable => Self::Unavailable,
            StatusCode::Success | StatusCode::Internal => Self::Internal,
        }
    }
}

/// One coordinator's failure within a fan-out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoordinatorFailure {
    pub coordinator: String,
    pub error: BudgetServiceError,
}

impl fmt::Display for CoordinatorFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.coordinator, self.error)
    }
}

/// Failure of a distributed consume. The caller must treat the call as not
/// having happened; retrying the identical request is safe.
#[derive(Debug, Error)]
pub enum DistributedBudgetError {
    #[error("invalid consume request: {0}")]
    InvalidRequest(String),

    #[error("{}", describe_failures(.failures, .succeeded))]
    CoordinatorFailure {
        /// Every coordinator that failed, in configuration order.
        failures: Vec<CoordinatorFailure>,
        /// Coordinators that answered successfully in the same fan-out.
        succeeded: Vec<String>,
    },
}

impl DistributedBudgetError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidRequest(_) => ErrorKind::InvalidRequest,
            Self::CoordinatorFailure { succeeded, .. } if !succeeded.is_empty() => {
                ErrorKind::PartialCoordinatorFailure
            }
            Self::CoordinatorFailure { failures, .. } => failures
                .first()
                .map(|f| ErrorKind::from(f.error.code))
                .unwrap_or(ErrorKind::Internal),
        }
    }

    /// Status of the first failed coordinator, if any coordinator was called.
    pub fn status_code(&self) -> Option<StatusCode> {
        match self {
            Self::InvalidRequest(_) => None,
            Self::CoordinatorFailure { failures, .. } => failures.first().map(|f| f.error.code),
        }
    }

    pub fn failures(&self) -> &[CoordinatorFailure] {
        match self {
            Self::InvalidRequest(_) => &[],
            Self::CoordinatorFailure { failures, .. } => failures,
        }
    }
}

fn describe_failures(failures: &[CoordinatorFailure], succeeded: &[String]) -> String {
    let failed: Vec<String> = failures.iter().map(|f| f.to_string()).collect();
    if succeeded.is_empty() {
        format!("coordinator call failed: {}", failed.join("; "))
    } else {
        format!(
            "coordinator call failed: {}; succeeded: {}",
            failed.join("; "),
            succeeded.join(", ")
        )
    }
}
