use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchErrorKind {
    Unauthorized,
    Transient,
    Malformed,
}

/// Failure to obtain a fresh snapshot from the diary service.
#[derive(Debug, Clone, Error)]
pub enum FetchError {
    #[error("diary session is no longer authorized")]
    Unauthorized,
    #[error("diary service unavailable: {0}")]
    Transient(String),
    #[error("unexpected diary response: {0}")]
    Malformed(String),
}

impl FetchError {
    pub fn kind(&self) -> FetchErrorKind {
        match self {
            FetchError::Unauthorized => FetchErrorKind::Unauthorized,
            FetchError::Transient(_) => FetchErrorKind::Transient,
            FetchError::Malformed(_) => FetchErrorKind::Malformed,
        }
    }
}

#[derive(Debug, Error)]
#[error("failed to dispatch notification: {0}")]
pub struct DispatchError(pub String);

#[derive(Debug, Error)]
#[error("failed to load tier members: {0}")]
pub struct MembershipError(pub String);
