//! Common error types used across the workspace.
//!
//! Each layer defines its own typed errors and converts into the base
//! [`HomeNodeError`] via `#[from]`. Validation carries a deliberate
//! two-way contract (see [`ValidationError`]): a plain rejection, or a
//! descriptive message that callers must surface verbatim.

/// Base error enum aggregating the typed layer errors.
#[derive(Debug, thiserror::Error)]
pub enum HomeNodeError {
    #[error("validation error")]
    Validation(#[from] ValidationError),

    #[error("configuration error")]
    Config(#[from] ConfigError),

    #[error("schedule error")]
    Schedule(#[from] ScheduleError),

    #[error("api error")]
    Api(#[from] ApiError),
}

/// Rule validation failure.
///
/// `Rejected` corresponds to the boolean-failure contract (the rule is
/// simply not acceptable for this kind, no further detail). `Message`
/// carries a descriptive string — for example a thermostat with an
/// out-of-range tolerance — which callers propagate verbatim instead of
/// a generic failure.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("invalid rule")]
    Rejected,

    #[error("{0}")]
    Message(String),
}

/// Structural configuration error, surfaced before the core starts.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("unknown _type {tag:?} (device: {is_device})")]
    UnknownType { tag: String, is_device: bool },

    #[error("{key} is missing required field {field}")]
    MissingField { key: String, field: &'static str },

    #[error("instance keys must be sequential: expected {expected}, found {found}")]
    NonSequential { expected: String, found: String },

    #[error("duplicate nickname {0:?}")]
    DuplicateNickname(String),

    #[error("{sensor} targets unknown device {target}")]
    UnknownTarget { sensor: String, target: String },

    #[error("{key}: {message}")]
    Invalid { key: String, message: String },

    #[error("invalid default_rule for {key}: {source}")]
    DefaultRule {
        key: String,
        source: ValidationError,
    },
}

/// Schedule/keyword resolution error.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ScheduleError {
    #[error("invalid timestamp {0:?}, expected HH:MM")]
    InvalidTimestamp(String),

    #[error("unknown schedule keyword {0:?}")]
    UnknownKeyword(String),
}

/// Remote command envelope failure.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// Peer unreachable or connection dropped — transient, retry later.
    #[error("peer unreachable: {0}")]
    Unreachable(String),

    /// No response within the bounded timeout — transient.
    #[error("request timed out")]
    Timeout,

    /// The peer was reachable and reported an error envelope.
    #[error("remote error: {0}")]
    Remote(String),

    /// Response shape not understood — protocol failure, not transient.
    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

impl ApiError {
    /// Whether this failure is expected to clear on its own (retry on the
    /// next group evaluation rather than escalating).
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Unreachable(_) | Self::Timeout)
    }
}
