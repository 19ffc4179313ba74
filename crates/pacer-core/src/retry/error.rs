//! Transport failures and the typed errors they are classified into.

use std::fmt;
use std::time::Duration;

/// High-level classification of a failed request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Credentials missing, invalid or lacking permission (401/403).
    Auth,
    /// Server asked us to slow down (429).
    RateLimit,
    /// Request rejected as malformed (400/422) or failed a client-side check.
    Validation,
    /// Connection-level failure with no HTTP response.
    Network,
    /// Any other API error, with or without a status.
    Api,
    /// Request or connect timed out (including HTTP 408).
    Timeout,
    /// Work was stopped through a cancellation token before it finished.
    Cancelled,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorKind::Auth => "auth",
            ErrorKind::RateLimit => "rate limit",
            ErrorKind::Validation => "validation",
            ErrorKind::Network => "network",
            ErrorKind::Api => "api",
            ErrorKind::Timeout => "timeout",
            ErrorKind::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// What a recovery hint asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HintAction {
    WaitAndRetry,
    RetryWithBackoff,
    CheckCredentials,
    FixRequest,
    CheckConnectivity,
    IncreaseTimeout,
    ReportToProvider,
}

/// A suggestion attached to a [`TypedError`].
///
/// Automatable hints are acted on by the retry policy; the others are meant for
/// whoever reads the error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecoveryHint {
    pub description: String,
    pub automatable: bool,
    pub action: HintAction,
    /// Shell-like template with `{placeholder}` fields, when there is a concrete step.
    pub executable_template: Option<String>,
}

impl RecoveryHint {
    pub fn automatic(action: HintAction, description: impl Into<String>) -> Self {
        Self {
            description: description.into(),
            automatable: true,
            action,
            executable_template: None,
        }
    }

    pub fn manual(action: HintAction, description: impl Into<String>) -> Self {
        Self {
            description: description.into(),
            automatable: false,
            action,
            executable_template: None,
        }
    }

    pub fn with_template(mut self, template: impl Into<String>) -> Self {
        self.executable_template = Some(template.into());
        self
    }
}

/// Field-level detail for validation failures.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldError {
    pub field: String,
    pub message: String,
}

/// A classified failure. Immutable once built by the classifier.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{kind} error: {message}")]
pub struct TypedError {
    pub kind: ErrorKind,
    pub message: String,
    /// HTTP status, when the failure came from a response.
    pub status: Option<u16>,
    /// Server-provided `Retry-After`, when present.
    pub retry_after: Option<Duration>,
    pub field: Option<FieldError>,
    pub hints: Vec<RecoveryHint>,
}

impl TypedError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            status: None,
            retry_after: None,
            field: None,
            hints: Vec::new(),
        }
    }

    pub fn cancelled() -> Self {
        Self::new(ErrorKind::Cancelled, "operation cancelled")
    }

    pub fn with_status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_retry_after(mut self, retry_after: Option<Duration>) -> Self {
        self.retry_after = retry_after;
        self
    }

    pub fn with_field(mut self, field: FieldError) -> Self {
        self.field = Some(field);
        self
    }

    pub fn with_hint(mut self, hint: RecoveryHint) -> Self {
        self.hints.push(hint);
        self
    }

    /// Whether the retry policy may re-run the request that produced this error.
    pub fn is_retryable(&self) -> bool {
        match self.kind {
            ErrorKind::RateLimit | ErrorKind::Network | ErrorKind::Timeout => true,
            ErrorKind::Api => matches!(self.status, Some(s) if s >= 500 || s == 429 || s == 408),
            ErrorKind::Auth | ErrorKind::Validation | ErrorKind::Cancelled => false,
        }
    }

    /// Hints the caller (or a UI) has to act on.
    pub fn caller_hints(&self) -> impl Iterator<Item = &RecoveryHint> {
        self.hints.iter().filter(|h| !h.automatable)
    }

    /// Hints the scheduler acts on by itself.
    pub fn automatable_hints(&self) -> impl Iterator<Item = &RecoveryHint> {
        self.hints.iter().filter(|h| h.automatable)
    }
}

/// Failure as reported by the transport, before classification.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RawFailure {
    /// The server answered with a non-2xx status.
    #[error("HTTP {status}")]
    Status {
        status: u16,
        body: String,
        retry_after: Option<Duration>,
    },
    /// No response was received.
    #[error("no response: {message}")]
    NoResponse { timed_out: bool, message: String },
    /// A 2xx response whose body could not be decoded.
    #[error("malformed response body: {0}")]
    MalformedBody(String),
    /// The request was rejected before it was sent.
    #[error("invalid request: {message}")]
    Invalid {
        field: Option<String>,
        message: String,
    },
    /// The task observed its cancellation token.
    #[error("cancelled")]
    Cancelled,
}
