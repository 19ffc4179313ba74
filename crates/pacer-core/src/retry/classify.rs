//! Classify transport failures into typed errors with recovery hints.

use serde_json::Value;

use super::error::{ErrorKind, FieldError, HintAction, RawFailure, RecoveryHint, TypedError};

/// Map a raw transport failure to exactly one [`ErrorKind`], attaching hints.
///
/// Pure: performs no I/O and never retries.
pub fn classify(raw: RawFailure) -> TypedError {
    let err = match raw {
        RawFailure::Status {
            status,
            body,
            retry_after,
        } => classify_status(status, &body).with_retry_after(retry_after),
        RawFailure::NoResponse { timed_out: true, message } => {
            TypedError::new(ErrorKind::Timeout, message)
        }
        RawFailure::NoResponse { timed_out: false, message } => {
            TypedError::new(ErrorKind::Network, message)
        }
        RawFailure::MalformedBody(message) => {
            TypedError::new(ErrorKind::Api, format!("malformed response body: {message}"))
        }
        RawFailure::Invalid { field, message } => {
            let e = TypedError::new(ErrorKind::Validation, message.clone());
            match field {
                Some(field) => e.with_field(FieldError { field, message }),
                None => e,
            }
        }
        RawFailure::Cancelled => TypedError::cancelled(),
    };
    attach_hints(err)
}

/// Classify an HTTP status code (and error body) for retry decisions.
pub fn classify_status(status: u16, body: &str) -> TypedError {
    let json: Option<Value> = serde_json::from_str(body).ok();
    let message = json
        .as_ref()
        .and_then(error_message)
        .unwrap_or_else(|| fallback_message(status, body));

    let kind = match status {
        401 | 403 => ErrorKind::Auth,
        429 => ErrorKind::RateLimit,
        408 => ErrorKind::Timeout,
        400 | 422 => ErrorKind::Validation,
        _ => ErrorKind::Api,
    };

    let mut err = TypedError::new(kind, message).with_status(status);
    if kind == ErrorKind::Validation {
        if let Some(field) = json.as_ref().and_then(field_error) {
            err = err.with_field(field);
        }
    }
    err
}

/// Pull a human-readable message out of the common error body shapes:
/// `{"error": {"message": ..}}`, `{"error": ".."}`, `{"message": ..}`, `{"detail": ..}`.
fn error_message(v: &Value) -> Option<String> {
    let candidates = [
        v.pointer("/error/message"),
        v.get("error").filter(|e| e.is_string()),
        v.get("message"),
        v.get("detail").filter(|d| d.is_string()),
    ];
    candidates
        .into_iter()
        .flatten()
        .find_map(|m| m.as_str().map(str::to_string))
}

fn field_error(v: &Value) -> Option<FieldError> {
    if let Some(param) = v.pointer("/error/param").and_then(Value::as_str) {
        return Some(FieldError {
            field: param.to_string(),
            message: error_message(v).unwrap_or_default(),
        });
    }
    // FastAPI-style: {"detail": [{"loc": ["body", "prompt"], "msg": "..."}]}
    let first = v.get("detail")?.as_array()?.first()?;
    let field = first
        .get("loc")?
        .as_array()?
        .iter()
        .filter_map(Value::as_str)
        .filter(|s| *s != "body")
        .collect::<Vec<_>>()
        .join(".");
    let message = first.get("msg").and_then(Value::as_str).unwrap_or("").to_string();
    Some(FieldError { field, message })
}

fn fallback_message(status: u16, body: &str) -> String {
    let body = body.trim();
    if body.is_empty() {
        format!("HTTP {status}")
    } else {
        let snippet: String = body.chars().take(200).collect();
        format!("HTTP {status}: {snippet}")
    }
}

fn attach_hints(err: TypedError) -> TypedError {
    match err.kind {
        ErrorKind::Auth => err.with_hint(
            RecoveryHint::manual(
                HintAction::CheckCredentials,
                "check that your API key is set and has access to this endpoint",
            )
            .with_template("export {api_key_env}=<your-api-key>"),
        ),
        ErrorKind::RateLimit => {
            let wait = match err.retry_after {
                Some(d) => format!("wait {} seconds and retry", d.as_secs().max(1)),
                None => "wait and retry with backoff".to_string(),
            };
            err.with_hint(RecoveryHint::automatic(HintAction::WaitAndRetry, wait))
                .with_hint(RecoveryHint::manual(
                    HintAction::ReportToProvider,
                    "lower --rpm or request a higher quota if this persists",
                ))
        }
        ErrorKind::Validation => {
            let description = match &err.field {
                Some(f) if !f.field.is_empty() => format!("fix the `{}` field: {}", f.field, f.message),
                _ => "fix the request parameters".to_string(),
            };
            err.with_hint(RecoveryHint::manual(HintAction::FixRequest, description))
        }
        ErrorKind::Network => err
            .with_hint(RecoveryHint::automatic(
                HintAction::RetryWithBackoff,
                "retry with exponential backoff",
            ))
            .with_hint(RecoveryHint::manual(
                HintAction::CheckConnectivity,
                "check network connectivity and the configured base URL",
            )),
        ErrorKind::Timeout => err
            .with_hint(RecoveryHint::automatic(
                HintAction::RetryWithBackoff,
                "retry with exponential backoff",
            ))
            .with_hint(
                RecoveryHint::manual(HintAction::IncreaseTimeout, "raise the request timeout")
                    .with_template("timeout_secs = {seconds}"),
            ),
        ErrorKind::Api if err.is_retryable() => err.with_hint(RecoveryHint::automatic(
            HintAction::RetryWithBackoff,
            "server error; retry with exponential backoff",
        )),
        ErrorKind::Api => err.with_hint(RecoveryHint::manual(
            HintAction::ReportToProvider,
            "the API rejected the request; see the message for details",
        )),
        ErrorKind::Cancelled => err,
    }
}
