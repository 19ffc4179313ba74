//! Turning classified request errors into CLI error messages.

use pacer_core::config::ApiConfig;
use pacer_core::retry::TypedError;

/// Error message with the caller-facing recovery hints appended.
pub fn typed_error(err: TypedError, api: &ApiConfig) -> anyhow::Error {
    let mut msg = err.to_string();
    if let Some(field) = &err.field {
        msg.push_str(&format!(" [field `{}`]", field.field));
    }
    for hint in err.caller_hints() {
        msg.push_str(&format!("\n  hint: {}", hint.description));
        if let Some(template) = &hint.executable_template {
            msg.push_str(&format!("\n    {}", render_template(template, api)));
        }
    }
    anyhow::anyhow!(msg)
}

fn render_template(template: &str, api: &ApiConfig) -> String {
    template
        .replace("{api_key_env}", &api.api_key_env)
        .replace("{seconds}", &(api.timeout_secs.saturating_mul(2)).to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pacer_core::retry::{classify, RawFailure};

    #[test]
    fn auth_error_renders_key_hint() {
        let api = ApiConfig {
            api_key_env: "MY_KEY".into(),
            ..ApiConfig::default()
        };
        let err = classify(RawFailure::Status {
            status: 401,
            body: r#"{"error":{"message":"invalid api key"}}"#.into(),
            retry_after: None,
        });
        let text = typed_error(err, &api).to_string();
        assert!(text.starts_with("auth error: invalid api key"), "{text}");
        assert!(text.contains("export MY_KEY=<your-api-key>"), "{text}");
    }

    #[test]
    fn automatic_hints_are_not_shown() {
        let err = classify(RawFailure::NoResponse {
            timed_out: false,
            message: "connection refused".into(),
        });
        let text = typed_error(err, &ApiConfig::default()).to_string();
        assert!(!text.contains("exponential backoff"), "{text}");
        assert!(text.contains("base URL"), "{text}");
    }
}
