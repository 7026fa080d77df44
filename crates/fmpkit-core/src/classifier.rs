//! Turns a raw transport response into a JSON payload or a classified failure.

use serde_json::{json, Map, Value};
use tracing::debug;

use crate::error::ApiError;
use crate::http_client::HttpResponse;
use crate::quota::QuotaTracker;

/// Top-level keys the API uses to report an error, even with a 200 status.
pub const ERROR_KEYS: [&str; 3] = ["Error Message", "message", "error"];

/// Error message carried by an error payload, if `value` is one.
pub fn error_message(value: &Value) -> Option<String> {
    value.as_object().and_then(error_message_in)
}

pub(crate) fn error_message_in(object: &Map<String, Value>) -> Option<String> {
    ERROR_KEYS.iter().find_map(|key| match object.get(*key) {
        None | Some(Value::Null) => None,
        Some(Value::String(message)) => Some(message.clone()),
        Some(other) => Some(other.to_string()),
    })
}

/// Classifies `response`. On 429 the tracker is told about the rejection and
/// its current wait time becomes the error's `retry_after`.
pub fn classify(response: &HttpResponse, quota: &QuotaTracker) -> Result<Value, ApiError> {
    if response.is_success() {
        let payload: Value = serde_json::from_str(&response.body).map_err(|e| {
            ApiError::malformed(format!("invalid JSON response from API: {e}"))
        })?;

        if let Some(message) = error_message(&payload) {
            return Err(ApiError::server(Some(response.status), message));
        }
        return Ok(payload);
    }

    let details = serde_json::from_str::<Value>(&response.body)
        .unwrap_or_else(|_| json!({ "raw_content": response.body }));

    match response.status {
        429 => {
            quota.note_rejection(&response.body);
            let retry_after = quota.wait_time();
            debug!(
                server_retry_after = response.header("retry-after"),
                local_wait_secs = retry_after.as_secs_f64(),
                "using local quota wait for rate-limit retry"
            );
            Err(ApiError::rate_limited(
                format!(
                    "Rate limit exceeded. Please wait {:.1} seconds",
                    retry_after.as_secs_f64()
                ),
                retry_after,
                Some(429),
            ))
        }
        401 => Err(ApiError::authentication(
            error_message(&details)
                .unwrap_or_else(|| String::from("Invalid API key or authentication failed")),
        )),
        400 => Err(ApiError::validation(
            error_message(&details).unwrap_or_else(|| details.to_string()),
            details,
        )),
        status => Err(ApiError::server(
            Some(status),
            error_message(&details).unwrap_or_else(|| details.to_string()),
        )),
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::error::ErrorKind;
    use crate::quota::QuotaConfig;

    fn tracker() -> QuotaTracker {
        QuotaTracker::new(QuotaConfig::default())
    }

    #[test]
    fn success_body_is_decoded() {
        let response = HttpResponse::ok_json(r#"[{"symbol":"AAPL","price":190.5}]"#);

        let payload = classify(&response, &tracker()).expect("payload should decode");

        assert_eq!(payload, json!([{ "symbol": "AAPL", "price": 190.5 }]));
    }

    #[test]
    fn error_payload_with_ok_status_is_a_server_error() {
        for body in [
            r#"{"Error Message":"Invalid API KEY."}"#,
            r#"{"message":"Invalid API key"}"#,
            r#"{"error":"Limit reached"}"#,
        ] {
            let error = classify(&HttpResponse::ok_json(body), &tracker())
                .expect_err("error payload should fail");

            assert_eq!(error.kind(), ErrorKind::ServerError, "body: {body}");
            assert_eq!(error.status(), Some(200));
            assert!(!error.is_retryable());
        }
    }

    #[test]
    fn null_error_key_is_not_an_error() {
        let response = HttpResponse::ok_json(r#"{"error":null,"symbol":"AAPL"}"#);

        let payload = classify(&response, &tracker()).expect("null error field is data");

        assert_eq!(payload["symbol"], "AAPL");
    }

    #[test]
    fn non_json_success_is_malformed() {
        let error = classify(&HttpResponse::ok_json("<html>maintenance</html>"), &tracker())
            .expect_err("html is not json");

        assert_eq!(error.kind(), ErrorKind::MalformedResponse);
    }

    #[test]
    fn too_many_requests_uses_tracker_wait_and_notes_rejection() {
        let quota = tracker();

        let response = HttpResponse::new(429, r#"{"message":"Limit Reach"}"#)
            .with_header("Retry-After", "120");

        let error = classify(&response, &quota).expect_err("429 is a rate limit");

        assert_eq!(error.kind(), ErrorKind::RateLimit);
        assert_eq!(error.retry_after(), Some(Duration::ZERO));
        assert_eq!(quota.snapshot().server_rejections, 1);
    }

    #[test]
    fn status_codes_map_to_kinds() {
        let quota = tracker();

        let error = classify(&HttpResponse::new(401, ""), &quota).expect_err("401");
        assert_eq!(error.kind(), ErrorKind::Authentication);

        let error = classify(&HttpResponse::new(400, r#"{"detail":"bad date"}"#), &quota)
            .expect_err("400");
        assert_eq!(
            error,
            ApiError::validation(r#"{"detail":"bad date"}"#, json!({ "detail": "bad date" }))
        );

        let error = classify(&HttpResponse::new(400, "bad request"), &quota).expect_err("400");
        assert!(matches!(
            error,
            ApiError::Validation { ref details, .. } if details["raw_content"] == "bad request"
        ));

        let error = classify(&HttpResponse::new(404, "{}"), &quota).expect_err("404");
        assert_eq!(error.status(), Some(404));
        assert!(!error.is_retryable());

        let error = classify(&HttpResponse::new(502, "Bad Gateway"), &quota).expect_err("502");
        assert_eq!(error.kind(), ErrorKind::ServerError);
        assert!(error.is_retryable());
    }
}
