use gridline_core::{AppError, AppResult};
use reqwest::{Response, StatusCode};
use serde_json::Value;
use tracing::warn;

/// Maps a failed send (connect, timeout, reset) to a transport error.
pub(crate) fn transport_error(action: &str, error: &reqwest::Error) -> AppError {
    if error.is_timeout() {
        return AppError::Transport(format!("{action} timed out"));
    }

    AppError::Transport(format!("{action} failed: {error}"))
}

/// Reads a JSON body, mapping non-2xx statuses to the matching error variant.
///
/// An empty success body decodes as `Value::Null`.
pub(crate) async fn read_json(response: Response, action: &str) -> AppResult<Value> {
    let status = response.status();
    let body = response
        .bytes()
        .await
        .map_err(|error| transport_error(action, &error))?;

    if !status.is_success() {
        let message = error_message(status, &body);
        warn!(status = status.as_u16(), action, message = %message, "request rejected");
        return Err(status_error(status, message));
    }

    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(Value::Null);
    }

    serde_json::from_slice(&body).map_err(|error| AppError::Upstream {
        status: status.as_u16(),
        message: format!("{action} returned invalid JSON: {error}"),
    })
}

fn status_error(status: StatusCode, message: String) -> AppError {
    match status {
        StatusCode::BAD_REQUEST | StatusCode::UNPROCESSABLE_ENTITY => AppError::Validation(message),
        StatusCode::UNAUTHORIZED => AppError::Unauthorized(message),
        StatusCode::FORBIDDEN => AppError::Forbidden(message),
        StatusCode::NOT_FOUND => AppError::NotFound(message),
        StatusCode::CONFLICT | StatusCode::PRECONDITION_FAILED => AppError::Conflict(message),
        _ => AppError::Upstream {
            status: status.as_u16(),
            message,
        },
    }
}

fn error_message(status: StatusCode, body: &[u8]) -> String {
    let from_json = serde_json::from_slice::<Value>(body).ok().and_then(|value| {
        ["error", "message", "detail"]
            .iter()
            .find_map(|key| value.get(key).and_then(Value::as_str).map(str::to_owned))
    });
    if let Some(message) = from_json {
        return message;
    }

    let text = String::from_utf8_lossy(body).trim().to_owned();
    if text.is_empty() {
        status
            .canonical_reason()
            .unwrap_or("request failed")
            .to_owned()
    } else {
        text
    }
}
