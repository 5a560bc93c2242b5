//! The control-protocol frames.
//!
//! Inbound frames are `{command, request, ...}`; outbound frames are
//! `{status, response, ...}`. Any extra fields on a request are echoed back
//! on every response to it, so clients can correlate.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

#[derive(Debug, Deserialize)]
pub struct Request {
    pub command: String,
    #[serde(default)]
    pub request: Value,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ApiStatus {
    #[serde(rename = "OK")]
    Ok,
    #[serde(rename = "ERROR")]
    Error,
    #[serde(rename = "END")]
    End,
}

#[derive(Debug, Serialize)]
struct Response<'a> {
    status: ApiStatus,
    response: &'a Value,
    #[serde(flatten)]
    extra: &'a Map<String, Value>,
}

/// Encode one outbound frame.
pub fn frame(status: ApiStatus, response: &Value, extra: &Map<String, Value>) -> String {
    serde_json::to_string(&Response {
        status,
        response,
        extra,
    })
    .expect("frames serialize")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn extras_are_echoed() {
        let mut extra = Map::new();
        extra.insert("tag".to_string(), json!(7));
        let text = frame(ApiStatus::Ok, &json!("PONG hi"), &extra);
        let value: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(value["status"], json!("OK"));
        assert_eq!(value["response"], json!("PONG hi"));
        assert_eq!(value["tag"], json!(7));
    }

    #[test]
    fn requests_keep_unknown_fields() {
        let request: Request = serde_json::from_str(
            r#"{"command": "PING", "request": "hi", "token": "abc"}"#,
        )
        .unwrap();
        assert_eq!(request.command, "PING");
        assert_eq!(request.extra["token"], json!("abc"));
    }
}
