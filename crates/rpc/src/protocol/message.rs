//! Payloads carried inside frames.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// Payload of a handshake frame.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HandshakePayload {
    /// Token presented by the client.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth_token: Option<String>,
}

/// Payload of a request frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestPayload {
    /// Route name, `namespace/method`.
    pub route: String,
    /// Token presented with this request.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth_token: Option<String>,
    /// Request body. `None` when no body was sent, `Some(Value::Null)` for an
    /// explicit null.
    #[serde(
        default,
        deserialize_with = "deserialize_some",
        skip_serializing_if = "Option::is_none"
    )]
    pub body: Option<Value>,
}

/// Payload of an error frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorPayload {
    /// HTTP-like status.
    pub status: u16,
    /// Machine-readable code.
    pub code: String,
    /// Human-readable message.
    pub code_message: String,
}

// A present field always maps to `Some`, even when its value is null.
fn deserialize_some<'de, D>(deserializer: D) -> Result<Option<Value>, D::Error>
where
    D: Deserializer<'de>,
{
    Value::deserialize(deserializer).map(Some)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::codec::{decode, encode};
    use serde_json::json;

    #[test]
    fn test_absent_body_differs_from_null() {
        let absent = RequestPayload {
            route: "node/getStatus".to_string(),
            auth_token: None,
            body: None,
        };
        let null = RequestPayload {
            body: Some(Value::Null),
            ..absent.clone()
        };

        let absent_decoded: RequestPayload = decode(&encode(&absent).unwrap()).unwrap();
        let null_decoded: RequestPayload = decode(&encode(&null).unwrap()).unwrap();

        assert_eq!(absent_decoded.body, None);
        assert_eq!(null_decoded.body, Some(Value::Null));
    }

    #[test]
    fn test_request_payload_field_names() {
        let payload = RequestPayload {
            route: "wallet/getBalance".to_string(),
            auth_token: Some("secret".to_string()),
            body: Some(json!({ "account": "default" })),
        };

        let as_value: Value = decode(&encode(&payload).unwrap()).unwrap();
        assert_eq!(as_value["authToken"], json!("secret"));
        assert_eq!(as_value["route"], json!("wallet/getBalance"));
    }

    #[test]
    fn test_error_payload_field_names() {
        let payload = ErrorPayload {
            status: 402,
            code: "hello-error".to_string(),
            code_message: "hello error".to_string(),
        };

        let as_value: Value = decode(&encode(&payload).unwrap()).unwrap();
        assert_eq!(as_value, json!({ "status": 402, "code": "hello-error", "codeMessage": "hello error" }));
    }
}
