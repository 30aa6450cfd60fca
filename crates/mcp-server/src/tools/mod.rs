//! Tool implementations behind the MCP surface.
//!
//! Every tool resolves the caller's identity, applies the capability checks
//! from the tool table, calls one domain service, and folds the outcome into
//! the `{status, …}` envelope. Domain errors become envelope statuses here;
//! nothing propagates an `Err` through the protocol boundary.

pub mod admin;
pub mod backup;
pub mod bank;
pub mod graph;
pub mod live;
pub mod space;
pub mod system;

use rmcp::model::{CallToolResult, Content, ErrorData};
use serde::Serialize;
use serde_json::{Map, Value};

use crate::error::ServiceError;

/// Fold a domain outcome into the result envelope. The payload must
/// serialize to a JSON object; `status` is injected as its first field.
pub fn envelope(
    ok_status: &str,
    result: Result<Value, ServiceError>,
) -> Result<CallToolResult, ErrorData> {
    let body = match result {
        Ok(payload) => {
            let mut map = match payload {
                Value::Object(map) => map,
                other => {
                    let mut map = Map::new();
                    map.insert("result".to_string(), other);
                    map
                }
            };
            map.insert("status".to_string(), Value::String(ok_status.to_string()));
            Value::Object(map)
        }
        Err(e) => serde_json::json!({
            "status": e.status(),
            "message": e.to_string(),
        }),
    };
    let text = serde_json::to_string_pretty(&body)
        .unwrap_or_else(|_| r#"{"status":"error","message":"unserializable result"}"#.to_string());
    Ok(CallToolResult::success(vec![Content::text(text)]))
}

/// Serialize a domain value for the envelope.
pub fn payload<T: Serialize>(value: &T) -> Result<Value, ServiceError> {
    serde_json::to_value(value)
        .map_err(|e| ServiceError::Upstream(format!("result serialization failed: {e}")))
}

#[cfg(test)]
pub(crate) fn envelope_json(result: &CallToolResult) -> Value {
    let text = result.content[0]
        .raw
        .as_text()
        .expect("envelope is always text")
        .text
        .clone();
    serde_json::from_str(&text).expect("envelope is always JSON")
}
