//! Minimal client for the remote knowledge-graph tool protocol.
//!
//! The remote speaks the same request/response tool framing this server
//! exposes: a handshake, then named tool calls returning a text envelope.
//! The bridge never needs more than that, so this client stays deliberately
//! small instead of pulling in a full protocol stack.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    #[error("graph remote request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("graph remote returned an error: {0}")]
    Remote(String),
    #[error("graph remote reply was malformed: {0}")]
    Protocol(String),
}

impl BridgeError {
    /// Absent-document errors are expected during delete-then-reingest.
    pub fn is_not_found(&self) -> bool {
        matches!(self, BridgeError::Remote(msg) if msg.to_lowercase().contains("not found"))
    }
}

/// One connected remote endpoint.
#[async_trait]
pub trait GraphRemote: Send + Sync {
    async fn handshake(&self) -> Result<(), BridgeError>;
    /// Call a named tool and return its decoded payload.
    async fn call(&self, tool: &str, args: Value) -> Result<Value, BridgeError>;
}

/// Opens remotes from stored configuration. Swapped for a mock in tests.
pub trait RemoteConnector: Send + Sync {
    fn open(&self, url: &str, token: &str) -> Arc<dyn GraphRemote>;
}

pub struct HttpRemoteConnector;

impl RemoteConnector for HttpRemoteConnector {
    fn open(&self, url: &str, token: &str) -> Arc<dyn GraphRemote> {
        Arc::new(HttpGraphRemote::new(url, token))
    }
}

/// JSON-RPC over plain POSTs: `initialize` for the handshake, `tools/call`
/// for everything else.
pub struct HttpGraphRemote {
    http: reqwest::Client,
    url: String,
    token: String,
    next_id: AtomicU64,
}

impl HttpGraphRemote {
    pub fn new(url: &str, token: &str) -> Self {
        Self {
            http: reqwest::Client::new(),
            url: url.trim_end_matches('/').to_string(),
            token: token.to_string(),
            next_id: AtomicU64::new(1),
        }
    }

    async fn rpc(&self, method: &str, params: Value) -> Result<Value, BridgeError> {
        let body = json!({
            "jsonrpc": "2.0",
            "id": self.next_id.fetch_add(1, Ordering::Relaxed),
            "method": method,
            "params": params,
        });
        let response = self
            .http
            .post(&self.url)
            .bearer_auth(&self.token)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(BridgeError::Remote(format!("HTTP {status}: {message}")));
        }

        let reply: Value = response
            .json()
            .await
            .map_err(|e| BridgeError::Protocol(e.to_string()))?;
        if let Some(error) = reply.get("error") {
            let message = error
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or("unknown error");
            return Err(BridgeError::Remote(message.to_string()));
        }
        reply
            .get("result")
            .cloned()
            .ok_or_else(|| BridgeError::Protocol("reply has neither result nor error".into()))
    }
}

#[async_trait]
impl GraphRemote for HttpGraphRemote {
    async fn handshake(&self) -> Result<(), BridgeError> {
        self.rpc(
            "initialize",
            json!({
                "protocolVersion": "2024-11-05",
                "clientInfo": {"name": "live-memory", "version": env!("CARGO_PKG_VERSION")},
                "capabilities": {},
            }),
        )
        .await?;
        Ok(())
    }

    async fn call(&self, tool: &str, args: Value) -> Result<Value, BridgeError> {
        let result = self
            .rpc("tools/call", json!({"name": tool, "arguments": args}))
            .await?;

        // Tool results arrive as a content envelope; the payload is the first
        // text block, JSON when the remote has structured data to report.
        let text = result
            .get("content")
            .and_then(Value::as_array)
            .and_then(|blocks| blocks.first())
            .and_then(|block| block.get("text"))
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();

        if result
            .get("isError")
            .and_then(Value::as_bool)
            .unwrap_or(false)
        {
            return Err(BridgeError::Remote(text));
        }
        Ok(serde_json::from_str(&text).unwrap_or(Value::String(text)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_found_detection_matches_remote_phrasing() {
        assert!(BridgeError::Remote("document not found".into()).is_not_found());
        assert!(BridgeError::Remote("Memory Not Found".into()).is_not_found());
        assert!(!BridgeError::Remote("quota exceeded".into()).is_not_found());
        assert!(!BridgeError::Protocol("not found".into()).is_not_found());
    }
}
