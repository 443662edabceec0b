//! JSON-RPC 2.0 wire types and a minimal HTTP client shared by the chain scanners.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::IndexerError;

/// JSON-RPC request ID: string, number, or null.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RpcId {
    Number(u64),
    String(String),
    Null,
}

impl std::fmt::Display for RpcId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Number(n) => write!(f, "{n}"),
            Self::String(s) => write!(f, "{s}"),
            Self::Null => write!(f, "null"),
        }
    }
}

/// A JSON-RPC 2.0 request.
///
/// `params` is positional (`[...]`) for EVM nodes and named (`{...}`) for
/// Tendermint and NEAR nodes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: String,
    pub method: String,
    pub params: Value,
    pub id: RpcId,
}

impl JsonRpcRequest {
    pub fn new(id: u64, method: impl Into<String>, params: Value) -> Self {
        Self {
            jsonrpc: "2.0".into(),
            method: method.into(),
            params,
            id: RpcId::Number(id),
        }
    }
}

/// A JSON-RPC 2.0 error object.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcError {
    pub code: i64,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl std::fmt::Display for JsonRpcError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "JSON-RPC error {}: {}", self.code, self.message)?;
        if let Some(data) = &self.data {
            write!(f, " ({data})")?;
        }
        Ok(())
    }
}

/// A JSON-RPC 2.0 response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    pub jsonrpc: String,
    pub id: RpcId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
}

impl JsonRpcResponse {
    /// Unwrap the result value or return the error object.
    pub fn into_result(self) -> Result<Value, JsonRpcError> {
        if let Some(err) = self.error {
            Err(err)
        } else {
            Ok(self.result.unwrap_or(Value::Null))
        }
    }
}

/// Outcome of a call that reached the node: transport failures are
/// `IndexerError::Rpc`, node-side errors stay inspectable.
#[derive(Debug)]
pub enum CallError {
    Transport(IndexerError),
    Node(JsonRpcError),
}

impl From<CallError> for IndexerError {
    fn from(e: CallError) -> Self {
        match e {
            CallError::Transport(e) => e,
            CallError::Node(e) => IndexerError::Rpc(e.to_string()),
        }
    }
}

/// HTTP JSON-RPC client.
pub struct JsonRpcClient {
    url: String,
    http: reqwest::Client,
    next_id: AtomicU64,
}

impl JsonRpcClient {
    pub fn new(url: impl Into<String>, request_timeout: Duration) -> Result<Self, IndexerError> {
        let http = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| IndexerError::Rpc(format!("failed to build http client: {e}")))?;
        Ok(Self {
            url: url.into(),
            http,
            next_id: AtomicU64::new(1),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    async fn send(&self, req: &JsonRpcRequest) -> Result<JsonRpcResponse, IndexerError> {
        let resp = self
            .http
            .post(&self.url)
            .json(req)
            .send()
            .await
            .map_err(|e| IndexerError::Rpc(format!("{}: {e}", req.method)))?;

        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let body = resp.text().await.unwrap_or_default();
            return Err(IndexerError::Rpc(format!("{}: HTTP {status}: {body}", req.method)));
        }

        resp.json::<JsonRpcResponse>()
            .await
            .map_err(|e| IndexerError::Rpc(format!("{}: {e}", req.method)))
    }

    /// Call `method`, keeping node-side errors distinguishable from transport ones.
    pub async fn try_call<T: DeserializeOwned>(&self, method: &str, params: Value) -> Result<T, CallError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let req = JsonRpcRequest::new(id, method, params);
        tracing::trace!(url = %self.url, method, id, "rpc call");

        let value = self
            .send(&req)
            .await
            .map_err(CallError::Transport)?
            .into_result()
            .map_err(CallError::Node)?;
        serde_json::from_value(value)
            .map_err(|e| CallError::Transport(IndexerError::Decode(format!("{method}: {e}"))))
    }

    /// Call `method` and decode its result.
    pub async fn call<T: DeserializeOwned>(&self, method: &str, params: Value) -> Result<T, IndexerError> {
        Ok(self.try_call(method, params).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn named_params_serialize_as_object() {
        let req = JsonRpcRequest::new(1, "tx_search", json!({ "query": "tx.height>=1", "page": "1" }));
        let json = serde_json::to_value(&req).unwrap();
        assert_eq!(json["jsonrpc"], "2.0");
        assert_eq!(json["params"]["page"], "1");
    }

    #[test]
    fn response_into_result() {
        let ok: JsonRpcResponse =
            serde_json::from_value(json!({ "jsonrpc": "2.0", "id": 1, "result": "0x10" })).unwrap();
        assert_eq!(ok.into_result().unwrap(), json!("0x10"));

        let err: JsonRpcResponse = serde_json::from_value(json!({
            "jsonrpc": "2.0",
            "id": "a",
            "error": { "code": -32603, "message": "Internal error", "data": "page should be within [1, 1] range, given 2" }
        }))
        .unwrap();
        let e = err.into_result().unwrap_err();
        assert_eq!(e.code, -32603);
        assert!(e.to_string().contains("page should be within"));
    }

    #[test]
    fn node_error_maps_to_rpc() {
        let e: IndexerError = CallError::Node(JsonRpcError {
            code: -32000,
            message: "header not found".into(),
            data: None,
        })
        .into();
        assert!(matches!(e, IndexerError::Rpc(m) if m.contains("header not found")));
    }
}
