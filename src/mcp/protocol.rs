//! JSON-RPC 2.0 wire types used over the worker channel

use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const JSONRPC_VERSION: &str = "2.0";
/// Tool-server protocol revision sent in the `initialize` handshake
pub const PROTOCOL_VERSION: &str = "2024-11-05";
pub const METHOD_NOT_FOUND: i64 = -32601;

#[derive(Debug, Serialize)]
pub struct JsonRpcRequest<'a> {
  pub jsonrpc: &'static str,
  pub id: u64,
  pub method: &'a str,
  pub params: Value,
}

impl<'a> JsonRpcRequest<'a> {
  pub fn new(id: u64, method: &'a str, params: Value) -> Self {
    Self {
      jsonrpc: JSONRPC_VERSION,
      id,
      method,
      params,
    }
  }
}

#[derive(Debug, Serialize)]
pub struct JsonRpcNotification<'a> {
  pub jsonrpc: &'static str,
  pub method: &'a str,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub params: Option<Value>,
}

impl<'a> JsonRpcNotification<'a> {
  pub fn new(method: &'a str, params: Option<Value>) -> Self {
    Self {
      jsonrpc: JSONRPC_VERSION,
      method,
      params,
    }
  }
}

/// Error reply sent back for worker-initiated requests we do not serve
#[derive(Debug, Serialize)]
pub struct JsonRpcErrorReply {
  pub jsonrpc: &'static str,
  pub id: Value,
  pub error: RpcErrorObject,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcErrorObject {
  pub code: i64,
  pub message: String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub data: Option<Value>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ClientInfo {
  pub name: String,
  pub version: String,
}

impl Default for ClientInfo {
  fn default() -> Self {
    Self {
      name: env!("CARGO_PKG_NAME").to_string(),
      version: env!("CARGO_PKG_VERSION").to_string(),
    }
  }
}

/// What an inbound line turned out to be
#[derive(Debug, PartialEq)]
pub enum Incoming {
  Response {
    id: u64,
    outcome: Result<Value, RpcErrorObject>,
  },
  /// The worker asking us something
  Request { id: Value, method: String },
  Notification { method: String },
  Invalid,
}

impl Incoming {
  pub fn classify(message: Value) -> Self {
    let method = message
      .get("method")
      .and_then(Value::as_str)
      .map(str::to_string);
    let id = message.get("id").filter(|v| !v.is_null()).cloned();

    match (id, method) {
      (Some(id), Some(method)) => Self::Request { id, method },
      (None, Some(method)) => Self::Notification { method },
      (Some(id), None) => {
        let Some(id) = response_id(&id) else {
          return Self::Invalid;
        };
        if let Some(error) = message.get("error") {
          let error = serde_json::from_value::<RpcErrorObject>(error.clone()).unwrap_or_else(|_| {
            RpcErrorObject {
              code: 0,
              message: error.to_string(),
              data: None,
            }
          });
          Self::Response {
            id,
            outcome: Err(error),
          }
        } else {
          Self::Response {
            id,
            outcome: Ok(message.get("result").cloned().unwrap_or(Value::Null)),
          }
        }
      }
      (None, None) => Self::Invalid,
    }
  }
}

/// Our ids are integers; some servers echo them back as strings.
fn response_id(id: &Value) -> Option<u64> {
  match id {
    Value::Number(n) => n.as_u64(),
    Value::String(s) => s.parse().ok(),
    _ => None,
  }
}

/// ---------------------------------------------------------------------------
/// Tool-call envelope
/// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct ToolCallEnvelope {
  content: Vec<ContentItem>,
  #[serde(rename = "isError", default)]
  is_error: bool,
}

#[derive(Debug, Deserialize)]
struct ContentItem {
  #[serde(rename = "type")]
  content_type: String,
  #[serde(default)]
  text: Option<String>,
}

/// Outcome of unwrapping a `tools/call` result
#[derive(Debug, PartialEq)]
pub enum ToolOutput {
  Value(Value),
  /// The tool ran but reported failure (`isError: true`)
  Failed(String),
}

/// Unwrap `{content: [{type: "text", text}]}`, parsing `text` as JSON and
/// falling back to the raw string. Results without a content list pass
/// through unchanged.
pub fn unwrap_tool_result(result: Value) -> ToolOutput {
  let envelope = match serde_json::from_value::<ToolCallEnvelope>(result.clone()) {
    Ok(envelope) => envelope,
    Err(_) => return ToolOutput::Value(result),
  };

  let text = envelope
    .content
    .into_iter()
    .find(|item| item.content_type == "text")
    .and_then(|item| item.text);

  match (text, envelope.is_error) {
    (Some(text), true) => ToolOutput::Failed(text),
    (None, true) => ToolOutput::Failed("tool reported an error".to_string()),
    (Some(text), false) => ToolOutput::Value(
      serde_json::from_str(&text).unwrap_or(Value::String(text)),
    ),
    (None, false) => ToolOutput::Value(Value::Null),
  }
}
