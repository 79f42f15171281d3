use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Stratum V1 methods this server reacts to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub enum Method {
    #[serde(rename = "mining.subscribe")]
    Subscribe,
    #[serde(rename = "mining.authorize")]
    Authorize,
    #[serde(rename = "mining.submit")]
    Submit,
    #[serde(rename = "mining.extranonce.subscribe")]
    ExtranonceSubscribe,
    #[serde(other)]
    Unknown,
}

/// One JSON-RPC request line from a miner.
#[derive(Debug, Clone, Deserialize)]
pub struct Request {
    #[serde(default)]
    pub id: Option<Value>,
    pub method: Method,
    #[serde(default)]
    pub params: Option<Value>,
}

/// One JSON-RPC response line to a miner.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Response {
    pub id: Option<Value>,
    pub result: Value,
    pub error: Value,
}

impl Response {
    pub fn ok(id: Option<Value>, result: Value) -> Self {
        Self {
            id,
            result,
            error: Value::Null,
        }
    }

    pub fn err(id: Option<Value>, code: u32, message: &str) -> Self {
        Self {
            id,
            result: Value::Null,
            error: serde_json::json!([code, message, null]),
        }
    }

    /// Newline-terminated wire form.
    pub fn to_line(&self) -> String {
        let mut line = serde_json::to_string(self).unwrap_or_else(|_| {
            "{\"id\":null,\"result\":null,\"error\":[20,\"internal\",null]}".to_string()
        });
        line.push('\n');
        line
    }
}
