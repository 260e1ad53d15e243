use crate::errors::GatewayError;
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub code: i64,
    pub message: String,
}

/// JSON-RPC-shaped response returned to the remote peer for a consumed
/// session request. Exactly one of `result`/`error` is present.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseEnvelope {
    pub id: u64,
    pub jsonrpc: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorBody>,
}

pub fn ok(id: u64, result: Value) -> ResponseEnvelope {
    ResponseEnvelope {
        id,
        jsonrpc: "2.0".into(),
        result: Some(result),
        error: None,
    }
}

pub fn err(id: u64, code: i64, message: impl Into<String>) -> ResponseEnvelope {
    ResponseEnvelope {
        id,
        jsonrpc: "2.0".into(),
        result: None,
        error: Some(ErrorBody {
            code,
            message: message.into(),
        }),
    }
}

pub fn from_error(id: u64, e: &GatewayError) -> ResponseEnvelope {
    err(id, e.code(), e.peer_message())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn result_envelope_omits_error_field() -> eyre::Result<()> {
        let v = serde_json::to_value(ok(7, serde_json::json!("0xsig")))?;
        assert_eq!(v.get("id"), Some(&serde_json::json!(7)), "id preserved");
        assert!(v.get("error").is_none(), "no error key on success");
        Ok(())
    }

    #[test]
    fn error_envelope_carries_code_and_message() -> eyre::Result<()> {
        let v = serde_json::to_value(err(9, 5000, "User rejected."))?;
        assert_eq!(
            v.pointer("/error/code"),
            Some(&serde_json::json!(5000)),
            "error code"
        );
        assert!(v.get("result").is_none(), "no result key on failure");
        Ok(())
    }
}
