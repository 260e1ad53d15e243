//! Append-only JSONL audit trail of signing decisions and outcomes.

use crate::fsutil;
use serde_json::{Map, Value};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::warn;

// Standardize audit log shape. Fields may be null depending on the event type.
const REQUIRED_KEYS: [&str; 8] = [
    "ts",
    "event",
    "topic",
    "request_id",
    "method",
    "chain",
    "decision",
    "error_code",
];

pub fn utc_now_iso() -> String {
    chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
}

pub fn normalize_entry(v: Value) -> Value {
    let mut obj = match v {
        Value::Object(m) => m,
        other @ (Value::Null
        | Value::Bool(_)
        | Value::Number(_)
        | Value::String(_)
        | Value::Array(_)) => {
            let mut m = Map::new();
            m.insert("raw".to_owned(), other);
            m
        }
    };

    // Ensure timestamp exists.
    if !obj.contains_key("ts") {
        obj.insert("ts".to_owned(), Value::String(utc_now_iso()));
    }

    // Ensure required keys exist (null if unknown for the event).
    for k in REQUIRED_KEYS {
        if !obj.contains_key(k) {
            obj.insert(k.to_owned(), Value::Null);
        }
    }

    Value::Object(obj)
}

/// Cheap-to-clone handle to the audit file; safe to pass into spawned tasks.
#[derive(Debug, Clone)]
pub struct AuditLog {
    path: Arc<PathBuf>,
}

impl AuditLog {
    pub fn new(path: PathBuf) -> Self {
        Self {
            path: Arc::new(path),
        }
    }

    pub fn append(&self, entry: Value) -> eyre::Result<()> {
        let line = serde_json::to_string(&normalize_entry(entry))?;
        fsutil::append_line_restrictive(&self.path, &line)?;
        Ok(())
    }

    /// Append, logging failures instead of propagating them. A broken audit
    /// sink must not stop request processing, but it must be visible.
    pub fn record(&self, entry: Value) {
        if let Err(e) = self.append(entry) {
            warn!(target: "keyward::audit", error = %e, path = %self.path.display(), "failed to append audit entry");
        }
    }
}
