//! Host ↔ worker wire protocol
//!
//! JSON lines over the worker's stdio. The host writes exactly one
//! [`WorkerRequest`] to stdin and closes it. The worker answers with zero or
//! more [`WorkerEvent::Stdout`] lines followed by exactly one
//! [`WorkerEvent::Finished`].
//!
//! ```text
//! host ──stdin──►  {"code":"...","memory_root":"/m","limits":{...},...}
//! host ◄─stdout──  {"event":"stdout","text":"hello\n"}
//! host ◄─stdout──  {"event":"finished","schema_version":1,"value":{"n":1},...}
//! ```

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use super::policy::Capability;
use super::ExecutionFault;
use crate::tools::SizeLimits;

/// Version of the [`SafeValue`] schema carried in `Finished` events.
pub const SCHEMA_VERSION: u32 = 1;

/// Maximum nesting depth of a [`SafeValue`].
pub const MAX_DEPTH: usize = 64;

/// Everything the worker needs to run one snippet.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerRequest {
    pub code: String,
    pub memory_root: PathBuf,
    pub limits: SizeLimits,
    pub denied_capabilities: Vec<Capability>,
    pub result_variable: String,
    /// CPU seconds (RLIMIT_CPU); the wall-clock timeout is enforced by the host
    pub cpu_seconds: u64,
    /// Address-space limit in bytes (RLIMIT_AS); 0 disables it
    pub memory_limit_bytes: u64,
    /// Stop forwarding `print` output past this many bytes; 0 means unlimited
    #[serde(default)]
    pub max_output_bytes: u64,
}

/// One line written by the worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum WorkerEvent {
    /// Output of one `print` call
    Stdout { text: String },

    /// Final outcome; always the last line
    Finished {
        schema_version: u32,
        value: Option<SafeValue>,
        error: Option<ExecutionFault>,
        diagnostics: Option<String>,
    },
}

/// Data allowed to cross the sandbox boundary (schema v1).
///
/// Numbers, strings, booleans, null, and nested lists/string-keyed maps.
/// Nothing else can be represented, so nothing else can leak out.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SafeValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    List(Vec<SafeValue>),
    Map(BTreeMap<String, SafeValue>),
}

impl SafeValue {
    /// Check the schema invariants a deserializer cannot enforce on its own.
    pub fn validate(&self) -> Result<(), String> {
        self.validate_at(0)
    }

    fn validate_at(&self, depth: usize) -> Result<(), String> {
        if depth > MAX_DEPTH {
            return Err(format!("value nested deeper than {} levels", MAX_DEPTH));
        }
        match self {
            SafeValue::Float(f) if !f.is_finite() => Err(format!("non-finite float {}", f)),
            SafeValue::List(items) => items.iter().try_for_each(|v| v.validate_at(depth + 1)),
            SafeValue::Map(entries) => entries.values().try_for_each(|v| v.validate_at(depth + 1)),
            _ => Ok(()),
        }
    }

    /// Compact JSON used in execution feedback.
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| "null".to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_safe_value_json_shapes() {
        let mut map = BTreeMap::new();
        map.insert("n".to_string(), SafeValue::Int(1));
        map.insert("xs".to_string(), SafeValue::List(vec![SafeValue::Bool(true), SafeValue::Null]));
        let value = SafeValue::Map(map);
        assert_eq!(value.to_json(), r#"{"n":1,"xs":[true,null]}"#);

        let back: SafeValue = serde_json::from_str(&value.to_json()).unwrap();
        assert_eq!(back, value);
    }

    #[test]
    fn test_integers_stay_integers() {
        let v: SafeValue = serde_json::from_str("3").unwrap();
        assert_eq!(v, SafeValue::Int(3));
        let v: SafeValue = serde_json::from_str("3.5").unwrap();
        assert_eq!(v, SafeValue::Float(3.5));
    }

    #[test]
    fn test_validate_depth() {
        let mut v = SafeValue::Null;
        for _ in 0..=MAX_DEPTH + 1 {
            v = SafeValue::List(vec![v]);
        }
        assert!(v.validate().is_err());
    }

    #[test]
    fn test_event_wire_format() {
        let line = serde_json::to_string(&WorkerEvent::Stdout { text: "hi\n".into() }).unwrap();
        assert_eq!(line, r#"{"event":"stdout","text":"hi\n"}"#);

        let finished: WorkerEvent = serde_json::from_str(
            r#"{"event":"finished","schema_version":1,"value":null,"error":null,"diagnostics":null}"#,
        )
        .unwrap();
        assert_eq!(
            finished,
            WorkerEvent::Finished { schema_version: 1, value: None, error: None, diagnostics: None }
        );
    }
}
