use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Rollbar item as posted to the item endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct Payload {
    pub access_token: String,
    pub data: PayloadData,
}

/// Everything under `data` in a Rollbar item.
///
/// Built fresh for every event by
/// [`LogWriter::format`](crate::writer::LogWriter::format). No field is ever
/// left out; unresolved values carry the `"Unavailable"` sentinel.
#[derive(Debug, Clone, Serialize)]
pub struct PayloadData {
    pub environment: String,
    pub level: Level,
    pub timestamp: i64,
    pub framework: String,
    pub language: String,
    pub body: Body,
    pub request: RequestBlock,
    pub server: ServerBlock,
    pub person: Person,
    pub custom: Custom,
    pub title: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct Body {
    pub trace: Trace,
}

#[derive(Debug, Clone, Serialize)]
pub struct Trace {
    pub exception: ExceptionInfo,
    pub frames: Vec<StackFrame>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ExceptionInfo {
    pub class: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StackFrame {
    pub filename: String,
    pub lineno: u32,
    pub method: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct RequestBlock {
    pub method: String,
    pub url: String,
    pub headers: BTreeMap<String, String>,
    pub user_ip: String,
    #[serde(rename = "type")]
    pub request_type: String,
    #[serde(rename = "SAPI")]
    pub sapi: String,
    pub memory_usage: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ServerBlock {
    pub branch: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct Person {
    pub id: String,
    pub email: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct Custom {
    pub env: String,
    pub tags: BTreeMap<String, String>,
    pub extra: BTreeMap<String, String>,
    pub fields: BTreeMap<String, serde_json::Value>,
}

/// Rollbar severity levels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Level {
    Critical,
    Error,
    Warning,
    Info,
    Debug,
}

impl Level {
    /// Map a severity name to a level. Accepts the classic syslog-style
    /// priority names as well as the `tracing` level names, in any case.
    pub fn from_name(name: &str) -> Option<Level> {
        match name.trim().to_ascii_uppercase().as_str() {
            "EMERG" | "ALERT" | "CRIT" | "CRITICAL" | "FATAL" => Some(Level::Critical),
            "ERR" | "ERROR" => Some(Level::Error),
            "WARN" | "WARNING" => Some(Level::Warning),
            "NOTICE" | "INFO" => Some(Level::Info),
            "DEBUG" | "TRACE" => Some(Level::Debug),
            _ => None,
        }
    }
}

/// Response body of the item endpoint.
#[derive(Debug, Deserialize)]
pub struct ItemResponse {
    #[serde(default)]
    pub err: i64,
    pub result: Option<ItemResult>,
}

#[derive(Debug, Deserialize)]
pub struct ItemResult {
    pub uuid: Option<String>,
}
