use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;

/// One log event handed to the writer.
#[derive(Debug, Clone, Serialize)]
pub struct LogEvent {
    pub timestamp: DateTime<Utc>,
    /// Severity name, e.g. `ERR` or `WARN`. Resolved through
    /// [`RollbarClientAdaptor::get_level`](crate::adaptor::RollbarClientAdaptor::get_level).
    pub priority_name: String,
    pub message: ErrorMessage,
    /// Structured fields recorded alongside the event.
    pub fields: BTreeMap<String, serde_json::Value>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ErrorMessage {
    pub errno: i64,
    pub errstr: String,
    pub errline: u32,
    pub errfile: String,
    /// Explicit call stack. When present it replaces a freshly captured
    /// backtrace.
    pub errcontext: Option<Vec<TraceFrame>>,
}

/// A raw call-stack entry before it is shaped into a payload frame.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TraceFrame {
    pub file: Option<String>,
    pub line: Option<u32>,
    pub function: Option<String>,
    pub class: Option<String>,
}

impl LogEvent {
    /// Build an `ERR` event stamped with the current time.
    pub fn new(
        errno: i64,
        errstr: impl Into<String>,
        errfile: impl Into<String>,
        errline: u32,
    ) -> Self {
        LogEvent {
            timestamp: Utc::now(),
            priority_name: "ERR".to_string(),
            message: ErrorMessage {
                errno,
                errstr: errstr.into(),
                errline,
                errfile: errfile.into(),
                errcontext: None,
            },
            fields: BTreeMap::new(),
        }
    }

    pub fn with_priority(mut self, priority_name: impl Into<String>) -> Self {
        self.priority_name = priority_name.into();
        self
    }

    pub fn with_context(mut self, frames: Vec<TraceFrame>) -> Self {
        self.message.errcontext = Some(frames);
        self
    }

    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }
}

impl TraceFrame {
    /// Frame pointing at the error site itself, with no function attached.
    pub fn site(file: impl Into<String>, line: u32) -> Self {
        TraceFrame {
            file: Some(file.into()),
            line: Some(line),
            function: Some(String::new()),
            class: Some(String::new()),
        }
    }

    /// `class::function` when a class is known, otherwise just the function.
    pub fn label(&self) -> String {
        let function = self.function.as_deref().unwrap_or("");
        match self.class.as_deref() {
            Some(class) if !class.is_empty() => format!("{}::{}", class, function),
            _ => function.to_string(),
        }
    }
}
