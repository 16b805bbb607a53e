use crate::context::{RequestContext, UserPrincipal, SERVER_INTERFACE};
use crate::event::{ErrorMessage, LogEvent, TraceFrame};
use crate::metadata::UNAVAILABLE;
use crate::trace;
use crate::writer::LogWriter;
use chrono::Utc;
use std::collections::BTreeMap;
use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};
use tracing::field::{Field, Visit};
use tracing::span::{Attributes, Id, Record};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::layer::{Context, Layer};
use tracing_subscriber::registry::LookupSpan;

/// Events from this crate are never forwarded, so transport warnings cannot
/// feed back into the transport.
const OWN_TARGET: &str = "rollbar_log_writer";

/// `tracing_subscriber` layer that forwards events at or above a severity
/// threshold to a [`LogWriter`].
///
/// Each forwarded event is written from its own task on the current Tokio
/// runtime. There is no channel, no batching and no retry: an event that
/// cannot be dispatched is dropped and counted.
pub struct RollbarLayer {
    writer: Arc<LogWriter>,
    threshold: Level,
    capture_backtrace: bool,
    /// Total events seen by the layer (before filtering by level).
    pub total_events: Arc<AtomicU64>,
    /// Events handed to the writer.
    pub forwarded_events: Arc<AtomicU64>,
    /// Dropped because no Tokio runtime was available.
    pub dropped_events: Arc<AtomicU64>,
}

impl RollbarLayer {
    /// Create a layer forwarding events at `threshold` or more severe.
    ///
    /// With `capture_backtrace` set, events raised outside of any span get
    /// a backtrace captured on the emitting thread. Without it they are
    /// reported with the error site as their only frame.
    pub fn new(writer: Arc<LogWriter>, threshold: Level, capture_backtrace: bool) -> Self {
        Self {
            writer,
            threshold,
            capture_backtrace,
            total_events: Arc::new(AtomicU64::new(0)),
            forwarded_events: Arc::new(AtomicU64::new(0)),
            dropped_events: Arc::new(AtomicU64::new(0)),
        }
    }
}

impl<S> Layer<S> for RollbarLayer
where
    S: Subscriber + for<'span> LookupSpan<'span>,
{
    fn on_new_span(&self, attrs: &Attributes<'_>, id: &Id, ctx: Context<'_, S>) {
        let Some(span) = ctx.span(id) else {
            return;
        };
        let mut visitor = RequestVisitor::default();
        attrs.record(&mut visitor);

        let mut extensions = span.extensions_mut();
        if let Some(request) = visitor.to_context() {
            extensions.insert(request);
        }
        extensions.insert(visitor);
    }

    // Request details are often known only after the span is opened, e.g.
    // `method = field::Empty` filled in later with `span.record`.
    fn on_record(&self, id: &Id, values: &Record<'_>, ctx: Context<'_, S>) {
        let Some(span) = ctx.span(id) else {
            return;
        };
        let mut extensions = span.extensions_mut();
        if extensions.get_mut::<RequestVisitor>().is_none() {
            extensions.insert(RequestVisitor::default());
        }
        let request = match extensions.get_mut::<RequestVisitor>() {
            Some(visitor) => {
                values.record(visitor);
                visitor.to_context()
            }
            None => return,
        };
        if let Some(request) = request {
            extensions.replace(request);
        }
    }

    fn on_event(&self, event: &Event<'_>, ctx: Context<'_, S>) {
        self.total_events.fetch_add(1, Ordering::Relaxed);
        let meta = event.metadata();
        if *meta.level() > self.threshold || meta.target().starts_with(OWN_TARGET) {
            return;
        }

        let mut fields = BTreeMap::new();
        let mut message: Option<String> = None;
        let mut overrides = Overrides::default();

        let mut visitor = FieldVisitor {
            fields: &mut fields,
            message: &mut message,
            overrides: &mut overrides,
        };
        event.record(&mut visitor);

        let mut request: Option<RequestContext> = None;
        let mut span_frames = Vec::new();
        if let Some(scope) = ctx.event_scope(event) {
            for span in scope {
                if request.is_none() {
                    request = span.extensions().get::<RequestContext>().cloned();
                }
                let span_meta = span.metadata();
                span_frames.push(TraceFrame {
                    file: span_meta.file().map(str::to_string),
                    line: span_meta.line(),
                    function: Some(span.name().to_string()),
                    class: Some(span_meta.target().to_string()),
                });
            }
        }

        let errcontext = if !span_frames.is_empty() {
            Some(span_frames)
        } else if self.capture_backtrace {
            Some(trace::capture())
        } else {
            Some(Vec::new())
        };

        let log_event = LogEvent {
            timestamp: Utc::now(),
            priority_name: priority_name(meta.level()).to_string(),
            message: ErrorMessage {
                errno: overrides.errno.unwrap_or_else(|| priority(meta.level())),
                errstr: message.unwrap_or_else(|| UNAVAILABLE.to_string()),
                errline: overrides.errline.or(meta.line()).unwrap_or(0),
                errfile: overrides
                    .errfile
                    .or_else(|| meta.file().map(str::to_string))
                    .unwrap_or_else(|| UNAVAILABLE.to_string()),
                errcontext,
            },
            fields,
        };
        let request = request.unwrap_or_else(RequestContext::cli);

        let handle = match tokio::runtime::Handle::try_current() {
            Ok(handle) => handle,
            Err(_) => {
                self.dropped_events.fetch_add(1, Ordering::Relaxed);
                eprintln!("no tokio runtime available, dropping rollbar event");
                return;
            }
        };

        self.forwarded_events.fetch_add(1, Ordering::Relaxed);
        let writer = Arc::clone(&self.writer);
        handle.spawn(async move {
            let _ = writer.write(log_event, &request).await;
        });
    }
}

/// Priority number of a level, on the classic syslog scale.
fn priority(level: &Level) -> i64 {
    if *level == Level::ERROR {
        3
    } else if *level == Level::WARN {
        4
    } else if *level == Level::INFO {
        6
    } else {
        7
    }
}

fn priority_name(level: &Level) -> &'static str {
    if *level == Level::ERROR {
        "ERR"
    } else if *level == Level::WARN {
        "WARN"
    } else if *level == Level::INFO {
        "INFO"
    } else {
        "DEBUG"
    }
}

/// Event fields that replace the callsite-derived error details.
#[derive(Default)]
pub struct Overrides {
    pub errno: Option<i64>,
    pub errfile: Option<String>,
    pub errline: Option<u32>,
}

pub struct FieldVisitor<'a> {
    pub fields: &'a mut BTreeMap<String, serde_json::Value>,
    pub message: &'a mut Option<String>,
    pub overrides: &'a mut Overrides,
}

impl<'a> Visit for FieldVisitor<'a> {
    fn record_str(&mut self, field: &Field, value: &str) {
        match field.name() {
            "message" => *self.message = Some(value.to_string()),
            "errfile" => self.overrides.errfile = Some(value.to_string()),
            name => {
                self.fields.insert(name.to_string(), serde_json::Value::String(value.to_string()));
            }
        }
    }

    fn record_i64(&mut self, field: &Field, value: i64) {
        match field.name() {
            "errno" => self.overrides.errno = Some(value),
            "errline" => self.overrides.errline = u32::try_from(value).ok(),
            name => {
                self.fields.insert(name.to_string(), serde_json::Value::from(value));
            }
        }
    }

    fn record_u64(&mut self, field: &Field, value: u64) {
        match field.name() {
            "errno" => self.overrides.errno = i64::try_from(value).ok(),
            "errline" => self.overrides.errline = u32::try_from(value).ok(),
            name => {
                self.fields.insert(name.to_string(), serde_json::Value::from(value));
            }
        }
    }

    fn record_bool(&mut self, field: &Field, value: bool) {
        self.fields.insert(field.name().to_string(), serde_json::Value::from(value));
    }

    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        match field.name() {
            "message" => *self.message = Some(format!("{:?}", value)),
            "errfile" => self.overrides.errfile = Some(format!("{:?}", value)),
            name => {
                self.fields.insert(name.to_string(), serde_json::Value::String(format!("{:?}", value)));
            }
        }
    }
}

/// Collects request details recorded on a span.
#[derive(Clone, Default)]
struct RequestVisitor {
    method: Option<String>,
    host: Option<String>,
    uri: Option<String>,
    user_agent: Option<String>,
    client_ip: Option<String>,
    interface: Option<String>,
    ajax: Option<bool>,
    user_id: Option<String>,
    user_email: Option<String>,
}

impl RequestVisitor {
    fn set(&mut self, name: &str, value: String) {
        match name {
            "http.method" | "method" => self.method = Some(value),
            "host" => self.host = Some(value),
            "uri" => self.uri = Some(value),
            "user_agent" => self.user_agent = Some(value),
            "client_ip" => self.client_ip = Some(value),
            "interface" => self.interface = Some(value),
            "user_id" => self.user_id = Some(value),
            "user_email" => self.user_email = Some(value),
            _ => {}
        }
    }

    fn to_context(&self) -> Option<RequestContext> {
        let is_request = self.method.is_some()
            || self.host.is_some()
            || self.uri.is_some()
            || self.client_ip.is_some();
        if !is_request {
            return None;
        }

        let user = self.user_id.clone().map(|id| UserPrincipal {
            id,
            email: self
                .user_email
                .clone()
                .unwrap_or_else(|| UNAVAILABLE.to_string()),
        });

        Some(RequestContext {
            method: self.method.clone(),
            host: self.host.clone(),
            uri: self.uri.clone(),
            user_agent: self.user_agent.clone(),
            client_ip: self.client_ip.clone(),
            interface: self
                .interface
                .clone()
                .unwrap_or_else(|| SERVER_INTERFACE.to_string()),
            is_ajax: self.ajax.unwrap_or(false),
            peak_memory_bytes: crate::context::peak_memory_bytes(),
            user,
        })
    }
}

impl Visit for RequestVisitor {
    fn record_str(&mut self, field: &Field, value: &str) {
        self.set(field.name(), value.to_string());
    }

    fn record_u64(&mut self, field: &Field, value: u64) {
        self.set(field.name(), value.to_string());
    }

    fn record_i64(&mut self, field: &Field, value: i64) {
        self.set(field.name(), value.to_string());
    }

    fn record_bool(&mut self, field: &Field, value: bool) {
        if field.name() == "ajax" {
            self.ajax = Some(value);
        }
    }

    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        self.set(field.name(), format!("{:?}", value));
    }
}
