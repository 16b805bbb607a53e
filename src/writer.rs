use crate::adaptor::{ContextValue, RollbarClientAdaptor};
use crate::context::RequestContext;
use crate::env::{env_opt, ROLLBAR_ENV_ENV};
use crate::error::ConfigurationError;
use crate::event::{LogEvent, TraceFrame};
use crate::metadata::{
    self, default_env, default_extra, default_tags, default_user_data, HostConfig, UNAVAILABLE,
};
use crate::payload::{
    Body, Custom, ExceptionInfo, PayloadData, Person, RequestBlock, ServerBlock, Trace,
};
use crate::trace;
use std::collections::BTreeMap;

/// Caller-supplied additions to the default enrichment data.
#[derive(Clone, Debug, Default)]
pub struct WriterOptions {
    /// Overrides the host environment type as the item's `env`.
    pub env: Option<String>,
    /// Merged over the default tags; caller values win.
    pub tags: BTreeMap<String, String>,
    /// Merged over the default extra data; caller values win.
    pub extra: BTreeMap<String, String>,
}

impl WriterOptions {
    /// Only `env` can be set from the environment (`ROLLBAR_ENV`).
    pub fn from_env() -> Self {
        Self {
            env: env_opt(ROLLBAR_ENV_ENV),
            ..Self::default()
        }
    }
}

/// Formats log events into Rollbar items and hands them to a
/// [`RollbarClientAdaptor`].
///
/// One writer is built per process (or request scope) with
/// [`LogWriter::create`] and reused for every event raised during its
/// lifetime.
pub struct LogWriter {
    client: Box<dyn RollbarClientAdaptor>,
    host: HostConfig,
    framework_version: String,
}

impl LogWriter {
    /// Build a writer, seeding the client with the default enrichment data
    /// merged with `options`.
    ///
    /// **Parameters**
    /// - `client`: transport the writer sends through.
    /// - `host`: facts about the host application.
    /// - `options`: env override and extra tags/extra data.
    /// - `request`: context used to derive the default user data and tags.
    ///
    /// **Errors**
    /// - whatever the client's `set_data` reports.
    pub fn create(
        mut client: Box<dyn RollbarClientAdaptor>,
        host: HostConfig,
        options: WriterOptions,
        request: &RequestContext,
    ) -> Result<Self, ConfigurationError> {
        let env = options.env.unwrap_or_else(|| default_env(&host));
        let user = default_user_data(request, request.user.as_ref());

        let mut tags = default_tags(&host, request);
        tags.extend(options.tags);

        let mut extra = default_extra(request);
        extra.extend(options.extra);

        client.set_data("env", ContextValue::Text(env))?;
        client.set_data("user", ContextValue::Map(user))?;
        client.set_data("tags", ContextValue::Map(tags))?;
        client.set_data("extra", ContextValue::Map(extra))?;

        let framework_version = metadata::package_info(&host.lock_file, &host.framework_package);

        Ok(Self {
            client,
            host,
            framework_version,
        })
    }

    pub fn client(&self) -> &dyn RollbarClientAdaptor {
        self.client.as_ref()
    }

    pub fn host(&self) -> &HostConfig {
        &self.host
    }

    /// Format `event` and send it.
    ///
    /// The checked-out branch is looked up here, before formatting.
    ///
    /// **Returns**
    /// - the item identifier reported by the client, if any. Nothing is
    ///   retried.
    pub async fn write(&self, event: LogEvent, request: &RequestContext) -> Option<String> {
        let branch = metadata::git_branch(&self.host.repository_dir).await;
        let data = self.format(&event, request, branch.as_deref());
        self.client.send(data).await
    }

    /// Shape one event into a Rollbar item.
    ///
    /// An event carrying `errcontext` is reported with exactly that trace
    /// (an empty one leaves only the error site). Without it, the current
    /// call stack is captured.
    pub fn format(
        &self,
        event: &LogEvent,
        request: &RequestContext,
        branch: Option<&str>,
    ) -> PayloadData {
        let msg = &event.message;
        let title = format!(
            "Err no. {}: {} - On line {} in {}",
            msg.errno, msg.errstr, msg.errline, msg.errfile
        );

        let base = match &msg.errcontext {
            Some(context) => context.clone(),
            None => trace::capture(),
        };

        // The error site goes on top so it shows up even when the event was
        // raised before any real frame exists.
        let mut backtrace = Vec::with_capacity(base.len() + 1);
        backtrace.push(TraceFrame::site(msg.errfile.clone(), msg.errline));
        backtrace.extend(base);

        let frames = trace::to_stack_frames(&trace::filter_backtrace(
            backtrace,
            trace::IGNORED_FRAMES,
        ));

        let data = self.client.get_data();

        let mut headers = BTreeMap::new();
        headers.insert("User-Agent".to_string(), metadata::get_user_agent(request));

        PayloadData {
            environment: metadata::get_env(&self.host.environment_type)
                .unwrap_or(UNAVAILABLE)
                .to_string(),
            level: self.client.get_level(&event.priority_name),
            timestamp: event.timestamp.timestamp(),
            framework: format!("{} {}", self.host.framework_name, self.framework_version),
            language: "rust".to_string(),
            body: Body {
                trace: Trace {
                    exception: ExceptionInfo {
                        class: msg.errstr.clone(),
                    },
                    frames,
                },
            },
            request: RequestBlock {
                method: metadata::get_request_method(request),
                url: metadata::get_url(request),
                headers,
                user_ip: metadata::get_ip(request),
                request_type: metadata::get_request_type(&request.interface, request.is_ajax)
                    .to_string(),
                sapi: metadata::get_interface(request),
                memory_usage: metadata::memory_usage(request),
            },
            server: ServerBlock {
                branch: branch
                    .filter(|b| !b.is_empty())
                    .unwrap_or(UNAVAILABLE)
                    .to_string(),
            },
            person: Person {
                id: lookup(&data.user, "ID"),
                email: lookup(&data.user, "Email"),
            },
            custom: Custom {
                env: if data.env.is_empty() {
                    UNAVAILABLE.to_string()
                } else {
                    data.env.clone()
                },
                tags: data.tags.clone(),
                extra: data.extra.clone(),
                fields: event.fields.clone(),
            },
            title,
        }
    }
}

fn lookup(map: &BTreeMap<String, String>, key: &str) -> String {
    map.get(key)
        .cloned()
        .unwrap_or_else(|| UNAVAILABLE.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::UserPrincipal;
    use crate::noop::NoopClient;
    use crate::payload::{Level, StackFrame};
    use chrono::TimeZone;
    use std::path::PathBuf;

    fn host() -> HostConfig {
        HostConfig {
            environment_type: "dev".into(),
            lock_file: PathBuf::from("/nonexistent/composer.lock"),
            repository_dir: PathBuf::from("/nonexistent/checkout"),
            ..HostConfig::default()
        }
    }

    fn writer_with(options: WriterOptions, request: &RequestContext) -> (LogWriter, NoopClient) {
        let client = NoopClient::default();
        let writer = LogWriter::create(Box::new(client.clone()), host(), options, request).unwrap();
        (writer, client)
    }

    fn frame(class: &str, function: &str, file: &str, line: u32) -> TraceFrame {
        TraceFrame {
            file: Some(file.into()),
            line: Some(line),
            function: Some(function.into()),
            class: if class.is_empty() {
                None
            } else {
                Some(class.into())
            },
        }
    }

    #[test]
    fn title_names_errno_message_and_site() {
        let (writer, _) = writer_with(WriterOptions::default(), &RequestContext::cli());
        let event = LogEvent::new(256, "Division by zero", "src/billing.rs", 88);
        let data = writer.format(&event, &RequestContext::cli(), None);
        assert_eq!(
            data.title,
            "Err no. 256: Division by zero - On line 88 in src/billing.rs"
        );
        assert_eq!(data.body.trace.exception.class, "Division by zero");
    }

    #[test]
    fn explicit_context_replaces_captured_backtrace() {
        let (writer, _) = writer_with(WriterOptions::default(), &RequestContext::cli());
        let event = LogEvent::new(1, "boom", "src/a.rs", 10).with_context(vec![
            frame("app::Cart", "total", "src/cart.rs", 20),
            frame("", "main", "src/main.rs", 5),
        ]);

        let data = writer.format(&event, &RequestContext::cli(), None);
        assert_eq!(
            data.body.trace.frames,
            vec![
                StackFrame {
                    filename: "src/a.rs".into(),
                    lineno: 10,
                    method: String::new(),
                },
                StackFrame {
                    filename: "src/cart.rs".into(),
                    lineno: 20,
                    method: "app::Cart::total".into(),
                },
                StackFrame {
                    filename: "src/main.rs".into(),
                    lineno: 5,
                    method: "main".into(),
                },
            ]
        );
    }

    #[test]
    fn top_frame_is_the_error_site_for_captured_traces() {
        let (writer, _) = writer_with(WriterOptions::default(), &RequestContext::cli());
        let event = LogEvent::new(1, "boom", "src/worker.rs", 77);
        let data = writer.format(&event, &RequestContext::cli(), None);
        let top = &data.body.trace.frames[0];
        assert_eq!(top.filename, "src/worker.rs");
        assert_eq!(top.lineno, 77);
    }

    #[test]
    fn writer_frames_are_filtered_out() {
        let (writer, _) = writer_with(WriterOptions::default(), &RequestContext::cli());
        let event = LogEvent::new(1, "boom", "src/a.rs", 1).with_context(vec![
            frame("rollbar_log_writer::writer::LogWriter", "format", "src/writer.rs", 100),
            frame("app", "run", "src/app.rs", 3),
            frame("rollbar_log_writer::writer::LogWriter", "write", "src/writer.rs", 90),
        ]);

        let data = writer.format(&event, &RequestContext::cli(), None);
        let methods: Vec<&str> = data
            .body
            .trace
            .frames
            .iter()
            .map(|f| f.method.as_str())
            .collect();
        assert_eq!(methods, vec!["", "app::run"]);

        let captured = writer.format(&LogEvent::new(1, "boom", "src/a.rs", 1), &RequestContext::cli(), None);
        assert!(captured
            .body
            .trace
            .frames
            .iter()
            .all(|f| !f.method.starts_with("rollbar_log_writer::writer::LogWriter")));
    }

    #[test]
    fn unresolved_values_render_as_sentinel() {
        let host = HostConfig {
            environment_type: "test".into(),
            ..host()
        };
        let writer = LogWriter::create(
            Box::new(NoopClient::default()),
            host,
            WriterOptions::default(),
            &RequestContext::default(),
        )
        .unwrap();

        let event = LogEvent::new(1, "boom", "src/a.rs", 1)
            .with_context(vec![frame("", "main", "src/main.rs", 1)]);
        let data = writer.format(&event, &RequestContext::default(), None);
        assert_eq!(data.environment, UNAVAILABLE);
        assert_eq!(data.server.branch, UNAVAILABLE);
        assert_eq!(data.request.method, UNAVAILABLE);
        assert_eq!(data.request.url, UNAVAILABLE);
        assert_eq!(data.request.headers["User-Agent"], UNAVAILABLE);
        assert_eq!(data.request.user_ip, UNAVAILABLE);
        assert_eq!(data.request.sapi, UNAVAILABLE);
        assert_eq!(data.request.memory_usage, UNAVAILABLE);
        assert_eq!(data.person.id, UNAVAILABLE);
        assert_eq!(data.framework, "Silverstripe framework Unavailable");

        fn has_null(value: &serde_json::Value) -> bool {
            match value {
                serde_json::Value::Null => true,
                serde_json::Value::Array(items) => items.iter().any(has_null),
                serde_json::Value::Object(map) => map.values().any(has_null),
                _ => false,
            }
        }
        assert!(!has_null(&serde_json::to_value(&data).unwrap()));
    }

    #[test]
    fn request_block_reflects_context() {
        let request = RequestContext::http("POST", "shop.example.com", "/cart")
            .with_user_agent("curl/8.0")
            .with_client_ip("192.0.2.4")
            .with_ajax(true)
            .with_peak_memory(2_097_152);
        let (writer, _) = writer_with(WriterOptions::default(), &request);

        let event = LogEvent::new(2, "bad cart", "src/cart.rs", 4)
            .with_priority("WARN")
            .with_timestamp(chrono::Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap());
        let data = writer.format(&event, &request, Some("main"));

        assert_eq!(data.environment, "development");
        assert_eq!(data.level, Level::Warning);
        assert_eq!(data.timestamp, 1_704_164_645);
        assert_eq!(data.request.method, "POST");
        assert_eq!(data.request.url, "shop.example.com/cart");
        assert_eq!(data.request.headers["User-Agent"], "curl/8.0");
        assert_eq!(data.request.user_ip, "192.0.2.4");
        assert_eq!(data.request.request_type, "AJAX");
        assert_eq!(data.request.sapi, "server");
        assert_eq!(data.request.memory_usage, "2Mb");
        assert_eq!(data.server.branch, "main");
    }

    #[test]
    fn factory_seeds_client_with_defaults() {
        let request = RequestContext::http("GET", "example.com", "/")
            .with_client_ip("198.51.100.1")
            .with_user(UserPrincipal {
                id: "12".into(),
                email: "dev@example.com".into(),
            });
        let (writer, _) = writer_with(WriterOptions::default(), &request);

        let data = writer.client().get_data();
        assert_eq!(data.env, "dev");
        assert_eq!(data.user["IP-Address"], "198.51.100.1");
        assert_eq!(data.user["ID"], "12");
        assert_eq!(data.tags["Request-Method"], "GET");
        assert!(data.extra.contains_key("Peak-Memory"));

        let payload = writer.format(&LogEvent::new(1, "x", "a.rs", 1), &request, None);
        assert_eq!(payload.person.id, "12");
        assert_eq!(payload.person.email, "dev@example.com");
        assert_eq!(payload.custom.env, "dev");
    }

    #[test]
    fn caller_tags_and_extra_win_on_collision() {
        let options = WriterOptions {
            env: Some("staging".into()),
            tags: BTreeMap::from([
                ("SAPI".to_string(), "fpm".to_string()),
                ("Team".to_string(), "payments".to_string()),
            ]),
            extra: BTreeMap::from([("Build".to_string(), "1f2e3d".to_string())]),
        };
        let (writer, _) = writer_with(options, &RequestContext::cli());

        let data = writer.client().get_data();
        assert_eq!(data.env, "staging");
        assert_eq!(data.tags["SAPI"], "fpm");
        assert_eq!(data.tags["Team"], "payments");
        assert_eq!(data.tags["Request-Type"], "Non-Ajax");
        assert_eq!(data.extra["Build"], "1f2e3d");
        assert!(data.extra.contains_key("Peak-Memory"));
    }

    #[tokio::test]
    async fn write_hands_formatted_item_to_client() {
        let (writer, client) = writer_with(WriterOptions::default(), &RequestContext::cli());
        let id = writer
            .write(LogEvent::new(5, "disk full", "src/io.rs", 9), &RequestContext::cli())
            .await;
        assert_eq!(id, None);

        let sent = client.sent();
        let sent = sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].title, "Err no. 5: disk full - On line 9 in src/io.rs");
    }

    #[test]
    fn empty_context_reports_only_the_error_site() {
        let (writer, _) = writer_with(WriterOptions::default(), &RequestContext::cli());
        let event = LogEvent::new(1, "boom", "src/jobs.rs", 14).with_context(Vec::new());

        let data = writer.format(&event, &RequestContext::cli(), None);
        assert_eq!(
            data.body.trace.frames,
            vec![StackFrame {
                filename: "src/jobs.rs".into(),
                lineno: 14,
                method: String::new(),
            }]
        );
    }

    #[tokio::test]
    async fn write_reports_sentinel_branch_outside_a_repository() {
        let (writer, client) = writer_with(WriterOptions::default(), &RequestContext::cli());
        writer
            .write(LogEvent::new(1, "boom", "src/a.rs", 1).with_context(Vec::new()), &RequestContext::cli())
            .await;

        let sent = client.sent();
        let sent = sent.lock().unwrap();
        assert_eq!(sent[0].server.branch, UNAVAILABLE);
    }
}
