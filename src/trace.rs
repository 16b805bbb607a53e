use crate::event::TraceFrame;
use crate::metadata::UNAVAILABLE;
use crate::payload::StackFrame;
use std::backtrace::Backtrace;

/// Frame labels belonging to the writer and the logging machinery that calls
/// into it. Any frame whose label starts with one of these is dropped.
pub const IGNORED_FRAMES: &[&str] = &[
    "rollbar_log_writer::writer::LogWriter::write",
    "rollbar_log_writer::writer::LogWriter::format",
    "rollbar_log_writer::layer::RollbarLayer",
    "rollbar_log_writer::trace::capture",
    "<rollbar_log_writer::layer::RollbarLayer",
    "std::backtrace::Backtrace",
    "std::backtrace_rs::",
    "std::thread::local::LocalKey",
    "tracing_core::",
    "tracing_subscriber::",
    "<tracing_subscriber::",
    "tracing::",
];

/// Capture the current call stack.
pub fn capture() -> Vec<TraceFrame> {
    parse_backtrace(&Backtrace::force_capture().to_string())
}

/// Parse the textual form of [`Backtrace`]:
///
/// ```text
///    0: app::handlers::checkout
///              at ./src/handlers.rs:42:9
///    1: app::main
/// ```
pub fn parse_backtrace(text: &str) -> Vec<TraceFrame> {
    let mut frames: Vec<TraceFrame> = Vec::new();

    for line in text.lines() {
        let trimmed = line.trim();

        if let Some(location) = trimmed.strip_prefix("at ") {
            if let Some(frame) = frames.last_mut() {
                // Only the first location belongs to the symbol itself.
                if frame.file.is_none() {
                    let (file, line) = parse_location(location);
                    frame.file = Some(file);
                    frame.line = line;
                }
            }
            continue;
        }

        if let Some((index, symbol)) = trimmed.split_once(": ") {
            if !index.is_empty() && index.chars().all(|c| c.is_ascii_digit()) {
                frames.push(frame_from_symbol(symbol.trim()));
            }
        }
    }

    frames
}

fn parse_location(location: &str) -> (String, Option<u32>) {
    let mut parts = location.rsplitn(3, ':');
    let column = parts.next();
    let line = parts.next();
    match (parts.next(), line, column) {
        (Some(file), Some(line), Some(_)) => (file.to_string(), line.parse().ok()),
        _ => (location.to_string(), None),
    }
}

fn frame_from_symbol(symbol: &str) -> TraceFrame {
    let (class, function) = match symbol.rsplit_once("::") {
        Some((class, function)) if !class.is_empty() => {
            (Some(class.to_string()), function.to_string())
        }
        _ => (None, symbol.to_string()),
    };
    TraceFrame {
        file: None,
        line: None,
        function: Some(function),
        class,
    }
}

/// Drop every frame whose label starts with one of `ignored`.
pub fn filter_backtrace(frames: Vec<TraceFrame>, ignored: &[&str]) -> Vec<TraceFrame> {
    frames
        .into_iter()
        .filter(|frame| {
            let label = frame.label();
            label.is_empty() || !ignored.iter().any(|prefix| label.starts_with(prefix))
        })
        .collect()
}

/// Shape raw frames into payload frames.
pub fn to_stack_frames(frames: &[TraceFrame]) -> Vec<StackFrame> {
    frames
        .iter()
        .map(|frame| StackFrame {
            filename: frame
                .file
                .clone()
                .unwrap_or_else(|| UNAVAILABLE.to_string()),
            lineno: frame.line.unwrap_or(0),
            method: frame.label(),
        })
        .collect()
}
