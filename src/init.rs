use crate::error::ConfigurationError;
use crate::layer::RollbarLayer;
use crate::writer::LogWriter;
use std::sync::{Arc, Once};
use tracing::Level;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::Registry;

/// Configuration of the Rollbar layer.
///
/// **Fields**
/// - `threshold`: least severe level that is still forwarded.
/// - `capture_backtrace`: capture a backtrace for events raised outside of
///   any span.
/// - `enable_stdout`: if `true`, a `tracing_subscriber::fmt::Layer` is added
///   on top of [`RollbarLayer`] and events are also printed to the console.
#[derive(Clone, Debug)]
pub struct LayerConfig {
    pub threshold: Level,
    pub capture_backtrace: bool,
    pub enable_stdout: bool,
}

impl Default for LayerConfig {
    fn default() -> Self {
        Self {
            threshold: Level::ERROR,
            capture_backtrace: true,
            enable_stdout: true,
        }
    }
}

/// Initialize the global `tracing` subscriber with a [`RollbarLayer`] built
/// from `writer` and `config`.
///
/// **Errors**
/// - [`ConfigurationError::Subscriber`] if a global subscriber is already
///   installed.
pub fn init_tracing_with_config(
    writer: Arc<LogWriter>,
    config: LayerConfig,
) -> Result<(), ConfigurationError> {
    let layer = RollbarLayer::new(writer, config.threshold, config.capture_backtrace);

    // The two branches build different subscriber types.
    if config.enable_stdout {
        let fmt_layer = tracing_subscriber::fmt::layer();
        let subscriber = Registry::default().with(layer).with(fmt_layer);
        tracing::subscriber::set_global_default(subscriber)?;
    } else {
        let subscriber = Registry::default().with(layer);
        tracing::subscriber::set_global_default(subscriber)?;
    }
    Ok(())
}

/// Initialize tracing with [`LayerConfig::default`]: errors only, with
/// console output.
pub fn init_tracing(writer: Arc<LogWriter>) -> Result<(), ConfigurationError> {
    init_tracing_with_config(writer, LayerConfig::default())
}

static PANIC_HOOK: Once = Once::new();

/// Report panics as `tracing` error events.
///
/// The event carries `errfile`, `errline` and `errno` fields pointing at the
/// panic location, so [`RollbarLayer`] reports the panic site rather than
/// the hook. The previous hook still runs afterwards. Installing more than
/// once is a no-op.
pub fn install_panic_hook() {
    PANIC_HOOK.call_once(|| {
        let previous = std::panic::take_hook();
        std::panic::set_hook(Box::new(move |panic_info| {
            let thread = std::thread::current();
            let thread_name = thread.name().unwrap_or("unnamed");
            let message = panic_info
                .payload()
                .downcast_ref::<&str>()
                .copied()
                .or_else(|| {
                    panic_info
                        .payload()
                        .downcast_ref::<String>()
                        .map(|s| s.as_str())
                })
                .unwrap_or("unknown panic payload");

            match panic_info.location() {
                Some(location) => tracing::error!(
                    target: "panic",
                    errno = 1,
                    errfile = location.file(),
                    errline = location.line(),
                    thread = thread_name,
                    "{}",
                    message
                ),
                None => tracing::error!(
                    target: "panic",
                    errno = 1,
                    thread = thread_name,
                    "{}",
                    message
                ),
            }

            previous(panic_info);
        }));
    });
}
