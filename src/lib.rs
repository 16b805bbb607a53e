//! Enriches error events with request and runtime metadata and reports them
//! to Rollbar.
//!
//! The usual entry point is [`init::init_tracing`], which installs a
//! [`layer::RollbarLayer`] forwarding `tracing` error events through a
//! [`writer::LogWriter`]. The writer can also be driven directly with
//! [`event::LogEvent`]s.

pub mod adaptor;
pub mod context;
pub mod env;
pub mod error;
pub mod event;
pub mod layer;
pub mod metadata;
pub mod payload;
pub mod trace;
pub mod writer;

#[cfg(feature = "http")]
pub mod client;

pub mod init;
pub mod noop;
