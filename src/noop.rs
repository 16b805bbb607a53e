use crate::adaptor::{ContextValue, EnrichmentData, RollbarClientAdaptor};
use crate::error::ConfigurationError;
use crate::payload::{Level, PayloadData};
use async_trait::async_trait;
use std::sync::{Arc, Mutex};

/// A client that never touches the network.
///
/// Items handed to it are kept in memory, which makes it useful for dry runs
/// (no access token configured) and for tests that inspect what would have
/// been sent.
#[derive(Clone)]
pub struct NoopClient {
    data: EnrichmentData,
    default_level: Level,
    sent: Arc<Mutex<Vec<PayloadData>>>,
}

impl Default for NoopClient {
    fn default() -> Self {
        Self::with_default_level(Level::Error)
    }
}

impl NoopClient {
    /// Client reporting unknown priority names at `default_level`, like
    /// `RollbarConfig::default_level` does for the HTTP client.
    pub fn with_default_level(default_level: Level) -> Self {
        Self {
            data: EnrichmentData::default(),
            default_level,
            sent: Arc::default(),
        }
    }

    /// Shared handle to the items received so far.
    pub fn sent(&self) -> Arc<Mutex<Vec<PayloadData>>> {
        Arc::clone(&self.sent)
    }
}

#[async_trait]
impl RollbarClientAdaptor for NoopClient {
    fn set_data(&mut self, field: &str, data: ContextValue) -> Result<(), ConfigurationError> {
        self.data.set(field, data)
    }

    fn get_data(&self) -> &EnrichmentData {
        &self.data
    }

    fn get_level(&self, level: &str) -> Level {
        Level::from_name(level).unwrap_or(self.default_level)
    }

    async fn send(&self, data: PayloadData) -> Option<String> {
        let mut sent = self.sent.lock().ok()?;
        sent.push(data);
        None
    }
}
