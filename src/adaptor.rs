use crate::error::ConfigurationError;
use crate::payload::{Level, PayloadData};
use async_trait::async_trait;
use std::collections::BTreeMap;

/// Value handed to [`RollbarClientAdaptor::set_data`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContextValue {
    Text(String),
    Map(BTreeMap<String, String>),
}

/// Metadata attached to every item a client sends.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnrichmentData {
    pub env: String,
    pub user: BTreeMap<String, String>,
    pub tags: BTreeMap<String, String>,
    pub extra: BTreeMap<String, String>,
}

impl EnrichmentData {
    /// Store `value` under `field`, one of `env`, `user`, `tags` or `extra`.
    pub fn set(&mut self, field: &str, value: ContextValue) -> Result<(), ConfigurationError> {
        match (field, value) {
            ("env", ContextValue::Text(env)) => self.env = env,
            ("user", ContextValue::Map(user)) => self.user = user,
            ("tags", ContextValue::Map(tags)) => self.tags = tags,
            ("extra", ContextValue::Map(extra)) => self.extra = extra,
            ("env", _) => {
                return Err(ConfigurationError::InvalidFieldData {
                    field: field.to_string(),
                    expected: "text",
                })
            }
            ("user" | "tags" | "extra", _) => {
                return Err(ConfigurationError::InvalidFieldData {
                    field: field.to_string(),
                    expected: "a map",
                })
            }
            _ => return Err(ConfigurationError::UnknownField(field.to_string())),
        }
        Ok(())
    }
}

/// Bridge between the [`LogWriter`](crate::writer::LogWriter) and a concrete
/// Rollbar transport.
///
/// Any implementation can be swapped in without touching the formatter; the
/// writer only ever talks to this trait.
#[async_trait]
pub trait RollbarClientAdaptor: Send + Sync {
    /// Attach one piece of enrichment data to the client.
    ///
    /// **Errors**
    /// - [`ConfigurationError::UnknownField`] for a field other than `env`,
    ///   `user`, `tags` or `extra`.
    /// - [`ConfigurationError::InvalidFieldData`] when the value has the
    ///   wrong shape for the field.
    fn set_data(&mut self, field: &str, data: ContextValue) -> Result<(), ConfigurationError>;

    /// Enrichment data previously stored with [`set_data`](Self::set_data).
    fn get_data(&self) -> &EnrichmentData;

    /// Map a severity name onto a Rollbar [`Level`], falling back to the
    /// client's default level for unknown names.
    fn get_level(&self, level: &str) -> Level;

    /// Physically transport one item.
    ///
    /// **Returns**
    /// - `Some(uuid)` when the service accepted the item.
    /// - `None` when no identifier was produced (network error, rejected
    ///   item, unreadable response). Failures are never raised.
    async fn send(&self, data: PayloadData) -> Option<String>;
}
