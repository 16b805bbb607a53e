/// Error raised when the writer or its transport is misconfigured.
///
/// This is the only error kind the crate surfaces. Lookups that feed the
/// payload degrade to a sentinel instead, and transport failures are
/// reported through the `Option` returned by
/// [`RollbarClientAdaptor::send`](crate::adaptor::RollbarClientAdaptor::send).
#[derive(thiserror::Error, Debug)]
pub enum ConfigurationError {
    #[error("RollbarClient requires an access token to be set in config")]
    MissingAccessToken,

    #[error("unknown field {0} passed to set_data")]
    UnknownField(String),

    #[error("field {field} expects {expected}")]
    InvalidFieldData {
        field: String,
        expected: &'static str,
    },

    #[error("failed to build HTTP client: {0}")]
    HttpClient(String),

    #[error("failed to install global subscriber: {0}")]
    Subscriber(#[from] tracing::subscriber::SetGlobalDefaultError),
}
