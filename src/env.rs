//! `ROLLBAR_*` variables read by the `from_env` constructors of
//! `RollbarConfig`, [`HostConfig`](crate::metadata::HostConfig)
//! and [`WriterOptions`](crate::writer::WriterOptions).

/// Rollbar project access token (`post_server_item` scope).
pub const ROLLBAR_ACCESS_TOKEN_ENV: &str = "ROLLBAR_ACCESS_TOKEN";

/// Item endpoint, e.g. `https://api.rollbar.com/api/1/item/`.
pub const ROLLBAR_ENDPOINT_ENV: &str = "ROLLBAR_ENDPOINT";

/// Request timeout for a single item POST, in whole seconds.
pub const ROLLBAR_TIMEOUT_SECS_ENV: &str = "ROLLBAR_TIMEOUT_SECS";

/// When `true`, the client installs a process-wide panic hook.
pub const ROLLBAR_INSTALL_ENV: &str = "ROLLBAR_INSTALL";

/// Fallback severity name for unrecognized levels.
pub const ROLLBAR_DEFAULT_LEVEL_ENV: &str = "ROLLBAR_DEFAULT_LEVEL";

/// Optional override of the environment name attached to every item.
pub const ROLLBAR_ENV_ENV: &str = "ROLLBAR_ENV";

/// Host environment type, `dev` or `live`.
pub const ROLLBAR_ENVIRONMENT_TYPE_ENV: &str = "ROLLBAR_ENVIRONMENT_TYPE";

/// Path of the JSON lock manifest used to resolve the framework version.
pub const ROLLBAR_LOCK_FILE_ENV: &str = "ROLLBAR_LOCK_FILE";

/// Package name looked up in the lock manifest.
pub const ROLLBAR_FRAMEWORK_PACKAGE_ENV: &str = "ROLLBAR_FRAMEWORK_PACKAGE";

/// Working copy used to resolve the checked-out branch.
pub const ROLLBAR_REPOSITORY_DIR_ENV: &str = "ROLLBAR_REPOSITORY_DIR";

/// Read an environment variable or fall back to a provided default.
pub fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

/// Read an environment variable, treating an empty value as unset.
pub fn env_opt(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|value| !value.trim().is_empty())
}

/// Interpret common truthy spellings (`1`, `true`, `yes`, `on`).
pub fn parse_flag(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}
