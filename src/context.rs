/// Interface name of a command-line process.
pub const CLI_INTERFACE: &str = "cli";

/// Interface name used for requests served over HTTP.
pub const SERVER_INTERFACE: &str = "server";

/// Snapshot of the request and process state an event was raised in.
///
/// Passed explicitly to the writer so formatting never reaches for global
/// state. Every field is optional; missing values are rendered as the
/// sentinel in the payload.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestContext {
    pub method: Option<String>,
    pub host: Option<String>,
    pub uri: Option<String>,
    pub user_agent: Option<String>,
    pub client_ip: Option<String>,
    /// Runtime interface, [`CLI_INTERFACE`] or [`SERVER_INTERFACE`].
    pub interface: String,
    pub is_ajax: bool,
    pub peak_memory_bytes: Option<u64>,
    pub user: Option<UserPrincipal>,
}

/// The authenticated user behind a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserPrincipal {
    pub id: String,
    pub email: String,
}

impl RequestContext {
    /// Context of the running process when no request is in flight.
    pub fn cli() -> Self {
        RequestContext {
            interface: CLI_INTERFACE.to_string(),
            peak_memory_bytes: peak_memory_bytes(),
            ..Default::default()
        }
    }

    /// Context of an HTTP request.
    pub fn http(method: impl Into<String>, host: impl Into<String>, uri: impl Into<String>) -> Self {
        RequestContext {
            method: Some(method.into()),
            host: Some(host.into()),
            uri: Some(uri.into()),
            interface: SERVER_INTERFACE.to_string(),
            peak_memory_bytes: peak_memory_bytes(),
            ..Default::default()
        }
    }

    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = Some(user_agent.into());
        self
    }

    pub fn with_client_ip(mut self, client_ip: impl Into<String>) -> Self {
        self.client_ip = Some(client_ip.into());
        self
    }

    pub fn with_ajax(mut self, is_ajax: bool) -> Self {
        self.is_ajax = is_ajax;
        self
    }

    pub fn with_user(mut self, user: UserPrincipal) -> Self {
        self.user = Some(user);
        self
    }

    pub fn with_peak_memory(mut self, bytes: u64) -> Self {
        self.peak_memory_bytes = Some(bytes);
        self
    }
}

/// Peak resident set size of this process, read from `/proc/self/status`.
///
/// Returns `None` on platforms without procfs.
pub fn peak_memory_bytes() -> Option<u64> {
    let status = std::fs::read_to_string("/proc/self/status").ok()?;
    parse_vm_hwm(&status)
}

fn parse_vm_hwm(status: &str) -> Option<u64> {
    let line = status.lines().find(|line| line.starts_with("VmHWM:"))?;
    let kib: u64 = line
        .trim_start_matches("VmHWM:")
        .trim()
        .trim_end_matches("kB")
        .trim()
        .parse()
        .ok()?;
    Some(kib * 1024)
}
