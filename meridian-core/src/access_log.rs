//! Access log records for dispatched requests.

use std::net::IpAddr;

use tracing::info;

/// Target of access log events.
pub const ACCESS_LOG_TARGET: &str = "meridian::access";

/// One handled request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessLogEntry {
    /// HTTP version of the request, e.g. `HTTP/1.1`.
    pub protocol: String,
    /// Client address.
    pub client_ip: IpAddr,
    /// Client port.
    pub client_port: u16,
    /// Request URL with the inbound token removed.
    pub request_url: String,
    /// CDN the client was sent to.
    pub chosen_cdn: Option<String>,
    /// Response status.
    pub status: u16,
    /// Redirect target.
    pub target_url: Option<String>,
    /// First candidate after selection and balancing.
    pub preferred_cdn: Option<String>,
    /// Location reported by the resolving CDN.
    pub location: Option<String>,
    /// Client user agent.
    pub user_agent: Option<String>,
    /// Local address the request arrived on.
    pub server_ip: IpAddr,
    /// Local port the request arrived on.
    pub server_port: u16,
}

/// Sink for access log entries.
pub trait AccessLogger: Send + Sync {
    /// Record one entry.
    fn log(&self, entry: &AccessLogEntry);
}

/// Writes entries as `tracing` events on [`ACCESS_LOG_TARGET`].
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingAccessLog;

impl AccessLogger for TracingAccessLog {
    fn log(&self, entry: &AccessLogEntry) {
        info!(
            target: ACCESS_LOG_TARGET,
            protocol = %entry.protocol,
            client_ip = %entry.client_ip,
            client_port = entry.client_port,
            request_url = %entry.request_url,
            chosen_cdn = entry.chosen_cdn.as_deref().unwrap_or("-"),
            status = entry.status,
            target_url = entry.target_url.as_deref().unwrap_or("-"),
            preferred_cdn = entry.preferred_cdn.as_deref().unwrap_or("-"),
            location = entry.location.as_deref().unwrap_or("-"),
            user_agent = entry.user_agent.as_deref().unwrap_or("-"),
            server_ip = %entry.server_ip,
            server_port = entry.server_port,
            "request handled"
        );
    }
}
