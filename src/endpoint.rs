//! Service endpoints and single-shot reachability probing.
use std::{
    fmt,
    net::{TcpStream, ToSocketAddrs},
    time::Duration,
};

use reqwest::{Url, blocking::Client};
use tracing::debug;

use crate::error::HarnessError;

/// Per-attempt connect timeout, distinct from the overall readiness deadline.
pub const PROBE_ATTEMPT_TIMEOUT: Duration = Duration::from_secs(5);

/// A companion endpoint. A bare port is normalized to `http://localhost:<port>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceEndpoint {
    url: Url,
}

impl ServiceEndpoint {
    /// Endpoint for a local port.
    pub fn from_port(port: u16) -> Self {
        let url = Url::parse(&format!("http://localhost:{port}"))
            .unwrap_or_else(|_| unreachable!("localhost URL is always valid"));
        Self { url }
    }

    /// Parses either a URL or a bare port number.
    pub fn parse(raw: &str) -> Result<Self, HarnessError> {
        let trimmed = raw.trim();
        if let Ok(port) = trimmed.parse::<u16>() {
            if port == 0 {
                return Err(HarnessError::config("port 0 is not a valid endpoint"));
            }
            return Ok(Self::from_port(port));
        }

        let url = Url::parse(trimmed).map_err(|err| {
            HarnessError::config(format!("invalid endpoint '{trimmed}': {err}"))
        })?;
        if url.host_str().is_none() {
            return Err(HarnessError::config(format!(
                "endpoint '{trimmed}' has no host"
            )));
        }
        Ok(Self { url })
    }

    /// The canonical URL of the endpoint.
    pub fn url(&self) -> &Url {
        &self.url
    }

    /// Explicit port, or the scheme's default port.
    pub fn port(&self) -> Option<u16> {
        self.url.port_or_known_default()
    }

    /// Whether the endpoint points at this machine.
    pub fn is_local(&self) -> bool {
        matches!(
            self.url.host_str(),
            Some("localhost" | "127.0.0.1" | "0.0.0.0" | "[::1]" | "::1")
        )
    }

    fn is_http(&self) -> bool {
        matches!(self.url.scheme(), "http" | "https")
    }
}

impl fmt::Display for ServiceEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.url.as_str().trim_end_matches('/'))
    }
}

/// Single-shot reachability check. Implementations never fail: every error means "not up".
pub trait Probe {
    /// Returns `true` when something answers at `endpoint`.
    fn probe(&self, endpoint: &ServiceEndpoint) -> bool;
}

impl<F> Probe for F
where
    F: Fn(&ServiceEndpoint) -> bool,
{
    fn probe(&self, endpoint: &ServiceEndpoint) -> bool {
        self(endpoint)
    }
}

/// Probes HTTP(S) endpoints with a GET request and anything else with a raw TCP connect.
///
/// Any HTTP response, including error statuses, counts as reachable.
pub struct PortProbe {
    client: Client,
    attempt_timeout: Duration,
}

impl PortProbe {
    /// Builds a probe with the default per-attempt timeout.
    pub fn new() -> Result<Self, HarnessError> {
        Self::with_timeout(PROBE_ATTEMPT_TIMEOUT)
    }

    /// Builds a probe with a custom per-attempt timeout.
    pub fn with_timeout(attempt_timeout: Duration) -> Result<Self, HarnessError> {
        let client = Client::builder()
            .connect_timeout(attempt_timeout)
            .timeout(attempt_timeout)
            .build()
            .map_err(|err| {
                HarnessError::config(format!("failed to build HTTP client: {err}"))
            })?;
        Ok(Self {
            client,
            attempt_timeout,
        })
    }

    fn probe_tcp(&self, endpoint: &ServiceEndpoint) -> bool {
        let (Some(host), Some(port)) = (endpoint.url().host_str(), endpoint.port()) else {
            return false;
        };
        let host = host.trim_start_matches('[').trim_end_matches(']');
        let Ok(addresses) = (host, port).to_socket_addrs() else {
            return false;
        };
        addresses
            .into_iter()
            .any(|addr| TcpStream::connect_timeout(&addr, self.attempt_timeout).is_ok())
    }
}

impl Probe for PortProbe {
    fn probe(&self, endpoint: &ServiceEndpoint) -> bool {
        if !endpoint.is_http() {
            return self.probe_tcp(endpoint);
        }

        match self.client.get(endpoint.url().clone()).send() {
            Ok(response) => {
                debug!("{endpoint} answered with {}", response.status());
                true
            }
            Err(err) => {
                debug!("{endpoint} not reachable: {err}");
                false
            }
        }
    }
}
