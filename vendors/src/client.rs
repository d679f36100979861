//! reqwest client shared by every worker of a run

use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderValue, ACCEPT};
use reqwest::Client;

/// Transport settings for the telemetry executor
///
/// Connection reuse matters for an open-loop run: a cold pool shows up as
/// connect time in the measured latency. `idle_per_host` should cover the
/// largest number of workers that can be in flight at once.
#[derive(Debug, Clone)]
pub struct HttpConfig {
    /// Client-side deadline for a whole request, body included
    pub request_timeout: Duration,
    /// TCP connect deadline
    pub connect_timeout: Duration,
    /// Idle connections kept per host
    pub idle_per_host: usize,
    /// How long an idle connection is kept
    pub idle_timeout: Duration,
    /// TCP keepalive interval
    pub tcp_keepalive: Option<Duration>,
    /// Disable Nagle
    pub tcp_nodelay: bool,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(60),
            connect_timeout: Duration::from_secs(10),
            idle_per_host: 256,
            idle_timeout: Duration::from_secs(90),
            tcp_keepalive: Some(Duration::from_secs(60)),
            tcp_nodelay: true,
        }
    }
}

impl HttpConfig {
    /// Size the idle pool for `workers` concurrent requests
    pub fn for_workers(workers: usize) -> Self {
        Self {
            idle_per_host: workers.max(1),
            ..Self::default()
        }
    }

    /// Override the request deadline
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Override the connect deadline
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Build the client
    ///
    /// # Errors
    ///
    /// Fails when reqwest cannot initialize TLS.
    pub fn build_client(&self) -> Result<Client, reqwest::Error> {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));

        let mut builder = Client::builder()
            .default_headers(headers)
            .user_agent(user_agent())
            .timeout(self.request_timeout)
            .connect_timeout(self.connect_timeout)
            .pool_max_idle_per_host(self.idle_per_host)
            .pool_idle_timeout(self.idle_timeout)
            .tcp_nodelay(self.tcp_nodelay);
        if let Some(interval) = self.tcp_keepalive {
            builder = builder.tcp_keepalive(interval);
        }
        builder.build()
    }
}

fn user_agent() -> String {
    format!("arrival-bench/{}", env!("CARGO_PKG_VERSION"))
}
