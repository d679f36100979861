//! `RequestExecutor` for the telemetry service

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tracing::trace;

use arrival_bench_core::{
    ExecutionResult, ExecutorError, Iteration, RequestExecutor, TagSet, WorkerContext,
};

use crate::client::HttpConfig;
use crate::devices::DeviceRegistry;
use crate::endpoint::{Endpoint, TelemetryPayload};

/// Executes iterations against one telemetry service deployment
///
/// A stream's `exec` names the [`Endpoint`]; device-bound endpoints use
/// the device the registry assigns to the serving worker's run slot.
#[derive(Debug, Clone)]
pub struct TelemetryExecutor {
    base_url: String,
    client: reqwest::Client,
    request_timeout: Duration,
    devices: Arc<DeviceRegistry>,
}

impl TelemetryExecutor {
    /// Create an executor for `base_url`
    pub fn new(
        base_url: impl Into<String>,
        config: &HttpConfig,
        devices: DeviceRegistry,
    ) -> Result<Self, reqwest::Error> {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Ok(Self {
            base_url,
            client: config.build_client()?,
            request_timeout: config.request_timeout,
            devices: Arc::new(devices),
        })
    }

    /// Base URL without a trailing slash
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Device registry
    pub fn devices(&self) -> &DeviceRegistry {
        &self.devices
    }

    fn endpoint(exec: Option<&str>) -> Result<Endpoint, ExecutorError> {
        let exec = exec.ok_or_else(|| ExecutorError::UnknownExec("<none>".into()))?;
        exec.parse()
            .map_err(|_| ExecutorError::UnknownExec(exec.to_string()))
    }

    fn classify(&self, err: reqwest::Error) -> ExecutorError {
        if err.is_timeout() {
            ExecutorError::Timeout(self.request_timeout)
        } else if err.is_connect() {
            ExecutorError::Connection(err.to_string())
        } else {
            ExecutorError::Other(err.to_string())
        }
    }
}

#[async_trait]
impl RequestExecutor for TelemetryExecutor {
    fn name(&self) -> &str {
        "telemetry-http"
    }

    fn stream_tags(&self, exec: Option<&str>) -> TagSet {
        match Self::endpoint(exec) {
            Ok(endpoint) => TagSet::new().with("endpoint", endpoint.as_str()),
            Err(_) => TagSet::new(),
        }
    }

    fn validate(&self, exec: Option<&str>) -> Result<(), ExecutorError> {
        let endpoint = Self::endpoint(exec)?;
        if endpoint.needs_device() && self.devices.is_empty() {
            return Err(ExecutorError::ResourceUnavailable(format!(
                "endpoint '{endpoint}' needs a device registry"
            )));
        }
        Ok(())
    }

    async fn execute(
        &self,
        ctx: &mut WorkerContext,
        iteration: &Iteration,
    ) -> Result<ExecutionResult, ExecutorError> {
        let endpoint = Self::endpoint(iteration.exec.as_deref())?;

        let device = if endpoint.needs_device() {
            let device = self.devices.for_worker(ctx.run_slot).ok_or_else(|| {
                ExecutorError::ResourceUnavailable(format!("no device for worker {}", ctx.run_slot))
            })?;
            Some(device)
        } else {
            None
        };

        let url = format!(
            "{}{}",
            self.base_url,
            endpoint.path(device.map(|d| d.device_uuid.as_str()))
        );
        let mut request = self.client.request(endpoint.method(), &url);
        if let Some(device) = device {
            request = request.header("X-API-Key", &device.api_key);
        }
        if endpoint == Endpoint::TelemetryPost {
            request = request.json(&TelemetryPayload::random(&mut ctx.rng));
        }

        let started = Instant::now();
        let response = request.send().await.map_err(|e| self.classify(e))?;
        let status = response.status().as_u16();
        // Latency includes reading the body
        response.bytes().await.map_err(|e| self.classify(e))?;
        let latency = started.elapsed();

        trace!(
            worker_id = ctx.worker_id,
            endpoint = %endpoint,
            status,
            latency_ms = latency_ms(latency),
            "Request completed"
        );

        Ok(ExecutionResult::from_status(
            status,
            endpoint.expected_statuses(),
            latency,
        ))
    }
}

fn latency_ms(latency: Duration) -> f64 {
    latency.as_secs_f64() * 1000.0
}
