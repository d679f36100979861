//! Telemetry service endpoints

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use rand::Rng;
use reqwest::Method;
use serde::{Deserialize, Serialize};

/// An endpoint of the telemetry service, selected by a stream's `exec`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Endpoint {
    /// `GET /api/`
    Home,
    /// `GET /api/health/`
    Health,
    /// `GET /api/health/db`
    HealthDb,
    /// `GET /api/devices`
    DevicesGetAll,
    /// `GET /api/telemetry/latest/{device_uuid}`
    TelemetryGetLatest,
    /// `POST /api/telemetry/{device_uuid}`
    TelemetryPost,
}

impl Endpoint {
    /// Every endpoint
    pub fn all() -> &'static [Endpoint] {
        &[
            Endpoint::Home,
            Endpoint::Health,
            Endpoint::HealthDb,
            Endpoint::DevicesGetAll,
            Endpoint::TelemetryGetLatest,
            Endpoint::TelemetryPost,
        ]
    }

    /// Name used for `exec` and the `endpoint` tag
    pub fn as_str(&self) -> &'static str {
        match self {
            Endpoint::Home => "home",
            Endpoint::Health => "health",
            Endpoint::HealthDb => "health_db",
            Endpoint::DevicesGetAll => "devices_get_all",
            Endpoint::TelemetryGetLatest => "telemetry_get_latest",
            Endpoint::TelemetryPost => "telemetry_post",
        }
    }

    /// HTTP method
    pub fn method(&self) -> Method {
        match self {
            Endpoint::TelemetryPost => Method::POST,
            _ => Method::GET,
        }
    }

    /// Statuses counted as success
    pub fn expected_statuses(&self) -> &'static [u16] {
        match self {
            Endpoint::TelemetryGetLatest => &[200, 404],
            Endpoint::TelemetryPost => &[201],
            _ => &[200],
        }
    }

    /// True if the request is made on behalf of a device
    pub fn needs_device(&self) -> bool {
        matches!(self, Endpoint::TelemetryGetLatest | Endpoint::TelemetryPost)
    }

    /// Path below the base URL
    pub fn path(&self, device_uuid: Option<&str>) -> String {
        let device = device_uuid.unwrap_or_default();
        match self {
            Endpoint::Home => "/api/".to_string(),
            Endpoint::Health => "/api/health/".to_string(),
            Endpoint::HealthDb => "/api/health/db".to_string(),
            Endpoint::DevicesGetAll => "/api/devices".to_string(),
            Endpoint::TelemetryGetLatest => format!("/api/telemetry/latest/{device}"),
            Endpoint::TelemetryPost => format!("/api/telemetry/{device}"),
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Endpoint {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Endpoint::all()
            .iter()
            .copied()
            .find(|e| e.as_str() == s)
            .ok_or_else(|| format!("unknown endpoint '{s}'"))
    }
}

/// Body of `POST /api/telemetry/{device_uuid}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetryPayload {
    /// X coordinate
    pub x_coord: f64,
    /// Y coordinate
    pub y_coord: f64,
    /// Device-side timestamp
    pub device_time: DateTime<Utc>,
}

impl TelemetryPayload {
    /// Random coordinates in `[0, 100)`, timestamped now
    pub fn random<R: Rng + ?Sized>(rng: &mut R) -> Self {
        Self {
            x_coord: coordinate(rng),
            y_coord: coordinate(rng),
            device_time: Utc::now(),
        }
    }
}

// Two decimal places
fn coordinate<R: Rng + ?Sized>(rng: &mut R) -> f64 {
    (rng.gen_range(0.0..100.0_f64) * 100.0).round() / 100.0
}
