//! Device registry loaded from CSV
//!
//! The file has a header row and two columns, `device_uuid,api_key`. Each
//! worker is bound to one device by its id, so a run needs no shared
//! cursor into the list.

use std::io::Read;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Device registry errors
#[derive(Debug, Error)]
pub enum RegistryError {
    /// The file could not be opened or parsed
    #[error("failed to read device registry {path}: {source}")]
    Csv {
        /// File path
        path: PathBuf,
        /// Underlying error
        #[source]
        source: csv::Error,
    },

    /// The file parsed but holds no devices
    #[error("device registry {0} is empty")]
    Empty(PathBuf),
}

/// One registered device
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Device {
    /// Device identifier used in request paths
    pub device_uuid: String,
    /// Key sent as `X-API-Key`
    pub api_key: String,
}

/// Read-only list of devices
#[derive(Debug, Clone, Default)]
pub struct DeviceRegistry {
    devices: Vec<Device>,
}

impl DeviceRegistry {
    /// Build from an in-memory list
    pub fn from_devices(devices: Vec<Device>) -> Self {
        Self { devices }
    }

    /// Load a CSV file
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, RegistryError> {
        let path = path.as_ref();
        let wrap = |source| RegistryError::Csv {
            path: path.to_path_buf(),
            source,
        };

        let reader = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .from_path(path)
            .map_err(wrap)?;
        let registry = Self::from_csv(reader).map_err(wrap)?;

        if registry.is_empty() {
            return Err(RegistryError::Empty(path.to_path_buf()));
        }
        tracing::info!(path = %path.display(), devices = registry.len(), "Loaded device registry");
        Ok(registry)
    }

    /// Parse CSV from any reader
    pub fn from_reader<R: Read>(reader: R) -> Result<Self, csv::Error> {
        Self::from_csv(
            csv::ReaderBuilder::new()
                .trim(csv::Trim::All)
                .from_reader(reader),
        )
    }

    fn from_csv<R: Read>(mut reader: csv::Reader<R>) -> Result<Self, csv::Error> {
        let devices = reader
            .deserialize()
            .collect::<Result<Vec<Device>, _>>()?;
        Ok(Self { devices })
    }

    /// Number of devices
    pub fn len(&self) -> usize {
        self.devices.len()
    }

    /// True if there are no devices
    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    /// Device bound to `worker_id`
    pub fn for_worker(&self, worker_id: usize) -> Option<&Device> {
        if self.devices.is_empty() {
            return None;
        }
        self.devices.get(worker_id % self.devices.len())
    }
}
