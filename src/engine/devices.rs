//! Device Registry
//!
//! Enumerates compute devices exposed by the backend and fixes the order in
//! which they are presented. Backends usually list the CPU first, so the
//! listing is reversed to surface accelerators ahead of the fallback.

use std::path::Path;

use tracing::{info, warn};

use super::backend::InferenceBackend;
use crate::error::{BridgeError, Result};

/// Default relative directory for compiled-artifact caches
pub const DEFAULT_CACHE_DIR: &str = "cache";

/// Device family, derived from the identifier prefix
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeviceClass {
    Cpu,
    Gpu,
    Npu,
    Other,
}

impl DeviceClass {
    pub fn from_id(id: &str) -> Self {
        if id.starts_with("GPU") {
            DeviceClass::Gpu
        } else if id.starts_with("CPU") {
            DeviceClass::Cpu
        } else if id.starts_with("NPU") {
            DeviceClass::Npu
        } else {
            DeviceClass::Other
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DeviceClass::Cpu => "cpu",
            DeviceClass::Gpu => "gpu",
            DeviceClass::Npu => "npu",
            DeviceClass::Other => "other",
        }
    }

    /// Whether the backend should keep a compiled-artifact cache for this class
    pub fn wants_cache(&self) -> bool {
        matches!(self, DeviceClass::Gpu)
    }
}

/// An enumerated compute target
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceDescriptor {
    pub id: String,
    pub class: DeviceClass,
}

impl DeviceDescriptor {
    pub fn new(id: impl Into<String>) -> Self {
        let id = id.into();
        let class = DeviceClass::from_id(&id);
        Self { id, class }
    }
}

/// Snapshot of the backend's devices in presentation order
#[derive(Debug, Default)]
pub struct DeviceRegistry {
    devices: Vec<DeviceDescriptor>,
    listing: String,
    generation: u64,
}

impl DeviceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Query the backend, replacing the previous snapshot.
    ///
    /// Indices handed out by an earlier snapshot are invalid afterwards; the
    /// generation counter lets sessions detect that.
    pub fn refresh<B: InferenceBackend>(&mut self, backend: &mut B) -> Result<&[DeviceDescriptor]> {
        let mut ids = backend.available_devices().map_err(BridgeError::Backend)?;
        ids.reverse();

        self.devices = ids.into_iter().map(DeviceDescriptor::new).collect();
        self.listing = join_ids(&self.devices);
        self.generation += 1;

        info!("Available devices: [{}]", self.listing);
        Ok(&self.devices)
    }

    /// Configure a compiled-artifact cache for every GPU-class device.
    ///
    /// Returns the identifiers that received the hint. A device that rejects
    /// the hint is logged and skipped; compiling without a cache still works.
    pub fn apply_device_cache_hints<B: InferenceBackend>(
        &self,
        backend: &mut B,
        cache_dir: &Path,
    ) -> Vec<String> {
        let mut configured = Vec::new();
        for device in self.devices.iter().filter(|d| d.class.wants_cache()) {
            match backend.set_cache_dir(&device.id, cache_dir) {
                Ok(()) => {
                    info!("Cache directory {} enabled for {}", cache_dir.display(), device.id);
                    configured.push(device.id.clone());
                }
                Err(e) => warn!("Could not enable cache for {}: {}", device.id, e),
            }
        }
        configured
    }

    pub fn devices(&self) -> &[DeviceDescriptor] {
        &self.devices
    }

    /// Comma-joined identifiers in presentation order
    pub fn listing(&self) -> &str {
        &self.listing
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Bounds-checked lookup; never clamps an invalid index
    pub fn get(&self, index: usize) -> Result<&DeviceDescriptor> {
        if self.devices.is_empty() {
            return Err(BridgeError::NoDevices);
        }
        self.devices.get(index).ok_or(BridgeError::DeviceIndexOutOfRange {
            index,
            count: self.devices.len(),
        })
    }
}

fn join_ids(devices: &[DeviceDescriptor]) -> String {
    devices
        .iter()
        .map(|d| d.id.as_str())
        .collect::<Vec<_>>()
        .join(",")
}
