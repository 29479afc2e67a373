//! Per-kernel set of devices the kernel has been specialized for.
//!
//! # Thread Safety
//!
//! Uses `parking_lot::RwLock` for efficient concurrent access:
//! - Launches on already registered devices only take the read lock
//! - Registration takes the write lock and re-checks before registering
//! - The registration callback runs under the write lock, so it happens at most once
//!   per device even when several threads launch on a new device together

use std::collections::HashSet;

use parking_lot::RwLock;
use tessera_device::DeviceIndex;

use crate::error::Result;

#[derive(Debug, Default)]
pub struct RegisteredDevices {
    devices: RwLock<HashSet<DeviceIndex>>,
}

impl RegisteredDevices {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `register` for `device` unless it already succeeded before.
    ///
    /// Returns whether `register` ran. A failed registration is not recorded, so the
    /// next launch on that device tries again.
    pub fn register_once<F>(&self, device: DeviceIndex, register: F) -> Result<bool>
    where
        F: FnOnce() -> Result<()>,
    {
        // Fast path: read lock
        if self.devices.read().contains(&device) {
            return Ok(false);
        }

        let mut devices = self.devices.write();

        // Double-check after acquiring write lock
        if devices.contains(&device) {
            return Ok(false);
        }

        register()?;
        devices.insert(device);
        Ok(true)
    }

    pub fn contains(&self, device: DeviceIndex) -> bool {
        self.devices.read().contains(&device)
    }

    /// Registered devices in ascending order.
    pub fn snapshot(&self) -> Vec<DeviceIndex> {
        let mut devices: Vec<_> = self.devices.read().iter().copied().collect();
        devices.sort_unstable();
        devices
    }

    pub fn len(&self) -> usize {
        self.devices.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.read().is_empty()
    }
}
