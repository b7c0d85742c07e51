//! Attached and failed device bookkeeping

use contracts::{DeviceFailureStatus, DeviceInfo, FailedDevice, UNAVAILABLE_SERIAL};

/// Devices currently attached, keyed by transport handle
#[derive(Debug, Default, Clone)]
pub struct DeviceList {
    attached: Vec<DeviceInfo>,
    failed: Vec<FailedDevice>,
}

impl DeviceList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace the device with the same handle; true if it is new
    pub fn add_or_update(&mut self, device: DeviceInfo) -> bool {
        match self.attached.iter_mut().find(|d| d.handle == device.handle) {
            Some(existing) => {
                *existing = device;
                false
            }
            None => {
                self.attached.push(device);
                true
            }
        }
    }

    pub fn find(&self, handle: u64) -> Option<&DeviceInfo> {
        self.attached.iter().find(|d| d.handle == handle)
    }

    pub fn remove(&mut self, handle: u64) -> Option<DeviceInfo> {
        let index = self.attached.iter().position(|d| d.handle == handle)?;
        Some(self.attached.remove(index))
    }

    /// Drop the failing device (if known) and keep a failure record
    pub fn record_failure(
        &mut self,
        handle: Option<u64>,
        status: DeviceFailureStatus,
    ) -> FailedDevice {
        let serial = handle
            .and_then(|h| self.remove(h))
            .map(|device| device.serial)
            .filter(|serial| !serial.is_empty())
            .unwrap_or_else(|| UNAVAILABLE_SERIAL.to_string());

        let failed = FailedDevice {
            status,
            message: status.message().to_string(),
            serial,
        };
        self.failed.push(failed.clone());
        failed
    }

    pub fn attached(&self) -> &[DeviceInfo] {
        &self.attached
    }

    pub fn failed(&self) -> &[FailedDevice] {
        &self.failed
    }

    pub fn len(&self) -> usize {
        self.attached.len()
    }

    pub fn is_empty(&self) -> bool {
        self.attached.is_empty()
    }

    /// Forget attached devices; failure records are kept
    pub fn clear(&mut self) {
        self.attached.clear();
    }
}
