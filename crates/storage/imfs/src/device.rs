//! Device driver boundary
//!
//! Device nodes only store a major/minor pair. I/O on an open device goes to
//! the driver registered for the major number; generic nodes carry their
//! driver directly. Drivers are always called without any filesystem lock
//! held.

use alloc::collections::BTreeMap;
use alloc::sync::Arc;
use spin::RwLock;

use crate::file::{OpenFlags, PollEvents};
use crate::{ImfsError, ImfsResult};

/// Operations an external driver provides for its minor devices
pub trait DeviceDriver: Send + Sync {
    /// Called for every open of a node routed to this driver
    fn open(&self, _minor: u32, _flags: OpenFlags) -> ImfsResult<()> {
        Ok(())
    }

    /// Called when the last use of an open handle ends
    fn close(&self, _minor: u32) -> ImfsResult<()> {
        Ok(())
    }

    /// Read into `buf` at `offset`
    fn read(&self, minor: u32, offset: u64, buf: &mut [u8]) -> ImfsResult<usize>;

    /// Write `buf` at `offset`
    fn write(&self, minor: u32, offset: u64, buf: &[u8]) -> ImfsResult<usize>;

    /// Device-specific control request
    fn ioctl(&self, _minor: u32, _request: u32, _arg: usize) -> ImfsResult<i32> {
        Err(ImfsError::NotSupported)
    }

    /// Readiness of the device
    fn poll(&self, _minor: u32) -> PollEvents {
        PollEvents::READY
    }
}

/// Drivers indexed by major number
pub struct DeviceRegistry {
    drivers: RwLock<BTreeMap<u32, Arc<dyn DeviceDriver>>>,
}

impl DeviceRegistry {
    pub fn new() -> Self {
        DeviceRegistry {
            drivers: RwLock::new(BTreeMap::new()),
        }
    }

    /// Register (or replace) the driver for a major number
    pub fn register(&self, major: u32, driver: Arc<dyn DeviceDriver>) {
        log::info!("imfs: driver registered for major {}", major);
        self.drivers.write().insert(major, driver);
    }

    /// Remove the driver for a major number
    ///
    /// Handles already open keep their reference to the driver.
    pub fn unregister(&self, major: u32) -> Option<Arc<dyn DeviceDriver>> {
        let driver = self.drivers.write().remove(&major);
        if driver.is_some() {
            log::info!("imfs: driver unregistered for major {}", major);
        }
        driver
    }

    /// Driver for a major number, or `NoDevice`
    pub fn get(&self, major: u32) -> ImfsResult<Arc<dyn DeviceDriver>> {
        self.drivers.read().get(&major).cloned().ok_or(ImfsError::NoDevice)
    }
}

impl Default for DeviceRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NullDriver;

    impl DeviceDriver for NullDriver {
        fn read(&self, _minor: u32, _offset: u64, _buf: &mut [u8]) -> ImfsResult<usize> {
            Ok(0)
        }

        fn write(&self, _minor: u32, _offset: u64, buf: &[u8]) -> ImfsResult<usize> {
            Ok(buf.len())
        }
    }

    #[test]
    fn test_registry() {
        let registry = DeviceRegistry::new();
        assert!(matches!(registry.get(1), Err(ImfsError::NoDevice)));

        registry.register(1, Arc::new(NullDriver));
        let driver = registry.get(1).unwrap();
        assert_eq!(driver.write(0, 0, b"abc").unwrap(), 3);
        assert_eq!(driver.ioctl(0, 1, 0), Err(ImfsError::NotSupported));

        assert!(registry.unregister(1).is_some());
        assert!(registry.get(1).is_err());
    }
}
