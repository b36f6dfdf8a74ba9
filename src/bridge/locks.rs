//! Keyed async mutexes: serialize work per device, keep devices independent.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

#[derive(Default)]
pub struct DeviceLocks {
    slots: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

/// Held while a device's packet is processed. Dropping it releases the device.
pub struct DeviceGuard<'a> {
    locks: &'a DeviceLocks,
    device_id: String,
    guard: Option<OwnedMutexGuard<()>>,
}

impl DeviceLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait until no other task holds `device_id`, then hold it.
    pub async fn acquire(&self, device_id: &str) -> DeviceGuard<'_> {
        let slot = {
            let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
            slots
                .entry(device_id.to_string())
                .or_insert_with(|| Arc::new(AsyncMutex::new(())))
                .clone()
        };
        let guard = slot.lock_owned().await;
        DeviceGuard {
            locks: self,
            device_id: device_id.to_string(),
            guard: Some(guard),
        }
    }

    /// Devices that currently have a holder or waiters.
    pub fn active(&self) -> usize {
        self.slots
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

impl Drop for DeviceGuard<'_> {
    fn drop(&mut self) {
        let mut slots = self
            .locks
            .slots
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        // Release first so the strong count reflects only the map and waiters.
        self.guard.take();
        if let Some(slot) = slots.get(&self.device_id) {
            if Arc::strong_count(slot) == 1 {
                slots.remove(&self.device_id);
            }
        }
    }
}
