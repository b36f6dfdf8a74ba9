//! In-memory last-known state per device.
//!
//! One [`DeviceCacheEntry`] per device identifier, created on first reference and
//! mutated in place by the port handlers. Each handler owns different fields of
//! the same entry. Nothing is persisted.
//!
//! Mutation happens under a plain mutex inside [`DeviceCache::update`]; callers
//! must not hold an entry across an `.await`, which the closure API enforces.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::protobuf::meshtastic_generated as proto;

/// Last observed state of one device. `None` means "never observed".
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DeviceCacheEntry {
    pub last_position: Option<proto::Position>,
    pub last_node_info: Option<proto::User>,
    pub last_device_metrics: Option<proto::DeviceMetrics>,
    /// Most recent map report for the device
    pub last_waypoint: Option<proto::MapReport>,
    pub last_update_time: Option<DateTime<Utc>>,
}

impl DeviceCacheEntry {
    /// Battery level from the most recent device metrics, if any.
    pub fn cached_battery_level(&self) -> Option<u32> {
        self.last_device_metrics
            .as_ref()
            .and_then(|m| m.battery_level)
    }

    /// Non-blank long name from the most recent node info.
    pub fn long_name(&self) -> Option<&str> {
        self.last_node_info
            .as_ref()
            .map(|u| u.long_name.trim())
            .filter(|name| !name.is_empty())
    }
}

struct Slot {
    entry: DeviceCacheEntry,
    /// Write sequence number, used to find the least recently written entry
    written: u64,
}

#[derive(Default)]
struct Inner {
    slots: HashMap<String, Slot>,
    clock: u64,
    evictions: u64,
}

/// Shared device state store. Cheap to share behind an `Arc`.
#[derive(Default)]
pub struct DeviceCache {
    inner: Mutex<Inner>,
    max_entries: Option<usize>,
}

impl DeviceCache {
    /// Unbounded cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Cache holding at most `max_entries` devices; the least recently written
    /// entry is evicted to make room for a new device.
    pub fn with_capacity_limit(max_entries: usize) -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            max_entries: Some(max_entries.max(1)),
        }
    }

    pub fn from_config(config: &crate::config::CacheConfig) -> Self {
        match config.max_entries {
            Some(max) => Self::with_capacity_limit(max),
            None => Self::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Get-or-create the entry for `device_id` and mutate it with `f`.
    pub fn update<R>(&self, device_id: &str, f: impl FnOnce(&mut DeviceCacheEntry) -> R) -> R {
        let mut inner = self.lock();
        inner.clock += 1;
        let now = inner.clock;

        if !inner.slots.contains_key(device_id) {
            if let Some(max) = self.max_entries {
                while inner.slots.len() >= max {
                    let oldest = inner
                        .slots
                        .iter()
                        .min_by_key(|(_, slot)| slot.written)
                        .map(|(id, _)| id.clone());
                    match oldest {
                        Some(id) => {
                            inner.slots.remove(&id);
                            inner.evictions += 1;
                            log::debug!("Device cache full, evicted {}", id);
                        }
                        None => break,
                    }
                }
            }
        }

        let slot = inner
            .slots
            .entry(device_id.to_string())
            .or_insert_with(|| Slot {
                entry: DeviceCacheEntry::default(),
                written: now,
            });
        slot.written = now;
        f(&mut slot.entry)
    }

    /// Snapshot of the entry for `device_id`, if the device was ever observed.
    pub fn get(&self, device_id: &str) -> Option<DeviceCacheEntry> {
        self.lock().slots.get(device_id).map(|s| s.entry.clone())
    }

    pub fn contains(&self, device_id: &str) -> bool {
        self.lock().slots.contains_key(device_id)
    }

    pub fn len(&self) -> usize {
        self.lock().slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of entries dropped by the capacity limit since start.
    pub fn evictions(&self) -> u64 {
        self.lock().evictions
    }
}
