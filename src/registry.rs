//! Liveness table of the devices the listener has heard from.

use std::collections::HashMap;
use std::fmt;
use std::net::SocketAddr;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

/// The last observation of a device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceRecord {
    pub device_id: String,
    pub address: SocketAddr,
    pub last_seen: Instant,
}

/// A device considered reachable at the time of a snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DiscoveredDevice {
    pub device_id: String,
    pub address: SocketAddr,
}

impl fmt::Display for DiscoveredDevice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.device_id, self.address.ip())
    }
}

/// Device id → most recent address and sighting.
///
/// All operations serialize on one mutex. A lock poisoned by a panicking
/// holder is recovered, since every write leaves the map consistent.
///
/// # Examples
///
/// ```
/// use std::time::{Duration, Instant};
/// use udp_led_rs::DeviceRegistry;
///
/// let registry = DeviceRegistry::new();
/// registry.upsert("esp32_a", "10.0.0.5:9999".parse().unwrap(), Instant::now());
///
/// let live = registry.snapshot(Instant::now(), Duration::from_secs(1));
/// assert_eq!(live.len(), 1);
/// assert_eq!(live[0].to_string(), "esp32_a@10.0.0.5");
/// ```
#[derive(Debug, Default)]
pub struct DeviceRegistry {
    records: Mutex<HashMap<String, DeviceRecord>>,
}

impl DeviceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a sighting of `device_id` at `address`.
    ///
    /// The observation with the latest timestamp wins; on equal timestamps the
    /// later call wins. Address and timestamp are replaced together.
    pub fn upsert(&self, device_id: &str, address: SocketAddr, timestamp: Instant) {
        let mut records = self.lock();
        match records.get_mut(device_id) {
            Some(record) if record.last_seen > timestamp => {}
            Some(record) => {
                record.address = address;
                record.last_seen = timestamp;
            }
            None => {
                records.insert(
                    device_id.to_string(),
                    DeviceRecord {
                        device_id: device_id.to_string(),
                        address,
                        last_seen: timestamp,
                    },
                );
            }
        }
    }

    /// Devices seen within `ttl` of `now`, ordered by id.
    pub fn snapshot(&self, now: Instant, ttl: Duration) -> Vec<DiscoveredDevice> {
        let mut live: Vec<DiscoveredDevice> = self
            .lock()
            .values()
            .filter(|record| now.saturating_duration_since(record.last_seen) <= ttl)
            .map(|record| DiscoveredDevice {
                device_id: record.device_id.clone(),
                address: record.address,
            })
            .collect();
        live.sort_by(|a, b| a.device_id.cmp(&b.device_id));
        live
    }

    pub fn get(&self, device_id: &str) -> Option<DeviceRecord> {
        self.lock().get(device_id).cloned()
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    /// Drop records older than `ttl`, returning how many were removed.
    pub fn evict_expired(&self, now: Instant, ttl: Duration) -> usize {
        let mut records = self.lock();
        let before = records.len();
        records.retain(|_, record| now.saturating_duration_since(record.last_seen) <= ttl);
        before - records.len()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, DeviceRecord>> {
        self.records.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
