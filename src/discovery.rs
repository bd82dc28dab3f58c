//! Device discovery via UDP broadcast.

use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

use log::{info, warn};

use crate::codec;
use crate::command::Command;
use crate::registry::{DeviceRegistry, DiscoveredDevice};
use crate::runtime;
use crate::transport::Transport;

/// Where a discovery round currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiscoveryPhase {
    Idle,
    Broadcasting,
    Collecting,
    Snapshot,
}

/// Broadcast-then-collect discovery over a running listener.
///
/// A round clears the registry, broadcasts a `discover` command, sleeps for
/// the collection window while the listener records replies, then returns
/// every device seen within `window + grace`.
///
/// Rounds are not reentrant. Two overlapping rounds share one registry, so
/// each clears what the other collected; callers run one round at a time.
#[derive(Debug)]
pub struct Discovery {
    grace: Duration,
    phase: Mutex<DiscoveryPhase>,
}

impl Discovery {
    /// Margin added to the collection window when filtering the snapshot.
    pub const DEFAULT_GRACE: Duration = Duration::from_secs(1);

    pub fn new(grace: Duration) -> Self {
        Discovery {
            grace,
            phase: Mutex::new(DiscoveryPhase::Idle),
        }
    }

    pub fn grace(&self) -> Duration {
        self.grace
    }

    pub fn phase(&self) -> DiscoveryPhase {
        *self.phase.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Run one discovery round with a collection window of `window`.
    ///
    /// Always takes the full window. A failed broadcast is logged and the
    /// round completes with whatever the registry holds, normally nothing.
    pub async fn discover(
        &self,
        transport: &Transport,
        registry: &DeviceRegistry,
        window: Duration,
    ) -> Vec<DiscoveredDevice> {
        info!("Searching for devices (window: {:?})", window);

        self.set_phase(DiscoveryPhase::Broadcasting);
        registry.clear();
        match codec::encode(&Command::Discover) {
            Ok(bytes) => {
                if let Err(e) = transport.broadcast(&bytes).await {
                    warn!("Discovery broadcast failed: {}", e);
                }
            }
            Err(e) => warn!("Failed to encode discovery request: {}", e),
        }

        self.set_phase(DiscoveryPhase::Collecting);
        runtime::sleep(window).await;

        self.set_phase(DiscoveryPhase::Snapshot);
        let devices = registry.snapshot(Instant::now(), window + self.grace);
        for device in &devices {
            info!("Discovered device: {}", device);
        }

        self.set_phase(DiscoveryPhase::Idle);
        devices
    }

    fn set_phase(&self, phase: DiscoveryPhase) {
        *self.phase.lock().unwrap_or_else(PoisonError::into_inner) = phase;
    }
}

impl Default for Discovery {
    fn default() -> Self {
        Self::new(Self::DEFAULT_GRACE)
    }
}
