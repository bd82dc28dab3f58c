//! One-way command delivery.

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use log::{debug, warn};

use crate::codec;
use crate::command::Command;
use crate::errors::Error;
use crate::transport::Transport;

type Result<T> = std::result::Result<T, Error>;

/// Encodes commands and hands them to the transport.
///
/// Fire-and-forget: `Ok` means the datagram left this host. Replies, if any,
/// are observed by the listener and are not correlated with the send.
#[derive(Debug)]
pub struct Dispatcher {
    transport: Arc<Transport>,
    sent: AtomicU64,
    failed: AtomicU64,
}

impl Dispatcher {
    pub fn new(transport: Arc<Transport>) -> Self {
        Dispatcher {
            transport,
            sent: AtomicU64::new(0),
            failed: AtomicU64::new(0),
        }
    }

    /// Send `command` to `target`, or broadcast it when `target` is `None`.
    pub async fn send(&self, command: &Command, target: Option<SocketAddr>) -> Result<()> {
        let result = self.deliver(command, target).await;
        match &result {
            Ok(()) => {
                self.sent.fetch_add(1, Ordering::Relaxed);
            }
            Err(e) => {
                self.failed.fetch_add(1, Ordering::Relaxed);
                warn!("Failed to send {}: {}", command.name(), e);
            }
        }
        result
    }

    /// Commands handed to the network.
    pub fn sent(&self) -> u64 {
        self.sent.load(Ordering::Relaxed)
    }

    /// Commands that failed locally.
    pub fn failed(&self) -> u64 {
        self.failed.load(Ordering::Relaxed)
    }

    async fn deliver(&self, command: &Command, target: Option<SocketAddr>) -> Result<()> {
        let bytes = codec::encode(command)?;
        match target {
            Some(address) => {
                self.transport.unicast(&bytes, address).await?;
                debug!("Sent {} to {}", command.name(), address);
            }
            None => {
                self.transport.broadcast(&bytes).await?;
                debug!(
                    "Broadcast {} to {}",
                    command.name(),
                    self.transport.broadcast_target()
                );
            }
        }
        Ok(())
    }
}
