//! Raw datagram I/O over a pair of UDP sockets.

use std::io;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use log::{debug, info};

use crate::errors::Error;
use crate::runtime::{self, Mutex, UdpSocket};

type Result<T> = std::result::Result<T, Error>;

/// Largest UDP payload over IPv4; every reply fits unmodified.
pub const MAX_DATAGRAM: usize = 65_507;

/// Outcome of a bounded receive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Received {
    /// One datagram and the address it came from.
    Datagram(Vec<u8>, SocketAddr),
    /// Nothing arrived before the deadline.
    Timeout,
}

/// A broadcast-capable send socket and a receive socket bound to the listen port.
///
/// The send socket is used by the foreground caller, the receive socket only
/// by the listener. Each sits behind its own lock so that [`Transport::close`]
/// can take it away; `close` waits for an in-flight [`Transport::receive`]
/// to finish its bounded wait instead of relying on the OS to interrupt it.
#[derive(Debug)]
pub struct Transport {
    sender: Mutex<Option<UdpSocket>>,
    receiver: Mutex<Option<UdpSocket>>,
    broadcast_target: SocketAddr,
    sender_addr: SocketAddr,
    listen_addr: SocketAddr,
    filter_self: bool,
    closed: AtomicBool,
}

impl Transport {
    /// Bind the receive socket on `listen_addr` and a broadcast-enabled
    /// ephemeral send socket for `broadcast_target`.
    ///
    /// Fails with [`Error::Bind`] if either socket cannot be set up.
    pub async fn open(broadcast_target: SocketAddr, listen_addr: SocketAddr) -> Result<Self> {
        let receiver = UdpSocket::bind(listen_addr)
            .await
            .map_err(|e| Error::bind("listen", listen_addr, e))?;
        let listen_addr = receiver
            .local_addr()
            .map_err(|e| Error::bind("listen", listen_addr, e))?;

        let sender_bind = SocketAddr::new(unspecified_like(broadcast_target.ip()), 0);
        let sender = UdpSocket::bind(sender_bind)
            .await
            .map_err(|e| Error::bind("broadcast", sender_bind, e))?;
        sender
            .set_broadcast(true)
            .map_err(|e| Error::bind("broadcast", sender_bind, e))?;
        let sender_addr = sender
            .local_addr()
            .map_err(|e| Error::bind("broadcast", sender_bind, e))?;

        let filter_self = broadcast_target.port() == listen_addr.port();
        info!(
            "Transport open (broadcast: {}, listen: {}, self-filter: {})",
            broadcast_target, listen_addr, filter_self
        );

        Ok(Transport {
            sender: Mutex::new(Some(sender)),
            receiver: Mutex::new(Some(receiver)),
            broadcast_target,
            sender_addr,
            listen_addr,
            filter_self,
            closed: AtomicBool::new(false),
        })
    }

    /// Send `payload` to the broadcast address on the broadcast port.
    ///
    /// After [`Transport::close`] this fails with a send error
    /// ([`ErrorKind::Send`](crate::ErrorKind::Send)).
    pub async fn broadcast(&self, payload: &[u8]) -> Result<()> {
        self.send_to(payload, self.broadcast_target).await
    }

    /// Send `payload` to a single address.
    pub async fn unicast(&self, payload: &[u8], address: SocketAddr) -> Result<()> {
        self.send_to(payload, address).await
    }

    /// Wait up to `timeout` for one inbound datagram.
    ///
    /// Returns [`Received::Timeout`] when nothing arrives, and
    /// [`Error::Closed`] once the transport has been closed.
    pub async fn receive(&self, timeout: Duration) -> Result<Received> {
        let guard = self.receiver.lock().await;
        let Some(socket) = guard.as_ref() else {
            return Err(Error::Closed);
        };

        let start = Instant::now();
        let mut buffer = vec![0u8; MAX_DATAGRAM];
        loop {
            let Some(remaining) = timeout.checked_sub(start.elapsed()) else {
                return Ok(Received::Timeout);
            };
            match runtime::timeout(remaining, socket.recv_from(&mut buffer)).await {
                Err(_) => return Ok(Received::Timeout),
                Ok(Err(e)) => return Err(Error::socket("recv_from", e)),
                Ok(Ok((size, source))) => {
                    if self.is_self_originated(source).await {
                        debug!("Dropping self-originated datagram from {}", source);
                        continue;
                    }
                    return Ok(Received::Datagram(buffer[..size].to_vec(), source));
                }
            }
        }
    }

    /// Release both sockets. Safe to call more than once.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.sender.lock().await.take();
        self.receiver.lock().await.take();
        debug!("Transport closed");
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Local address of the receive socket.
    pub fn listen_addr(&self) -> SocketAddr {
        self.listen_addr
    }

    /// Local address of the send socket.
    pub fn sender_addr(&self) -> SocketAddr {
        self.sender_addr
    }

    pub fn broadcast_target(&self) -> SocketAddr {
        self.broadcast_target
    }

    async fn send_to(&self, payload: &[u8], address: SocketAddr) -> Result<()> {
        let guard = self.sender.lock().await;
        let Some(socket) = guard.as_ref() else {
            return Err(Error::socket(
                "send_to",
                io::Error::new(io::ErrorKind::NotConnected, "transport is closed"),
            ));
        };
        socket
            .send_to(payload, address)
            .await
            .map_err(|e| Error::socket("send_to", e))?;
        Ok(())
    }

    // With equal ports our own broadcasts loop back to the receive socket.
    // A match needs the send socket's port and one of this host's addresses.
    async fn is_self_originated(&self, source: SocketAddr) -> bool {
        if !self.filter_self || source.port() != self.sender_addr.port() {
            return false;
        }
        if self.sender_addr.ip().is_unspecified() {
            is_local_ip(source.ip()).await
        } else {
            source.ip() == self.sender_addr.ip()
        }
    }
}

/// Whether `ip` belongs to this host: only local addresses can be bound.
async fn is_local_ip(ip: IpAddr) -> bool {
    ip.is_loopback() || UdpSocket::bind(SocketAddr::new(ip, 0)).await.is_ok()
}

fn unspecified_like(ip: IpAddr) -> IpAddr {
    match ip {
        IpAddr::V4(_) => IpAddr::V4(Ipv4Addr::UNSPECIFIED),
        IpAddr::V6(_) => IpAddr::V6(Ipv6Addr::UNSPECIFIED),
    }
}
