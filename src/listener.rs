//! Background ingestion of device replies.

use std::any::Any;
use std::fmt;
use std::net::SocketAddr;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use log::{debug, error, info, warn};

use crate::codec::{self, Reply};
use crate::errors::Error;
use crate::registry::DeviceRegistry;
use crate::runtime::{self, JoinHandle};
use crate::transport::{Received, Transport};

/// Called with the resolved device id and the decoded reply.
///
/// The callback runs on the listener task without any lock held, so it may
/// replace itself. A panic inside it is caught and recorded in
/// [`ListenerStats`]; the listener keeps running.
pub type ReplyCallback = Arc<dyn Fn(&str, &Reply) + Send + Sync + 'static>;

// Pause after a transport error, capped at the poll interval.
const ERROR_BACKOFF: Duration = Duration::from_millis(100);

/// Id used for a device whose reply carries no `device_id`.
///
/// Derived from the sender's IP only: a device that keeps its IP but changes
/// source port stays the same record, one that changes IP becomes a new one.
pub fn synthetic_device_id(source: SocketAddr) -> String {
    format!("unknown_{}", source.ip())
}

/// Counters describing what the listener has seen.
#[derive(Debug, Default)]
pub struct ListenerStats {
    datagrams: AtomicU64,
    replies: AtomicU64,
    decode_failures: AtomicU64,
    callback_panics: AtomicU64,
    last_reply: Mutex<Option<Instant>>,
    last_error: Mutex<Option<String>>,
}

impl ListenerStats {
    /// Datagrams received, decodable or not.
    pub fn datagrams(&self) -> u64 {
        self.datagrams.load(Ordering::Relaxed)
    }

    /// Datagrams that decoded into a reply and reached the registry.
    pub fn replies(&self) -> u64 {
        self.replies.load(Ordering::Relaxed)
    }

    pub fn decode_failures(&self) -> u64 {
        self.decode_failures.load(Ordering::Relaxed)
    }

    /// Reply callback invocations that panicked.
    pub fn callback_panics(&self) -> u64 {
        self.callback_panics.load(Ordering::Relaxed)
    }

    pub fn time_since_last_reply(&self) -> Option<Duration> {
        self.last_reply
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .map(|t| t.elapsed())
    }

    pub fn last_error(&self) -> Option<String> {
        self.last_error
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn record_error(&self, err: impl fmt::Display) {
        *self.last_error.lock().unwrap_or_else(PoisonError::into_inner) = Some(err.to_string());
    }
}

/// What the receive loop does after one poll.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Next {
    Poll,
    Backoff,
    Exit,
}

/// Everything needed to turn one datagram into a registry update.
#[derive(Clone)]
struct Ingest {
    registry: Arc<DeviceRegistry>,
    stats: Arc<ListenerStats>,
    callback: Arc<Mutex<Option<ReplyCallback>>>,
}

impl Ingest {
    /// Act on the outcome of one `Transport::receive`.
    fn on_receive(&self, result: Result<Received, Error>) -> Next {
        match result {
            Ok(Received::Timeout) => Next::Poll,
            Ok(Received::Datagram(bytes, source)) => {
                self.handle(&bytes, source);
                Next::Poll
            }
            Err(Error::Closed) => {
                debug!("Transport closed, listener exiting");
                Next::Exit
            }
            Err(e) => {
                self.stats.record_error(&e);
                error!("Listener socket error: {}", e);
                Next::Backoff
            }
        }
    }

    /// Decode and record one datagram. Returns the device id it was filed under.
    fn handle(&self, bytes: &[u8], source: SocketAddr) -> Option<String> {
        self.stats.datagrams.fetch_add(1, Ordering::Relaxed);

        let reply = match codec::decode_reply(bytes, source) {
            Ok(reply) => reply,
            Err(e) => {
                self.stats.decode_failures.fetch_add(1, Ordering::Relaxed);
                warn!("Discarding datagram from {}: {}", source, e);
                return None;
            }
        };

        let device_id = match reply.device_id() {
            Some(id) => id.to_string(),
            None => synthetic_device_id(source),
        };

        let now = Instant::now();
        self.registry.upsert(&device_id, source, now);
        self.stats.replies.fetch_add(1, Ordering::Relaxed);
        *self
            .stats
            .last_reply
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(now);
        debug!("Reply from {}@{}", device_id, source);

        let callback = self
            .callback
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        if let Some(cb) = callback {
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| cb(&device_id, &reply)));
            if let Err(payload) = outcome {
                let message = panic_message(payload.as_ref());
                self.stats.callback_panics.fetch_add(1, Ordering::Relaxed);
                self.stats
                    .record_error(format_args!("reply callback panicked: {}", message));
                error!(
                    "Reply callback panicked on {}@{}: {}",
                    device_id, source, message
                );
            }
        }
        Some(device_id)
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(message) = payload.downcast_ref::<&str>() {
        *message
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.as_str()
    } else {
        "unknown panic"
    }
}

/// Owned handle to the background receive loop.
///
/// The loop runs until [`Listener::stop`] is called (or the transport is
/// closed) and is the only writer of the registry it was given.
pub struct Listener {
    running: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
    stats: Arc<ListenerStats>,
    callback: Arc<Mutex<Option<ReplyCallback>>>,
}

impl Listener {
    /// Start the receive loop on the current tokio runtime.
    pub fn spawn(
        transport: Arc<Transport>,
        registry: Arc<DeviceRegistry>,
        poll_interval: Duration,
    ) -> Self {
        let running = Arc::new(AtomicBool::new(true));
        let stats = Arc::new(ListenerStats::default());
        let callback: Arc<Mutex<Option<ReplyCallback>>> = Arc::new(Mutex::new(None));

        let ingest = Ingest {
            registry,
            stats: Arc::clone(&stats),
            callback: Arc::clone(&callback),
        };
        let handle = runtime::spawn(run(
            transport,
            ingest,
            Arc::clone(&running),
            poll_interval,
        ));

        info!("Listener started (poll interval {:?})", poll_interval);
        Listener {
            running,
            handle: Some(handle),
            stats,
            callback,
        }
    }

    /// Whether the loop is still running.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
            && self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    pub fn stats(&self) -> &ListenerStats {
        &self.stats
    }

    /// Install a callback invoked for every decoded reply, replacing any previous one.
    pub fn set_callback<F: Fn(&str, &Reply) + Send + Sync + 'static>(&self, callback: F) {
        *self.callback.lock().unwrap_or_else(PoisonError::into_inner) = Some(Arc::new(callback));
    }

    /// Ask the loop to exit at its next poll.
    pub fn signal_stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    /// Signal the loop and wait for it to exit. Returns within one poll interval.
    pub async fn stop(&mut self) {
        self.signal_stop();
        if let Some(handle) = self.handle.take() {
            handle.await;
            info!("Listener stopped");
        }
    }
}

impl Drop for Listener {
    fn drop(&mut self) {
        self.signal_stop();
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}

async fn run(
    transport: Arc<Transport>,
    ingest: Ingest,
    running: Arc<AtomicBool>,
    poll_interval: Duration,
) {
    while running.load(Ordering::SeqCst) {
        let result = transport.receive(poll_interval).await;
        match ingest.on_receive(result) {
            Next::Poll => {}
            Next::Backoff => runtime::sleep(ERROR_BACKOFF.min(poll_interval)).await,
            Next::Exit => break,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ingest() -> Ingest {
        Ingest {
            registry: Arc::new(DeviceRegistry::new()),
            stats: Arc::new(ListenerStats::default()),
            callback: Arc::new(Mutex::new(None)),
        }
    }

    fn source() -> SocketAddr {
        "192.168.1.40:9999".parse().unwrap()
    }

    #[test]
    fn test_synthetic_id_uses_ip_only() {
        assert_eq!(synthetic_device_id(source()), "unknown_192.168.1.40");
        assert_eq!(
            synthetic_device_id("192.168.1.40:1234".parse().unwrap()),
            synthetic_device_id(source())
        );
    }

    #[test]
    fn test_ingest_records_device() {
        let ingest = ingest();
        let id = ingest.handle(br#"{"device_id": "esp32_1", "status": "ok"}"#, source());
        assert_eq!(id.as_deref(), Some("esp32_1"));
        assert_eq!(ingest.registry.get("esp32_1").unwrap().address, source());
        assert_eq!(ingest.stats.replies(), 1);
        assert!(ingest.stats.time_since_last_reply().is_some());
    }

    #[test]
    fn test_ingest_falls_back_to_synthetic_id() {
        let ingest = ingest();
        let id = ingest.handle(br#"{"status": "ok"}"#, source());
        assert_eq!(id.as_deref(), Some("unknown_192.168.1.40"));
        assert!(ingest.registry.get("unknown_192.168.1.40").is_some());
    }

    #[test]
    fn test_ingest_survives_garbage() {
        let ingest = ingest();
        let inputs: [&[u8]; 5] = [b"", b"test", b"\xff\xfe", b"[1,2]", b"{\"device_id\":"];
        for bytes in inputs {
            assert!(ingest.handle(bytes, source()).is_none());
        }
        assert!(ingest.registry.is_empty());
        assert_eq!(ingest.stats.datagrams(), 5);
        assert_eq!(ingest.stats.decode_failures(), 5);
        assert_eq!(ingest.stats.replies(), 0);
    }

    #[test]
    fn test_ingest_invokes_callback() {
        let ingest = ingest();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        *ingest.callback.lock().unwrap() = Some(Arc::new(move |id: &str, reply: &Reply| {
            sink.lock()
                .unwrap()
                .push((id.to_string(), reply.payload()["led"].clone()));
        }));

        ingest.handle(br#"{"device_id": "esp32_1", "led": "on"}"#, source());
        assert_eq!(
            *seen.lock().unwrap(),
            vec![("esp32_1".to_string(), json!("on"))]
        );
    }

    #[test]
    fn test_callback_panic_does_not_stop_ingest() {
        let ingest = ingest();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        *ingest.callback.lock().unwrap() = Some(Arc::new(move |id: &str, _: &Reply| {
            if id == "bad" {
                panic!("callback failed for {}", id);
            }
            sink.lock().unwrap().push(id.to_string());
        }));

        assert_eq!(
            ingest.handle(br#"{"device_id": "bad"}"#, source()).as_deref(),
            Some("bad")
        );
        assert_eq!(
            ingest.handle(br#"{"device_id": "good"}"#, source()).as_deref(),
            Some("good")
        );

        assert!(ingest.registry.get("bad").is_some());
        assert!(ingest.registry.get("good").is_some());
        assert_eq!(*seen.lock().unwrap(), vec!["good".to_string()]);
        assert_eq!(ingest.stats.callback_panics(), 1);
        assert_eq!(
            ingest.stats.last_error().as_deref(),
            Some("reply callback panicked: callback failed for bad")
        );
    }

    #[test]
    fn test_callback_may_replace_itself() {
        let ingest = ingest();
        let slot = Arc::clone(&ingest.callback);
        let calls = Arc::new(AtomicU64::new(0));
        let counter = Arc::clone(&calls);
        *ingest.callback.lock().unwrap() = Some(Arc::new(move |_: &str, _: &Reply| {
            counter.fetch_add(1, Ordering::Relaxed);
            let counter = Arc::clone(&counter);
            *slot.lock().unwrap() = Some(Arc::new(move |_: &str, _: &Reply| {
                counter.fetch_add(10, Ordering::Relaxed);
            }));
        }));

        ingest.handle(br#"{"device_id": "a"}"#, source());
        ingest.handle(br#"{"device_id": "a"}"#, source());
        assert_eq!(calls.load(Ordering::Relaxed), 11);
    }

    #[test]
    fn test_socket_error_backs_off_and_keeps_ingesting() {
        let ingest = ingest();
        let err = Error::socket(
            "recv_from",
            std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset by peer"),
        );

        assert_eq!(ingest.on_receive(Err(err)), Next::Backoff);
        assert!(ingest.stats.last_error().unwrap().contains("recv_from"));

        let datagram = Received::Datagram(br#"{"device_id": "strip"}"#.to_vec(), source());
        assert_eq!(ingest.on_receive(Ok(datagram)), Next::Poll);
        assert_eq!(ingest.registry.get("strip").unwrap().address, source());
        assert_eq!(ingest.on_receive(Ok(Received::Timeout)), Next::Poll);
        assert_eq!(ingest.on_receive(Err(Error::Closed)), Next::Exit);
    }

    #[tokio::test]
    async fn test_listener_populates_registry_and_stops() {
        let device = runtime::UdpSocket::bind("127.0.0.1:0".parse().unwrap())
            .await
            .unwrap();
        let transport = Arc::new(
            Transport::open(device.local_addr().unwrap(), "127.0.0.1:0".parse().unwrap())
                .await
                .unwrap(),
        );
        let registry = Arc::new(DeviceRegistry::new());
        let poll = Duration::from_millis(50);
        let mut listener = Listener::spawn(Arc::clone(&transport), Arc::clone(&registry), poll);
        assert!(listener.is_running());

        device
            .send_to(br#"{"device_id": "strip"}"#, transport.listen_addr())
            .await
            .unwrap();
        device.send_to(b"not json", transport.listen_addr()).await.unwrap();

        let start = Instant::now();
        while registry.get("strip").is_none() && start.elapsed() < Duration::from_secs(2) {
            runtime::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(
            registry.get("strip").unwrap().address,
            device.local_addr().unwrap()
        );

        let start = Instant::now();
        listener.stop().await;
        assert!(start.elapsed() < Duration::from_secs(1));
        assert!(!listener.is_running());
    }

    #[tokio::test]
    async fn test_listener_exits_when_transport_closes() {
        let transport = Arc::new(
            Transport::open(
                "127.0.0.1:9".parse().unwrap(),
                "127.0.0.1:0".parse().unwrap(),
            )
            .await
            .unwrap(),
        );
        let poll = Duration::from_millis(50);
        let mut listener = Listener::spawn(
            Arc::clone(&transport),
            Arc::new(DeviceRegistry::new()),
            poll,
        );

        transport.close().await;
        let start = Instant::now();
        while listener.is_running() && start.elapsed() < Duration::from_secs(1) {
            runtime::sleep(Duration::from_millis(10)).await;
        }
        assert!(!listener.is_running());
        listener.stop().await;
    }
}
