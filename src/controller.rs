//! The controller ties transport, registry, listener, discovery and dispatch together.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use log::info;
use serde::{Deserialize, Serialize};

use crate::codec::Reply;
use crate::command::Command;
use crate::config::ControllerConfig;
use crate::discovery::{Discovery, DiscoveryPhase};
use crate::dispatcher::Dispatcher;
use crate::errors::Error;
use crate::listener::Listener;
use crate::registry::{DeviceRegistry, DiscoveredDevice};
use crate::transport::Transport;
use crate::types::{Brightness, Color, Effect, PowerMode, Speed};

type Result<T> = std::result::Result<T, Error>;

/// Diagnostics for a running controller.
#[serde_with::skip_serializing_none]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Diagnostics {
    pub running: bool,
    pub listen_addr: SocketAddr,
    pub broadcast_target: SocketAddr,
    pub device_count: usize,
    pub commands_sent: u64,
    pub commands_failed: u64,
    pub datagrams_received: u64,
    pub replies_received: u64,
    pub decode_failures: u64,
    #[serde(default)]
    pub callback_panics: u64,
    pub time_since_last_reply: Option<f64>,
    pub last_error: Option<String>,
}

/// Discovers and commands LED devices on the local network.
///
/// Starting a controller opens the transport and spawns the listener; both
/// live until [`Controller::shutdown`] (or drop). All command methods are
/// fire-and-forget: success means the datagram was sent.
///
/// # Example
///
/// ```no_run
/// use std::time::Duration;
/// use udp_led_rs::{Brightness, Color, Controller, ControllerConfig};
///
/// # async fn run() -> Result<(), udp_led_rs::Error> {
/// let mut controller = Controller::start(ControllerConfig::default()).await?;
///
/// for device in controller.discover(Duration::from_secs(3)).await {
///     println!("found {device}");
/// }
/// controller.set_color(&Color::rgb(255, 0, 0), Brightness::new(), None).await?;
///
/// controller.shutdown().await;
/// # Ok(())
/// # }
/// ```
pub struct Controller {
    config: ControllerConfig,
    transport: Arc<Transport>,
    registry: Arc<DeviceRegistry>,
    listener: Listener,
    discovery: Discovery,
    dispatcher: Dispatcher,
}

impl Controller {
    /// Open the sockets and start the listener.
    ///
    /// Fails with [`Error::Bind`] when either port is unavailable.
    pub async fn start(config: ControllerConfig) -> Result<Self> {
        let transport = Arc::new(
            Transport::open(config.broadcast_target(), config.listen_bind_addr()).await?,
        );
        let registry = Arc::new(DeviceRegistry::new());
        let listener = Listener::spawn(
            Arc::clone(&transport),
            Arc::clone(&registry),
            config.poll_interval,
        );
        let discovery = Discovery::new(config.discovery_grace);
        let dispatcher = Dispatcher::new(Arc::clone(&transport));

        info!(
            "Controller started (broadcast: {}, listen: {})",
            transport.broadcast_target(),
            transport.listen_addr()
        );
        Ok(Controller {
            config,
            transport,
            registry,
            listener,
            discovery,
            dispatcher,
        })
    }

    /// Stop the listener and release the sockets. Safe to call more than once.
    pub async fn shutdown(&mut self) {
        if self.transport.is_closed() {
            return;
        }
        self.listener.signal_stop();
        self.transport.close().await;
        self.listener.stop().await;
        info!("Controller stopped");
    }

    pub fn is_running(&self) -> bool {
        !self.transport.is_closed() && self.listener.is_running()
    }

    pub fn config(&self) -> &ControllerConfig {
        &self.config
    }

    /// Local address replies are received on.
    pub fn listen_addr(&self) -> SocketAddr {
        self.transport.listen_addr()
    }

    pub fn registry(&self) -> &DeviceRegistry {
        &self.registry
    }

    pub fn discovery_phase(&self) -> DiscoveryPhase {
        self.discovery.phase()
    }

    /// Run one discovery round with a collection window of `timeout`.
    ///
    /// Takes the full window even when nothing answers. Rounds must not
    /// overlap: each clears the registry, so a concurrent round clobbers
    /// the other's results.
    pub async fn discover(&self, timeout: Duration) -> Vec<DiscoveredDevice> {
        self.discovery
            .discover(&self.transport, &self.registry, timeout)
            .await
    }

    /// Devices heard from within `ttl`, without broadcasting anything.
    pub fn devices(&self, ttl: Duration) -> Vec<DiscoveredDevice> {
        self.registry.snapshot(Instant::now(), ttl)
    }

    /// Send a command to `target`, or broadcast it when `target` is `None`.
    pub async fn send(&self, command: &Command, target: Option<SocketAddr>) -> Result<()> {
        self.dispatcher.send(command, target).await
    }

    pub async fn set_color(
        &self,
        color: &Color,
        brightness: Brightness,
        target: Option<SocketAddr>,
    ) -> Result<()> {
        self.send(&Command::set_color(color, brightness), target)
            .await
    }

    pub async fn set_power(&self, power: &PowerMode, target: Option<SocketAddr>) -> Result<()> {
        self.send(&Command::set_power(power), target).await
    }

    pub async fn set_effect(
        &self,
        effect: Effect,
        speed: Speed,
        target: Option<SocketAddr>,
    ) -> Result<()> {
        self.send(&Command::set_effect(effect, speed), target).await
    }

    /// Ask for status. Answers arrive through the listener, see [`Controller::on_reply`].
    pub async fn get_status(&self, target: Option<SocketAddr>) -> Result<()> {
        self.send(&Command::GetStatus, target).await
    }

    /// Register a callback for every reply the listener decodes.
    pub fn on_reply<F: Fn(&str, &Reply) + Send + Sync + 'static>(&self, callback: F) {
        self.listener.set_callback(callback);
    }

    pub fn diagnostics(&self) -> Diagnostics {
        let stats = self.listener.stats();
        Diagnostics {
            running: self.is_running(),
            listen_addr: self.transport.listen_addr(),
            broadcast_target: self.transport.broadcast_target(),
            device_count: self.registry.len(),
            commands_sent: self.dispatcher.sent(),
            commands_failed: self.dispatcher.failed(),
            datagrams_received: stats.datagrams(),
            replies_received: stats.replies(),
            decode_failures: stats.decode_failures(),
            callback_panics: stats.callback_panics(),
            time_since_last_reply: stats.time_since_last_reply().map(|d| d.as_secs_f64()),
            last_error: stats.last_error(),
        }
    }
}

impl Drop for Controller {
    fn drop(&mut self) {
        self.listener.signal_stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use serde_json::{Value, json};

    use crate::codec;
    use crate::errors::ErrorKind;
    use crate::runtime::{self, UdpSocket};

    /// A fake device socket that answers discovery requests.
    async fn fake_device() -> (Arc<UdpSocket>, SocketAddr) {
        let socket = UdpSocket::bind("127.0.0.1:0".parse().unwrap()).await.unwrap();
        let addr = socket.local_addr().unwrap();
        (Arc::new(socket), addr)
    }

    fn config_for(device: SocketAddr) -> ControllerConfig {
        ControllerConfig::new()
            .with_broadcast_addr(device.ip())
            .with_broadcast_port(device.port())
            .with_listen_addr("127.0.0.1".parse().unwrap())
            .with_listen_port(0)
            .with_poll_interval(Duration::from_millis(50))
    }

    async fn reply(from: &UdpSocket, to: SocketAddr, body: Value) {
        from.send_to(&serde_json::to_vec(&body).unwrap(), to)
            .await
            .unwrap();
    }

    /// Wait for one command on `socket` and return the decoded envelope.
    async fn expect_command(socket: &UdpSocket) -> codec::Envelope {
        let mut buffer = [0u8; 1024];
        let (size, _) = runtime::timeout(Duration::from_secs(2), socket.recv_from(&mut buffer))
            .await
            .unwrap()
            .unwrap();
        codec::decode_command(&buffer[..size]).unwrap()
    }

    #[tokio::test]
    async fn test_discover_two_devices() {
        let (first, first_addr) = fake_device().await;
        let (second, _) = fake_device().await;
        let mut controller = Controller::start(config_for(first_addr)).await.unwrap();
        let listen = controller.listen_addr();

        // The broadcast reaches `first`; it answers, and `second` answers too.
        let responder = tokio::spawn({
            let first = Arc::clone(&first);
            let second = Arc::clone(&second);
            async move {
                let envelope = expect_command(&first).await;
                assert_eq!(envelope.command, Command::Discover);
                reply(&first, listen, json!({"device_id": "esp32_a", "status": "ready"})).await;
                reply(&second, listen, json!({"device_id": "esp32_b"})).await;
            }
        });

        let devices = controller.discover(Duration::from_millis(400)).await;
        responder.await.unwrap();

        let ids: Vec<&str> = devices.iter().map(|d| d.device_id.as_str()).collect();
        assert_eq!(ids, vec!["esp32_a", "esp32_b"]);
        assert_eq!(devices[0].address, first_addr);
        controller.shutdown().await;
    }

    #[tokio::test]
    async fn test_device_replying_from_two_addresses_appears_once() {
        let (first, first_addr) = fake_device().await;
        let (moved, moved_addr) = fake_device().await;
        let mut controller = Controller::start(config_for(first_addr)).await.unwrap();
        let listen = controller.listen_addr();

        let responder = tokio::spawn({
            let first = Arc::clone(&first);
            let moved = Arc::clone(&moved);
            async move {
                expect_command(&first).await;
                reply(&first, listen, json!({"device_id": "esp32_a"})).await;
                runtime::sleep(Duration::from_millis(50)).await;
                reply(&moved, listen, json!({"device_id": "esp32_a"})).await;
            }
        });

        let devices = controller.discover(Duration::from_millis(400)).await;
        responder.await.unwrap();

        assert_eq!(
            devices,
            vec![DiscoveredDevice {
                device_id: "esp32_a".into(),
                address: moved_addr,
            }]
        );
        controller.shutdown().await;
    }

    #[tokio::test]
    async fn test_discover_with_no_devices() {
        let (_silent, silent_addr) = fake_device().await;
        let mut controller = Controller::start(config_for(silent_addr)).await.unwrap();

        let start = Instant::now();
        let devices = controller.discover(Duration::from_millis(250)).await;
        assert!(devices.is_empty());
        assert!(start.elapsed() >= Duration::from_millis(250));
        assert!(start.elapsed() < Duration::from_secs(2));
        controller.shutdown().await;
    }

    #[tokio::test]
    async fn test_commands_broadcast_and_unicast() {
        let (all, all_addr) = fake_device().await;
        let (one, one_addr) = fake_device().await;
        let mut controller = Controller::start(config_for(all_addr)).await.unwrap();

        controller
            .set_effect(Effect::Rainbow, Speed::create(70).unwrap(), None)
            .await
            .unwrap();
        assert_eq!(
            expect_command(&all).await.command,
            Command::SetEffect {
                effect: Effect::Rainbow,
                speed: Speed::create(70).unwrap(),
            }
        );

        controller
            .set_power(&PowerMode::Off, Some(one_addr))
            .await
            .unwrap();
        assert_eq!(
            expect_command(&one).await.command,
            Command::SetPower { on: false }
        );

        controller.get_status(Some(one_addr)).await.unwrap();
        assert_eq!(expect_command(&one).await.command, Command::GetStatus);

        let diagnostics = controller.diagnostics();
        assert_eq!(diagnostics.commands_sent, 3);
        assert_eq!(diagnostics.commands_failed, 0);
        controller.shutdown().await;
    }

    #[tokio::test]
    async fn test_replies_reach_callback_and_registry() {
        let (device, device_addr) = fake_device().await;
        let controller = Controller::start(config_for(device_addr)).await.unwrap();
        let seen: Arc<Mutex<Vec<(String, Value)>>> = Arc::new(Mutex::new(Vec::new()));
        {
            let seen = Arc::clone(&seen);
            controller.on_reply(move |id, reply| {
                seen.lock()
                    .unwrap()
                    .push((id.to_string(), Value::Object(reply.payload().clone())));
            });
        }

        reply(
            &device,
            controller.listen_addr(),
            json!({"device_id": "strip", "power": true, "brightness": 40}),
        )
        .await;
        device
            .send_to(b"garbage", controller.listen_addr())
            .await
            .unwrap();
        reply(&device, controller.listen_addr(), json!({"status": "ok"})).await;

        let start = Instant::now();
        while controller.diagnostics().datagrams_received < 3
            && start.elapsed() < Duration::from_secs(2)
        {
            runtime::sleep(Duration::from_millis(10)).await;
        }

        let seen = seen.lock().unwrap().clone();
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[0].0, "strip");
        assert_eq!(seen[0].1["brightness"], json!(40));
        assert_eq!(seen[1].0, "unknown_127.0.0.1");

        let devices = controller.devices(Duration::from_secs(5));
        assert_eq!(devices.len(), 2);
        let diagnostics = controller.diagnostics();
        assert_eq!(diagnostics.decode_failures, 1);
        assert_eq!(diagnostics.replies_received, 2);
        assert!(diagnostics.time_since_last_reply.is_some());
    }

    #[tokio::test]
    async fn test_start_fails_when_listen_port_taken() {
        let taken = std::net::UdpSocket::bind("127.0.0.1:0").unwrap();
        let port = taken.local_addr().unwrap().port();
        let config = config_for("127.0.0.1:9".parse().unwrap()).with_listen_port(port);

        let err = Controller::start(config).await.err().unwrap();
        assert!(err.is_fatal());
    }

    #[tokio::test]
    async fn test_listener_survives_panicking_callback() {
        let (device, device_addr) = fake_device().await;
        let mut controller = Controller::start(config_for(device_addr)).await.unwrap();
        controller.on_reply(|id, _| {
            if id == "bad" {
                panic!("cannot print reply");
            }
        });

        reply(&device, controller.listen_addr(), json!({"device_id": "bad"})).await;
        reply(&device, controller.listen_addr(), json!({"device_id": "good"})).await;

        let start = Instant::now();
        while controller.registry().get("good").is_none()
            && start.elapsed() < Duration::from_secs(2)
        {
            runtime::sleep(Duration::from_millis(10)).await;
        }

        assert!(controller.is_running());
        assert!(controller.registry().get("good").is_some());
        let diagnostics = controller.diagnostics();
        assert_eq!(diagnostics.callback_panics, 1);
        assert_eq!(
            diagnostics.last_error.as_deref(),
            Some("reply callback panicked: cannot print reply")
        );

        let start = Instant::now();
        controller.shutdown().await;
        assert!(start.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test]
    async fn test_shutdown_is_prompt_and_idempotent() {
        let (_device, device_addr) = fake_device().await;
        let mut controller = Controller::start(config_for(device_addr)).await.unwrap();
        assert!(controller.is_running());

        let start = Instant::now();
        controller.shutdown().await;
        assert!(start.elapsed() < Duration::from_secs(1));
        assert!(!controller.is_running());

        controller.shutdown().await;
        assert_eq!(
            controller.get_status(None).await.unwrap_err().kind(),
            ErrorKind::Send
        );
    }
}
