//! Controller configuration.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_with::{DurationMilliSeconds, serde_as};

use crate::errors::Error;

type Result<T> = std::result::Result<T, Error>;

/// Ports, addresses and timings used by a [`Controller`](crate::Controller).
///
/// Every field has a default, so a JSON file only needs the fields it
/// changes. Durations are written in milliseconds.
///
/// # Examples
///
/// ```
/// use udp_led_rs::ControllerConfig;
///
/// let config: ControllerConfig = serde_json::from_str(r#"{"broadcast_port": 7000}"#).unwrap();
/// assert_eq!(config.broadcast_port, 7000);
/// assert_eq!(config.listen_port, 9998);
/// ```
#[serde_as]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ControllerConfig {
    /// Destination address for broadcast commands
    pub broadcast_addr: IpAddr,
    /// Port devices listen on for commands
    pub broadcast_port: u16,
    /// Local interface the reply socket binds to
    pub listen_addr: IpAddr,
    /// Port devices send replies to
    pub listen_port: u16,
    /// Longest the listener blocks before re-checking for shutdown
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub poll_interval: Duration,
    /// Margin added to the collection window when reading discovery results
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub discovery_grace: Duration,
    /// Collection window used when none is given
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub discovery_timeout: Duration,
}

impl ControllerConfig {
    pub const DEFAULT_BROADCAST_PORT: u16 = 9999;
    pub const DEFAULT_LISTEN_PORT: u16 = 9998;

    pub fn new() -> Self {
        Self::default()
    }

    /// Load a configuration from a JSON file; missing fields keep their defaults.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|err| Error::ConfigRead {
            path: path.to_path_buf(),
            err,
        })?;
        serde_json::from_str(&text).map_err(Error::JsonLoad)
    }

    pub fn with_broadcast_addr(mut self, addr: IpAddr) -> Self {
        self.broadcast_addr = addr;
        self
    }

    pub fn with_broadcast_port(mut self, port: u16) -> Self {
        self.broadcast_port = port;
        self
    }

    pub fn with_listen_addr(mut self, addr: IpAddr) -> Self {
        self.listen_addr = addr;
        self
    }

    pub fn with_listen_port(mut self, port: u16) -> Self {
        self.listen_port = port;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_discovery_grace(mut self, grace: Duration) -> Self {
        self.discovery_grace = grace;
        self
    }

    pub fn with_discovery_timeout(mut self, timeout: Duration) -> Self {
        self.discovery_timeout = timeout;
        self
    }

    /// Where broadcast commands are sent.
    pub fn broadcast_target(&self) -> SocketAddr {
        SocketAddr::new(self.broadcast_addr, self.broadcast_port)
    }

    /// Where the reply socket binds.
    pub fn listen_bind_addr(&self) -> SocketAddr {
        SocketAddr::new(self.listen_addr, self.listen_port)
    }

    /// Address of a single device, which listens on the broadcast port.
    pub fn device_addr(&self, ip: IpAddr) -> SocketAddr {
        SocketAddr::new(ip, self.broadcast_port)
    }

    /// Parse a target given as `ip` or `ip:port`.
    ///
    /// # Examples
    ///
    /// ```
    /// use udp_led_rs::ControllerConfig;
    ///
    /// let config = ControllerConfig::new();
    /// assert_eq!(config.parse_target("10.0.0.5").unwrap().to_string(), "10.0.0.5:9999");
    /// assert_eq!(config.parse_target("10.0.0.5:4210").unwrap().to_string(), "10.0.0.5:4210");
    /// assert!(config.parse_target("lamp").is_err());
    /// ```
    pub fn parse_target(&self, target: &str) -> Result<SocketAddr> {
        let target = target.trim();
        if let Ok(addr) = target.parse::<SocketAddr>() {
            return Ok(addr);
        }
        target
            .parse::<IpAddr>()
            .map(|ip| self.device_addr(ip))
            .map_err(|_| Error::InvalidTarget(target.to_string()))
    }
}

impl Default for ControllerConfig {
    fn default() -> Self {
        ControllerConfig {
            broadcast_addr: IpAddr::V4(Ipv4Addr::BROADCAST),
            broadcast_port: Self::DEFAULT_BROADCAST_PORT,
            listen_addr: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            listen_port: Self::DEFAULT_LISTEN_PORT,
            poll_interval: Duration::from_millis(500),
            discovery_grace: Duration::from_secs(1),
            discovery_timeout: Duration::from_secs(3),
        }
    }
}
