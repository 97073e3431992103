// MIT License - Copyright (c) 2026 rnet contributors

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use url::Url;

use crate::constants::{
    DEFAULT_ACTIVITY_TIMEOUT, DEFAULT_BAUD_RATE, DEFAULT_CACHE_LIFETIME, DEFAULT_EVENT_TIMEOUT,
    DEFAULT_RECONNECT_DELAY, DEFAULT_REQUEST_TIMEOUT, DEFAULT_RETRY_DELAY, DEFAULT_SCAN_CONTROLLERS,
    DEFAULT_TCP_PORT, DEFAULT_WRITE_TIMEOUT, SERIAL_SCHEME, TCP_SCHEME,
};
use crate::error::{Result, RnetError};
use crate::id::{RnetControllerId, RnetDeviceId, RnetKeypadId, RnetZoneId};
use crate::path::RnetPath;

/// Where the bus lives.
///
/// * `rnet.tcp://host[:port]`: a TCP serial bridge (default port 9999)
/// * `rnet.serial://<device>[?baud=N]`: a local RS-485 adapter, e.g.
///   `rnet.serial:///dev/ttyUSB0?baud=19200` or `rnet.serial://COM3`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RnetUri {
    Tcp { host: String, port: u16 },
    Serial { device: String, baud_rate: u32 },
}

impl RnetUri {
    pub fn tcp(host: impl Into<String>, port: u16) -> Self {
        Self::Tcp {
            host: host.into(),
            port,
        }
    }

    pub fn serial(device: impl Into<String>, baud_rate: u32) -> Self {
        Self::Serial {
            device: device.into(),
            baud_rate,
        }
    }
}

impl Default for RnetUri {
    fn default() -> Self {
        Self::tcp("127.0.0.1", DEFAULT_TCP_PORT)
    }
}

impl FromStr for RnetUri {
    type Err = RnetError;

    fn from_str(s: &str) -> Result<Self> {
        let invalid = |reason: &str| RnetError::InvalidUri {
            uri: s.to_string(),
            reason: reason.to_string(),
        };
        let url = Url::parse(s.trim()).map_err(|e| invalid(&e.to_string()))?;

        match url.scheme() {
            TCP_SCHEME => {
                let host = url
                    .host_str()
                    .filter(|h| !h.is_empty())
                    .ok_or_else(|| invalid("missing host"))?;
                Ok(Self::tcp(host, url.port().unwrap_or(DEFAULT_TCP_PORT)))
            }
            SERIAL_SCHEME => {
                let device = match url.host_str().filter(|h| !h.is_empty()) {
                    // rnet.serial://COM3
                    Some(host) if url.path().is_empty() || url.path() == "/" => host.to_string(),
                    // rnet.serial:///dev/ttyUSB0
                    None if url.path().len() > 1 => url.path().to_string(),
                    _ => return Err(invalid("missing serial device")),
                };
                let baud_rate = match url.query_pairs().find(|(k, _)| k == "baud") {
                    Some((_, v)) => v
                        .parse::<u32>()
                        .map_err(|_| invalid(&format!("invalid baud rate {v:?}")))?,
                    None => DEFAULT_BAUD_RATE,
                };
                Ok(Self::serial(device, baud_rate))
            }
            other => Err(invalid(&format!(
                "unsupported scheme {other:?}, expected {TCP_SCHEME} or {SERIAL_SCHEME}"
            ))),
        }
    }
}

impl fmt::Display for RnetUri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Tcp { host, port } => write!(f, "{TCP_SCHEME}://{host}:{port}"),
            Self::Serial { device, baud_rate } => {
                write!(f, "{SERIAL_SCHEME}://{device}?baud={baud_rate}")
            }
        }
    }
}

impl Serialize for RnetUri {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for RnetUri {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Retry and timeout settings copied into every remote device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceTiming {
    /// Delay between retransmissions of an unanswered message
    pub retry_delay: Duration,
    /// How long a read waits for its data before giving up
    pub request_timeout: Duration,
    /// How long each write packet waits for its handshake
    pub write_timeout: Duration,
    /// How long a high-priority event waits for its handshake
    pub event_timeout: Duration,
    /// Age after which a cached value is requested again
    pub cache_lifetime: Duration,
    /// Whether the device acknowledges data and expects acknowledgements
    pub requires_handshake: bool,
}

impl Default for DeviceTiming {
    fn default() -> Self {
        Self {
            retry_delay: DEFAULT_RETRY_DELAY,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            write_timeout: DEFAULT_WRITE_TIMEOUT,
            event_timeout: DEFAULT_EVENT_TIMEOUT,
            cache_lifetime: DEFAULT_CACHE_LIFETIME,
            requires_handshake: true,
        }
    }
}

/// Configuration of a [`Bus`](crate::bus::Bus).
#[derive(Debug, Clone)]
pub struct BusConfig {
    /// Connection target
    pub uri: RnetUri,
    /// Identity of this process on the bus
    pub local_device_id: RnetDeviceId,
    /// Timing applied to remote devices
    pub timing: DeviceTiming,
    /// Devices silent for longer than this are reported inactive
    pub activity_timeout: Duration,
    /// Delay between attempts to (re)open the connection
    pub reconnect_delay: Duration,
    /// Controllers probed by `scan()`
    pub scan_controllers: Vec<RnetControllerId>,
    /// Path requested from each controller during a scan
    pub probe_path: RnetPath,
    /// When set, inactive objects older than this are evicted periodically
    pub eviction_age: Option<Duration>,
    /// Capacity of the bus event broadcast channel
    pub event_capacity: usize,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            uri: RnetUri::default(),
            local_device_id: RnetDeviceId::new(
                RnetControllerId(0),
                RnetZoneId(0),
                RnetKeypadId::EXTERNAL,
            ),
            timing: DeviceTiming::default(),
            activity_timeout: DEFAULT_ACTIVITY_TIMEOUT,
            reconnect_delay: DEFAULT_RECONNECT_DELAY,
            scan_controllers: DEFAULT_SCAN_CONTROLLERS.map(RnetControllerId).collect(),
            probe_path: RnetPath::new(&[0]).unwrap_or_default(),
            eviction_age: None,
            event_capacity: 256,
        }
    }
}

impl BusConfig {
    /// Create a new config builder starting from defaults.
    pub fn builder() -> BusConfigBuilder {
        BusConfigBuilder::default()
    }
}

/// Builder for BusConfig.
#[derive(Debug, Clone, Default)]
pub struct BusConfigBuilder {
    config: BusConfig,
}

impl BusConfigBuilder {
    pub fn uri(mut self, uri: RnetUri) -> Self {
        self.config.uri = uri;
        self
    }

    pub fn local_device_id(mut self, id: RnetDeviceId) -> Self {
        self.config.local_device_id = id;
        self
    }

    pub fn timing(mut self, timing: DeviceTiming) -> Self {
        self.config.timing = timing;
        self
    }

    pub fn retry_delay(mut self, delay: Duration) -> Self {
        self.config.timing.retry_delay = delay;
        self
    }

    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.config.timing.request_timeout = timeout;
        self
    }

    pub fn write_timeout(mut self, timeout: Duration) -> Self {
        self.config.timing.write_timeout = timeout;
        self
    }

    pub fn event_timeout(mut self, timeout: Duration) -> Self {
        self.config.timing.event_timeout = timeout;
        self
    }

    pub fn cache_lifetime(mut self, lifetime: Duration) -> Self {
        self.config.timing.cache_lifetime = lifetime;
        self
    }

    pub fn requires_handshake(mut self, required: bool) -> Self {
        self.config.timing.requires_handshake = required;
        self
    }

    pub fn activity_timeout(mut self, timeout: Duration) -> Self {
        self.config.activity_timeout = timeout;
        self
    }

    pub fn reconnect_delay(mut self, delay: Duration) -> Self {
        self.config.reconnect_delay = delay;
        self
    }

    pub fn scan_controllers(mut self, controllers: impl IntoIterator<Item = RnetControllerId>) -> Self {
        self.config.scan_controllers = controllers.into_iter().collect();
        self
    }

    pub fn probe_path(mut self, path: RnetPath) -> Self {
        self.config.probe_path = path;
        self
    }

    pub fn eviction_age(mut self, age: Option<Duration>) -> Self {
        self.config.eviction_age = age;
        self
    }

    pub fn event_capacity(mut self, capacity: usize) -> Self {
        self.config.event_capacity = capacity.max(1);
        self
    }

    pub fn build(self) -> BusConfig {
        self.config
    }
}
