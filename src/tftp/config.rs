use std::fmt;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

use clap::ValueEnum;

/// Default port for both bindings.
pub const DEFAULT_PORT: u16 = 6969;
/// How long a datagram peer waits for the packet it expects.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(5000);
/// How often an unacknowledged DATA block is sent again.
pub const DEFAULT_RETRANSMIT: Duration = Duration::from_millis(1000);
/// Floor for both timers.
pub const MIN_INTERVAL: Duration = Duration::from_millis(10);

/// Transport a session runs over.
#[derive(Debug, Eq, PartialEq, Copy, Clone, ValueEnum)]
pub enum Binding {
    /// Reliable byte stream (TCP). Opens with a handshake, no ACKs.
    #[value(name = "tcp")]
    Stream,
    /// Datagrams (UDP). Every block is acknowledged.
    #[value(name = "udp")]
    Datagram,
}

impl fmt::Display for Binding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Binding::Stream => write!(f, "tcp"),
            Binding::Datagram => write!(f, "udp"),
        }
    }
}

/// Timers of the datagram binding. Ignored by the stream binding.
#[derive(Debug, Eq, PartialEq, Copy, Clone)]
pub struct Timing {
    /// Time allowed for the expected packet to arrive before giving up.
    pub timeout: Duration,
    /// Interval between retransmissions of an unacknowledged block.
    pub retransmit: Duration,
}

impl Timing {
    /// Both timers are raised to at least [`MIN_INTERVAL`]; the retransmit
    /// interval never exceeds the timeout.
    pub fn new(timeout: Duration, retransmit: Duration) -> Self {
        let timeout = timeout.max(MIN_INTERVAL);
        Timing {
            timeout,
            retransmit: retransmit.max(MIN_INTERVAL).min(timeout),
        }
    }

    /// How long a receiver stays around after its final ACK to answer a
    /// retransmitted last block.
    pub fn linger(&self) -> Duration {
        self.retransmit * 2
    }
}

impl Default for Timing {
    fn default() -> Self {
        Timing::new(DEFAULT_TIMEOUT, DEFAULT_RETRANSMIT)
    }
}

/// Client configuration
///
/// # Example
///
/// ```rust
/// use twinftp::tftp::config::{Binding, ClientConfig};
///
/// let config = ClientConfig::new("192.168.1.100:6969".parse().unwrap(), Binding::Datagram);
/// ```
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Server address (the well known port)
    pub server: SocketAddr,
    pub binding: Binding,
    /// Local directory files are uploaded from and downloaded to
    pub directory: PathBuf,
    pub timing: Timing,
}

impl ClientConfig {
    pub fn new(server: SocketAddr, binding: Binding) -> Self {
        ClientConfig {
            server,
            binding,
            directory: PathBuf::from("."),
            timing: Timing::default(),
        }
    }

    pub fn with_directory(mut self, directory: impl Into<PathBuf>) -> Self {
        self.directory = directory.into();
        self
    }

    pub fn with_timing(mut self, timing: Timing) -> Self {
        self.timing = timing;
        self
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        ClientConfig::new(
            SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), DEFAULT_PORT),
            Binding::Stream,
        )
    }
}

/// Server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to listen on
    pub address: SocketAddr,
    pub binding: Binding,
    /// Storage root; every served and received file lives directly in it
    pub directory: PathBuf,
    pub timing: Timing,
}

impl ServerConfig {
    pub fn new(address: SocketAddr, binding: Binding, directory: impl Into<PathBuf>) -> Self {
        ServerConfig {
            address,
            binding,
            directory: directory.into(),
            timing: Timing::default(),
        }
    }

    pub fn with_timing(mut self, timing: Timing) -> Self {
        self.timing = timing;
        self
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig::new(
            SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), DEFAULT_PORT),
            Binding::Stream,
            std::env::current_dir().unwrap_or_else(|_| std::env::temp_dir()),
        )
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use clap::ValueEnum;

    use crate::tftp::config::{Binding, ClientConfig, Timing, DEFAULT_PORT, MIN_INTERVAL};

    #[test]
    fn retransmit_never_exceeds_timeout() {
        let timing = Timing::new(Duration::from_millis(100), Duration::from_secs(1));
        assert_eq!(timing.retransmit, Duration::from_millis(100));
        assert_eq!(timing.linger(), Duration::from_millis(200));
    }

    #[test]
    fn zero_intervals_are_raised_to_the_floor() {
        let timing = Timing::new(Duration::from_millis(200), Duration::ZERO);
        assert_eq!(timing.retransmit, MIN_INTERVAL);
        assert_eq!(timing.timeout, Duration::from_millis(200));

        let timing = Timing::new(Duration::ZERO, Duration::ZERO);
        assert_eq!(timing.timeout, MIN_INTERVAL);
        assert_eq!(timing.retransmit, MIN_INTERVAL);
    }

    #[test]
    fn client_defaults() {
        let config = ClientConfig::default().with_directory("/tmp");
        assert_eq!(config.server.port(), DEFAULT_PORT);
        assert_eq!(config.binding, Binding::Stream);
        assert_eq!(config.timing, Timing::default());
        assert_eq!(config.directory.to_str(), Some("/tmp"));
    }

    #[test]
    fn binding_names() {
        assert_eq!(Binding::Stream.to_string(), "tcp");
        assert_eq!(
            Binding::from_str("udp", true).unwrap(),
            Binding::Datagram
        );
    }
}
