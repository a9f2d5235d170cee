//! Network reachability signal.
//!
//! Consumed as a one-shot status query plus a change stream. The engine
//! only asks "are we connected right now"; [`SyncEngine::follow_reachability`]
//! uses the stream to arm and disarm the periodic timer.
//!
//! [`SyncEngine::follow_reachability`]: crate::SyncEngine::follow_reachability

use std::time::Duration;

use async_trait::async_trait;
use tokio::net::TcpStream;
use tokio::sync::watch;
use tracing::debug;

/// Connectivity snapshot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct NetworkStatus {
    pub connected: bool,
}

impl NetworkStatus {
    pub fn online() -> Self {
        Self { connected: true }
    }

    pub fn offline() -> Self {
        Self { connected: false }
    }
}

/// Source of connectivity information
#[async_trait]
pub trait Reachability: Send + Sync {
    /// Current status.
    async fn fetch_status(&self) -> NetworkStatus;

    /// Receiver notified on every status transition.
    fn subscribe(&self) -> watch::Receiver<NetworkStatus>;
}

/// Reachability driven by the embedder (or a test).
pub struct ManualReachability {
    tx: watch::Sender<NetworkStatus>,
}

impl ManualReachability {
    pub fn new(initial: NetworkStatus) -> Self {
        let (tx, _) = watch::channel(initial);
        Self { tx }
    }

    pub fn set_connected(&self, connected: bool) {
        self.tx.send_if_modified(|status| {
            let changed = status.connected != connected;
            status.connected = connected;
            changed
        });
    }
}

impl Default for ManualReachability {
    fn default() -> Self {
        Self::new(NetworkStatus::online())
    }
}

#[async_trait]
impl Reachability for ManualReachability {
    async fn fetch_status(&self) -> NetworkStatus {
        *self.tx.borrow()
    }

    fn subscribe(&self) -> watch::Receiver<NetworkStatus> {
        self.tx.subscribe()
    }
}

/// Reachability probed by opening a TCP connection to the backend host.
pub struct TcpProbe {
    addr: String,
    timeout: Duration,
    tx: watch::Sender<NetworkStatus>,
}

impl TcpProbe {
    /// `addr` is a `host:port` pair.
    pub fn new(addr: impl Into<String>, timeout: Duration) -> Self {
        let (tx, _) = watch::channel(NetworkStatus::offline());
        Self {
            addr: addr.into(),
            timeout,
            tx,
        }
    }

    /// Probe the host of an `http(s)://host[:port]/...` URL.
    pub fn for_url(url: &str, timeout: Duration) -> Option<Self> {
        host_port(url).map(|addr| Self::new(addr, timeout))
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }
}

#[async_trait]
impl Reachability for TcpProbe {
    async fn fetch_status(&self) -> NetworkStatus {
        let connected = matches!(
            tokio::time::timeout(self.timeout, TcpStream::connect(&self.addr)).await,
            Ok(Ok(_))
        );
        debug!(addr = %self.addr, connected, "Reachability probe");
        let status = NetworkStatus { connected };
        self.tx.send_if_modified(|current| {
            let changed = *current != status;
            *current = status;
            changed
        });
        status
    }

    fn subscribe(&self) -> watch::Receiver<NetworkStatus> {
        self.tx.subscribe()
    }
}

/// Extract `host:port` from a URL, defaulting the port from the scheme.
fn host_port(url: &str) -> Option<String> {
    let (scheme, rest) = url.split_once("://")?;
    let default_port = match scheme {
        "https" => 443,
        "http" => 80,
        _ => return None,
    };
    let authority = rest.split(['/', '?', '#']).next()?;
    let authority = authority.rsplit('@').next()?;
    if authority.is_empty() {
        return None;
    }
    let has_port = if authority.starts_with('[') {
        authority.contains("]:")
    } else {
        authority
            .rsplit_once(':')
            .is_some_and(|(_, port)| port.parse::<u16>().is_ok())
    };
    if has_port {
        Some(authority.to_string())
    } else {
        Some(format!("{}:{}", authority, default_port))
    }
}
