use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Lower-level network association underneath the messaging session
#[async_trait::async_trait]
pub trait NetworkAssociation: Send {
    /// Current association, possibly cached
    async fn is_associated(&mut self) -> bool;

    /// Try to (re)establish association; returns the resulting state
    async fn reassociate(&mut self) -> bool;

    fn describe(&self) -> String;
}

/// One reachability check, without caching
#[async_trait::async_trait]
pub trait ReachabilityProbe: Send + Sync {
    async fn reachable(&self) -> bool;

    fn target(&self) -> String;
}

/// Reachable when the target resolves and the host has a route to it.
///
/// The route is checked by connecting a UDP socket, which
/// sends nothing but fails with `ENETUNREACH` when no interface can reach
/// the address.
pub struct RouteProbe {
    target: String,
    timeout: Duration,
}

impl RouteProbe {
    pub fn new(target: impl Into<String>, timeout: Duration) -> Self {
        Self {
            target: target.into(),
            timeout,
        }
    }

    async fn resolve(&self) -> Vec<SocketAddr> {
        match tokio::time::timeout(self.timeout, tokio::net::lookup_host(self.target.as_str())).await {
            Ok(Ok(addrs)) => addrs.collect(),
            Ok(Err(e)) => {
                debug!("Cannot resolve {}: {}", self.target, e);
                Vec::new()
            }
            Err(_) => {
                debug!("Resolving {} timed out after {:?}", self.target, self.timeout);
                Vec::new()
            }
        }
    }

    async fn has_route(addr: SocketAddr) -> std::io::Result<()> {
        let local: SocketAddr = if addr.is_ipv4() {
            ([0, 0, 0, 0], 0).into()
        } else {
            ([0u16; 8], 0).into()
        };
        let socket = UdpSocket::bind(local).await?;
        socket.connect(addr).await
    }
}

#[async_trait::async_trait]
impl ReachabilityProbe for RouteProbe {
    async fn reachable(&self) -> bool {
        for addr in self.resolve().await {
            match Self::has_route(addr).await {
                Ok(()) => return true,
                Err(e) => debug!("No route to {}: {}", addr, e),
            }
        }
        false
    }

    fn target(&self) -> String {
        self.target.clone()
    }
}

/// Cached association on top of a reachability probe.
///
/// A positive result is re-checked every `recheck`; while disassociated,
/// `reassociate` probes at most once per `retry`.
pub struct HostNetwork<P = RouteProbe> {
    probe: P,
    recheck: Duration,
    retry: Duration,
    associated: bool,
    last_probe: Option<Instant>,
}

impl HostNetwork<RouteProbe> {
    pub fn new(target: impl Into<String>, timeout: Duration) -> Self {
        Self::with_probe(RouteProbe::new(target, timeout))
    }
}

impl<P: ReachabilityProbe> HostNetwork<P> {
    pub const RECHECK: Duration = Duration::from_secs(10);
    pub const RETRY: Duration = Duration::from_secs(1);

    pub fn with_probe(probe: P) -> Self {
        Self {
            probe,
            recheck: Self::RECHECK,
            retry: Self::RETRY,
            associated: false,
            last_probe: None,
        }
    }

    async fn probe(&mut self) -> bool {
        self.last_probe = Some(Instant::now());
        let reachable = self.probe.reachable().await;

        if reachable != self.associated {
            if reachable {
                info!("Network associated ({} reachable)", self.probe.target());
            } else {
                warn!("Network lost ({} unreachable)", self.probe.target());
            }
        }
        self.associated = reachable;
        reachable
    }

    fn probed_within(&self, window: Duration) -> bool {
        self.last_probe
            .map(|at| at.elapsed() < window)
            .unwrap_or(false)
    }
}

#[async_trait::async_trait]
impl<P: ReachabilityProbe> NetworkAssociation for HostNetwork<P> {
    async fn is_associated(&mut self) -> bool {
        if self.associated && self.probed_within(self.recheck) {
            return true;
        }
        if !self.associated && self.last_probe.is_some() {
            return false;
        }
        self.probe().await
    }

    async fn reassociate(&mut self) -> bool {
        if self.probed_within(self.retry) {
            return self.associated;
        }
        debug!("Retrying network association via {}", self.probe.target());
        self.probe().await
    }

    fn describe(&self) -> String {
        format!("probe {}", self.probe.target())
    }
}

/// Association that never drops, for the in-memory bus
pub struct AlwaysAssociated;

#[async_trait::async_trait]
impl NetworkAssociation for AlwaysAssociated {
    async fn is_associated(&mut self) -> bool {
        true
    }

    async fn reassociate(&mut self) -> bool {
        true
    }

    fn describe(&self) -> String {
        "always associated".to_string()
    }
}
