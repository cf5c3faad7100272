//! Network status monitoring.
//!
//! The platform connectivity provider feeds raw [`LinkSnapshot`]s into the
//! [`NetworkMonitor`]; the monitor derives a [`NetworkStatus`] on every
//! callback and raises an edge-triggered reconnect event on the
//! offline-to-online transition only, so being online never produces a
//! stream of redundant sync triggers.

use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, watch};

/// Cellular network generation as reported by the platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CellularGeneration {
    /// 2G.
    TwoG,
    /// 3G.
    ThreeG,
    /// 4G / LTE.
    FourG,
    /// 5G.
    FiveG,
}

/// Physical transport reported by the platform connectivity provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkTransport {
    /// Wifi connection.
    Wifi,
    /// Cellular connection with an optional generation.
    Cellular(Option<CellularGeneration>),
    /// No transport.
    None,
}

/// Raw connectivity snapshot from the platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinkSnapshot {
    /// Whether a link is up.
    pub is_connected: bool,
    /// Whether the internet is reachable over that link.
    pub is_internet_reachable: bool,
    /// The physical transport.
    pub transport: LinkTransport,
}

impl LinkSnapshot {
    /// A snapshot with no connectivity.
    #[must_use]
    pub fn offline() -> Self {
        Self {
            is_connected: false,
            is_internet_reachable: false,
            transport: LinkTransport::None,
        }
    }

    /// A reachable wifi snapshot.
    #[must_use]
    pub fn wifi() -> Self {
        Self {
            is_connected: true,
            is_internet_reachable: true,
            transport: LinkTransport::Wifi,
        }
    }

    /// A reachable cellular snapshot.
    #[must_use]
    pub fn cellular(generation: Option<CellularGeneration>) -> Self {
        Self {
            is_connected: true,
            is_internet_reachable: true,
            transport: LinkTransport::Cellular(generation),
        }
    }
}

/// Connection type exposed to the rest of the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionType {
    /// Wifi connection.
    Wifi,
    /// Cellular connection.
    Cellular,
    /// No connection.
    None,
}

/// Best-effort connection quality.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionQuality {
    /// Wifi or 5G.
    Excellent,
    /// 4G.
    Good,
    /// Older or unidentified cellular.
    Poor,
    /// Disconnected or unclassifiable.
    Unknown,
}

/// Derived connectivity state.
///
/// Recomputed on every platform callback; never persisted as ground truth.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkStatus {
    /// Whether a link is up.
    pub is_connected: bool,
    /// The link's transport type.
    pub connection_type: ConnectionType,
    /// Whether the internet is reachable.
    pub is_internet_reachable: bool,
    /// Best-effort quality classification.
    pub connection_quality: ConnectionQuality,
}

impl NetworkStatus {
    /// The fully-disconnected status.
    #[must_use]
    pub fn offline() -> Self {
        Self {
            is_connected: false,
            connection_type: ConnectionType::None,
            is_internet_reachable: false,
            connection_quality: ConnectionQuality::Unknown,
        }
    }

    /// Derives a status from a raw platform snapshot.
    #[must_use]
    pub fn from_link(link: &LinkSnapshot) -> Self {
        if !link.is_connected {
            return Self::offline();
        }

        let (connection_type, connection_quality) = match link.transport {
            LinkTransport::Wifi => (ConnectionType::Wifi, ConnectionQuality::Excellent),
            LinkTransport::Cellular(generation) => {
                let quality = match generation {
                    Some(CellularGeneration::FiveG) => ConnectionQuality::Excellent,
                    Some(CellularGeneration::FourG) => ConnectionQuality::Good,
                    _ => ConnectionQuality::Poor,
                };
                (ConnectionType::Cellular, quality)
            }
            LinkTransport::None => (ConnectionType::None, ConnectionQuality::Unknown),
        };

        let connection_quality = if link.is_internet_reachable {
            connection_quality
        } else {
            ConnectionQuality::Unknown
        };

        Self {
            is_connected: link.is_connected,
            connection_type,
            is_internet_reachable: link.is_internet_reachable,
            connection_quality,
        }
    }

    /// Returns true if the network can carry traffic at all.
    #[must_use]
    pub fn online(&self) -> bool {
        self.is_connected && self.is_internet_reachable
    }

    /// Returns true if syncing is allowed under the given policy.
    #[must_use]
    pub fn usable(&self, wifi_only: bool) -> bool {
        self.online() && (!wifi_only || self.connection_type == ConnectionType::Wifi)
    }
}

/// Tracks connectivity and raises edge-triggered reconnect events.
///
/// The monitor starts offline; the first online report therefore fires a
/// reconnect event, which doubles as the startup sync trigger.
#[derive(Debug)]
pub struct NetworkMonitor {
    status: watch::Sender<NetworkStatus>,
    reconnect: broadcast::Sender<NetworkStatus>,
}

impl NetworkMonitor {
    /// Creates a monitor in the offline state.
    #[must_use]
    pub fn new() -> Self {
        let (status, _) = watch::channel(NetworkStatus::offline());
        let (reconnect, _) = broadcast::channel(8);
        Self { status, reconnect }
    }

    /// Returns the current derived status.
    #[must_use]
    pub fn current(&self) -> NetworkStatus {
        *self.status.borrow()
    }

    /// Feeds a platform snapshot in and returns the derived status.
    ///
    /// Emits a reconnect event only on the offline-to-online transition.
    pub fn report(&self, link: LinkSnapshot) -> NetworkStatus {
        let next = NetworkStatus::from_link(&link);
        let was_online = self.current().online();

        self.status.send_replace(next);

        if !was_online && next.online() {
            tracing::debug!(connection = ?next.connection_type, "network reconnected");
            // No subscribers is fine; the event is advisory
            let _ = self.reconnect.send(next);
        }

        next
    }

    /// Returns a receiver that observes every derived status.
    #[must_use]
    pub fn watch(&self) -> watch::Receiver<NetworkStatus> {
        self.status.subscribe()
    }

    /// Returns a receiver for reconnect events.
    #[must_use]
    pub fn subscribe_reconnect(&self) -> broadcast::Receiver<NetworkStatus> {
        self.reconnect.subscribe()
    }
}

impl Default for NetworkMonitor {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::broadcast::error::TryRecvError;

    #[test]
    fn quality_heuristic() {
        assert_eq!(
            NetworkStatus::from_link(&LinkSnapshot::wifi()).connection_quality,
            ConnectionQuality::Excellent
        );
        assert_eq!(
            NetworkStatus::from_link(&LinkSnapshot::cellular(Some(CellularGeneration::FiveG)))
                .connection_quality,
            ConnectionQuality::Excellent
        );
        assert_eq!(
            NetworkStatus::from_link(&LinkSnapshot::cellular(Some(CellularGeneration::FourG)))
                .connection_quality,
            ConnectionQuality::Good
        );
        assert_eq!(
            NetworkStatus::from_link(&LinkSnapshot::cellular(Some(CellularGeneration::ThreeG)))
                .connection_quality,
            ConnectionQuality::Poor
        );
        assert_eq!(
            NetworkStatus::from_link(&LinkSnapshot::cellular(None)).connection_quality,
            ConnectionQuality::Poor
        );
        assert_eq!(
            NetworkStatus::from_link(&LinkSnapshot::offline()).connection_quality,
            ConnectionQuality::Unknown
        );
    }

    #[test]
    fn unreachable_internet_is_unknown_quality() {
        let link = LinkSnapshot {
            is_connected: true,
            is_internet_reachable: false,
            transport: LinkTransport::Wifi,
        };
        let status = NetworkStatus::from_link(&link);
        assert_eq!(status.connection_quality, ConnectionQuality::Unknown);
        assert!(!status.online());
    }

    #[test]
    fn wifi_only_policy() {
        let wifi = NetworkStatus::from_link(&LinkSnapshot::wifi());
        let cellular = NetworkStatus::from_link(&LinkSnapshot::cellular(None));

        assert!(wifi.usable(true));
        assert!(cellular.usable(false));
        assert!(!cellular.usable(true));
        assert!(!NetworkStatus::offline().usable(false));
    }

    #[tokio::test]
    async fn reconnect_is_edge_triggered() {
        let monitor = NetworkMonitor::new();
        let mut reconnects = monitor.subscribe_reconnect();

        monitor.report(LinkSnapshot::wifi());
        assert!(reconnects.try_recv().is_ok());

        // Staying online produces no further events
        monitor.report(LinkSnapshot::wifi());
        monitor.report(LinkSnapshot::cellular(Some(CellularGeneration::FourG)));
        assert_eq!(reconnects.try_recv().unwrap_err(), TryRecvError::Empty);

        // Going offline and back fires exactly once more
        monitor.report(LinkSnapshot::offline());
        monitor.report(LinkSnapshot::wifi());
        assert!(reconnects.try_recv().is_ok());
        assert_eq!(reconnects.try_recv().unwrap_err(), TryRecvError::Empty);
    }

    #[test]
    fn current_tracks_reports() {
        let monitor = NetworkMonitor::new();
        assert!(!monitor.current().online());

        monitor.report(LinkSnapshot::wifi());
        assert!(monitor.current().online());
        assert_eq!(monitor.current().connection_type, ConnectionType::Wifi);
    }
}
