//! Interfaces the zone manager consumes from its host server.
//!
//! The core never opens sockets or files itself: parent-side probes, notify
//! fan-out and persistence are all delegated through these traits.

use async_trait::async_trait;

use hickory_proto::rr::{Name, Record, RecordType};

use crate::error::ZoneError;

/// Iterative/direct DNS lookups, used only by the maintenance driver to
/// observe the parent zone (DS records and the parent SOA).
///
/// Implementations must honour DNSSEC validation but must never cache the
/// answer under the probed name on the zone's behalf; the driver purges the
/// queried entry beforehand to avoid acting on stale parent state.
#[async_trait]
pub trait DirectQuery: Send + Sync {
    /// Resolve `name`/`rtype`, returning the answer records.
    async fn query(&self, name: Name, rtype: RecordType) -> Result<Vec<Record>, ZoneError>;

    /// Drop any cached entry for `name`/`rtype` before a probe.
    fn purge(&self, name: &Name, rtype: RecordType);
}

/// Outbound NOTIFY hooks, fired after every committed zone change.
pub trait Notifier: Send + Sync {
    fn trigger_notify(&self);

    fn disable_notify_timer(&self);
}

/// Persistence hook: asks the host to write the zone's current state.
pub trait ZoneSaver: Send + Sync {
    fn save_zone(&self, zone: &Name) -> Result<(), ZoneError>;
}
