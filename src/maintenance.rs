//! Periodic maintenance for signed primary zones.
//!
//! One tokio task per zone drives the key lifecycle and the RRSIG refresh
//! sweep. The task wakes shortly after sign/load, then settles into a slow
//! steady-state tick; every failure is logged and the timer always survives.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use hickory_proto::dnssec::rdata::{DNSSECRData, DS};
use hickory_proto::rr::{RData, RecordType};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::error::ZoneError;
use crate::external::{DirectQuery, ZoneSaver};
use crate::zone::Zone;

/// First tick after sign or load.
const INITIAL_DELAY: Duration = Duration::from_secs(30);

/// Steady-state tick interval.
const TICK_INTERVAL: Duration = Duration::from_secs(15 * 60);

/// Budget for parent-side lookups.
const PROBE_TIMEOUT: Duration = Duration::from_secs(10);

/// Background maintenance task for one zone.
///
/// Dropping the driver without calling [`shutdown`](Self::shutdown) aborts
/// the task on the next tick boundary via the closed watch channel.
pub struct MaintenanceDriver {
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl MaintenanceDriver {
    /// Spawn the maintenance task for a zone.
    pub fn spawn(
        zone: Arc<Zone>,
        query: Arc<dyn DirectQuery>,
        saver: Option<Arc<dyn ZoneSaver>>,
    ) -> Self {
        let (shutdown, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(run(zone, query, saver, shutdown_rx));
        Self { shutdown, handle }
    }

    /// Signal the task and wait for it to finish.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        if let Err(error) = self.handle.await {
            tracing::warn!(%error, "maintenance task did not shut down cleanly");
        }
    }
}

async fn run(
    zone: Arc<Zone>,
    query: Arc<dyn DirectQuery>,
    saver: Option<Arc<dyn ZoneSaver>>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut delay = INITIAL_DELAY;
    loop {
        tokio::select! {
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
            _ = tokio::time::sleep(delay) => {
                delay = TICK_INTERVAL;
                // a failed tick must never kill the timer
                if let Err(error) = tick(&zone, query.as_ref(), saver.as_deref()).await {
                    tracing::warn!(zone = %zone.name(), %error, "zone maintenance tick failed");
                }
            }
        }
    }
    zone.disable_notify();
    tracing::debug!(zone = %zone.name(), "maintenance task stopped");
}

async fn tick(
    zone: &Zone,
    query: &dyn DirectQuery,
    saver: Option<&dyn ZoneSaver>,
) -> Result<(), ZoneError> {
    if !zone.status().is_signed() {
        return Ok(());
    }
    let now = Utc::now();

    let parent_delay = parent_propagation_delay(zone, query).await;
    let ctx = zone.tick_context(now, parent_delay)?;
    let plan = zone.key_maintenance_plan(&ctx);

    // The DS probe is the only lookup; it runs with no zone lock held.
    let parent_ds = if plan.awaiting_ds.is_empty() {
        Vec::new()
    } else {
        probe_parent_ds(zone, query).await
    };

    let mut changed = zone.apply_key_maintenance(&plan, &parent_ds, now)?;

    if zone.should_refresh_signatures(now) {
        changed |= zone.refresh_signatures(now)?;
    }

    if changed && let Some(saver) = saver {
        if let Err(error) = saver.save_zone(zone.name()) {
            tracing::warn!(zone = %zone.name(), %error, "failed to save zone state");
        }
    }
    Ok(())
}

/// Look up the parent DS set for this zone's apex.
///
/// The cached entry is purged first so activation never acts on stale
/// parent state. Failures and timeouts yield an empty answer; the affected
/// KSKs simply wait for the next tick.
async fn probe_parent_ds(zone: &Zone, query: &dyn DirectQuery) -> Vec<DS> {
    query.purge(zone.name(), RecordType::DS);
    let lookup = query.query(zone.name().clone(), RecordType::DS);
    match tokio::time::timeout(PROBE_TIMEOUT, lookup).await {
        Ok(Ok(records)) => records
            .into_iter()
            .filter_map(|record| match record.data() {
                RData::DNSSEC(DNSSECRData::DS(ds)) => Some(ds.clone()),
                _ => None,
            })
            .collect(),
        Ok(Err(error)) => {
            tracing::warn!(zone = %zone.name(), %error, "parent DS lookup failed");
            Vec::new()
        }
        Err(_) => {
            tracing::warn!(zone = %zone.name(), "parent DS lookup timed out");
            Vec::new()
        }
    }
}

/// Observe the parent zone's SOA to derive the parent-side propagation
/// delay. `None` falls back to the 24 h default.
async fn parent_propagation_delay(zone: &Zone, query: &dyn DirectQuery) -> Option<Duration> {
    if zone.name().num_labels() == 0 {
        // the root has no parent to observe
        return None;
    }
    let parent = zone.name().base_name();

    let lookup = query.query(parent, RecordType::SOA);
    match tokio::time::timeout(PROBE_TIMEOUT, lookup).await {
        Ok(Ok(records)) => records.iter().find_map(|record| {
            record.data().as_soa().map(|soa| {
                Duration::from_secs((soa.refresh().max(0) as u64) + (soa.retry().max(0) as u64))
            })
        }),
        Ok(Err(error)) => {
            tracing::debug!(zone = %zone.name(), %error, "parent SOA lookup failed");
            None
        }
        Err(_) => {
            tracing::debug!(zone = %zone.name(), "parent SOA lookup timed out");
            None
        }
    }
}
