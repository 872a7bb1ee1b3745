use std::time::Duration;

use chrono::{DateTime, Utc};

use super::keys::{DnssecKey, KeyKind, KeyState};

/// Hold-down before a revoked KSK may be discarded.
///
/// The source of this schedule is `max(1h, min(15d, DNSKEY TTL / 2))`, which
/// deliberately differs from the RFC 7583 recommendation.
pub(crate) fn revoked_hold_down(dnskey_ttl: Duration) -> Duration {
    const HOUR: Duration = Duration::from_secs(3600);
    const FIFTEEN_DAYS: Duration = Duration::from_secs(15 * 86400);
    (dnskey_ttl / 2).clamp(HOUR, FIFTEEN_DAYS)
}

/// Wall-clock inputs for one evaluation of the key lifecycle.
///
/// Everything here is captured before evaluation so the transition rules
/// themselves are pure functions of (keys, context).
#[derive(Debug, Clone)]
pub struct TickContext {
    pub now: DateTime<Utc>,
    /// TTL of the apex DNSKEY record set.
    pub dnskey_ttl: Duration,
    /// Largest TTL of any record in the zone.
    pub max_record_ttl: Duration,
    /// Largest TTL of any RRSIG in the zone.
    pub max_rrsig_ttl: Duration,
    /// SOA REFRESH + SOA RETRY: worst-case secondary convergence.
    pub propagation_delay: Duration,
    /// Parent-side convergence, from the parent SOA when available.
    pub parent_propagation_delay: Duration,
}

/// The per-tick work lists, partitioned while the key-store lock is held and
/// applied after it is released.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct MaintenancePlan {
    /// Published keys whose propagation interval has elapsed.
    pub to_ready: Vec<u16>,
    /// Ready KSKs waiting on parent DS evidence before activation.
    pub awaiting_ds: Vec<u16>,
    /// Ready ZSKs, activated on the next tick unconditionally.
    pub to_activate: Vec<u16>,
    /// Active keys whose rollover successor has arrived.
    pub to_retire: Vec<u16>,
    /// Retired KSKs, revoked immediately.
    pub to_revoke: Vec<u16>,
    /// Keys past their hold-down, to be removed along with their RRSIGs.
    pub to_remove: Vec<u16>,
    /// Active ZSKs past their rollover age.
    pub to_rollover: Vec<u16>,
}

impl MaintenancePlan {
    pub fn is_empty(&self) -> bool {
        self.to_ready.is_empty()
            && self.awaiting_ds.is_empty()
            && self.to_activate.is_empty()
            && self.to_retire.is_empty()
            && self.to_revoke.is_empty()
            && self.to_remove.is_empty()
            && self.to_rollover.is_empty()
    }
}

/// Evaluate every key against the lifecycle rules and partition the work.
pub fn plan(keys: &[DnssecKey], ctx: &TickContext) -> MaintenancePlan {
    let mut plan = MaintenancePlan::default();

    for key in keys {
        let elapsed = ctx.now - key.state_changed_on();
        let elapsed = elapsed.to_std().unwrap_or(Duration::ZERO);

        match (key.state(), key.kind()) {
            (KeyState::Published, KeyKind::Ksk) => {
                // A fresh zone has no trusted KSK yet, so the whole zone
                // contents must have cycled out of caches first.
                let has_working_ksk = keys.iter().any(|other| {
                    other.tag() != key.tag()
                        && other.kind() == KeyKind::Ksk
                        && matches!(other.state(), KeyState::Ready | KeyState::Active)
                });
                let hold = if has_working_ksk {
                    ctx.dnskey_ttl + ctx.propagation_delay
                } else {
                    ctx.max_record_ttl + ctx.propagation_delay
                };
                if elapsed > hold {
                    plan.to_ready.push(key.tag());
                }
            }
            (KeyState::Published, KeyKind::Zsk) => {
                if elapsed > ctx.dnskey_ttl + ctx.propagation_delay {
                    plan.to_ready.push(key.tag());
                }
            }
            (KeyState::Ready, KeyKind::Ksk) => plan.awaiting_ds.push(key.tag()),
            (KeyState::Ready, KeyKind::Zsk) => plan.to_activate.push(key.tag()),
            (KeyState::Active, kind) => {
                if key.is_retiring() {
                    let successor_arrived = keys.iter().any(|other| {
                        other.tag() != key.tag()
                            && other.kind() == kind
                            && other.algorithm() == key.algorithm()
                            && !other.is_retiring()
                            && match kind {
                                KeyKind::Ksk => {
                                    matches!(other.state(), KeyState::Ready | KeyState::Active)
                                }
                                KeyKind::Zsk => other.state() == KeyState::Active,
                            }
                    });
                    if successor_arrived && can_retire(keys, key, false) {
                        plan.to_retire.push(key.tag());
                    }
                } else if kind == KeyKind::Zsk
                    && key.rollover_days() > 0
                    && elapsed > Duration::from_secs(u64::from(key.rollover_days()) * 86400)
                {
                    plan.to_rollover.push(key.tag());
                }
            }
            (KeyState::Retired, KeyKind::Ksk) => plan.to_revoke.push(key.tag()),
            (KeyState::Retired, KeyKind::Zsk) => {
                if elapsed > ctx.max_rrsig_ttl + ctx.propagation_delay {
                    plan.to_remove.push(key.tag());
                }
            }
            (KeyState::Revoked, _) => {
                if elapsed > revoked_hold_down(ctx.dnskey_ttl) {
                    plan.to_remove.push(key.tag());
                }
            }
            (KeyState::Generated, _) | (KeyState::Dead, _) => (),
        }
    }

    plan
}

/// Whether retiring `candidate` leaves the zone with working coverage.
///
/// Automatic retirement requires a same-algorithm stand-in. Manual
/// retirement may instead rely on a complete KSK+ZSK pair of another
/// algorithm.
pub fn can_retire(keys: &[DnssecKey], candidate: &DnssecKey, manual: bool) -> bool {
    let others = || keys.iter().filter(|other| other.tag() != candidate.tag());

    let active_zsk = |algorithm| {
        others().any(|key| {
            key.kind() == KeyKind::Zsk
                && key.algorithm() == algorithm
                && key.state() == KeyState::Active
        })
    };
    let working_ksk = |algorithm| {
        others().any(|key| {
            key.kind() == KeyKind::Ksk
                && key.algorithm() == algorithm
                && matches!(key.state(), KeyState::Ready | KeyState::Active)
        })
    };

    match candidate.kind() {
        KeyKind::Zsk => {
            if active_zsk(candidate.algorithm()) {
                return true;
            }
            // manual retirement may rest on a complete pair of another algorithm
            manual
                && others().any(|key| {
                    key.kind() == KeyKind::Zsk
                        && key.algorithm() != candidate.algorithm()
                        && key.state() == KeyState::Active
                        && working_ksk(key.algorithm())
                })
        }
        KeyKind::Ksk => {
            if working_ksk(candidate.algorithm()) {
                return true;
            }
            manual
                && others().any(|key| {
                    key.kind() == KeyKind::Ksk
                        && matches!(key.state(), KeyState::Ready | KeyState::Active)
                        && active_zsk(key.algorithm())
                })
        }
    }
}
