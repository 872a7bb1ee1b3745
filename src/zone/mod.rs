//! The primary-zone facade: record mutations, signing lifecycle, key
//! management and the commit/journal discipline that keeps secondaries
//! convergent.

use std::collections::BTreeSet;
use std::net::IpAddr;
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use chrono::{DateTime, Utc};
use hickory_proto::dnssec::rdata::{DNSSECRData, DS};
use hickory_proto::dnssec::{Algorithm, DigestType};
use hickory_proto::rr::rdata::SOA;
use hickory_proto::rr::{DNSClass, LowerName, RData, RecordType, rdata};

use crate::dnssec::keys::{DnssecKey, KeyKind, KeyState, KeyStore, KeyView};
use crate::dnssec::state::{self, MaintenancePlan, TickContext};
use crate::dnssec::{DnssecStatus, Nsec3Params, denial, signer};
use crate::error::ZoneError;
use crate::external::Notifier;
use crate::rr::{
    APP, FWD, Name, Record, RecordSet, RrsetDelta, SerialNumber, TimeToLive, is_dnssec_internal,
};

pub mod journal;
pub mod store;

pub use self::journal::{ChangeKind, Commit, Journal, JournalEntry};
pub use self::store::RecordStore;

/// Zone-level policy switches, opaque to the zone manager itself; the host
/// server interprets them when deciding whether to answer transfers,
/// updates or notifies.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct ZonePolicy {
    pub allow_zone_transfer: bool,
    pub notify: bool,
    pub allow_update: bool,
}

/// Which denial-of-existence chain a newly signed zone carries.
#[derive(Debug, Clone)]
pub enum DenialConfig {
    Nsec,
    Nsec3(Nsec3Params),
}

/// Parameters for signing a zone for the first time.
#[derive(Debug, Clone)]
pub struct SigningConfig {
    pub algorithm: Algorithm,
    pub dnskey_ttl: TimeToLive,
    pub ksk_rollover_days: u16,
    pub zsk_rollover_days: u16,
    pub denial: DenialConfig,
}

impl SigningConfig {
    pub fn nsec(algorithm: Algorithm, dnskey_ttl: TimeToLive) -> Self {
        Self {
            algorithm,
            dnskey_ttl,
            ksk_rollover_days: 0,
            zsk_rollover_days: 90,
            denial: DenialConfig::Nsec,
        }
    }

    pub fn nsec3(algorithm: Algorithm, dnskey_ttl: TimeToLive, params: Nsec3Params) -> Self {
        Self {
            algorithm,
            dnskey_ttl,
            ksk_rollover_days: 0,
            zsk_rollover_days: 90,
            denial: DenialConfig::Nsec3(params),
        }
    }
}

/// An authoritative primary zone.
///
/// All mutations go through this facade, which validates them, applies them
/// to the record store, maintains signatures and the denial chain, journals
/// the commit and pokes the notifier. Reads go straight to the store.
pub struct Zone {
    name: Name,
    origin: LowerName,
    internal: bool,
    policy: Mutex<ZonePolicy>,
    store: RecordStore,
    keys: KeyStore,
    journal: Journal,
    status: RwLock<DnssecStatus>,
    /// Serialises denial-chain construction, conversions and per-owner
    /// chain updates.
    dnssec_update: Mutex<()>,
    /// Serialises commits and history cleanup.
    commit_lock: Mutex<()>,
    notifier: Mutex<Option<Arc<dyn Notifier>>>,
    last_refresh: Mutex<DateTime<Utc>>,
}

impl std::fmt::Debug for Zone {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Zone")
            .field("name", &self.name)
            .field("internal", &self.internal)
            .field("status", &self.status())
            .field("serial", &self.serial())
            .finish()
    }
}

impl Zone {
    /// Create a new primary zone holding only the given SOA record.
    pub fn new(name: Name, soa: Record<rdata::SOA>) -> Self {
        Self::construct(name, soa, false)
    }

    /// Create an internal zone: mutations apply but are never journaled and
    /// the serial never moves.
    pub fn internal(name: Name, soa: Record<rdata::SOA>) -> Self {
        Self::construct(name, soa, true)
    }

    fn construct(name: Name, soa: Record<rdata::SOA>, internal: bool) -> Self {
        let origin = LowerName::from(&name);
        let store = RecordStore::new(origin.clone());
        store.replace(RecordSet::from_record(name.clone(), soa));

        Self {
            name,
            origin,
            internal,
            policy: Mutex::new(ZonePolicy::default()),
            store,
            keys: KeyStore::new(),
            journal: Journal::new(),
            status: RwLock::new(DnssecStatus::Unsigned),
            dnssec_update: Mutex::new(()),
            commit_lock: Mutex::new(()),
            notifier: Mutex::new(None),
            last_refresh: Mutex::new(Utc::now()),
        }
    }

    /// Reassemble a zone from persisted parts.
    pub(crate) fn from_parts(
        name: Name,
        internal: bool,
        policy: ZonePolicy,
        status: DnssecStatus,
        rrsets: Vec<RecordSet>,
        keys: Vec<DnssecKey>,
        history: Vec<Commit>,
    ) -> Result<Self, ZoneError> {
        let origin = LowerName::from(&name);
        let store = RecordStore::new(origin.clone());
        for rrset in rrsets {
            store.replace(rrset);
        }
        let key_store = KeyStore::new();
        for key in keys {
            key_store.insert(key)?;
        }
        let journal = Journal::new();
        journal.restore(history);

        Ok(Self {
            name,
            origin,
            internal,
            policy: Mutex::new(policy),
            store,
            keys: key_store,
            journal,
            status: RwLock::new(status),
            dnssec_update: Mutex::new(()),
            commit_lock: Mutex::new(()),
            notifier: Mutex::new(None),
            last_refresh: Mutex::new(Utc::now()),
        })
    }

    pub fn name(&self) -> &Name {
        &self.name
    }

    pub fn origin(&self) -> &LowerName {
        &self.origin
    }

    pub fn is_internal(&self) -> bool {
        self.internal
    }

    pub fn status(&self) -> DnssecStatus {
        *self.status.read().expect("status poisoned")
    }

    fn set_status(&self, status: DnssecStatus) {
        *self.status.write().expect("status poisoned") = status;
    }

    pub fn policy(&self) -> ZonePolicy {
        self.policy.lock().expect("policy poisoned").clone()
    }

    pub fn set_policy(&self, policy: ZonePolicy) {
        *self.policy.lock().expect("policy poisoned") = policy;
    }

    pub fn set_notifier(&self, notifier: Arc<dyn Notifier>) {
        *self.notifier.lock().expect("notifier poisoned") = Some(notifier);
    }

    /// Read access to the record store for the query path.
    pub fn store(&self) -> &RecordStore {
        &self.store
    }

    pub fn journal(&self) -> &Journal {
        &self.journal
    }

    pub(crate) fn key_store(&self) -> &KeyStore {
        &self.keys
    }

    /// The zone's SOA record.
    pub fn soa(&self) -> Option<Record> {
        self.store
            .get(&self.origin, RecordType::SOA)
            .and_then(|rrset| rrset.records().next().cloned())
    }

    fn soa_data(&self) -> Result<SOA, ZoneError> {
        self.soa()
            .and_then(|record| record.rdata().as_soa().cloned())
            .ok_or_else(|| ZoneError::invalid("zone has no SOA record"))
    }

    /// The serial number of this zone, from the SOA record.
    pub fn serial(&self) -> SerialNumber {
        self.soa()
            .and_then(|record| record.rdata().as_soa().map(|soa| soa.serial()))
            .map_or(SerialNumber::ZERO, SerialNumber::from)
    }

    /// The minimum TTL for this zone, from the SOA record.
    pub fn minimum_ttl(&self) -> TimeToLive {
        self.soa()
            .and_then(|record| record.rdata().as_soa().map(|soa| soa.minimum()))
            .map_or(TimeToLive::ZERO, TimeToLive::from)
    }

    fn expire(&self) -> Duration {
        let expire = self
            .soa()
            .and_then(|record| record.rdata().as_soa().map(|soa| soa.expire()))
            .unwrap_or(0);
        Duration::from_secs(expire.max(0) as u64)
    }

    /// Journal history after the given serial, for IXFR. `None` means the
    /// requester must fall back to a full transfer.
    pub fn commits_since(&self, serial: SerialNumber) -> Option<Vec<Commit>> {
        self.journal.commits_since(serial)
    }

    fn trigger_notify(&self) {
        if let Some(notifier) = self.notifier.lock().expect("notifier poisoned").as_ref() {
            notifier.trigger_notify();
        }
    }

    /// Stop any pending notify timer; called when the zone is shut down.
    pub fn disable_notify(&self) {
        if let Some(notifier) = self.notifier.lock().expect("notifier poisoned").as_ref() {
            notifier.disable_notify_timer();
        }
    }
}

/// Mutation validation
impl Zone {
    fn check_in_zone(&self, name: &Name) -> Result<LowerName, ZoneError> {
        let lower = LowerName::from(name);
        if !self.origin.zone_of(&lower) {
            return Err(ZoneError::invalid(format!(
                "{name} is not within zone {zone}",
                zone = self.name
            )));
        }
        Ok(lower)
    }

    fn check_type_allowed(&self, rtype: RecordType, owner: &LowerName) -> Result<(), ZoneError> {
        if is_dnssec_internal(rtype) {
            return Err(ZoneError::invalid(format!(
                "{rtype} records are managed by the zone itself"
            )));
        }
        if rtype == FWD {
            return Err(ZoneError::invalid(
                "FWD records are not supported in a primary zone",
            ));
        }
        if owner == &self.origin {
            if rtype == RecordType::CNAME {
                return Err(ZoneError::InvalidApexOperation("CNAME"));
            }
            if rtype == RecordType::DS {
                return Err(ZoneError::InvalidApexOperation("DS"));
            }
        } else if rtype == RecordType::SOA {
            return Err(ZoneError::InvalidApexOperation("SOA below apex"));
        }
        Ok(())
    }

    fn check_signed_constraints<'a>(
        &self,
        rtype: RecordType,
        records: impl Iterator<Item = &'a Record>,
    ) -> Result<(), ZoneError> {
        if !self.status().is_signed() {
            return Ok(());
        }
        if rtype == RecordType::ANAME {
            return Err(ZoneError::UnsupportedInSignedZone("ANAME"));
        }
        if rtype == APP {
            return Err(ZoneError::UnsupportedInSignedZone("APP"));
        }
        for record in records {
            if record.disabled() {
                return Err(ZoneError::UnsupportedInSignedZone("disabled record"));
            }
        }
        Ok(())
    }

    fn check_soa_fields(&self, record: &Record) -> Result<SOA, ZoneError> {
        let soa = record
            .rdata()
            .as_soa()
            .ok_or_else(|| ZoneError::invalid("SOA record without SOA rdata"))?
            .clone();
        if soa.retry() > soa.refresh() || soa.refresh() > soa.expire() {
            return Err(ZoneError::OutOfRange("SOA timing fields"));
        }
        if i64::from(record.ttl()) > i64::from(soa.expire().max(0)) {
            return Err(ZoneError::OutOfRange("SOA TTL"));
        }
        Ok(soa)
    }
}

/// Facade mutations
impl Zone {
    /// Replace the whole record set at (owner, type).
    pub fn set_records(&self, rtype: RecordType, records: Vec<Record>) -> Result<(), ZoneError> {
        let first = records
            .first()
            .ok_or_else(|| ZoneError::invalid("no records supplied"))?;
        let name = first.name().clone();
        let owner = self.check_in_zone(&name)?;
        let ttl = first.ttl();
        for record in &records {
            if record.record_type() != rtype {
                return Err(ZoneError::invalid("record type mismatch"));
            }
            if record.name() != &name {
                return Err(ZoneError::invalid("records span multiple owner names"));
            }
            if record.ttl() != ttl {
                return Err(ZoneError::invalid("records in a set share one TTL"));
            }
        }
        self.check_signed_constraints(rtype, records.iter())?;

        if rtype == RecordType::SOA {
            return self.set_soa(records);
        }
        self.check_type_allowed(rtype, &owner)?;

        let mut records = records;
        for record in &mut records {
            self.attach_glue(record);
        }

        let old_sigs = self.rrsigs_at(&owner, rtype);
        let rrset = RecordSet::from_records(name, rtype, records, self.serial().next())
            .map_err(|error| ZoneError::invalid(error.to_string()))?;
        let mut delta = self
            .store
            .set_rrset(rrset)
            .map_err(|error| ZoneError::invalid(error.to_string()))?;
        if delta.is_empty() {
            return Ok(());
        }
        delta.deleted.extend(old_sigs);

        self.finish_mutation(&[(owner, rtype)], delta)
    }

    /// Replace the apex SOA; the serial field is recomputed by the commit.
    fn set_soa(&self, records: Vec<Record>) -> Result<(), ZoneError> {
        let [record] = records.as_slice() else {
            return Err(ZoneError::invalid("a zone holds exactly one SOA record"));
        };
        if LowerName::from(record.name()) != self.origin {
            return Err(ZoneError::InvalidApexOperation("SOA below apex"));
        }
        let new_soa = self.check_soa_fields(record)?;
        let old_minimum = self.minimum_ttl();

        let mut delta = RrsetDelta::default();
        delta.added.push(record.clone());

        // A shrunken MINIMUM re-TTLs the denial chain.
        if self.status().is_signed() && TimeToLive::from(new_soa.minimum()) != old_minimum {
            let _guard = self.dnssec_update.lock().expect("dnssec update poisoned");
            let ttl = TimeToLive::from(new_soa.minimum());
            let serial = self.serial().next();
            let denial_delta = match self.status() {
                DnssecStatus::SignedWithNsec => {
                    denial::build_nsec_chain(&self.store, &self.origin, ttl, serial)?
                }
                DnssecStatus::SignedWithNsec3 => {
                    let params = self.nsec3_params()?;
                    denial::reconcile_nsec3(&self.store, &self.origin, &params, ttl, serial)?
                }
                DnssecStatus::Unsigned => RrsetDelta::default(),
            };
            self.sign_denial_changes(&denial_delta, &mut delta)?;
            delta.merge(denial_delta);
        }

        self.commit(delta)?;
        self.trigger_notify();
        Ok(())
    }

    /// Merge a single record into the zone.
    pub fn add_record(&self, record: Record) -> Result<(), ZoneError> {
        let rtype = record.record_type();
        if rtype == RecordType::SOA {
            return Err(ZoneError::InvalidApexOperation(
                "SOA is replaced, not added",
            ));
        }
        if rtype == APP {
            return Err(ZoneError::invalid("APP record sets are replaced, not added"));
        }
        let owner = self.check_in_zone(record.name())?;
        self.check_type_allowed(rtype, &owner)?;
        self.check_signed_constraints(rtype, std::iter::once(&record))?;

        let mut record = record;
        self.attach_glue(&mut record);

        let old_sigs = self.rrsigs_at(&owner, rtype);
        let mut delta = self
            .store
            .add_record(record, self.serial().next())
            .map_err(|error| ZoneError::invalid(error.to_string()))?;
        if delta.is_empty() {
            return Ok(());
        }
        delta.deleted.extend(old_sigs);

        self.finish_mutation(&[(owner, rtype)], delta)
    }

    /// Delete the whole record set at (owner, type).
    pub fn delete_records(&self, name: &Name, rtype: RecordType) -> Result<bool, ZoneError> {
        let owner = self.check_in_zone(name)?;
        if rtype == RecordType::SOA {
            return Err(ZoneError::InvalidApexOperation("SOA cannot be deleted"));
        }
        if is_dnssec_internal(rtype) {
            return Err(ZoneError::invalid(format!(
                "{rtype} records are managed by the zone itself"
            )));
        }

        let old_sigs = self.rrsigs_at(&owner, rtype);
        let Some(mut delta) = self.store.delete_rrset(&owner, rtype) else {
            return Ok(false);
        };
        delta.deleted.extend(old_sigs);

        self.finish_mutation(&[(owner, rtype)], delta)?;
        Ok(true)
    }

    /// Delete one record by rdata.
    pub fn delete_record(
        &self,
        name: &Name,
        rtype: RecordType,
        rdata: &RData,
    ) -> Result<bool, ZoneError> {
        let owner = self.check_in_zone(name)?;
        if rtype == RecordType::SOA {
            return Err(ZoneError::InvalidApexOperation("SOA cannot be deleted"));
        }
        if is_dnssec_internal(rtype) {
            return Err(ZoneError::invalid(format!(
                "{rtype} records are managed by the zone itself"
            )));
        }

        let old_sigs = self.rrsigs_at(&owner, rtype);
        let Some(removed) = self
            .store
            .delete_record(&owner, rtype, rdata, self.serial().next())
        else {
            return Ok(false);
        };

        let mut delta = RrsetDelta {
            added: Vec::new(),
            deleted: vec![removed],
        };
        delta.deleted.extend(old_sigs);

        self.finish_mutation(&[(owner, rtype)], delta)?;
        Ok(true)
    }

    /// Replace one record with another of the same type.
    pub fn update_record(&self, old: Record, new: Record) -> Result<(), ZoneError> {
        if old.record_type() != new.record_type() {
            return Err(ZoneError::invalid("updated record changes its type"));
        }
        let rtype = new.record_type();
        if rtype == RecordType::SOA {
            return Err(ZoneError::InvalidApexOperation(
                "SOA is replaced, not updated",
            ));
        }
        let old_owner = self.check_in_zone(old.name())?;
        let new_owner = self.check_in_zone(new.name())?;
        self.check_type_allowed(rtype, &new_owner)?;
        self.check_signed_constraints(rtype, std::iter::once(&new))?;

        let expire = self.soa_data()?.expire().max(0);
        if i64::from(new.ttl()) > i64::from(expire) {
            return Err(ZoneError::OutOfRange("record TTL"));
        }

        if old == new && old.ttl() == new.ttl() {
            return Ok(());
        }

        let mut new = new;
        self.attach_glue(&mut new);

        let serial = self.serial().next();
        let mut delta = RrsetDelta::default();
        let mut touched: Vec<(LowerName, RecordType)> = Vec::new();

        delta.deleted.extend(self.rrsigs_at(&old_owner, rtype));
        if let Some(removed) = self.store.delete_record(&old_owner, rtype, old.rdata(), serial) {
            delta.deleted.push(removed);
        }
        touched.push((old_owner.clone(), rtype));

        let add_delta = self
            .store
            .add_record(new, serial)
            .map_err(|error| ZoneError::invalid(error.to_string()))?;
        delta.merge(add_delta);
        if new_owner != old_owner {
            touched.push((new_owner, rtype));
        }

        if delta.is_empty() {
            return Ok(());
        }
        self.finish_mutation(&touched, delta)
    }

    /// Current RRSIGs at an entry, cloned for journaling before a mutation
    /// invalidates them.
    fn rrsigs_at(&self, owner: &LowerName, rtype: RecordType) -> Vec<Record> {
        self.store
            .get(owner, rtype)
            .map(|rrset| rrset.rrsigs().to_vec())
            .unwrap_or_default()
    }

    /// Fill in glue addresses for an NS record pointing inside the zone.
    fn attach_glue(&self, record: &mut Record) {
        let RData::NS(ns) = record.rdata() else {
            return;
        };
        let target = LowerName::from(&ns.0);
        if !self.origin.zone_of(&target) {
            return;
        }
        let mut glue: Vec<IpAddr> = Vec::new();
        if let Some(rrset) = self.store.get(&target, RecordType::A) {
            glue.extend(rrset.records().filter_map(|r| {
                r.rdata().as_a().map(|a| IpAddr::V4(a.0))
            }));
        }
        if let Some(rrset) = self.store.get(&target, RecordType::AAAA) {
            glue.extend(rrset.records().filter_map(|r| {
                r.rdata().as_aaaa().map(|aaaa| IpAddr::V6(aaaa.0))
            }));
        }
        record.set_glue(glue);
    }

    /// Synthesised glue records accompanying an NS journal entry.
    fn glue_records(record: &Record) -> Vec<Record> {
        let RData::NS(ns) = record.rdata() else {
            return Vec::new();
        };
        record
            .glue()
            .iter()
            .map(|addr| {
                let rdata = match addr {
                    IpAddr::V4(v4) => RData::A(rdata::A::from(*v4)),
                    IpAddr::V6(v6) => RData::AAAA(rdata::AAAA::from(*v6)),
                };
                Record::from_rdata(ns.0.clone(), record.ttl(), rdata)
            })
            .collect()
    }

    /// Post-mutation handling shared by every facade path: refresh DNSSEC
    /// records for the touched entries, commit, notify.
    fn finish_mutation(
        &self,
        touched: &[(LowerName, RecordType)],
        mut delta: RrsetDelta,
    ) -> Result<(), ZoneError> {
        if self.status().is_signed() {
            let _guard = self.dnssec_update.lock().expect("dnssec update poisoned");
            for (owner, rtype) in touched {
                self.update_dnssec_records_for(owner, *rtype, &mut delta)?;
            }
        }
        self.commit(delta)?;
        self.trigger_notify();
        Ok(())
    }

    /// Re-sign the entry at (owner, type) and repair the denial chain around
    /// the owner. Caller holds the denial lock.
    fn update_dnssec_records_for(
        &self,
        owner: &LowerName,
        rtype: RecordType,
        delta: &mut RrsetDelta,
    ) -> Result<(), ZoneError> {
        if let Some(rrset) = self.store.get(owner, rtype)
            && signer::is_signable(&self.origin, &rrset)?
        {
            self.resign_entry(owner, rtype, delta)?;
        }

        let ttl = self.minimum_ttl();
        let serial = self.serial().next();
        let denial_delta = match self.status() {
            DnssecStatus::SignedWithNsec => {
                denial::update_nsec_for_owner(&self.store, &self.origin, owner, ttl, serial)?
            }
            DnssecStatus::SignedWithNsec3 => {
                let params = self.nsec3_params()?;
                denial::reconcile_nsec3(&self.store, &self.origin, &params, ttl, serial)?
            }
            DnssecStatus::Unsigned => RrsetDelta::default(),
        };
        self.sign_denial_changes(&denial_delta, delta)?;
        delta.merge(denial_delta);
        Ok(())
    }

    /// Sign every denial entry introduced by a chain repair.
    fn sign_denial_changes(
        &self,
        denial_delta: &RrsetDelta,
        delta: &mut RrsetDelta,
    ) -> Result<(), ZoneError> {
        let touched: BTreeSet<(LowerName, RecordType)> = denial_delta
            .added
            .iter()
            .map(|record| (LowerName::from(record.name()), record.record_type()))
            .collect();
        for (owner, rtype) in touched {
            self.resign_entry(&owner, rtype, delta)?;
        }
        Ok(())
    }

    /// Replace the signatures on one store entry, recording old and new
    /// RRSIGs in the delta.
    fn resign_entry(
        &self,
        owner: &LowerName,
        rtype: RecordType,
        delta: &mut RrsetDelta,
    ) -> Result<(), ZoneError> {
        let Some(current) = self.store.get(owner, rtype) else {
            return Ok(());
        };
        delta.deleted.extend(current.rrsigs().iter().cloned());

        let signers = self.signers_for(rtype)?;
        let (inception, expiration) = self.signing_window(self.expire());

        let mut copy = (*current).clone();
        signer::sign_rrset(&mut copy, &signers, inception, expiration, DNSClass::IN)?;
        delta.added.extend(copy.rrsigs().iter().cloned());

        self.store.try_replace(Some(&current), copy)
    }

    fn signers_for(
        &self,
        rtype: RecordType,
    ) -> Result<Vec<hickory_proto::dnssec::SigSigner>, ZoneError> {
        let keys = self.keys.snapshot();
        let eligible = signer::eligible_keys(&keys, rtype);
        if eligible.is_empty() {
            return Err(ZoneError::NoSigningKey);
        }
        let validity = signer::validity_period(self.expire());
        eligible
            .into_iter()
            .map(|key| key.signer(self.name.clone(), validity))
            .collect()
    }

    fn signing_window(&self, expire: Duration) -> (DateTime<Utc>, DateTime<Utc>) {
        let inception = Utc::now() - signer::INCEPTION_OFFSET;
        let expiration = inception + signer::validity_period(expire);
        (inception, expiration)
    }

    fn nsec3_params(&self) -> Result<Nsec3Params, ZoneError> {
        denial::current_nsec3_params(&self.store, &self.origin)
            .ok_or_else(|| ZoneError::invalid("signed zone is missing its NSEC3PARAM"))
    }
}

/// Commit and serial discipline
impl Zone {
    /// Apply the SOA serial discipline, journal the change and trim history.
    ///
    /// Internal zones skip all of this.
    fn commit(&self, delta: RrsetDelta) -> Result<Option<SerialNumber>, ZoneError> {
        if self.internal {
            return Ok(None);
        }
        let now = Utc::now();
        let _guard = self.commit_lock.lock().expect("commit lock poisoned");

        let old_rrset = self
            .store
            .get(&self.origin, RecordType::SOA)
            .ok_or_else(|| ZoneError::invalid("zone has no SOA record"))?;
        let mut old_soa = old_rrset
            .records()
            .next()
            .cloned()
            .ok_or_else(|| ZoneError::invalid("zone has no SOA record"))?;
        let old_data = old_soa
            .rdata()
            .as_soa()
            .cloned()
            .ok_or_else(|| ZoneError::invalid("apex SOA entry holds foreign rdata"))?;

        let RrsetDelta { added, deleted } = delta;

        // A supplied SOA replaces the one the commit would synthesise.
        let mut added = added;
        let supplied = added
            .iter()
            .position(|record| record.record_type() == RecordType::SOA)
            .map(|index| added.remove(index));

        let old_serial = SerialNumber::from(old_data.serial());
        let supplied_data = supplied
            .as_ref()
            .and_then(|record| record.rdata().as_soa().cloned());
        let new_serial = match &supplied_data {
            Some(soa) => old_serial.advance_to(SerialNumber::from(soa.serial())),
            None => old_serial.next(),
        };

        let base = supplied_data.as_ref().unwrap_or(&old_data);
        let new_data = SOA::new(
            base.mname().clone(),
            base.rname().clone(),
            new_serial.get(),
            base.refresh(),
            base.retry(),
            base.expire(),
            base.minimum(),
        );
        let ttl = supplied.as_ref().map_or(old_soa.ttl(), |record| record.ttl());
        let new_soa = Record::from_rdata(self.name.clone(), ttl, RData::SOA(new_data.clone()));

        let mut soa_rrset = RecordSet::from_record(self.name.clone(), new_soa.clone());
        soa_rrset.set_ttl(ttl);

        let old_soa_sigs = old_rrset.rrsigs().to_vec();
        let mut new_soa_sigs = Vec::new();
        if self.status().is_signed() {
            let signers = self.signers_for(RecordType::SOA)?;
            let expire = Duration::from_secs(new_data.expire().max(0) as u64);
            let (inception, expiration) = self.signing_window(expire);
            signer::sign_rrset(&mut soa_rrset, &signers, inception, expiration, DNSClass::IN)?;
            new_soa_sigs = soa_rrset.rrsigs().to_vec();
        }
        self.store.replace(soa_rrset);
        old_soa.mark_deleted(now);

        // Entries replay in this exact order on a secondary.
        let mut entries = Vec::new();
        entries.push(JournalEntry {
            kind: ChangeKind::Removed,
            record: old_soa,
        });
        let (deleted_sigs, deleted_plain): (Vec<_>, Vec<_>) = deleted
            .into_iter()
            .partition(|record| record.record_type() == RecordType::RRSIG);
        for mut record in deleted_plain {
            if record.disabled() {
                continue;
            }
            record.mark_deleted(now);
            let glue = Self::glue_records(&record);
            entries.push(JournalEntry {
                kind: ChangeKind::Removed,
                record,
            });
            entries.extend(glue.into_iter().map(|record| JournalEntry {
                kind: ChangeKind::Removed,
                record,
            }));
        }
        for mut record in deleted_sigs.into_iter().chain(old_soa_sigs) {
            record.mark_deleted(now);
            entries.push(JournalEntry {
                kind: ChangeKind::Removed,
                record,
            });
        }
        entries.push(JournalEntry {
            kind: ChangeKind::Added,
            record: new_soa,
        });
        let (added_sigs, added_plain): (Vec<_>, Vec<_>) = added
            .into_iter()
            .partition(|record| record.record_type() == RecordType::RRSIG);
        for record in added_plain {
            if record.disabled() {
                continue;
            }
            let glue = Self::glue_records(&record);
            entries.push(JournalEntry {
                kind: ChangeKind::Added,
                record,
            });
            entries.extend(glue.into_iter().map(|record| JournalEntry {
                kind: ChangeKind::Added,
                record,
            }));
        }
        entries.extend(added_sigs.into_iter().chain(new_soa_sigs).map(|record| {
            JournalEntry {
                kind: ChangeKind::Added,
                record,
            }
        }));

        let retention = Duration::from_secs(new_data.expire().max(0) as u64);
        self.journal.append(
            Commit {
                committed_at: now,
                old_serial,
                new_serial,
                entries,
            },
            retention,
            now,
        );

        tracing::debug!(
            zone = %self.name,
            serial = new_serial.get(),
            "committed zone change"
        );
        Ok(Some(new_serial))
    }
}

/// Signing lifecycle
impl Zone {
    /// Sign the zone for the first time: one KSK and one ZSK are generated,
    /// the denial chain is built and every eligible record set is signed,
    /// all under a single commit.
    pub fn sign(&self, config: SigningConfig) -> Result<(), ZoneError> {
        let _guard = self.dnssec_update.lock().expect("dnssec update poisoned");
        if self.status().is_signed() {
            return Err(ZoneError::AlreadySigned);
        }

        // Types the signer cannot express must be gone before signing starts.
        for rrset in self.store.rrsets() {
            if rrset.record_type() == RecordType::ANAME {
                return Err(ZoneError::UnsupportedInSignedZone("ANAME"));
            }
            if rrset.record_type() == APP {
                return Err(ZoneError::UnsupportedInSignedZone("APP"));
            }
            if rrset.records().any(|record| record.disabled()) {
                return Err(ZoneError::UnsupportedInSignedZone("disabled record"));
            }
        }

        let now = Utc::now();
        let ksk_tag =
            self.keys
                .generate(KeyKind::Ksk, config.algorithm, config.ksk_rollover_days, now)?;
        self.keys.transition(ksk_tag, KeyState::Published, now)?;
        let zsk_tag =
            self.keys
                .generate(KeyKind::Zsk, config.algorithm, config.zsk_rollover_days, now)?;
        self.keys.transition(zsk_tag, KeyState::Published, now)?;
        // The fresh zone signs with its ZSK immediately.
        self.keys.transition(zsk_tag, KeyState::Ready, now)?;

        let mut delta = RrsetDelta::default();
        let serial = self.serial().next();

        let mut dnskey_rrset = RecordSet::new(self.name.clone(), RecordType::DNSKEY);
        dnskey_rrset.set_ttl(config.dnskey_ttl);
        for key in self.keys.snapshot() {
            let record = Record::from_rdata(
                self.name.clone(),
                config.dnskey_ttl,
                RData::DNSSEC(DNSSECRData::DNSKEY(key.dnskey().clone())),
            );
            delta.added.push(record.clone());
            dnskey_rrset
                .insert(record, serial)
                .map_err(|error| ZoneError::invalid(error.to_string()))?;
        }
        self.store.replace(dnskey_rrset);

        match &config.denial {
            DenialConfig::Nsec => {
                self.set_status(DnssecStatus::SignedWithNsec);
                let chain = denial::build_nsec_chain(
                    &self.store,
                    &self.origin,
                    self.minimum_ttl(),
                    serial,
                )?;
                delta.merge(chain);
            }
            DenialConfig::Nsec3(params) => {
                self.set_status(DnssecStatus::SignedWithNsec3);
                let param_delta = denial::write_nsec3param(
                    &self.store,
                    &self.origin,
                    params,
                    self.minimum_ttl(),
                    serial,
                );
                delta.merge(param_delta);
                let chain = denial::reconcile_nsec3(
                    &self.store,
                    &self.origin,
                    params,
                    self.minimum_ttl(),
                    serial,
                )?;
                delta.merge(chain);
            }
        }

        if let Err(error) = self.sign_all_entries(&mut delta) {
            // roll the zone back to unsigned rather than serve half a chain
            denial::remove_denial_records(&self.store);
            self.store.remove(&self.origin, RecordType::DNSKEY);
            self.keys.remove(ksk_tag);
            self.keys.remove(zsk_tag);
            self.set_status(DnssecStatus::Unsigned);
            return Err(error);
        }

        self.commit(delta)?;
        self.trigger_notify();
        tracing::info!(zone = %self.name, "zone signed");
        Ok(())
    }

    /// Strip all DNSSEC records and keys from the zone.
    pub fn unsign(&self) -> Result<(), ZoneError> {
        let _guard = self.dnssec_update.lock().expect("dnssec update poisoned");
        if !self.status().is_signed() {
            return Err(ZoneError::NotSigned);
        }

        let mut delta = denial::remove_denial_records(&self.store);
        if let Some(removed) = self.store.remove(&self.origin, RecordType::DNSKEY) {
            delta.deleted.extend(removed.signed_records().cloned());
        }
        for rrset in self.store.rrsets() {
            if rrset.rrsigs().is_empty() {
                continue;
            }
            let mut copy = (*rrset).clone();
            delta.deleted.extend(copy.rrsigs().iter().cloned());
            copy.clear_rrsigs();
            self.store.try_replace(Some(&rrset), copy)?;
        }

        for key in self.keys.snapshot() {
            self.keys.remove(key.tag());
        }
        self.set_status(DnssecStatus::Unsigned);

        self.commit(delta)?;
        self.trigger_notify();
        tracing::info!(zone = %self.name, "zone unsigned");
        Ok(())
    }

    /// Switch an NSEC zone to NSEC3 with the given parameters.
    pub fn convert_to_nsec3(&self, params: Nsec3Params) -> Result<(), ZoneError> {
        let _guard = self.dnssec_update.lock().expect("dnssec update poisoned");
        match self.status() {
            DnssecStatus::Unsigned => return Err(ZoneError::NotSigned),
            DnssecStatus::SignedWithNsec3 => {
                return Err(ZoneError::invalid("zone already uses NSEC3"));
            }
            DnssecStatus::SignedWithNsec => (),
        }
        self.switch_denial(DnssecStatus::SignedWithNsec3, Some(params))
    }

    /// Switch an NSEC3 zone back to NSEC.
    pub fn convert_to_nsec(&self) -> Result<(), ZoneError> {
        let _guard = self.dnssec_update.lock().expect("dnssec update poisoned");
        match self.status() {
            DnssecStatus::Unsigned => return Err(ZoneError::NotSigned),
            DnssecStatus::SignedWithNsec => {
                return Err(ZoneError::invalid("zone already uses NSEC"));
            }
            DnssecStatus::SignedWithNsec3 => (),
        }
        self.switch_denial(DnssecStatus::SignedWithNsec, None)
    }

    /// Install new NSEC3 parameters; identical parameters are a no-op.
    pub fn update_nsec3_params(&self, params: Nsec3Params) -> Result<(), ZoneError> {
        let _guard = self.dnssec_update.lock().expect("dnssec update poisoned");
        if self.status() != DnssecStatus::SignedWithNsec3 {
            return Err(ZoneError::NotSigned);
        }
        if self.nsec3_params()? == params {
            return Ok(());
        }
        self.switch_denial(DnssecStatus::SignedWithNsec3, Some(params))
    }

    /// Tear down the current chain and build the other one. Caller holds the
    /// denial lock, so no intermediate state is observable through the facade.
    fn switch_denial(
        &self,
        status: DnssecStatus,
        params: Option<Nsec3Params>,
    ) -> Result<(), ZoneError> {
        let serial = self.serial().next();
        let ttl = self.minimum_ttl();

        let mut delta = denial::remove_denial_records(&self.store);
        self.set_status(status);
        let chain = match (&status, params) {
            (DnssecStatus::SignedWithNsec3, Some(params)) => {
                let param_delta =
                    denial::write_nsec3param(&self.store, &self.origin, &params, ttl, serial);
                delta.merge(param_delta);
                denial::reconcile_nsec3(&self.store, &self.origin, &params, ttl, serial)?
            }
            _ => denial::build_nsec_chain(&self.store, &self.origin, ttl, serial)?,
        };
        self.sign_denial_changes(&chain, &mut delta)?;
        delta.merge(chain);

        self.commit(delta)?;
        self.trigger_notify();
        Ok(())
    }

    /// Sign every signable record set except the SOA, which the commit signs
    /// after bumping the serial.
    fn sign_all_entries(&self, delta: &mut RrsetDelta) -> Result<(), ZoneError> {
        for rrset in self.store.rrsets() {
            if rrset.record_type() == RecordType::SOA {
                continue;
            }
            if !signer::is_signable(&self.origin, &rrset)? {
                continue;
            }
            self.resign_entry(
                &LowerName::from(rrset.name()),
                rrset.record_type(),
                delta,
            )?;
        }
        Ok(())
    }
}

/// Key operations
impl Zone {
    /// Generate a key without publishing it.
    pub fn generate_key(
        &self,
        kind: KeyKind,
        algorithm: Algorithm,
        rollover_days: u16,
    ) -> Result<u16, ZoneError> {
        if !self.status().is_signed() {
            return Err(ZoneError::NotSigned);
        }
        self.keys.generate(kind, algorithm, rollover_days, Utc::now())
    }

    /// Publish every generated key into the apex DNSKEY set.
    pub fn publish_generated_keys(&self) -> Result<(), ZoneError> {
        if !self.status().is_signed() {
            return Err(ZoneError::NotSigned);
        }
        let now = Utc::now();
        let generated: Vec<DnssecKey> = self
            .keys
            .snapshot()
            .into_iter()
            .filter(|key| key.state() == KeyState::Generated)
            .collect();
        if generated.is_empty() {
            return Ok(());
        }

        let mut delta = RrsetDelta::default();
        for key in &generated {
            self.publish_dnskey(key, &mut delta)?;
            self.keys.transition(key.tag(), KeyState::Published, now)?;
        }
        self.finish_dnskey_change(delta)
    }

    /// Begin rolling the given key: its successor is generated and
    /// published, and the key is flagged as retiring. The maintenance ticks
    /// then walk both keys through the usual transitions.
    pub fn rollover_key(&self, tag: u16) -> Result<u16, ZoneError> {
        if !self.status().is_signed() {
            return Err(ZoneError::NotSigned);
        }
        let key = self.keys.get(tag).ok_or(ZoneError::KeyNotFound(tag))?;
        if key.state() != KeyState::Active {
            return Err(ZoneError::invalid(format!(
                "key {tag} is {state}, only active keys roll over",
                state = key.state()
            )));
        }

        let now = Utc::now();
        let successor = self.keys.generate(
            key.kind(),
            key.algorithm(),
            key.rollover_days(),
            now,
        )?;
        self.keys.transition(successor, KeyState::Published, now)?;
        self.keys.with_key_mut(tag, |key| {
            key.set_retiring();
            Ok(())
        })?;

        let successor_key = self
            .keys
            .get(successor)
            .ok_or(ZoneError::KeyNotFound(successor))?;
        let mut delta = RrsetDelta::default();
        self.publish_dnskey(&successor_key, &mut delta)?;
        self.finish_dnskey_change(delta)?;
        tracing::info!(
            zone = %self.name,
            predecessor = tag,
            successor,
            "key rollover started"
        );
        Ok(successor)
    }

    /// Manually retire an active key.
    pub fn retire_key(&self, tag: u16) -> Result<(), ZoneError> {
        if !self.status().is_signed() {
            return Err(ZoneError::NotSigned);
        }
        let key = self.keys.get(tag).ok_or(ZoneError::KeyNotFound(tag))?;
        if key.state() != KeyState::Active {
            return Err(ZoneError::invalid(format!(
                "key {tag} is {state}, only active keys retire",
                state = key.state()
            )));
        }
        let keys = self.keys.snapshot();
        if !state::can_retire(&keys, &key, true) {
            return Err(ZoneError::NoSuccessorKey);
        }
        self.keys.transition(tag, KeyState::Retired, Utc::now())
    }

    /// Discard a key that has not yet reached service.
    pub fn delete_key(&self, tag: u16) -> Result<(), ZoneError> {
        let key = self.keys.get(tag).ok_or(ZoneError::KeyNotFound(tag))?;
        match key.state() {
            KeyState::Generated => {
                self.keys.remove(tag);
                Ok(())
            }
            KeyState::Published => {
                let mut delta = RrsetDelta::default();
                self.withdraw_dnskey(&key, &mut delta)?;
                self.keys.remove(tag);
                self.finish_dnskey_change(delta)
            }
            state => Err(ZoneError::invalid(format!(
                "key {tag} is {state} and cannot be deleted"
            ))),
        }
    }

    pub fn update_key_rollover_days(&self, tag: u16, days: u16) -> Result<(), ZoneError> {
        self.keys.with_key_mut(tag, |key| {
            key.set_rollover_days(days);
            Ok(())
        })
    }

    /// Operator view of the key store.
    pub fn list_keys(&self) -> Vec<KeyView> {
        self.keys.views()
    }

    /// DS records for the zone's working KSKs, for registrar submission.
    pub fn ds_records(&self, digest_type: DigestType) -> Result<Vec<Record>, ZoneError> {
        if !self.status().is_signed() {
            return Err(ZoneError::NotSigned);
        }
        let mut records = Vec::new();
        for key in self.keys.snapshot() {
            if key.kind() != KeyKind::Ksk
                || !matches!(
                    key.state(),
                    KeyState::Published | KeyState::Ready | KeyState::Active
                )
            {
                continue;
            }
            let digest = key.dnskey().to_digest(&self.name, digest_type)?;
            let ds = DS::new(
                key.tag(),
                key.algorithm(),
                digest_type,
                digest.as_ref().to_vec(),
            );
            records.push(Record::from_rdata(
                self.name.clone(),
                self.minimum_ttl(),
                RData::DNSSEC(DNSSECRData::DS(ds)),
            ));
        }
        Ok(records)
    }

    /// Add one key's DNSKEY to the apex set.
    fn publish_dnskey(&self, key: &DnssecKey, delta: &mut RrsetDelta) -> Result<(), ZoneError> {
        let current = self.store.get(&self.origin, RecordType::DNSKEY);
        let rdata = RData::DNSSEC(DNSSECRData::DNSKEY(key.dnskey().clone()));
        if let Some(current) = &current
            && current.records().any(|record| record.rdata() == &rdata)
        {
            return Err(ZoneError::DuplicatePublish(key.tag()));
        }

        let ttl = current
            .as_ref()
            .map_or(self.minimum_ttl(), |rrset| rrset.ttl());
        let record = Record::from_rdata(self.name.clone(), ttl, rdata);
        delta.added.push(record.clone());
        delta.deleted.extend(self.rrsigs_at(&self.origin, RecordType::DNSKEY));

        let mut rrset = current.as_deref().cloned().unwrap_or_else(|| {
            let mut fresh = RecordSet::new(self.name.clone(), RecordType::DNSKEY);
            fresh.set_ttl(ttl);
            fresh
        });
        rrset
            .insert(record, self.serial().next())
            .map_err(|error| ZoneError::invalid(error.to_string()))?;
        self.store.try_replace(current.as_ref(), rrset)
    }

    /// Remove one key's DNSKEY from the apex set.
    fn withdraw_dnskey(&self, key: &DnssecKey, delta: &mut RrsetDelta) -> Result<(), ZoneError> {
        let rdata = RData::DNSSEC(DNSSECRData::DNSKEY(key.dnskey().clone()));
        delta.deleted.extend(self.rrsigs_at(&self.origin, RecordType::DNSKEY));
        if let Some(removed) =
            self.store
                .delete_record(&self.origin, RecordType::DNSKEY, &rdata, self.serial().next())
        {
            delta.deleted.push(removed);
        }
        Ok(())
    }

    /// Re-sign the DNSKEY set, commit and notify after a key change.
    fn finish_dnskey_change(&self, mut delta: RrsetDelta) -> Result<(), ZoneError> {
        {
            let _guard = self.dnssec_update.lock().expect("dnssec update poisoned");
            self.resign_entry(&self.origin, RecordType::DNSKEY, &mut delta)?;
        }
        self.commit(delta)?;
        self.trigger_notify();
        Ok(())
    }
}

/// Maintenance entry points, called from the periodic driver and from tests
/// that drive synthetic clocks.
impl Zone {
    /// Capture the wall-clock inputs for one maintenance evaluation.
    pub fn tick_context(
        &self,
        now: DateTime<Utc>,
        parent_propagation_delay: Option<Duration>,
    ) -> Result<TickContext, ZoneError> {
        let soa = self.soa_data()?;
        let dnskey_ttl = self
            .store
            .get(&self.origin, RecordType::DNSKEY)
            .map_or(self.minimum_ttl(), |rrset| rrset.ttl());
        let propagation_delay = Duration::from_secs(
            (soa.refresh().max(0) as u64) + (soa.retry().max(0) as u64),
        );
        Ok(TickContext {
            now,
            dnskey_ttl: dnskey_ttl.into(),
            max_record_ttl: self.store.max_record_ttl().into(),
            max_rrsig_ttl: self.store.max_rrsig_ttl().into(),
            propagation_delay,
            parent_propagation_delay: parent_propagation_delay
                .unwrap_or(Duration::from_secs(86400)),
        })
    }

    /// Partition the key work lists for this tick. Holds the key-store lock
    /// only long enough to snapshot.
    pub fn key_maintenance_plan(&self, ctx: &TickContext) -> MaintenancePlan {
        state::plan(&self.keys.snapshot(), ctx)
    }

    /// Apply a maintenance plan. `parent_ds` carries the parent's DS set for
    /// KSK activation checks. Returns whether zone contents changed.
    pub fn apply_key_maintenance(
        &self,
        plan: &MaintenancePlan,
        parent_ds: &[DS],
        now: DateTime<Utc>,
    ) -> Result<bool, ZoneError> {
        if !self.status().is_signed() {
            return Ok(false);
        }
        let mut changed = false;

        for &tag in &plan.to_ready {
            self.keys.transition(tag, KeyState::Ready, now)?;
            tracing::info!(zone = %self.name, tag, "key is ready");
        }

        for &tag in &plan.awaiting_ds {
            let Some(key) = self.keys.get(tag) else { continue };
            let anchored = parent_ds.iter().any(|ds| {
                ds.key_tag() == key.tag()
                    && ds.algorithm() == key.algorithm()
                    && ds.covers(&self.name, key.dnskey()).unwrap_or(false)
            });
            if anchored {
                self.keys.transition(tag, KeyState::Active, now)?;
                tracing::info!(zone = %self.name, tag, "KSK activated, parent DS observed");
            } else {
                tracing::debug!(zone = %self.name, tag, "KSK waiting for parent DS");
            }
        }

        for &tag in &plan.to_activate {
            self.keys.transition(tag, KeyState::Active, now)?;
            tracing::info!(zone = %self.name, tag, "ZSK activated");
        }
        if !plan.to_activate.is_empty() {
            // the newly active ZSK takes over every signature
            let mut delta = RrsetDelta::default();
            {
                let _guard = self.dnssec_update.lock().expect("dnssec update poisoned");
                self.sign_all_entries(&mut delta)?;
            }
            if !delta.is_empty() {
                self.commit(delta)?;
                self.trigger_notify();
                changed = true;
            }
        }

        for &tag in &plan.to_retire {
            self.keys.transition(tag, KeyState::Retired, now)?;
            tracing::info!(zone = %self.name, tag, "key retired");
        }

        for &tag in &plan.to_revoke {
            changed |= self.revoke_key(tag, now)?;
        }

        for &tag in &plan.to_remove {
            changed |= self.remove_dead_key(tag, now)?;
        }

        for &tag in &plan.to_rollover {
            self.rollover_key(tag)?;
            changed = true;
        }

        Ok(changed)
    }

    /// Publish the revoked form of a retired KSK (RFC 5011).
    fn revoke_key(&self, tag: u16, now: DateTime<Utc>) -> Result<bool, ZoneError> {
        let key = self.keys.get(tag).ok_or(ZoneError::KeyNotFound(tag))?;
        let mut delta = RrsetDelta::default();
        self.withdraw_dnskey(&key, &mut delta)?;

        let new_tag = self.keys.revoke(tag, now)?;
        let revoked = self
            .keys
            .get(new_tag)
            .ok_or(ZoneError::KeyNotFound(new_tag))?;
        self.publish_dnskey(&revoked, &mut delta)?;
        self.finish_dnskey_change(delta)?;
        tracing::info!(zone = %self.name, tag, new_tag, "KSK revoked");
        Ok(true)
    }

    /// Remove a key whose hold-down has elapsed, together with every RRSIG
    /// it produced.
    fn remove_dead_key(&self, tag: u16, _now: DateTime<Utc>) -> Result<bool, ZoneError> {
        let key = self.keys.get(tag).ok_or(ZoneError::KeyNotFound(tag))?;
        let mut delta = RrsetDelta::default();
        self.withdraw_dnskey(&key, &mut delta)?;
        self.keys.remove(tag);

        for rrset in self.store.rrsets() {
            let stale: Vec<_> = rrset
                .rrsigs()
                .iter()
                .filter(|sig| {
                    sig.rdata()
                        .as_dnssec()
                        .and_then(|dnssec| dnssec.as_rrsig())
                        .is_some_and(|rrsig| rrsig.key_tag() == tag)
                })
                .cloned()
                .collect();
            if stale.is_empty() {
                continue;
            }
            let mut copy = (*rrset).clone();
            copy.remove_rrsigs_by_tag(tag);
            delta.deleted.extend(stale);
            self.store.try_replace(Some(&rrset), copy)?;
        }

        self.finish_dnskey_change(delta)?;
        tracing::info!(zone = %self.name, tag, "dead key removed");
        Ok(true)
    }

    /// Whether the re-sign sweep is due.
    pub fn should_refresh_signatures(&self, now: DateTime<Utc>) -> bool {
        if !self.status().is_signed() {
            return false;
        }
        let interval = signer::refresh_interval(signer::validity_period(self.expire()));
        let last = *self.last_refresh.lock().expect("refresh clock poisoned");
        now - last >= chrono::Duration::from_std(interval).unwrap_or(chrono::Duration::zero())
    }

    /// Regenerate every RRSIG whose remaining lifetime has fallen below the
    /// refresh threshold. Returns whether anything changed.
    pub fn refresh_signatures(&self, now: DateTime<Utc>) -> Result<bool, ZoneError> {
        if !self.status().is_signed() {
            return Ok(false);
        }
        *self.last_refresh.lock().expect("refresh clock poisoned") = now;

        let threshold = signer::refresh_interval(signer::validity_period(self.expire()));
        let mut delta = RrsetDelta::default();
        let mut soa_stale = false;
        {
            let _guard = self.dnssec_update.lock().expect("dnssec update poisoned");
            for rrset in self.store.rrsets() {
                let stale = rrset
                    .rrsigs()
                    .iter()
                    .any(|sig| signer::needs_refresh(sig, now, threshold));
                if !stale {
                    continue;
                }
                if rrset.record_type() == RecordType::SOA {
                    // the commit itself re-signs the SOA
                    soa_stale = true;
                    continue;
                }
                self.resign_entry(
                    &LowerName::from(rrset.name()),
                    rrset.record_type(),
                    &mut delta,
                )?;
            }
        }

        if delta.is_empty() && !soa_stale {
            return Ok(false);
        }
        self.commit(delta)?;
        self.trigger_notify();
        Ok(true)
    }
}
