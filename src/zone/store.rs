use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, RwLock};

use hickory_proto::rr::{LowerName, RData, RecordType, RrKey};

use crate::error::ZoneError;
use crate::rr::{Mismatch, Record, RecordSet, RrsetDelta, SerialNumber, TimeToLive};

/// In-memory record store for a single zone.
///
/// Entries are keyed by (owner, type) in canonical DNS order, which the
/// denial-chain code relies on for successor and predecessor queries. Each
/// entry is an `Arc<RecordSet>` swapped wholesale on mutation, so readers
/// always observe either the previous or the next state of an RRset together
/// with its RRSIGs, never a partial one.
#[derive(Debug)]
pub struct RecordStore {
    origin: LowerName,
    entries: RwLock<BTreeMap<RrKey, Arc<RecordSet>>>,
}

impl RecordStore {
    pub fn new(origin: LowerName) -> Self {
        Self {
            origin,
            entries: RwLock::new(BTreeMap::new()),
        }
    }

    pub fn origin(&self) -> &LowerName {
        &self.origin
    }

    fn key(name: &LowerName, rtype: RecordType) -> RrKey {
        RrKey::new(name.clone(), rtype)
    }

    /// Fetch the record set at (owner, type).
    pub fn get(&self, name: &LowerName, rtype: RecordType) -> Option<Arc<RecordSet>> {
        self.entries
            .read()
            .expect("record store poisoned")
            .get(&Self::key(name, rtype))
            .cloned()
    }

    /// All record keys, in canonical order.
    pub fn keys(&self) -> Vec<RrKey> {
        self.entries
            .read()
            .expect("record store poisoned")
            .keys()
            .cloned()
            .collect()
    }

    /// Snapshot of every record set, in canonical order.
    pub fn rrsets(&self) -> Vec<Arc<RecordSet>> {
        self.entries
            .read()
            .expect("record store poisoned")
            .values()
            .cloned()
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().expect("record store poisoned").is_empty()
    }

    /// Insert a record set wholesale, replacing any previous entry.
    pub fn replace(&self, rrset: RecordSet) -> Option<Arc<RecordSet>> {
        let key = rrset.rrkey();
        self.entries
            .write()
            .expect("record store poisoned")
            .insert(key, Arc::new(rrset))
    }

    /// Compare-and-swap an entry.
    ///
    /// Publication succeeds only if the current entry is still the one the
    /// caller computed its replacement from; a lost race surfaces as
    /// [`ZoneError::TransientConflict`] so the caller can retry.
    pub fn try_replace(
        &self,
        expected: Option<&Arc<RecordSet>>,
        rrset: RecordSet,
    ) -> Result<(), ZoneError> {
        let key = rrset.rrkey();
        let mut entries = self.entries.write().expect("record store poisoned");
        let current = entries.get(&key);
        let unchanged = match (current, expected) {
            (Some(current), Some(expected)) => Arc::ptr_eq(current, expected),
            (None, None) => true,
            _ => false,
        };
        if !unchanged {
            return Err(ZoneError::TransientConflict);
        }
        entries.insert(key, Arc::new(rrset));
        Ok(())
    }

    /// Remove the entry at (owner, type).
    pub fn remove(&self, name: &LowerName, rtype: RecordType) -> Option<Arc<RecordSet>> {
        self.entries
            .write()
            .expect("record store poisoned")
            .remove(&Self::key(name, rtype))
    }

    /// Replace the whole record set at (owner, type) with the given records.
    ///
    /// Returns the displaced and introduced records. Setting a record set to
    /// exactly its current contents is a no-op with an empty delta.
    pub fn set_rrset(
        &self,
        rrset: RecordSet,
    ) -> Result<RrsetDelta, Mismatch> {
        let key = rrset.rrkey();
        let mut entries = self.entries.write().expect("record store poisoned");

        let mut delta = RrsetDelta::default();
        if let Some(previous) = entries.get(&key) {
            let unchanged = previous.len() == rrset.len()
                && previous.ttl() == rrset.ttl()
                && rrset.records().all(|record| {
                    previous.records().any(|existing| existing == record)
                });
            if unchanged {
                return Ok(delta);
            }
            delta.deleted.extend(previous.records().cloned());
        }
        delta.added.extend(rrset.records().cloned());
        entries.insert(key, Arc::new(rrset));
        Ok(delta)
    }

    /// Merge one record into the entry at its (owner, type).
    pub fn add_record(&self, record: Record, serial: SerialNumber) -> Result<RrsetDelta, Mismatch> {
        let key = record.rrkey();
        let mut entries = self.entries.write().expect("record store poisoned");

        let mut rrset = match entries.get(&key) {
            Some(existing) => (**existing).clone(),
            None => RecordSet::new(record.name().clone(), record.record_type()),
        };
        let delta = rrset.merge(record, serial)?;
        if !delta.is_empty() {
            entries.insert(key, Arc::new(rrset));
        }
        Ok(delta)
    }

    /// Delete the whole record set at (owner, type).
    pub fn delete_rrset(&self, name: &LowerName, rtype: RecordType) -> Option<RrsetDelta> {
        let removed = self.remove(name, rtype)?;
        Some(RrsetDelta {
            added: Vec::new(),
            deleted: removed.records().cloned().collect(),
        })
    }

    /// Delete the single record with this rdata from (owner, type).
    ///
    /// Removes the whole entry when the last record goes away.
    pub fn delete_record(
        &self,
        name: &LowerName,
        rtype: RecordType,
        rdata: &RData,
        serial: SerialNumber,
    ) -> Option<Record> {
        let key = Self::key(name, rtype);
        let mut entries = self.entries.write().expect("record store poisoned");
        let mut rrset = (**entries.get(&key)?).clone();
        let removed = rrset.remove(rdata, serial)?;
        if rrset.is_empty() {
            entries.remove(&key);
        } else {
            entries.insert(key, Arc::new(rrset));
        }
        Some(removed)
    }

    /// Distinct owner names, in canonical order.
    pub fn owners(&self) -> Vec<LowerName> {
        let entries = self.entries.read().expect("record store poisoned");
        let mut owners: Vec<LowerName> = Vec::new();
        for key in entries.keys() {
            if owners.last() != Some(&key.name) {
                owners.push(key.name.clone());
            }
        }
        owners
    }

    /// Whether any record set exists at this owner.
    pub fn owner_exists(&self, name: &LowerName) -> bool {
        let start = Self::key(name, RecordType::Unknown(u16::MIN));
        let end = Self::key(name, RecordType::Unknown(u16::MAX));
        self.entries
            .read()
            .expect("record store poisoned")
            .range(start..=end)
            .next()
            .is_some()
    }

    /// The record types present at this owner.
    pub fn types_at(&self, name: &LowerName) -> BTreeSet<RecordType> {
        let start = Self::key(name, RecordType::Unknown(u16::MIN));
        let end = Self::key(name, RecordType::Unknown(u16::MAX));
        self.entries
            .read()
            .expect("record store poisoned")
            .range(start..=end)
            .map(|(key, _)| key.record_type)
            .collect()
    }

    /// Record sets at this owner, in type order.
    pub fn rrsets_at(&self, name: &LowerName) -> Vec<Arc<RecordSet>> {
        let start = Self::key(name, RecordType::Unknown(u16::MIN));
        let end = Self::key(name, RecordType::Unknown(u16::MAX));
        self.entries
            .read()
            .expect("record store poisoned")
            .range(start..=end)
            .map(|(_, rrset)| rrset.clone())
            .collect()
    }

    /// The canonically-next owner after `name`, wrapping to the first.
    pub fn next_owner(&self, name: &LowerName) -> Option<LowerName> {
        let owners = self.owners();
        if owners.is_empty() {
            return None;
        }
        owners
            .iter()
            .find(|owner| *owner > name)
            .or_else(|| owners.first())
            .cloned()
    }

    /// The canonically-previous owner before `name`, wrapping to the last.
    pub fn previous_owner(&self, name: &LowerName) -> Option<LowerName> {
        let owners = self.owners();
        if owners.is_empty() {
            return None;
        }
        owners
            .iter()
            .rev()
            .find(|owner| *owner < name)
            .or_else(|| owners.last())
            .cloned()
    }

    /// The largest TTL among plain records in the store.
    pub fn max_record_ttl(&self) -> TimeToLive {
        self.entries
            .read()
            .expect("record store poisoned")
            .values()
            .map(|rrset| rrset.ttl())
            .max()
            .unwrap_or(TimeToLive::ZERO)
    }

    /// The largest TTL among RRSIG records in the store.
    pub fn max_rrsig_ttl(&self) -> TimeToLive {
        self.entries
            .read()
            .expect("record store poisoned")
            .values()
            .flat_map(|rrset| rrset.rrsigs().iter().map(|sig| sig.ttl()))
            .max()
            .unwrap_or(TimeToLive::ZERO)
    }
}
