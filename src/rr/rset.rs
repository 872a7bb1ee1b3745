use hickory_proto::rr::{DNSClass, RData, RecordData, RecordType, RrKey};

use super::{AsHickory, Name, SerialNumber, record::Record, ttl::TimeToLive};

/// The records displaced and introduced by a single record-set mutation.
///
/// Both halves feed directly into the zone journal.
#[derive(Debug, Clone, Default)]
pub struct RrsetDelta {
    pub added: Vec<Record>,
    pub deleted: Vec<Record>,
}

impl RrsetDelta {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.deleted.is_empty()
    }

    pub fn merge(&mut self, other: RrsetDelta) {
        self.added.extend(other.added);
        self.deleted.extend(other.deleted);
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RecordSet {
    name: Name,
    record_type: RecordType,
    dns_class: DNSClass,
    ttl: TimeToLive,
    records: Vec<Record>,
    rrsigs: Vec<Record>,
    serial: SerialNumber,
}

impl RecordSet {
    pub fn new(name: Name, record_type: RecordType) -> Self {
        Self {
            name,
            record_type,
            dns_class: DNSClass::IN,
            ttl: TimeToLive::ZERO,
            records: Vec::new(),
            rrsigs: Vec::new(),
            serial: SerialNumber::ZERO,
        }
    }

    pub fn from_record<R: RecordData>(name: Name, record: Record<R>) -> Self {
        let record = record.into_record_rdata();
        let mut rrset = Self {
            name,
            record_type: record.record_type(),
            dns_class: DNSClass::IN,
            ttl: record.ttl(),
            records: Vec::new(),
            rrsigs: Vec::new(),
            serial: SerialNumber::ZERO,
        };
        // This is a single record, so it is safe to skip the deduplication checks.
        rrset.records.push(record);
        rrset
    }

    pub fn from_records(
        name: Name,
        record_type: RecordType,
        records: Vec<Record>,
        serial: SerialNumber,
    ) -> Result<Self, Mismatch> {
        let mut rrset = Self::new(name, record_type);
        for record in records {
            rrset.insert(record, serial)?;
        }
        Ok(rrset)
    }

    /// Label of the Resource Record Set
    pub fn name(&self) -> &Name {
        &self.name
    }

    /// `RecordType` of the Resource Record Set
    pub fn record_type(&self) -> RecordType {
        self.record_type
    }

    /// `DNSClass` of the RecordSet
    pub fn dns_class(&self) -> DNSClass {
        self.dns_class
    }

    /// Sets the TTL, in seconds, to the specified value
    ///
    /// This will traverse every record and associate with it the specified ttl
    pub fn set_ttl(&mut self, ttl: TimeToLive) {
        self.ttl = ttl;
        for r in &mut self.records {
            r.set_ttl(ttl);
        }
    }

    /// Time to Live for this RecordSet
    pub fn ttl(&self) -> TimeToLive {
        self.ttl
    }

    /// Serial number of the commit which last touched this RecordSet
    pub fn serial(&self) -> SerialNumber {
        self.serial
    }
}

impl RecordSet {
    /// Record Lookup Key for this Record Set
    pub(crate) fn rrkey(&self) -> RrKey {
        RrKey::new(self.name().into(), self.record_type())
    }

    /// Returns an iterator over all records in the set, without any RRSIGs.
    pub fn records(&self) -> impl Iterator<Item = &Record> {
        self.records.iter()
    }

    pub(crate) fn records_mut(&mut self) -> impl Iterator<Item = &mut Record> {
        self.records.iter_mut()
    }

    /// Returns an IntoIterator over all records in the set, without any RRSIGs.
    pub fn into_records(self) -> impl Iterator<Item = Record> {
        self.records.into_iter()
    }

    /// Returns an iterator over all records in the set, with RRSIGs, if present.
    pub fn signed_records(&self) -> impl Iterator<Item = &Record> {
        self.records.iter().chain(self.rrsigs.iter())
    }

    /// Returns true if there are no records in this set
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Number of records in this set
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Returns a slice of all the Records signatures in the RecordSet
    pub fn rrsigs(&self) -> &[Record] {
        &self.rrsigs
    }

    /// Inserts a Signature for the Record set
    pub fn insert_rrsig(&mut self, rrsig: Record) -> Result<(), Mismatch> {
        if rrsig
            .rdata()
            .as_dnssec()
            .and_then(|dnssecdata| dnssecdata.as_rrsig())
            .map(|rrsig| rrsig.type_covered())
            != Some(self.record_type)
        {
            return Err(Mismatch("RRSIG covered type"));
        }

        self.rrsigs.push(rrsig);
        Ok(())
    }

    /// Useful for clearing all signatures when the RecordSet is updated, or keys are rotated.
    pub fn clear_rrsigs(&mut self) {
        self.rrsigs.clear()
    }

    /// Drop any RRSIG produced by the given key tag.
    pub fn remove_rrsigs_by_tag(&mut self, tag: u16) -> Vec<Record> {
        let (dropped, kept) = std::mem::take(&mut self.rrsigs).into_iter().partition(|sig| {
            sig.rdata()
                .as_dnssec()
                .and_then(|dnssec| dnssec.as_rrsig())
                .is_some_and(|rrsig| rrsig.key_tag() == tag)
        });
        self.rrsigs = kept;
        dropped
    }

    fn updated(&mut self, serial: SerialNumber) {
        self.serial = serial;
        self.rrsigs.clear(); // on updates, the rrsigs are invalid
    }

    /// Insert a record, returning `Ok(true)` if the set changed.
    pub fn insert(&mut self, record: Record, serial: SerialNumber) -> Result<bool, Mismatch> {
        Ok(!self.merge(record, serial)?.is_empty())
    }

    /// Insert a record, reporting the displaced records.
    ///
    /// A record whose rdata is already present but whose TTL differs re-TTLs
    /// the whole set; the records carrying the old TTL are reported as
    /// deleted so the journal can account for them.
    pub fn merge(&mut self, record: Record, serial: SerialNumber) -> Result<RrsetDelta, Mismatch> {
        if record.name() != self.name() {
            return Err(Mismatch("name"));
        }
        if record.record_type() != self.record_type() {
            return Err(Mismatch("type"));
        }
        if record.dns_class() != self.dns_class() {
            return Err(Mismatch("DNS class"));
        }

        let mut delta = RrsetDelta::default();

        // Singleton types replace rather than accumulate.
        let singleton = matches!(
            record.record_type(),
            RecordType::CNAME | RecordType::ANAME | RecordType::SOA
        );
        if singleton && !self.records.iter().any(|r| r.rdata() == record.rdata()) {
            delta.deleted.extend(self.records.drain(..));
        }

        let ttl = record.ttl();
        let ttl_conflict = !self.records.is_empty() && self.ttl != ttl;
        let already_present = self.records.iter().any(|r| r.rdata() == record.rdata());

        if ttl_conflict {
            // The incoming TTL wins; the displaced copies go to the journal.
            delta.deleted.extend(self.records.iter().cloned());
            self.set_ttl(ttl);
            delta.added.extend(self.records.iter().cloned());
        }

        if !already_present {
            self.ttl = ttl;
            self.records.push(record.clone());
            delta.added.push(record);
        }

        if !delta.is_empty() {
            self.updated(serial);
        }
        Ok(delta)
    }

    /// Remove the record matching this rdata, returning it if present.
    pub fn remove(&mut self, rdata: &RData, serial: SerialNumber) -> Option<Record> {
        let index = self.records.iter().position(|r| r.rdata() == rdata)?;
        let removed = self.records.remove(index);
        self.updated(serial);
        Some(removed)
    }
}

impl AsHickory for RecordSet {
    type Hickory = hickory_proto::rr::RecordSet;

    fn as_hickory(&self) -> Self::Hickory {
        let mut rset = hickory_proto::rr::RecordSet::new(
            self.name().clone(),
            self.record_type(),
            self.serial().get(),
        );
        for record in self.records() {
            rset.insert(
                record.as_hickory().into_record_of_rdata(),
                self.serial().get(),
            );
        }

        rset
    }
}

#[derive(Debug, Clone, Copy, thiserror::Error)]
#[error("Mismatched {0} between new record and record set")]
pub struct Mismatch(pub(crate) &'static str);

#[cfg(test)]
mod tests {
    use super::*;
    use hickory_proto::rr::rdata::A;

    fn name() -> Name {
        Name::from_utf8("host.example.").unwrap()
    }

    fn a(last_octet: u8, ttl: u32) -> Record {
        Record::from_rdata(
            name(),
            TimeToLive::from(ttl),
            RData::A(A::new(192, 0, 2, last_octet)),
        )
    }

    #[test]
    fn test_merge_distinct_rdata() {
        let mut rrset = RecordSet::new(name(), RecordType::A);
        let delta = rrset.merge(a(1, 300), SerialNumber::from(1)).unwrap();
        assert_eq!(delta.added.len(), 1);
        assert!(delta.deleted.is_empty());

        let delta = rrset.merge(a(2, 300), SerialNumber::from(2)).unwrap();
        assert_eq!(delta.added.len(), 1);
        assert!(delta.deleted.is_empty());
        assert_eq!(rrset.len(), 2);
    }

    #[test]
    fn test_merge_duplicate_is_noop() {
        let mut rrset = RecordSet::new(name(), RecordType::A);
        rrset.merge(a(1, 300), SerialNumber::from(1)).unwrap();
        let delta = rrset.merge(a(1, 300), SerialNumber::from(2)).unwrap();
        assert!(delta.is_empty());
        assert_eq!(rrset.serial(), SerialNumber::from(1));
    }

    #[test]
    fn test_merge_ttl_override_reports_displaced() {
        let mut rrset = RecordSet::new(name(), RecordType::A);
        rrset.merge(a(1, 300), SerialNumber::from(1)).unwrap();

        let delta = rrset.merge(a(2, 900), SerialNumber::from(2)).unwrap();
        // the pre-existing record is displaced at its old TTL and re-added at 900
        assert_eq!(delta.deleted.len(), 1);
        assert_eq!(delta.deleted[0].ttl(), TimeToLive::from(300));
        assert_eq!(delta.added.len(), 2);
        assert!(delta.added.iter().all(|r| r.ttl() == TimeToLive::from(900)));
        assert_eq!(rrset.ttl(), TimeToLive::from(900));
    }

    #[test]
    fn test_remove_record() {
        let mut rrset = RecordSet::new(name(), RecordType::A);
        rrset.merge(a(1, 300), SerialNumber::from(1)).unwrap();
        rrset.merge(a(2, 300), SerialNumber::from(1)).unwrap();

        let removed = rrset.remove(&RData::A(A::new(192, 0, 2, 1)), SerialNumber::from(2));
        assert!(removed.is_some());
        assert_eq!(rrset.len(), 1);

        let missing = rrset.remove(&RData::A(A::new(192, 0, 2, 9)), SerialNumber::from(3));
        assert!(missing.is_none());
    }

    #[test]
    fn test_update_clears_rrsigs() {
        let mut rrset = RecordSet::new(name(), RecordType::A);
        rrset.merge(a(1, 300), SerialNumber::from(1)).unwrap();
        assert!(rrset.rrsigs().is_empty());
        rrset.merge(a(2, 300), SerialNumber::from(2)).unwrap();
        assert!(rrset.rrsigs().is_empty());
    }
}
