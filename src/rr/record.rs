use std::{cmp::Ordering, fmt, net::IpAddr};

use chrono::{DateTime, Utc};
use hickory_proto::rr::{DNSClass, RData, RecordData, RecordType, RrKey};

use super::{AsHickory, Name, ttl::TimeToLive};

/// Side-band metadata carried by a record but excluded from its identity.
///
/// Comparison, ordering and signing all ignore this block; it exists for the
/// benefit of operators (comments, disabled), the journal (deleted-on) and
/// referral responses (glue addresses for NS targets inside the zone).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecordInfo {
    pub comments: Option<String>,
    pub disabled: bool,
    pub deleted_on: Option<DateTime<Utc>>,
    pub glue: Vec<IpAddr>,
}

/// DNS Resource Record with a side-band info block
///
/// Identity is (name, class, rdata); the record type is implied by the rdata.
/// The info block is mutable metadata and never participates in equality.
#[derive(Debug, Clone, Eq)]
pub struct Record<R: RecordData = RData> {
    name_labels: Name,
    dns_class: DNSClass,
    ttl: TimeToLive,
    rdata: R,
    info: RecordInfo,
}

impl<R: RecordData> fmt::Display for Record<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> Result<(), fmt::Error> {
        write!(
            f,
            "{name} {ttl} {class} {ty} {rdata}",
            name = self.name_labels,
            ttl = self.ttl,
            class = self.dns_class,
            ty = self.record_type(),
            rdata = self.rdata,
        )?;
        if self.info.disabled {
            write!(f, " ; disabled")?;
        }
        Ok(())
    }
}

impl<R: RecordData> Record<R> {
    pub fn from_rdata(name: Name, ttl: TimeToLive, rdata: R) -> Self {
        Record {
            name_labels: name,
            dns_class: DNSClass::IN,
            ttl,
            rdata,
            info: RecordInfo::default(),
        }
    }
}

impl Record {
    /// An empty placeholder record used while assembling RRSIGs.
    pub fn update0(name: Name, ttl: TimeToLive, rr_type: RecordType) -> Record {
        Record {
            name_labels: name,
            dns_class: DNSClass::IN,
            ttl,
            rdata: RData::Update0(rr_type),
            info: RecordInfo::default(),
        }
    }
}

impl<R: RecordData> Record<R> {
    /// Converts the record into a record with generic record data
    pub fn into_record_rdata(self) -> Record<RData> {
        Record {
            name_labels: self.name_labels,
            dns_class: self.dns_class,
            ttl: self.ttl,
            rdata: self.rdata.into_rdata(),
            info: self.info,
        }
    }

    /// Sets the TTL, in seconds, to the specified value
    pub fn set_ttl(&mut self, ttl: TimeToLive) {
        self.ttl = ttl;
    }

    pub(crate) fn set_data(&mut self, rdata: R) {
        self.rdata = rdata;
    }

    /// Record Lookup Key for this record
    pub(crate) fn rrkey(&self) -> RrKey {
        RrKey::new(self.name().into(), self.record_type())
    }

    /// Label of the record resource
    pub fn name(&self) -> &Name {
        &self.name_labels
    }

    /// DNS Class of the record resource
    pub fn dns_class(&self) -> DNSClass {
        self.dns_class
    }

    /// Time to Live of the record resource
    pub fn ttl(&self) -> TimeToLive {
        self.ttl
    }

    /// Record Data of the record resource
    pub fn rdata(&self) -> &R {
        &self.rdata
    }

    pub(crate) fn rdata_mut(&mut self) -> &mut R {
        &mut self.rdata
    }

    /// Record Type of the record resource
    pub fn record_type(&self) -> RecordType {
        self.rdata.record_type()
    }

    /// Side-band metadata for this record
    pub fn info(&self) -> &RecordInfo {
        &self.info
    }

    pub fn info_mut(&mut self) -> &mut RecordInfo {
        &mut self.info
    }

    pub fn disabled(&self) -> bool {
        self.info.disabled
    }

    pub fn set_disabled(&mut self, disabled: bool) {
        self.info.disabled = disabled;
    }

    /// Timestamp at which this record was removed from the served zone
    pub fn deleted_on(&self) -> Option<DateTime<Utc>> {
        self.info.deleted_on
    }

    pub fn mark_deleted(&mut self, when: DateTime<Utc>) {
        self.info.deleted_on = Some(when);
    }

    /// Glue addresses for an NS record whose target lives inside the zone
    pub fn glue(&self) -> &[IpAddr] {
        &self.info.glue
    }

    pub fn set_glue(&mut self, glue: Vec<IpAddr>) {
        self.info.glue = glue;
    }
}

impl<R: RecordData> PartialEq for Record<R> {
    fn eq(&self, other: &Self) -> bool {
        self.name_labels == other.name_labels
            && self.dns_class == other.dns_class
            && self.rdata == other.rdata
    }
}

impl Ord for Record<RData> {
    /// Canonical ordering as defined by
    ///  [RFC 4034](https://tools.ietf.org/html/rfc4034#section-6), DNSSEC Resource Records, March 2005
    fn cmp(&self, other: &Self) -> Ordering {
        self.name_labels
            .cmp(&other.name_labels)
            .then(self.record_type().cmp(&other.record_type()))
            .then(self.dns_class.cmp(&other.dns_class))
            .then(self.ttl().cmp(&other.ttl()))
            .then(self.rdata().cmp(other.rdata()))
    }
}

impl PartialOrd for Record<RData> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<R: RecordData> AsHickory for Record<R> {
    type Hickory = hickory_proto::rr::Record<R>;

    fn as_hickory(&self) -> Self::Hickory {
        hickory_proto::rr::Record::from_rdata(
            self.name().clone(),
            self.ttl().into(),
            self.rdata().clone(),
        )
    }
}
