//! Versioned binary snapshot of a zone.
//!
//! The host server owns where and when this blob is written; the zone
//! manager only defines the encoding. Layout: a version byte, then tagged
//! fields with strings as length-prefixed UTF-8, integers little-endian,
//! addresses as length+bytes and timestamps as 64-bit UTC microseconds.
//! Unknown versions are rejected rather than guessed at.

use std::collections::BTreeMap;
use std::net::IpAddr;

use chrono::{DateTime, Utc};
use hickory_proto::dnssec::Algorithm;
use hickory_proto::rr::{DNSClass, RData, RecordType, RrKey};
use hickory_proto::serialize::binary::{BinDecoder, BinEncodable as _, Restrict};
use zeroize::Zeroizing;

use crate::dnssec::keys::{DnssecKey, KeyKind, KeyState};
use crate::dnssec::DnssecStatus;
use crate::error::ZoneError;
use crate::rr::{Name, Record, RecordSet, SerialNumber, TimeToLive};
use crate::zone::{ChangeKind, Commit, JournalEntry, Zone, ZonePolicy};

const FORMAT_VERSION: u8 = 1;

struct Writer {
    buf: Vec<u8>,
}

impl Writer {
    fn new() -> Self {
        Self { buf: Vec::new() }
    }

    fn put_u8(&mut self, value: u8) {
        self.buf.push(value);
    }

    fn put_u16(&mut self, value: u16) {
        self.buf.extend_from_slice(&value.to_le_bytes());
    }

    fn put_u32(&mut self, value: u32) {
        self.buf.extend_from_slice(&value.to_le_bytes());
    }

    fn put_i64(&mut self, value: i64) {
        self.buf.extend_from_slice(&value.to_le_bytes());
    }

    fn put_bool(&mut self, value: bool) {
        self.put_u8(value as u8);
    }

    fn put_bytes(&mut self, bytes: &[u8]) {
        self.put_u32(bytes.len() as u32);
        self.buf.extend_from_slice(bytes);
    }

    fn put_string(&mut self, value: &str) {
        self.put_bytes(value.as_bytes());
    }

    fn put_timestamp(&mut self, value: DateTime<Utc>) {
        self.put_i64(value.timestamp_micros());
    }

    fn put_addr(&mut self, addr: &IpAddr) {
        match addr {
            IpAddr::V4(v4) => {
                self.put_u8(4);
                self.buf.extend_from_slice(&v4.octets());
            }
            IpAddr::V6(v6) => {
                self.put_u8(16);
                self.buf.extend_from_slice(&v6.octets());
            }
        }
    }
}

struct Reader<'a> {
    buf: &'a [u8],
    position: usize,
}

impl<'a> Reader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, position: 0 }
    }

    fn take(&mut self, len: usize) -> Result<&'a [u8], ZoneError> {
        let end = self
            .position
            .checked_add(len)
            .filter(|end| *end <= self.buf.len())
            .ok_or_else(|| ZoneError::invalid("truncated zone snapshot"))?;
        let slice = &self.buf[self.position..end];
        self.position = end;
        Ok(slice)
    }

    fn get_u8(&mut self) -> Result<u8, ZoneError> {
        Ok(self.take(1)?[0])
    }

    fn get_u16(&mut self) -> Result<u16, ZoneError> {
        Ok(u16::from_le_bytes(self.take(2)?.try_into().unwrap()))
    }

    fn get_u32(&mut self) -> Result<u32, ZoneError> {
        Ok(u32::from_le_bytes(self.take(4)?.try_into().unwrap()))
    }

    fn get_i64(&mut self) -> Result<i64, ZoneError> {
        Ok(i64::from_le_bytes(self.take(8)?.try_into().unwrap()))
    }

    fn get_bool(&mut self) -> Result<bool, ZoneError> {
        Ok(self.get_u8()? != 0)
    }

    fn get_bytes(&mut self) -> Result<Vec<u8>, ZoneError> {
        let len = self.get_u32()? as usize;
        Ok(self.take(len)?.to_vec())
    }

    fn get_string(&mut self) -> Result<String, ZoneError> {
        String::from_utf8(self.get_bytes()?)
            .map_err(|_| ZoneError::invalid("non-UTF-8 string in zone snapshot"))
    }

    fn get_timestamp(&mut self) -> Result<DateTime<Utc>, ZoneError> {
        DateTime::from_timestamp_micros(self.get_i64()?)
            .ok_or_else(|| ZoneError::invalid("timestamp out of range in zone snapshot"))
    }

    fn get_addr(&mut self) -> Result<IpAddr, ZoneError> {
        match self.get_u8()? {
            4 => {
                let octets: [u8; 4] = self.take(4)?.try_into().unwrap();
                Ok(IpAddr::V4(octets.into()))
            }
            16 => {
                let octets: [u8; 16] = self.take(16)?.try_into().unwrap();
                Ok(IpAddr::V6(octets.into()))
            }
            _ => Err(ZoneError::invalid("bad address length in zone snapshot")),
        }
    }
}

fn put_record(writer: &mut Writer, record: &Record) -> Result<(), ZoneError> {
    writer.put_string(&record.name().to_utf8());
    writer.put_u16(record.record_type().into());
    writer.put_u16(record.dns_class().into());
    writer.put_u32(record.ttl().into());
    writer.put_bytes(&record.rdata().to_bytes()?);

    let info = record.info();
    match &info.comments {
        Some(comments) => {
            writer.put_bool(true);
            writer.put_string(comments);
        }
        None => writer.put_bool(false),
    }
    writer.put_bool(info.disabled);
    match info.deleted_on {
        Some(when) => {
            writer.put_bool(true);
            writer.put_timestamp(when);
        }
        None => writer.put_bool(false),
    }
    writer.put_u16(info.glue.len() as u16);
    for addr in &info.glue {
        writer.put_addr(addr);
    }
    Ok(())
}

fn get_record(reader: &mut Reader<'_>) -> Result<Record, ZoneError> {
    let name = Name::from_utf8(reader.get_string()?)
        .map_err(|_| ZoneError::invalid("bad owner name in zone snapshot"))?;
    let rtype = RecordType::from(reader.get_u16()?);
    let class = DNSClass::from(reader.get_u16()?);
    let ttl = TimeToLive::from(reader.get_u32()?);
    let rdata_bytes = reader.get_bytes()?;
    let mut decoder = BinDecoder::new(&rdata_bytes);
    let rdata = RData::read(&mut decoder, rtype, Restrict::new(rdata_bytes.len() as u16))?;
    if class != DNSClass::IN {
        return Err(ZoneError::invalid("non-IN record in zone snapshot"));
    }

    let mut record = Record::from_rdata(name, ttl, rdata);
    if reader.get_bool()? {
        record.info_mut().comments = Some(reader.get_string()?);
    }
    record.info_mut().disabled = reader.get_bool()?;
    if reader.get_bool()? {
        record.info_mut().deleted_on = Some(reader.get_timestamp()?);
    }
    let glue_count = reader.get_u16()?;
    let mut glue = Vec::with_capacity(glue_count as usize);
    for _ in 0..glue_count {
        glue.push(reader.get_addr()?);
    }
    record.set_glue(glue);
    Ok(record)
}

fn status_tag(status: DnssecStatus) -> u8 {
    match status {
        DnssecStatus::Unsigned => 0,
        DnssecStatus::SignedWithNsec => 1,
        DnssecStatus::SignedWithNsec3 => 2,
    }
}

fn status_from_tag(tag: u8) -> Result<DnssecStatus, ZoneError> {
    match tag {
        0 => Ok(DnssecStatus::Unsigned),
        1 => Ok(DnssecStatus::SignedWithNsec),
        2 => Ok(DnssecStatus::SignedWithNsec3),
        _ => Err(ZoneError::invalid("bad DNSSEC status in zone snapshot")),
    }
}

fn state_tag(state: KeyState) -> u8 {
    state.rank()
}

fn state_from_tag(tag: u8) -> Result<KeyState, ZoneError> {
    Ok(match tag {
        0 => KeyState::Generated,
        1 => KeyState::Published,
        2 => KeyState::Ready,
        3 => KeyState::Active,
        4 => KeyState::Retired,
        5 => KeyState::Revoked,
        6 => KeyState::Dead,
        _ => return Err(ZoneError::invalid("bad key state in zone snapshot")),
    })
}

/// Encode a zone into the versioned snapshot form.
pub fn encode(zone: &Zone) -> Result<Vec<u8>, ZoneError> {
    let mut writer = Writer::new();
    writer.put_u8(FORMAT_VERSION);
    writer.put_string(&zone.name().to_utf8());
    writer.put_bool(zone.is_internal());

    let policy = zone.policy();
    writer.put_bool(policy.allow_zone_transfer);
    writer.put_bool(policy.notify);
    writer.put_bool(policy.allow_update);

    writer.put_u8(status_tag(zone.status()));

    let rrsets = zone.store().rrsets();
    let records: Vec<&Record> = rrsets
        .iter()
        .flat_map(|rrset| rrset.signed_records())
        .collect();
    writer.put_u32(records.len() as u32);
    for record in records {
        put_record(&mut writer, record)?;
    }

    let keys = zone.key_store().snapshot();
    writer.put_u32(keys.len() as u32);
    for key in keys {
        writer.put_u8(match key.kind() {
            KeyKind::Ksk => 0,
            KeyKind::Zsk => 1,
        });
        writer.put_u8(u8::from(key.algorithm()));
        writer.put_u8(state_tag(key.state()));
        writer.put_bool(key.revoked());
        writer.put_bool(key.is_retiring());
        writer.put_u16(key.rollover_days());
        writer.put_timestamp(key.state_changed_on());
        writer.put_bytes(key.pkcs8());
    }

    let commits = zone.journal().commits();
    writer.put_u32(commits.len() as u32);
    for commit in commits {
        writer.put_timestamp(commit.committed_at);
        writer.put_u32(commit.old_serial.get());
        writer.put_u32(commit.new_serial.get());
        writer.put_u32(commit.entries.len() as u32);
        for entry in &commit.entries {
            writer.put_u8(match entry.kind {
                ChangeKind::Removed => 0,
                ChangeKind::Added => 1,
            });
            put_record(&mut writer, &entry.record)?;
        }
    }

    Ok(writer.buf)
}

/// Decode a zone from its snapshot form.
pub fn decode(buf: &[u8]) -> Result<Zone, ZoneError> {
    let mut reader = Reader::new(buf);
    let version = reader.get_u8()?;
    if version != FORMAT_VERSION {
        return Err(ZoneError::UnsupportedFormat(version));
    }

    let name = Name::from_utf8(reader.get_string()?)
        .map_err(|_| ZoneError::invalid("bad zone name in snapshot"))?;
    let internal = reader.get_bool()?;
    let policy = ZonePolicy {
        allow_zone_transfer: reader.get_bool()?,
        notify: reader.get_bool()?,
        allow_update: reader.get_bool()?,
    };
    let status = status_from_tag(reader.get_u8()?)?;

    let record_count = reader.get_u32()?;
    let mut plain = Vec::new();
    let mut rrsigs = Vec::new();
    for _ in 0..record_count {
        let record = get_record(&mut reader)?;
        if record.record_type() == RecordType::RRSIG {
            rrsigs.push(record);
        } else {
            plain.push(record);
        }
    }

    let mut rrsets: BTreeMap<RrKey, RecordSet> = BTreeMap::new();
    for record in plain {
        let key = RrKey::new(record.name().into(), record.record_type());
        let rrset = rrsets
            .entry(key)
            .or_insert_with(|| RecordSet::new(record.name().clone(), record.record_type()));
        rrset
            .insert(record, SerialNumber::ZERO)
            .map_err(|error| ZoneError::invalid(error.to_string()))?;
    }
    for rrsig in rrsigs {
        let covered = rrsig
            .rdata()
            .as_dnssec()
            .and_then(|dnssec| dnssec.as_rrsig())
            .map(|sig| sig.type_covered())
            .ok_or_else(|| ZoneError::invalid("RRSIG without RRSIG rdata in snapshot"))?;
        let key = RrKey::new(rrsig.name().into(), covered);
        let rrset = rrsets
            .get_mut(&key)
            .ok_or_else(|| ZoneError::invalid("RRSIG without covered record set in snapshot"))?;
        rrset
            .insert_rrsig(rrsig)
            .map_err(|error| ZoneError::invalid(error.to_string()))?;
    }

    let key_count = reader.get_u32()?;
    let mut keys = Vec::with_capacity(key_count as usize);
    for _ in 0..key_count {
        let kind = match reader.get_u8()? {
            0 => KeyKind::Ksk,
            1 => KeyKind::Zsk,
            _ => return Err(ZoneError::invalid("bad key kind in zone snapshot")),
        };
        let algorithm = Algorithm::from_u8(reader.get_u8()?);
        let state = state_from_tag(reader.get_u8()?)?;
        let revoked = reader.get_bool()?;
        let is_retiring = reader.get_bool()?;
        let rollover_days = reader.get_u16()?;
        let state_changed_on = reader.get_timestamp()?;
        let pkcs8 = Zeroizing::new(reader.get_bytes()?);
        keys.push(DnssecKey::from_material(
            kind,
            algorithm,
            pkcs8,
            state,
            state_changed_on,
            rollover_days,
            is_retiring,
            revoked,
        )?);
    }

    let commit_count = reader.get_u32()?;
    let mut history = Vec::with_capacity(commit_count as usize);
    for _ in 0..commit_count {
        let committed_at = reader.get_timestamp()?;
        let old_serial = SerialNumber::from(reader.get_u32()?);
        let new_serial = SerialNumber::from(reader.get_u32()?);
        let entry_count = reader.get_u32()?;
        let mut entries = Vec::with_capacity(entry_count as usize);
        for _ in 0..entry_count {
            let kind = match reader.get_u8()? {
                0 => ChangeKind::Removed,
                1 => ChangeKind::Added,
                _ => return Err(ZoneError::invalid("bad journal entry kind in snapshot")),
            };
            entries.push(JournalEntry {
                kind,
                record: get_record(&mut reader)?,
            });
        }
        history.push(Commit {
            committed_at,
            old_serial,
            new_serial,
            entries,
        });
    }

    Zone::from_parts(
        name,
        internal,
        policy,
        status,
        rrsets.into_values().collect(),
        keys,
        history,
    )
}
