use std::collections::{BTreeMap, BTreeSet};

use hickory_proto::dnssec::Nsec3HashAlgorithm;
use hickory_proto::dnssec::rdata::{DNSSECRData, NSEC, NSEC3, NSEC3PARAM};
use hickory_proto::rr::{LowerName, Name, RData, RecordType};

use crate::error::ZoneError;
use crate::rr::{Record, RecordSet, RrsetDelta, SerialNumber, TimeToLive};
use crate::zone::store::RecordStore;

use super::signer;

/// Iterations above this are a CPU amplification hazard and are rejected.
pub const MAX_NSEC3_ITERATIONS: u16 = 50;

/// Longest accepted NSEC3 salt, in bytes.
pub const MAX_NSEC3_SALT_LEN: usize = 32;

/// Parameters of the zone's NSEC3 chain, carried by the apex NSEC3PARAM.
///
/// The hash algorithm is always SHA-1 and the flags field is always zero;
/// only iterations and salt vary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Nsec3Params {
    iterations: u16,
    salt: Vec<u8>,
}

impl Nsec3Params {
    pub fn new(iterations: u16, salt: Vec<u8>) -> Result<Self, ZoneError> {
        if iterations > MAX_NSEC3_ITERATIONS {
            return Err(ZoneError::OutOfRange("NSEC3 iterations"));
        }
        if salt.len() > MAX_NSEC3_SALT_LEN {
            return Err(ZoneError::OutOfRange("NSEC3 salt length"));
        }
        Ok(Self { iterations, salt })
    }

    /// Generate parameters with a random salt from the process RNG.
    pub fn generate(iterations: u16, salt_len: usize) -> Result<Self, ZoneError> {
        use rand::Rng as _;
        if salt_len > MAX_NSEC3_SALT_LEN {
            return Err(ZoneError::OutOfRange("NSEC3 salt length"));
        }
        let mut rng = rand::rng();
        let salt: Vec<u8> = (0..salt_len).map(|_| rng.random()).collect();
        Self::new(iterations, salt)
    }

    pub fn iterations(&self) -> u16 {
        self.iterations
    }

    pub fn salt(&self) -> &[u8] {
        &self.salt
    }

    pub(crate) fn to_rdata(&self) -> NSEC3PARAM {
        NSEC3PARAM::new(
            Nsec3HashAlgorithm::SHA1,
            false,
            self.iterations,
            self.salt.clone(),
        )
    }
}

/// The owner names the denial chain must cover, with their type bitmaps.
///
/// Covers every in-zone owner that holds at least one record set besides the
/// denial records themselves, skipping anything below a delegation cut.
fn chain_owners(
    store: &RecordStore,
    origin: &LowerName,
) -> Vec<(LowerName, BTreeSet<RecordType>)> {
    let mut delegation_points: Vec<LowerName> = Vec::new();
    let mut chain = Vec::new();

    for owner in store.owners() {
        if !origin.zone_of(&owner) {
            // Non-authoritative record outside of zone
            continue;
        }
        if delegation_points
            .iter()
            .any(|cut| cut.zone_of(&owner) && cut != &owner)
        {
            // Non-authoritative record below zone cut
            continue;
        }

        let mut types = store.types_at(&owner);
        if types.contains(&RecordType::NS) && &owner != origin {
            delegation_points.push(owner.clone());
        }
        types.remove(&RecordType::NSEC);
        types.remove(&RecordType::NSEC3);
        if types.is_empty() {
            continue;
        }
        chain.push((owner, types));
    }

    chain
}

/// Whether any record set at this owner takes an RRSIG, which decides the
/// RRSIG bit in the owner's denial bitmap.
fn owner_is_signed(store: &RecordStore, origin: &LowerName, owner: &LowerName) -> bool {
    store
        .rrsets_at(owner)
        .iter()
        .any(|rrset| signer::is_signable(origin, rrset).unwrap_or(false))
}

fn nsec_bitmap(
    store: &RecordStore,
    origin: &LowerName,
    owner: &LowerName,
    types: &BTreeSet<RecordType>,
) -> Vec<RecordType> {
    let mut bitmap: Vec<RecordType> = types.iter().copied().collect();
    if owner_is_signed(store, origin, owner) {
        bitmap.push(RecordType::RRSIG);
    }
    bitmap
}

/// Replace the NSEC entry at `owner`, reporting old and new records.
///
/// Writing rdata identical to the current entry is a no-op so repeated
/// mutations do not inflate the journal.
fn write_nsec(
    store: &RecordStore,
    owner: &LowerName,
    rdata: NSEC,
    ttl: TimeToLive,
    serial: SerialNumber,
    delta: &mut RrsetDelta,
) {
    let record = Record::from_rdata(
        Name::from(owner.clone()),
        ttl,
        RData::DNSSEC(DNSSECRData::NSEC(rdata)),
    );

    if let Some(existing) = store.get(owner, RecordType::NSEC) {
        if existing.records().next().map(|r| r.rdata()) == Some(record.rdata())
            && existing.ttl() == ttl
        {
            return;
        }
        delta.deleted.extend(existing.signed_records().cloned());
    }

    let mut rrset = RecordSet::new(Name::from(owner.clone()), RecordType::NSEC);
    rrset.set_ttl(ttl);
    delta.added.push(record.clone());
    let inserted = rrset.insert(record, serial);
    debug_assert!(inserted.is_ok());
    store.replace(rrset);
}

fn remove_entry(
    store: &RecordStore,
    owner: &LowerName,
    rtype: RecordType,
    delta: &mut RrsetDelta,
) {
    if let Some(removed) = store.remove(owner, rtype) {
        delta.deleted.extend(removed.signed_records().cloned());
    }
}

/// Strip every denial record from the zone (unsigning or mode conversion).
pub(crate) fn remove_denial_records(store: &RecordStore) -> RrsetDelta {
    let mut delta = RrsetDelta::default();
    for key in store.keys() {
        if matches!(
            key.record_type,
            RecordType::NSEC | RecordType::NSEC3 | RecordType::NSEC3PARAM
        ) {
            remove_entry(store, &key.name, key.record_type, &mut delta);
        }
    }
    delta
}

/// Build the NSEC chain from scratch across the whole zone.
pub(crate) fn build_nsec_chain(
    store: &RecordStore,
    origin: &LowerName,
    ttl: TimeToLive,
    serial: SerialNumber,
) -> Result<RrsetDelta, ZoneError> {
    tracing::debug!("generating nsec records: {origin}");
    let mut delta = RrsetDelta::default();

    // first remove all existing nsec records
    for key in store.keys() {
        if key.record_type == RecordType::NSEC {
            remove_entry(store, &key.name, RecordType::NSEC, &mut delta);
        }
    }

    let chain = chain_owners(store, origin);
    for (index, (owner, types)) in chain.iter().enumerate() {
        let (next, _) = &chain[(index + 1) % chain.len()];
        let rdata = NSEC::new_cover_self(
            Name::from(next.clone()),
            nsec_bitmap(store, origin, owner, types),
        );
        write_nsec(store, owner, rdata, ttl, serial, &mut delta);
    }

    Ok(delta)
}

/// Repair the NSEC chain after a mutation at `owner`.
///
/// Recomputes the owner's bitmap, removes the owner's NSEC when nothing but
/// denial records remain there, and restitches the predecessor's
/// next-owner-name in either case.
pub(crate) fn update_nsec_for_owner(
    store: &RecordStore,
    origin: &LowerName,
    owner: &LowerName,
    ttl: TimeToLive,
    serial: SerialNumber,
) -> Result<RrsetDelta, ZoneError> {
    let mut delta = RrsetDelta::default();
    let chain = chain_owners(store, origin);
    if chain.is_empty() {
        remove_entry(store, owner, RecordType::NSEC, &mut delta);
        return Ok(delta);
    }

    let position = chain.iter().position(|(name, _)| name == owner);
    match position {
        Some(index) => {
            let (next, _) = &chain[(index + 1) % chain.len()];
            let rdata = NSEC::new_cover_self(
                Name::from(next.clone()),
                nsec_bitmap(store, origin, owner, &chain[index].1),
            );
            write_nsec(store, owner, rdata, ttl, serial, &mut delta);

            // a newly-introduced owner also redirects its predecessor
            let (pred, pred_types) = &chain[(index + chain.len() - 1) % chain.len()];
            if pred != owner {
                let rdata = NSEC::new_cover_self(
                    Name::from(owner.clone()),
                    nsec_bitmap(store, origin, pred, pred_types),
                );
                write_nsec(store, pred, rdata, ttl, serial, &mut delta);
            }
        }
        None => {
            // the owner dropped out of the chain
            remove_entry(store, owner, RecordType::NSEC, &mut delta);

            let pred_index = chain
                .iter()
                .rposition(|(name, _)| name < owner)
                .unwrap_or(chain.len() - 1);
            let (pred, pred_types) = &chain[pred_index];
            let (next, _) = &chain[(pred_index + 1) % chain.len()];
            let rdata = NSEC::new_cover_self(
                Name::from(next.clone()),
                nsec_bitmap(store, origin, pred, pred_types),
            );
            write_nsec(store, pred, rdata, ttl, serial, &mut delta);
        }
    }

    Ok(delta)
}

/// One row of the hashed-owner table backing the NSEC3 chain.
struct HashedOwner {
    digest: Vec<u8>,
    types: BTreeSet<RecordType>,
    exists: bool,
}

/// Hash every chain owner and empty non-terminal, in hash order.
///
/// Equal digests are deduplicated by unioning their type bitmaps.
fn hashed_owner_table(
    store: &RecordStore,
    origin: &LowerName,
    params: &Nsec3Params,
) -> Result<Vec<HashedOwner>, ZoneError> {
    // Store the record types of each domain name, seeding the apex with the
    // NSEC3PARAM this chain is derived from.
    let mut record_types: BTreeMap<LowerName, (BTreeSet<RecordType>, bool)> = BTreeMap::new();
    record_types.insert(origin.clone(), ([RecordType::NSEC3PARAM].into(), true));

    for (owner, types) in chain_owners(store, origin) {
        let entry = record_types
            .entry(owner)
            .or_insert_with(|| (BTreeSet::new(), true));
        entry.0.extend(types.iter().copied());
        entry.1 = true;
    }

    // Every name between an owner and the origin is an empty non-terminal
    // that needs an NSEC3 record of its own.
    for name in record_types.keys().cloned().collect::<Vec<_>>() {
        let mut parent = name.base_name();
        while parent.num_labels() > origin.num_labels() {
            record_types
                .entry(parent.clone())
                .or_insert_with(|| (BTreeSet::new(), false));
            parent = parent.base_name();
        }
    }

    let mut table: Vec<HashedOwner> = Vec::new();
    for (name, (types, exists)) in record_types {
        let digest = Nsec3HashAlgorithm::SHA1.hash(&params.salt, &name, params.iterations)?;
        table.push(HashedOwner {
            digest: digest.as_ref().to_vec(),
            types,
            exists,
        });
    }

    table.sort_by(|a, b| a.digest.cmp(&b.digest));
    table.dedup_by(|duplicate, kept| {
        if duplicate.digest == kept.digest {
            kept.types.extend(duplicate.types.iter().copied());
            kept.exists |= duplicate.exists;
            true
        } else {
            false
        }
    });
    Ok(table)
}

/// Bring the stored NSEC3 chain in line with the current zone contents.
///
/// The chain is a flat hash-ordered sequence, so this recomputes the
/// expected records and swaps only the entries that differ: a mutation at
/// one owner touches that owner's NSEC3, its predecessor's next-pointer and
/// any empty non-terminals it introduced or orphaned. Also used for the
/// from-scratch build, where every entry differs.
pub(crate) fn reconcile_nsec3(
    store: &RecordStore,
    origin: &LowerName,
    params: &Nsec3Params,
    ttl: TimeToLive,
    serial: SerialNumber,
) -> Result<RrsetDelta, ZoneError> {
    tracing::debug!("reconciling nsec3 records: {origin}");
    let mut delta = RrsetDelta::default();

    let table = hashed_owner_table(store, origin, params)?;

    let mut expected: BTreeMap<LowerName, NSEC3> = BTreeMap::new();
    for (index, hashed) in table.iter().enumerate() {
        let next = &table[(index + 1) % table.len()];
        let rdata = NSEC3::new(
            Nsec3HashAlgorithm::SHA1,
            false,
            params.iterations,
            params.salt.to_vec(),
            next.digest.clone(),
            hashed
                .types
                .iter()
                .copied()
                .chain(hashed.exists.then_some(RecordType::RRSIG)),
        );
        let name = origin.prepend_label(data_encoding::BASE32_DNSSEC.encode(&hashed.digest))?;
        expected.insert(LowerName::new(&name), rdata);
    }

    // drop stored NSEC3 entries with no counterpart in the table
    for key in store.keys() {
        if key.record_type == RecordType::NSEC3 && !expected.contains_key(&key.name) {
            remove_entry(store, &key.name, RecordType::NSEC3, &mut delta);
        }
    }

    // write entries that are new or changed
    for (owner, rdata) in expected {
        let record = Record::from_rdata(
            Name::from(owner.clone()),
            ttl,
            RData::DNSSEC(DNSSECRData::NSEC3(rdata)),
        );
        if let Some(existing) = store.get(&owner, RecordType::NSEC3) {
            if existing.records().next().map(|r| r.rdata()) == Some(record.rdata())
                && existing.ttl() == ttl
            {
                continue;
            }
            delta.deleted.extend(existing.signed_records().cloned());
        }
        let mut rrset = RecordSet::new(Name::from(owner.clone()), RecordType::NSEC3);
        rrset.set_ttl(ttl);
        delta.added.push(record.clone());
        let inserted = rrset.insert(record, serial);
        debug_assert!(inserted.is_ok());
        store.replace(rrset);
    }

    Ok(delta)
}

/// Install or replace the apex NSEC3PARAM.
pub(crate) fn write_nsec3param(
    store: &RecordStore,
    origin: &LowerName,
    params: &Nsec3Params,
    ttl: TimeToLive,
    serial: SerialNumber,
) -> RrsetDelta {
    let mut delta = RrsetDelta::default();
    let record = Record::from_rdata(
        Name::from(origin.clone()),
        ttl,
        RData::DNSSEC(DNSSECRData::NSEC3PARAM(params.to_rdata())),
    );

    if let Some(existing) = store.get(origin, RecordType::NSEC3PARAM) {
        if existing.records().next().map(|r| r.rdata()) == Some(record.rdata()) {
            return delta;
        }
        delta.deleted.extend(existing.signed_records().cloned());
    }

    let mut rrset = RecordSet::new(Name::from(origin.clone()), RecordType::NSEC3PARAM);
    rrset.set_ttl(ttl);
    delta.added.push(record.clone());
    let inserted = rrset.insert(record, serial);
    debug_assert!(inserted.is_ok());
    store.replace(rrset);
    delta
}

/// The NSEC3 parameters currently installed at the apex, if any.
pub(crate) fn current_nsec3_params(
    store: &RecordStore,
    origin: &LowerName,
) -> Option<Nsec3Params> {
    let rrset = store.get(origin, RecordType::NSEC3PARAM)?;
    let record = rrset.records().next()?;
    let RData::DNSSEC(DNSSECRData::NSEC3PARAM(param)) = record.rdata() else {
        return None;
    };
    Nsec3Params::new(param.iterations(), param.salt().to_vec()).ok()
}
