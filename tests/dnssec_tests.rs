//! Signed-zone battery: signing, denial chains, key lifecycle and
//! concurrent mutation.

mod support;

use std::sync::Arc;
use std::time::Duration;

use chrono::{TimeDelta, Utc};
use hickory_proto::dnssec::rdata::{DNSSECRData, DS};
use hickory_proto::dnssec::{Algorithm, DigestType};
use hickory_proto::rr::{LowerName, RData, RecordType};

use pecan_dns::dnssec::{DnssecStatus, KeyKind, KeyState, Nsec3Params};
use pecan_dns::rr::TimeToLive;
use pecan_dns::zone::{SigningConfig, Zone};

use support::{a_record, example_zone, name, ns_record};

fn signed_zone() -> Zone {
    let zone = example_zone();
    zone.set_records(RecordType::NS, vec![ns_record("example.", "ns1.example.")])
        .unwrap();
    zone.sign(SigningConfig::nsec(
        Algorithm::ECDSAP256SHA256,
        TimeToLive::from(3600),
    ))
    .unwrap();
    zone
}

fn key_of(zone: &Zone, kind: KeyKind) -> pecan_dns::dnssec::KeyView {
    zone.list_keys()
        .into_iter()
        .find(|key| key.kind == kind)
        .expect("key missing")
}

fn rrsig_tags(zone: &Zone, owner: &str, rtype: RecordType) -> Vec<u16> {
    let owner = LowerName::from(name(owner));
    let rrset = zone.store().get(&owner, rtype).expect("rrset missing");
    rrset
        .rrsigs()
        .iter()
        .filter_map(|record| {
            record
                .rdata()
                .as_dnssec()
                .and_then(|dnssec| dnssec.as_rrsig())
                .map(|rrsig| rrsig.key_tag())
        })
        .collect()
}

fn nsec_at(zone: &Zone, owner: &str) -> Option<hickory_proto::dnssec::rdata::NSEC> {
    let owner = LowerName::from(name(owner));
    let rrset = zone.store().get(&owner, RecordType::NSEC)?;
    let record = rrset.records().next()?;
    match record.rdata() {
        RData::DNSSEC(DNSSECRData::NSEC(nsec)) => Some(nsec.clone()),
        _ => None,
    }
}

#[test]
fn signing_installs_keys_chain_and_signatures() {
    let zone = example_zone();
    zone.set_records(RecordType::NS, vec![ns_record("example.", "ns1.example.")])
        .unwrap();
    let before = zone.serial();

    zone.sign(SigningConfig::nsec(
        Algorithm::ECDSAP256SHA256,
        TimeToLive::from(3600),
    ))
    .unwrap();

    assert_eq!(zone.status(), DnssecStatus::SignedWithNsec);
    // exactly one serial bump for the whole signing commit
    assert_eq!(zone.serial(), before.next());

    // 1 KSK published, 1 ZSK ready
    let ksk = key_of(&zone, KeyKind::Ksk);
    let zsk = key_of(&zone, KeyKind::Zsk);
    assert_eq!(ksk.state, KeyState::Published);
    assert_eq!(zsk.state, KeyState::Ready);
    assert_eq!(zone.list_keys().len(), 2);

    // DNSKEY set signed by the KSK, everything else by the ZSK
    assert_eq!(rrsig_tags(&zone, "example.", RecordType::DNSKEY), vec![ksk.tag]);
    assert_eq!(rrsig_tags(&zone, "example.", RecordType::NS), vec![zsk.tag]);
    assert_eq!(rrsig_tags(&zone, "example.", RecordType::SOA), vec![zsk.tag]);

    // single-owner zone: the apex NSEC points back at the apex
    let nsec = nsec_at(&zone, "example.").expect("apex NSEC");
    assert_eq!(nsec.next_domain_name(), &name("example."));
    assert_eq!(rrsig_tags(&zone, "example.", RecordType::NSEC), vec![zsk.tag]);

    // signing twice is an error
    assert!(zone
        .sign(SigningConfig::nsec(
            Algorithm::ECDSAP256SHA256,
            TimeToLive::from(3600),
        ))
        .is_err());
}

#[test]
fn adding_a_record_extends_the_nsec_chain() {
    let zone = signed_zone();
    let before = zone.serial();
    let zsk = key_of(&zone, KeyKind::Zsk);

    zone.add_record(a_record("web.example.", 1)).unwrap();

    assert_eq!(zone.serial(), before.next());
    assert_eq!(rrsig_tags(&zone, "web.example.", RecordType::A), vec![zsk.tag]);

    // the new owner's NSEC carries {A, RRSIG, NSEC} and closes back to the apex
    let nsec = nsec_at(&zone, "web.example.").expect("web NSEC");
    let types: std::collections::BTreeSet<RecordType> = nsec.type_bit_maps().collect();
    assert_eq!(
        types,
        std::collections::BTreeSet::from([RecordType::A, RecordType::RRSIG, RecordType::NSEC])
    );
    assert_eq!(nsec.next_domain_name(), &name("example."));

    // the predecessor now points at the new owner
    let apex = nsec_at(&zone, "example.").expect("apex NSEC");
    assert_eq!(apex.next_domain_name(), &name("web.example."));
}

#[test]
fn deleting_an_owner_restitches_the_nsec_chain() {
    let zone = signed_zone();
    zone.add_record(a_record("a.example.", 1)).unwrap();
    zone.add_record(a_record("web.example.", 2)).unwrap();

    zone.delete_records(&name("a.example."), RecordType::A).unwrap();

    assert!(nsec_at(&zone, "a.example.").is_none());
    let apex = nsec_at(&zone, "example.").expect("apex NSEC");
    assert_eq!(apex.next_domain_name(), &name("web.example."));
}

#[test]
fn zsk_rollover_walks_the_full_lifecycle() {
    let zone = signed_zone();
    let now = Utc::now();

    // first tick: the fresh ZSK becomes active
    let ctx = zone.tick_context(now, None).unwrap();
    let plan = zone.key_maintenance_plan(&ctx);
    zone.apply_key_maintenance(&plan, &[], now).unwrap();
    let zsk = key_of(&zone, KeyKind::Zsk);
    assert_eq!(zsk.state, KeyState::Active);

    // operator starts the rollover
    let successor_tag = zone.rollover_key(zsk.tag).unwrap();
    let successor = zone
        .list_keys()
        .into_iter()
        .find(|key| key.tag == successor_tag)
        .unwrap();
    assert_eq!(successor.state, KeyState::Published);
    let old = zone
        .list_keys()
        .into_iter()
        .find(|key| key.tag == zsk.tag)
        .unwrap();
    assert!(old.is_retiring);

    // DNSKEY TTL (3600) + propagation delay (900+300) elapse
    let later = now + TimeDelta::seconds(3600 + 1200 + 60);
    let ctx = zone.tick_context(later, None).unwrap();
    let plan = zone.key_maintenance_plan(&ctx);
    assert!(plan.to_ready.contains(&successor_tag));
    zone.apply_key_maintenance(&plan, &[], later).unwrap();

    // next tick: successor activates
    let ctx = zone.tick_context(later, None).unwrap();
    let plan = zone.key_maintenance_plan(&ctx);
    assert!(plan.to_activate.contains(&successor_tag));
    zone.apply_key_maintenance(&plan, &[], later).unwrap();

    // next tick: the retiring predecessor retires
    let ctx = zone.tick_context(later, None).unwrap();
    let plan = zone.key_maintenance_plan(&ctx);
    assert!(plan.to_retire.contains(&zsk.tag));
    zone.apply_key_maintenance(&plan, &[], later).unwrap();
    let old = zone
        .list_keys()
        .into_iter()
        .find(|key| key.tag == zsk.tag)
        .unwrap();
    assert_eq!(old.state, KeyState::Retired);

    // max RRSIG TTL + propagation later, the old key dies and its
    // signatures go with it
    let much_later = later + TimeDelta::seconds(3600 + 1200 + 60);
    let ctx = zone.tick_context(much_later, None).unwrap();
    let plan = zone.key_maintenance_plan(&ctx);
    assert!(plan.to_remove.contains(&zsk.tag));
    zone.apply_key_maintenance(&plan, &[], much_later).unwrap();

    assert!(zone.list_keys().iter().all(|key| key.tag != zsk.tag));
    for rrset in zone.store().rrsets() {
        for sig in rrset.rrsigs() {
            let tag = sig
                .rdata()
                .as_dnssec()
                .and_then(|dnssec| dnssec.as_rrsig())
                .unwrap()
                .key_tag();
            assert_ne!(tag, zsk.tag, "stale RRSIG survived key removal");
        }
    }

    // the successor is now the only ZSK signing the zone
    assert_eq!(
        rrsig_tags(&zone, "example.", RecordType::NS),
        vec![successor_tag]
    );
}

#[test]
fn ksk_activates_only_on_matching_parent_ds() {
    let zone = signed_zone();
    let now = Utc::now();
    let ksk = key_of(&zone, KeyKind::Ksk);

    // fresh zone: the KSK waits out max record TTL + propagation delay
    let later = now + TimeDelta::seconds(3600 + 1200 + 60);
    let ctx = zone.tick_context(later, None).unwrap();
    let plan = zone.key_maintenance_plan(&ctx);
    assert!(plan.to_ready.contains(&ksk.tag));
    zone.apply_key_maintenance(&plan, &[], later).unwrap();

    // without parent DS evidence the key stays ready
    let ctx = zone.tick_context(later, None).unwrap();
    let plan = zone.key_maintenance_plan(&ctx);
    assert!(plan.awaiting_ds.contains(&ksk.tag));
    zone.apply_key_maintenance(&plan, &[], later).unwrap();
    assert_eq!(key_of(&zone, KeyKind::Ksk).state, KeyState::Ready);

    // with the matching DS, it activates
    let ds_records = zone.ds_records(DigestType::SHA256).unwrap();
    let parent_ds: Vec<DS> = ds_records
        .iter()
        .filter_map(|record| match record.rdata() {
            RData::DNSSEC(DNSSECRData::DS(ds)) => Some(ds.clone()),
            _ => None,
        })
        .collect();
    assert_eq!(parent_ds.len(), 1);

    let plan = zone.key_maintenance_plan(&zone.tick_context(later, None).unwrap());
    zone.apply_key_maintenance(&plan, &parent_ds, later).unwrap();
    assert_eq!(key_of(&zone, KeyKind::Ksk).state, KeyState::Active);
}

#[test]
fn manual_retire_requires_cover() {
    let zone = signed_zone();
    let now = Utc::now();

    // activate the ZSK
    let plan = zone.key_maintenance_plan(&zone.tick_context(now, None).unwrap());
    zone.apply_key_maintenance(&plan, &[], now).unwrap();
    let zsk = key_of(&zone, KeyKind::Zsk);

    assert!(matches!(
        zone.retire_key(zsk.tag),
        Err(pecan_dns::ZoneError::NoSuccessorKey)
    ));
}

#[test]
fn nsec3_zone_add_delete_round_trip() {
    let zone = example_zone();
    zone.set_records(RecordType::NS, vec![ns_record("example.", "ns1.example.")])
        .unwrap();
    let params = Nsec3Params::new(10, vec![0xAA, 0xBB]).unwrap();
    zone.sign(SigningConfig::nsec3(
        Algorithm::ECDSAP256SHA256,
        TimeToLive::from(3600),
        params,
    ))
    .unwrap();
    assert_eq!(zone.status(), DnssecStatus::SignedWithNsec3);

    let nsec3_count = |zone: &Zone| {
        zone.store()
            .keys()
            .iter()
            .filter(|key| key.record_type == RecordType::NSEC3)
            .count()
    };
    assert_eq!(nsec3_count(&zone), 1, "apex only");

    zone.add_record(a_record("a.example.", 1)).unwrap();
    assert_eq!(nsec3_count(&zone), 2);

    zone.delete_records(&name("a.example."), RecordType::A).unwrap();
    assert_eq!(nsec3_count(&zone), 1);

    // the remaining NSEC3 chain is the apex pointing at itself
    let nsec3_key = zone
        .store()
        .keys()
        .into_iter()
        .find(|key| key.record_type == RecordType::NSEC3)
        .unwrap();
    let rrset = zone.store().get(&nsec3_key.name, RecordType::NSEC3).unwrap();
    let record = rrset.records().next().unwrap();
    let RData::DNSSEC(DNSSECRData::NSEC3(nsec3)) = record.rdata() else {
        panic!("not NSEC3");
    };
    let self_label = data_encoding::BASE32_DNSSEC.encode(nsec3.next_hashed_owner_name());
    assert!(nsec3_key
        .name
        .to_string()
        .to_ascii_lowercase()
        .starts_with(&self_label.to_ascii_lowercase()));

    // the zone survives a save/load cycle unchanged
    let blob = pecan_dns::persist::encode(&zone).unwrap();
    let restored = pecan_dns::persist::decode(&blob).unwrap();
    assert_eq!(restored.serial(), zone.serial());
    assert_eq!(restored.status(), zone.status());
    assert_eq!(restored.store().rrsets().len(), zone.store().rrsets().len());
    assert_eq!(restored.list_keys().len(), zone.list_keys().len());
    assert_eq!(restored.journal().len(), zone.journal().len());
}

#[test]
fn nsec3_parameter_update_is_idempotent() {
    let zone = example_zone();
    let params = Nsec3Params::new(10, vec![0xAA, 0xBB]).unwrap();
    zone.sign(SigningConfig::nsec3(
        Algorithm::ECDSAP256SHA256,
        TimeToLive::from(3600),
        params.clone(),
    ))
    .unwrap();

    let serial = zone.serial();
    zone.update_nsec3_params(params).unwrap();
    assert_eq!(zone.serial(), serial, "same parameters change nothing");

    let new_params = Nsec3Params::new(12, vec![0xAA, 0xBB]).unwrap();
    zone.update_nsec3_params(new_params).unwrap();
    assert_eq!(zone.serial(), serial.next());
}

#[test]
fn conversion_between_denial_modes() {
    let zone = signed_zone();
    zone.add_record(a_record("web.example.", 1)).unwrap();

    let params = Nsec3Params::new(5, vec![0x01]).unwrap();
    zone.convert_to_nsec3(params).unwrap();
    assert_eq!(zone.status(), DnssecStatus::SignedWithNsec3);
    assert!(zone
        .store()
        .keys()
        .iter()
        .all(|key| key.record_type != RecordType::NSEC));
    assert!(zone
        .store()
        .get(zone.origin(), RecordType::NSEC3PARAM)
        .is_some());

    zone.convert_to_nsec().unwrap();
    assert_eq!(zone.status(), DnssecStatus::SignedWithNsec);
    assert!(zone
        .store()
        .keys()
        .iter()
        .all(|key| !matches!(
            key.record_type,
            RecordType::NSEC3 | RecordType::NSEC3PARAM
        )));
}

#[test]
fn unsigning_strips_all_dnssec_state() {
    let zone = signed_zone();
    zone.add_record(a_record("web.example.", 1)).unwrap();

    zone.unsign().unwrap();
    assert_eq!(zone.status(), DnssecStatus::Unsigned);
    assert!(zone.list_keys().is_empty());
    for rrset in zone.store().rrsets() {
        assert!(rrset.rrsigs().is_empty());
        assert!(!matches!(
            rrset.record_type(),
            RecordType::DNSKEY | RecordType::NSEC | RecordType::NSEC3 | RecordType::NSEC3PARAM
        ));
    }
}

#[test]
fn refresh_regenerates_stale_signatures() {
    let zone = signed_zone();
    zone.add_record(a_record("web.example.", 1)).unwrap();

    // far enough in the future that every signature is inside the refresh
    // window (validity/10 before expiration)
    let validity = Duration::from_secs(604800 + 3 * 86400);
    let near_expiry = Utc::now() + TimeDelta::from_std(validity).unwrap()
        - TimeDelta::seconds(7200);

    let changed = zone.refresh_signatures(near_expiry).unwrap();
    assert!(changed);

    // refreshed signatures now expire well past the probe time
    for rrset in zone.store().rrsets() {
        for sig in rrset.rrsigs() {
            let rrsig = sig
                .rdata()
                .as_dnssec()
                .and_then(|dnssec| dnssec.as_rrsig())
                .unwrap();
            assert!(i64::from(rrsig.sig_expiration().get()) > near_expiry.timestamp());
        }
    }
}

#[test]
fn concurrent_mutations_keep_journal_and_chain_consistent() {
    let zone = Arc::new(signed_zone());
    let before = zone.serial();

    std::thread::scope(|scope| {
        let left = Arc::clone(&zone);
        let right = Arc::clone(&zone);
        scope.spawn(move || left.add_record(a_record("left.example.", 1)).unwrap());
        scope.spawn(move || right.add_record(a_record("right.example.", 2)).unwrap());
    });

    // both commits landed, serials one apart
    assert_eq!(zone.serial(), before.next().next());
    let commits = zone.journal().commits();
    let recent = &commits[commits.len() - 2..];
    assert_eq!(recent[0].new_serial, recent[1].old_serial);

    // the denial chain is a single cycle covering both new owners
    let nsec_owners: Vec<LowerName> = zone
        .store()
        .keys()
        .into_iter()
        .filter(|key| key.record_type == RecordType::NSEC)
        .map(|key| key.name)
        .collect();
    assert_eq!(nsec_owners.len(), 3);

    let mut cursor = nsec_owners[0].clone();
    let mut visited = Vec::new();
    loop {
        let rrset = zone.store().get(&cursor, RecordType::NSEC).unwrap();
        let record = rrset.records().next().unwrap();
        let RData::DNSSEC(DNSSECRData::NSEC(nsec)) = record.rdata() else {
            panic!("not NSEC");
        };
        visited.push(cursor.clone());
        cursor = LowerName::from(nsec.next_domain_name().clone());
        if cursor == nsec_owners[0] {
            break;
        }
        assert!(visited.len() <= nsec_owners.len(), "chain does not close");
    }
    assert_eq!(visited.len(), nsec_owners.len());
}

#[tokio::test(start_paused = true)]
async fn maintenance_driver_ticks_and_shuts_down() {
    use pecan_dns::MaintenanceDriver;
    use support::StaticResolver;

    let zone = Arc::new(signed_zone());
    let resolver = StaticResolver::with_answers(Vec::new());

    let driver = MaintenanceDriver::spawn(Arc::clone(&zone), resolver, None);

    // past the initial 30 s delay, the first tick activates the ready ZSK
    tokio::time::sleep(Duration::from_secs(35)).await;
    assert_eq!(key_of(&zone, KeyKind::Zsk).state, KeyState::Active);

    driver.shutdown().await;
}
