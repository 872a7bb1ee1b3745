use std::time::Duration;

use chrono::{DateTime, Utc};
use hickory_proto::dnssec::rdata::{DNSSECRData, RRSIG, SIG};
use hickory_proto::dnssec::{SigSigner, TBS};
use hickory_proto::rr::{DNSClass, LowerName, RData, RecordType};

use crate::dnssec::keys::{DnssecKey, KeyKind, KeyState};
use crate::error::ZoneError;
use crate::rr::{APP, AsHickory as _, Record, RecordSet};

/// Signatures are backdated by an hour to absorb clock skew between the
/// primary and validating resolvers.
pub(crate) const INCEPTION_OFFSET: Duration = Duration::from_secs(3600);

/// RRSIG lifetime: the zone's SOA EXPIRE plus three days, so secondaries
/// that are about to expire the zone still hold valid signatures.
pub fn validity_period(soa_expire: Duration) -> Duration {
    soa_expire + Duration::from_secs(3 * 86400)
}

/// How often the maintenance driver sweeps for stale RRSIGs, and the
/// remaining-lifetime threshold below which a signature is regenerated.
pub fn refresh_interval(validity: Duration) -> Duration {
    validity / 10
}

/// The keys allowed to sign a record set of this type.
///
/// The DNSKEY set is signed by key-signing keys through their whole
/// published life, including revocation (RFC 5011); everything else is
/// signed by zone-signing keys that are ready or active.
pub fn eligible_keys(keys: &[DnssecKey], rtype: RecordType) -> Vec<&DnssecKey> {
    keys.iter()
        .filter(|key| match rtype {
            RecordType::DNSKEY => {
                key.kind() == KeyKind::Ksk
                    && matches!(
                        key.state(),
                        KeyState::Published
                            | KeyState::Ready
                            | KeyState::Active
                            | KeyState::Revoked
                    )
            }
            _ => {
                key.kind() == KeyKind::Zsk
                    && matches!(key.state(), KeyState::Ready | KeyState::Active)
            }
        })
        .collect()
}

/// Whether this record set takes a signature at all.
///
/// Referral NS sets below the apex are served unsigned; the covering NSEC
/// proves the delegation. Application-defined types cannot exist in a
/// signed zone in the first place.
pub fn is_signable(origin: &LowerName, rrset: &RecordSet) -> Result<bool, ZoneError> {
    match rrset.record_type() {
        RecordType::ANAME => Err(ZoneError::UnsupportedInSignedZone("ANAME")),
        rtype if rtype == APP => Err(ZoneError::UnsupportedInSignedZone("APP")),
        RecordType::RRSIG => Ok(false),
        RecordType::NS => Ok(&LowerName::from(rrset.name()) == origin),
        _ => Ok(true),
    }
}

/// Produce fresh RRSIGs for a record set under the given signers.
///
/// Existing signatures are discarded first. Every signer contributes one
/// RRSIG over the whole set.
pub fn sign_rrset(
    rr_set: &mut RecordSet,
    signers: &[SigSigner],
    inception: DateTime<Utc>,
    expiration: DateTime<Utc>,
    zone_class: DNSClass,
) -> Result<(), ZoneError> {
    rr_set.clear_rrsigs();

    let rrsig_temp = Record::update0(rr_set.name().clone(), rr_set.ttl(), RecordType::RRSIG);

    for signer in signers {
        tracing::debug!(
            "signing rr_set: {}, {} with: {}",
            rr_set.name(),
            rr_set.record_type(),
            signer.key().algorithm(),
        );

        let records: Vec<_> = rr_set.records().map(|rr| rr.as_hickory()).collect();
        let tbs = TBS::from_sig(
            rr_set.name(),
            zone_class,
            &SIG::new(
                rr_set.record_type(),
                signer.key().algorithm(),
                rr_set.name().num_labels(),
                rr_set.ttl().into(),
                expiration.timestamp() as u32,
                inception.timestamp() as u32,
                signer.calculate_key_tag()?,
                signer.signer_name().clone(),
                Vec::new(), // thrown away for the to-be-signed form
            ),
            records.iter(),
        )?;

        let signature = signer.sign(&tbs)?;

        let mut rrsig = rrsig_temp.clone();
        rrsig.set_data(RData::DNSSEC(DNSSECRData::RRSIG(RRSIG::new(
            rr_set.record_type(),
            signer.key().algorithm(),
            rr_set.name().num_labels(),
            rr_set.ttl().into(),
            expiration.timestamp() as u32,
            inception.timestamp() as u32,
            signer.calculate_key_tag()?,
            signer.signer_name().clone(),
            signature,
        ))));

        rr_set
            .insert_rrsig(rrsig)
            .map_err(|error| ZoneError::invalid(error.to_string()))?;
    }

    Ok(())
}

/// Whether an RRSIG's remaining lifetime has fallen below the refresh
/// threshold.
pub fn needs_refresh(rrsig: &Record, now: DateTime<Utc>, threshold: Duration) -> bool {
    let Some(sig) = rrsig
        .rdata()
        .as_dnssec()
        .and_then(|dnssec| dnssec.as_rrsig())
    else {
        return false;
    };
    let expiration = i64::from(sig.sig_expiration().get());
    let remaining = expiration - now.timestamp();
    remaining < threshold.as_secs() as i64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rr::{Name, TimeToLive};
    use chrono::TimeDelta;
    use hickory_proto::dnssec::Algorithm;
    use hickory_proto::rr::rdata::{A, NS};
    use zeroize::Zeroizing;

    fn key_in_state(kind: KeyKind, state: KeyState) -> DnssecKey {
        let now = Utc::now();
        let fresh = DnssecKey::generate(kind, Algorithm::ECDSAP256SHA256, 0, now).unwrap();
        DnssecKey::from_material(
            kind,
            Algorithm::ECDSAP256SHA256,
            Zeroizing::new(fresh.pkcs8().to_vec()),
            state,
            now,
            0,
            false,
            false,
        )
        .unwrap()
    }

    #[test]
    fn test_dnskey_signed_by_ksks_only() {
        let keys = vec![
            key_in_state(KeyKind::Ksk, KeyState::Published),
            key_in_state(KeyKind::Ksk, KeyState::Generated),
            key_in_state(KeyKind::Zsk, KeyState::Active),
        ];

        let eligible = eligible_keys(&keys, RecordType::DNSKEY);
        assert_eq!(eligible.len(), 1);
        assert_eq!(eligible[0].kind(), KeyKind::Ksk);
    }

    #[test]
    fn test_other_rrsets_signed_by_ready_or_active_zsks() {
        let keys = vec![
            key_in_state(KeyKind::Ksk, KeyState::Active),
            key_in_state(KeyKind::Zsk, KeyState::Ready),
            key_in_state(KeyKind::Zsk, KeyState::Retired),
        ];

        let eligible = eligible_keys(&keys, RecordType::A);
        assert_eq!(eligible.len(), 1);
        assert_eq!(eligible[0].kind(), KeyKind::Zsk);
        assert_eq!(eligible[0].state(), KeyState::Ready);
    }

    #[test]
    fn test_referral_ns_is_not_signable() {
        let origin = LowerName::from(Name::from_utf8("example.").unwrap());

        let apex_ns = RecordSet::from_record(
            Name::from_utf8("example.").unwrap(),
            Record::from_rdata(
                Name::from_utf8("example.").unwrap(),
                TimeToLive::from(3600),
                RData::NS(NS(Name::from_utf8("ns1.example.").unwrap())),
            ),
        );
        assert!(is_signable(&origin, &apex_ns).unwrap());

        let referral = RecordSet::from_record(
            Name::from_utf8("child.example.").unwrap(),
            Record::from_rdata(
                Name::from_utf8("child.example.").unwrap(),
                TimeToLive::from(3600),
                RData::NS(NS(Name::from_utf8("ns1.child.example.").unwrap())),
            ),
        );
        assert!(!is_signable(&origin, &referral).unwrap());
    }

    #[test]
    fn test_aname_rejected_in_signed_zone() {
        let origin = LowerName::from(Name::from_utf8("example.").unwrap());
        let rrset = RecordSet::new(Name::from_utf8("web.example.").unwrap(), RecordType::ANAME);
        assert!(matches!(
            is_signable(&origin, &rrset),
            Err(ZoneError::UnsupportedInSignedZone("ANAME"))
        ));
    }

    #[test]
    fn test_sign_rrset_produces_one_rrsig_per_signer() {
        let origin = Name::from_utf8("example.").unwrap();
        let zsk = key_in_state(KeyKind::Zsk, KeyState::Active);
        let signer = zsk
            .signer(origin.clone(), Duration::from_secs(86400))
            .unwrap();

        let mut rrset = RecordSet::from_record(
            Name::from_utf8("web.example.").unwrap(),
            Record::from_rdata(
                Name::from_utf8("web.example.").unwrap(),
                TimeToLive::from(300),
                RData::A(A::new(192, 0, 2, 1)),
            ),
        );

        let inception = Utc::now() - INCEPTION_OFFSET;
        let expiration = inception + validity_period(Duration::from_secs(604800));
        sign_rrset(&mut rrset, &[signer], inception, expiration, DNSClass::IN).unwrap();

        assert_eq!(rrset.rrsigs().len(), 1);
        let rrsig = rrset.rrsigs()[0]
            .rdata()
            .as_dnssec()
            .and_then(|dnssec| dnssec.as_rrsig())
            .unwrap();
        assert_eq!(rrsig.type_covered(), RecordType::A);
        assert_eq!(rrsig.key_tag(), zsk.tag());
    }

    #[test]
    fn test_needs_refresh_threshold() {
        let origin = Name::from_utf8("example.").unwrap();
        let zsk = key_in_state(KeyKind::Zsk, KeyState::Active);
        let signer = zsk.signer(origin, Duration::from_secs(86400)).unwrap();

        let mut rrset = RecordSet::from_record(
            Name::from_utf8("web.example.").unwrap(),
            Record::from_rdata(
                Name::from_utf8("web.example.").unwrap(),
                TimeToLive::from(300),
                RData::A(A::new(192, 0, 2, 1)),
            ),
        );

        let now = Utc::now();
        let inception = now - INCEPTION_OFFSET;
        let expiration = now + TimeDelta::seconds(1000);
        sign_rrset(&mut rrset, &[signer], inception, expiration, DNSClass::IN).unwrap();

        let rrsig = &rrset.rrsigs()[0];
        assert!(!needs_refresh(rrsig, now, Duration::from_secs(500)));
        assert!(needs_refresh(rrsig, now, Duration::from_secs(2000)));
    }
}
