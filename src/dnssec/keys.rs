use std::collections::BTreeMap;
use std::fmt;
use std::sync::Mutex;
use std::time::Duration;

use chrono::{DateTime, Utc};
use hickory_proto::dnssec::crypto::{EcdsaSigningKey, Ed25519SigningKey, signing_key_from_der};
use hickory_proto::dnssec::rdata::DNSKEY;
use hickory_proto::dnssec::{Algorithm, PublicKeyBuf, SigSigner};
use hickory_proto::rr::Name;
use rustls_pki_types::PrivateKeyDer;
use zeroize::Zeroizing;

use crate::error::ZoneError;

/// How many fresh keys are generated before giving up on an unused key tag.
const KEY_TAG_ATTEMPTS: u32 = 5;

/// The purpose of a DNSSEC key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum KeyKind {
    /// Key-signing key: signs the DNSKEY record set only.
    Ksk,
    /// Zone-signing key: signs everything else.
    Zsk,
}

impl fmt::Display for KeyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeyKind::Ksk => write!(f, "KSK"),
            KeyKind::Zsk => write!(f, "ZSK"),
        }
    }
}

/// Lifecycle state of a DNSSEC key.
///
/// Keys only ever move forward through these states; the numeric rank
/// enforces that.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum KeyState {
    Generated,
    Published,
    Ready,
    Active,
    Retired,
    Revoked,
    Dead,
}

impl KeyState {
    pub(crate) fn rank(self) -> u8 {
        match self {
            KeyState::Generated => 0,
            KeyState::Published => 1,
            KeyState::Ready => 2,
            KeyState::Active => 3,
            KeyState::Retired => 4,
            KeyState::Revoked => 5,
            KeyState::Dead => 6,
        }
    }
}

impl fmt::Display for KeyState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            KeyState::Generated => "generated",
            KeyState::Published => "published",
            KeyState::Ready => "ready",
            KeyState::Active => "active",
            KeyState::Retired => "retired",
            KeyState::Revoked => "revoked",
            KeyState::Dead => "dead",
        };
        write!(f, "{name}")
    }
}

/// A zone's private signing key together with its lifecycle metadata.
#[derive(Clone)]
pub struct DnssecKey {
    kind: KeyKind,
    algorithm: Algorithm,
    tag: u16,
    dnskey: DNSKEY,
    pkcs8: Zeroizing<Vec<u8>>,
    state: KeyState,
    state_changed_on: DateTime<Utc>,
    rollover_days: u16,
    is_retiring: bool,
}

impl fmt::Debug for DnssecKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DnssecKey")
            .field("kind", &self.kind)
            .field("algorithm", &self.algorithm)
            .field("tag", &self.tag)
            .field("state", &self.state)
            .field("state_changed_on", &self.state_changed_on)
            .field("is_retiring", &self.is_retiring)
            .finish()
    }
}

impl DnssecKey {
    /// Generate a fresh private key of the given kind and algorithm.
    pub fn generate(
        kind: KeyKind,
        algorithm: Algorithm,
        rollover_days: u16,
        now: DateTime<Utc>,
    ) -> Result<Self, ZoneError> {
        let pkcs8 = match algorithm {
            Algorithm::ECDSAP256SHA256 | Algorithm::ECDSAP384SHA384 => {
                EcdsaSigningKey::generate_pkcs8(algorithm)?
            }
            Algorithm::ED25519 => Ed25519SigningKey::generate_pkcs8()?,
            other => return Err(ZoneError::UnsupportedAlgorithm(other.to_string())),
        };
        let material = Zeroizing::new(pkcs8.secret_pkcs8_der().to_vec());

        Self::from_material(
            kind,
            algorithm,
            material,
            KeyState::Generated,
            now,
            rollover_days,
            false,
            false,
        )
    }

    /// Reconstruct a key from persisted material and metadata.
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn from_material(
        kind: KeyKind,
        algorithm: Algorithm,
        pkcs8: Zeroizing<Vec<u8>>,
        state: KeyState,
        state_changed_on: DateTime<Utc>,
        rollover_days: u16,
        is_retiring: bool,
        revoked: bool,
    ) -> Result<Self, ZoneError> {
        let private = PrivateKeyDer::try_from(pkcs8.as_slice())
            .map_err(|error| ZoneError::invalid(format!("unreadable key material: {error}")))?;
        let key = signing_key_from_der(&private, algorithm)?;
        let public: PublicKeyBuf = key.to_public_key()?;
        let dnskey = DNSKEY::new(true, kind == KeyKind::Ksk, revoked, public);
        let tag = dnskey.calculate_key_tag()?;

        Ok(Self {
            kind,
            algorithm,
            tag,
            dnskey,
            pkcs8,
            state,
            state_changed_on,
            rollover_days,
            is_retiring,
        })
    }

    pub fn kind(&self) -> KeyKind {
        self.kind
    }

    pub fn algorithm(&self) -> Algorithm {
        self.algorithm
    }

    /// The 16-bit tag identifying this key within the store.
    pub fn tag(&self) -> u16 {
        self.tag
    }

    /// The public DNSKEY rdata for this key.
    pub fn dnskey(&self) -> &DNSKEY {
        &self.dnskey
    }

    pub(crate) fn pkcs8(&self) -> &[u8] {
        &self.pkcs8
    }

    pub fn state(&self) -> KeyState {
        self.state
    }

    pub fn state_changed_on(&self) -> DateTime<Utc> {
        self.state_changed_on
    }

    pub fn rollover_days(&self) -> u16 {
        self.rollover_days
    }

    pub fn set_rollover_days(&mut self, days: u16) {
        self.rollover_days = days;
    }

    pub fn is_retiring(&self) -> bool {
        self.is_retiring
    }

    pub(crate) fn set_retiring(&mut self) {
        self.is_retiring = true;
    }

    pub fn revoked(&self) -> bool {
        self.dnskey.revoke()
    }

    /// Advance this key to a later lifecycle state.
    pub(crate) fn transition(
        &mut self,
        state: KeyState,
        now: DateTime<Utc>,
    ) -> Result<(), ZoneError> {
        if state.rank() <= self.state.rank() {
            return Err(ZoneError::invalid(format!(
                "key {tag} cannot move from {from} to {to}",
                tag = self.tag,
                from = self.state,
                to = state,
            )));
        }
        self.state = state;
        self.state_changed_on = now;
        Ok(())
    }

    /// Set the revoke flag on the public DNSKEY, recomputing the key tag.
    ///
    /// The tag covers the flags field, so revocation changes it (RFC 5011).
    /// Returns the new tag.
    pub(crate) fn revoke(&mut self) -> Result<u16, ZoneError> {
        let private = PrivateKeyDer::try_from(self.pkcs8.as_slice())
            .map_err(|error| ZoneError::invalid(format!("unreadable key material: {error}")))?;
        let key = signing_key_from_der(&private, self.algorithm)?;
        let public: PublicKeyBuf = key.to_public_key()?;
        self.dnskey = DNSKEY::new(true, self.kind == KeyKind::Ksk, true, public);
        self.tag = self.dnskey.calculate_key_tag()?;
        Ok(self.tag)
    }

    /// Build a signer over this key bound to the zone apex.
    pub(crate) fn signer(
        &self,
        origin: Name,
        sig_duration: Duration,
    ) -> Result<SigSigner, ZoneError> {
        let private = PrivateKeyDer::try_from(self.pkcs8.as_slice())
            .map_err(|error| ZoneError::invalid(format!("unreadable key material: {error}")))?;
        let key = signing_key_from_der(&private, self.algorithm)?;
        Ok(SigSigner::dnssec(
            self.dnskey.clone(),
            key,
            origin,
            sig_duration,
        ))
    }
}

/// Operator-facing snapshot of one key's lifecycle metadata.
#[derive(Debug, Clone)]
pub struct KeyView {
    pub kind: KeyKind,
    pub algorithm: Algorithm,
    pub tag: u16,
    pub state: KeyState,
    pub state_changed_on: DateTime<Utc>,
    pub rollover_days: u16,
    pub is_retiring: bool,
    pub revoked: bool,
}

impl From<&DnssecKey> for KeyView {
    fn from(key: &DnssecKey) -> Self {
        Self {
            kind: key.kind(),
            algorithm: key.algorithm(),
            tag: key.tag(),
            state: key.state(),
            state_changed_on: key.state_changed_on(),
            rollover_days: key.rollover_days(),
            is_retiring: key.is_retiring(),
            revoked: key.revoked(),
        }
    }
}

/// Key-tag indexed store of a zone's private keys.
///
/// The interior mutex is held only around map inspection and mutation, never
/// across I/O or signing.
#[derive(Debug, Default)]
pub struct KeyStore {
    keys: Mutex<BTreeMap<u16, DnssecKey>>,
}

impl KeyStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a key, rejecting tag collisions.
    pub fn insert(&self, key: DnssecKey) -> Result<(), ZoneError> {
        let mut keys = self.keys.lock().expect("key store poisoned");
        if keys.contains_key(&key.tag()) {
            return Err(ZoneError::KeyTagCollision(1));
        }
        keys.insert(key.tag(), key);
        Ok(())
    }

    /// Generate a key and insert it, retrying tag collisions.
    pub fn generate(
        &self,
        kind: KeyKind,
        algorithm: Algorithm,
        rollover_days: u16,
        now: DateTime<Utc>,
    ) -> Result<u16, ZoneError> {
        for _ in 0..KEY_TAG_ATTEMPTS {
            let key = DnssecKey::generate(kind, algorithm, rollover_days, now)?;
            let tag = key.tag();
            let mut keys = self.keys.lock().expect("key store poisoned");
            if keys.contains_key(&tag) {
                tracing::debug!("key tag {tag} already in use, regenerating");
                continue;
            }
            keys.insert(tag, key);
            return Ok(tag);
        }
        Err(ZoneError::KeyTagCollision(KEY_TAG_ATTEMPTS))
    }

    pub fn get(&self, tag: u16) -> Option<DnssecKey> {
        self.keys.lock().expect("key store poisoned").get(&tag).cloned()
    }

    pub fn remove(&self, tag: u16) -> Option<DnssecKey> {
        self.keys.lock().expect("key store poisoned").remove(&tag)
    }

    pub fn len(&self) -> usize {
        self.keys.lock().expect("key store poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.lock().expect("key store poisoned").is_empty()
    }

    /// Clone of every key, in tag order.
    pub fn snapshot(&self) -> Vec<DnssecKey> {
        self.keys
            .lock()
            .expect("key store poisoned")
            .values()
            .cloned()
            .collect()
    }

    /// Mutate the key with this tag in place.
    pub fn with_key_mut<R>(
        &self,
        tag: u16,
        f: impl FnOnce(&mut DnssecKey) -> Result<R, ZoneError>,
    ) -> Result<R, ZoneError> {
        let mut keys = self.keys.lock().expect("key store poisoned");
        let key = keys.get_mut(&tag).ok_or(ZoneError::KeyNotFound(tag))?;
        f(key)
    }

    /// Advance the key with this tag to a later state.
    pub fn transition(
        &self,
        tag: u16,
        state: KeyState,
        now: DateTime<Utc>,
    ) -> Result<(), ZoneError> {
        self.with_key_mut(tag, |key| key.transition(state, now))
    }

    /// Revoke a KSK, re-indexing it under the tag of the revoked DNSKEY.
    ///
    /// Returns the new tag.
    pub fn revoke(&self, tag: u16, now: DateTime<Utc>) -> Result<u16, ZoneError> {
        let mut keys = self.keys.lock().expect("key store poisoned");
        let mut key = keys.remove(&tag).ok_or(ZoneError::KeyNotFound(tag))?;
        key.revoke()?;
        key.transition(KeyState::Revoked, now)?;
        let new_tag = key.tag();
        if keys.contains_key(&new_tag) {
            // restore the original entry before failing
            keys.insert(tag, key);
            return Err(ZoneError::KeyTagCollision(1));
        }
        keys.insert(new_tag, key);
        Ok(new_tag)
    }

    pub fn views(&self) -> Vec<KeyView> {
        self.keys
            .lock()
            .expect("key store poisoned")
            .values()
            .map(KeyView::from)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn generate(kind: KeyKind) -> DnssecKey {
        DnssecKey::generate(kind, Algorithm::ECDSAP256SHA256, 90, Utc::now()).unwrap()
    }

    #[test]
    fn test_generate_zsk() {
        let key = generate(KeyKind::Zsk);
        assert_eq!(key.kind(), KeyKind::Zsk);
        assert_eq!(key.state(), KeyState::Generated);
        assert!(key.dnskey().zone_key());
        assert!(!key.dnskey().secure_entry_point());
        assert!(!key.revoked());
    }

    #[test]
    fn test_generate_ksk_sets_sep_flag() {
        let key = generate(KeyKind::Ksk);
        assert!(key.dnskey().secure_entry_point());
    }

    #[test]
    fn test_unsupported_algorithm() {
        let result = DnssecKey::generate(KeyKind::Zsk, Algorithm::RSASHA1, 0, Utc::now());
        assert!(matches!(result, Err(ZoneError::UnsupportedAlgorithm(_))));
    }

    #[test]
    fn test_transition_forward_only() {
        let mut key = generate(KeyKind::Zsk);
        key.transition(KeyState::Published, Utc::now()).unwrap();
        key.transition(KeyState::Ready, Utc::now()).unwrap();
        let backwards = key.transition(KeyState::Published, Utc::now());
        assert!(backwards.is_err());
        assert_eq!(key.state(), KeyState::Ready);
    }

    #[test]
    fn test_store_rejects_duplicate_tags() {
        let store = KeyStore::new();
        let key = generate(KeyKind::Zsk);
        let duplicate = key.clone();
        store.insert(key).unwrap();
        assert!(matches!(
            store.insert(duplicate),
            Err(ZoneError::KeyTagCollision(_))
        ));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_revoke_changes_tag() {
        let store = KeyStore::new();
        let mut key = generate(KeyKind::Ksk);
        key.transition(KeyState::Published, Utc::now()).unwrap();
        key.transition(KeyState::Ready, Utc::now()).unwrap();
        key.transition(KeyState::Active, Utc::now()).unwrap();
        key.transition(KeyState::Retired, Utc::now()).unwrap();
        let tag = key.tag();
        store.insert(key).unwrap();

        let new_tag = store.revoke(tag, Utc::now()).unwrap();
        assert_ne!(tag, new_tag);
        assert!(store.get(tag).is_none());

        let revoked = store.get(new_tag).unwrap();
        assert!(revoked.revoked());
        assert_eq!(revoked.state(), KeyState::Revoked);
    }

    #[test]
    fn test_signer_round_trip() {
        let key = generate(KeyKind::Zsk);
        let origin = Name::from_utf8("example.").unwrap();
        let signer = key
            .signer(origin, Duration::from_secs(86400))
            .unwrap();
        assert_eq!(signer.calculate_key_tag().unwrap(), key.tag());
    }
}
