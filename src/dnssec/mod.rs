//! DNSSEC machinery for primary zones: key lifecycle, signing and
//! authenticated denial of existence.

pub mod denial;
pub mod keys;
pub mod signer;
pub mod state;

pub use self::denial::{MAX_NSEC3_ITERATIONS, MAX_NSEC3_SALT_LEN, Nsec3Params};
pub use self::keys::{DnssecKey, KeyKind, KeyState, KeyStore, KeyView};
pub use self::state::{MaintenancePlan, TickContext};

/// Whether and how a zone is signed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DnssecStatus {
    Unsigned,
    SignedWithNsec,
    SignedWithNsec3,
}

impl DnssecStatus {
    pub fn is_signed(&self) -> bool {
        !matches!(self, DnssecStatus::Unsigned)
    }
}
