//! Resource Record Definitions for DNS

mod record;
mod rset;
mod sequence;
mod ttl;

pub use self::record::{Record, RecordInfo};
pub use self::rset::{Mismatch, RecordSet, RrsetDelta};
pub use self::sequence::SerialNumber;
pub use self::ttl::TimeToLive;

use hickory_proto::rr::RecordType;

/// DNS Name with case preserved.
pub use hickory_proto::rr::Name;

/// DNS Name converted to the canonical lowercase form.
pub use hickory_proto::rr::LowerName;

/// Application-defined record type, carried for unsigned zones only.
pub const APP: RecordType = RecordType::Unknown(65280);

/// Conditional-forwarder record type, unsupported in primary zones.
pub const FWD: RecordType = RecordType::Unknown(65281);

/// Trait for converting pecan-dns types to their hickory-dns equivalents
///
/// This trait provides a consistent interface for converting internal types
/// to their hickory-dns counterparts, enabling compatibility with the
/// hickory-dns ecosystem.
pub trait AsHickory {
    /// The corresponding hickory-dns type
    type Hickory;

    /// Convert this type to its hickory-dns equivalent
    fn as_hickory(&self) -> Self::Hickory;
}

/// Record types that the zone manager maintains itself and that cannot be
/// set, added or deleted through the facade.
pub fn is_dnssec_internal(rtype: RecordType) -> bool {
    matches!(
        rtype,
        RecordType::DNSKEY
            | RecordType::RRSIG
            | RecordType::NSEC
            | RecordType::NSEC3
            | RecordType::NSEC3PARAM
    )
}
