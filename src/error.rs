use std::io;

use hickory_proto::ProtoError;
use hickory_proto::dnssec::DnsSecError;

/// Errors surfaced by zone mutations, signing operations and key management.
#[derive(Debug, thiserror::Error)]
pub enum ZoneError {
    #[error("zone is already signed")]
    AlreadySigned,

    #[error("zone is not signed")]
    NotSigned,

    #[error("unsupported algorithm: {0}")]
    UnsupportedAlgorithm(String),

    #[error("{0} out of range")]
    OutOfRange(&'static str),

    #[error("{0} is not supported in a signed zone")]
    UnsupportedInSignedZone(&'static str),

    #[error("invalid operation at the zone apex: {0}")]
    InvalidApexOperation(&'static str),

    #[error("no eligible signing key for this record set")]
    NoSigningKey,

    #[error("retiring this key would leave the zone without a usable successor")]
    NoSuccessorKey,

    #[error("could not find an unused key tag after {0} attempts")]
    KeyTagCollision(u32),

    #[error("no key with tag {0} in the key store")]
    KeyNotFound(u16),

    #[error("DNSKEY with tag {0} is already published")]
    DuplicatePublish(u16),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("I/O failure: {0}")]
    IOFailure(#[from] io::Error),

    #[error("concurrent update lost the race, retry the operation")]
    TransientConflict,

    #[error("unsupported persisted zone format (version {0})")]
    UnsupportedFormat(u8),

    #[error(transparent)]
    Proto(#[from] ProtoError),

    #[error(transparent)]
    DnsSec(#[from] DnsSecError),
}

impl ZoneError {
    pub(crate) fn invalid(message: impl Into<String>) -> Self {
        Self::InvalidInput(message.into())
    }
}
