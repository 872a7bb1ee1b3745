//! # pecan-dns
//!
//! A DNSSEC-signed primary zone manager. The crate owns the lifecycle of an
//! authoritative zone: its record store and SOA serial discipline, the
//! DNSSEC key store and key-rollover state machine, RRSIG production and
//! refresh, NSEC/NSEC3 denial chains, and the commit journal secondaries
//! replay over IXFR.
//!
//! It is a library surface: wire transport, the query engine and on-disk
//! persistence live in the host server and are reached through the traits
//! in [`external`].

pub mod dnssec;
pub mod error;
pub mod external;
pub mod maintenance;
pub mod persist;
pub mod rr;
pub mod zone;

pub use self::dnssec::{DnssecStatus, Nsec3Params};
pub use self::error::ZoneError;
pub use self::maintenance::MaintenanceDriver;
pub use self::zone::{DenialConfig, SigningConfig, Zone, ZonePolicy};

#[cfg(test)]
/// Registers a global default tracing subscriber when called for the first time. This is intended
/// for use in tests.
pub(crate) fn subscribe() {
    use std::sync::Once;
    static INSTALL_TRACING_SUBSCRIBER: Once = Once::new();
    INSTALL_TRACING_SUBSCRIBER.call_once(|| {
        let subscriber = tracing_subscriber::FmtSubscriber::builder()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .finish();
        tracing::subscriber::set_global_default(subscriber).unwrap();
    });
}
