#![allow(unused)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, Once};

use async_trait::async_trait;
use hickory_proto::rr::rdata::SOA;
use hickory_proto::rr::{Name, RecordType};

use pecan_dns::error::ZoneError;
use pecan_dns::external::{DirectQuery, Notifier};
use pecan_dns::rr::{Record, TimeToLive};
use pecan_dns::zone::Zone;

/// Registers a global default tracing subscriber when called for the first time. This is intended
/// for use in tests.
pub fn subscribe() {
    static INSTALL_TRACING_SUBSCRIBER: Once = Once::new();
    INSTALL_TRACING_SUBSCRIBER.call_once(|| {
        let subscriber = tracing_subscriber::FmtSubscriber::builder()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .finish();
        tracing::subscriber::set_global_default(subscriber).unwrap();
    });
}

pub fn name(value: &str) -> Name {
    Name::from_utf8(value).unwrap()
}

/// The example. zone from the interoperability scenarios:
/// SOA(serial=1, refresh=900, retry=300, expire=604800, minimum=900).
pub fn example_zone() -> Zone {
    subscribe();
    example_zone_with_serial(1)
}

pub fn example_zone_with_serial(serial: u32) -> Zone {
    subscribe();
    let apex = name("example.");
    let soa = SOA::new(
        name("ns1.example."),
        name("hostmaster.example."),
        serial,
        900,
        300,
        604800,
        900,
    );
    Zone::new(
        apex.clone(),
        Record::from_rdata(apex, TimeToLive::from(900), soa),
    )
}

pub fn a_record(owner: &str, last_octet: u8) -> Record {
    a_record_ttl(owner, last_octet, 300)
}

pub fn a_record_ttl(owner: &str, last_octet: u8, ttl: u32) -> Record {
    Record::from_rdata(
        name(owner),
        TimeToLive::from(ttl),
        hickory_proto::rr::RData::A(hickory_proto::rr::rdata::A::new(192, 0, 2, last_octet)),
    )
}

pub fn ns_record(owner: &str, target: &str) -> Record {
    Record::from_rdata(
        name(owner),
        TimeToLive::from(3600),
        hickory_proto::rr::RData::NS(hickory_proto::rr::rdata::NS(name(target))),
    )
}

/// Counts notify triggers.
#[derive(Default)]
pub struct CountingNotifier {
    pub notifies: AtomicUsize,
    pub disabled: AtomicUsize,
}

impl Notifier for CountingNotifier {
    fn trigger_notify(&self) {
        self.notifies.fetch_add(1, Ordering::SeqCst);
    }

    fn disable_notify_timer(&self) {
        self.disabled.fetch_add(1, Ordering::SeqCst);
    }
}

/// A direct-query stub serving a configured parent answer set.
#[derive(Default)]
pub struct StaticResolver {
    answers: Mutex<Vec<hickory_proto::rr::Record>>,
    pub purges: AtomicUsize,
}

impl StaticResolver {
    pub fn with_answers(answers: Vec<hickory_proto::rr::Record>) -> Arc<Self> {
        Arc::new(Self {
            answers: Mutex::new(answers),
            purges: AtomicUsize::new(0),
        })
    }

    pub fn set_answers(&self, answers: Vec<hickory_proto::rr::Record>) {
        *self.answers.lock().unwrap() = answers;
    }
}

#[async_trait]
impl DirectQuery for StaticResolver {
    async fn query(
        &self,
        _name: Name,
        _rtype: RecordType,
    ) -> Result<Vec<hickory_proto::rr::Record>, ZoneError> {
        Ok(self.answers.lock().unwrap().clone())
    }

    fn purge(&self, _name: &Name, _rtype: RecordType) {
        self.purges.fetch_add(1, Ordering::SeqCst);
    }
}
