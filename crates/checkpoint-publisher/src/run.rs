use std::path::PathBuf;
use std::time::Duration;

use tracing::info;

use crate::dnslink::DnsLinkPublisher;
use crate::error::{Error, Result};
use crate::ipfs::ContentStore;
use crate::ledger;
use crate::merger::{self, BlockSource};
use crate::pin::{PinRequest, PinService, PinSink, PinStatusMachine, SleepFn};

#[derive(Debug, Clone)]
pub struct RunSettings {
    pub ledger_path: PathBuf,
    pub delay_blocks: u64,
    pub batch_size: u64,
    pub display_name: String,
    pub poll_interval: Duration,
    pub announce_addresses: bool,
}

pub struct Collaborators<'a> {
    pub blocks: &'a dyn BlockSource,
    pub store: &'a dyn ContentStore,
    pub pins: &'a dyn PinService,
    pub dns: &'a dyn DnsLinkPublisher,
    pub sink: &'a dyn PinSink,
    pub sleep: SleepFn,
}

/// The stretch of chain one run appends to the ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RangePlan {
    pub watermark: u64,
    pub network_height: u64,
    pub checkpoints_stop: u64,
}

impl RangePlan {
    pub fn checkpoints_to_generate(&self) -> u64 {
        self.checkpoints_stop - self.watermark
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunReport {
    pub range: RangePlan,
    pub appended: usize,
    pub content_hash: String,
    pub dns_record_id: String,
}

/// Works out `(watermark, network_height - delay]`, failing when the ledger
/// is already past the delay window.
pub fn compute_range(watermark: u64, network_height: u64, delay_blocks: u64) -> Result<RangePlan> {
    let stop = i128::from(network_height) - i128::from(delay_blocks);
    if stop < i128::from(watermark) {
        return Err(Error::range(format!(
            "the current checkpoints file contains more blocks than the configured delay allows \
             (ledger at {watermark}, network at {network_height}, delay {delay_blocks} blocks)"
        )));
    }
    Ok(RangePlan {
        watermark,
        network_height,
        checkpoints_stop: stop as u64,
    })
}

/// Reads the ledger watermark and the network height and plans the range,
/// without fetching any checkpoints.
pub fn plan_range(settings: &RunSettings, blocks: &dyn BlockSource) -> Result<RangePlan> {
    let watermark = ledger::watermark(&settings.ledger_path)?;
    info!(delay = settings.delay_blocks, "block delay");
    info!(height = watermark, "starting from block");

    let network_height = blocks.network_height()?;
    info!(height = network_height, "network at block");

    compute_range(watermark, network_height, settings.delay_blocks)
}

/// Extends the ledger, publishes it, pins it remotely and repoints DNS.
///
/// All-or-nothing per stage: nothing is appended unless every batch was
/// fetched, and nothing is published past the first failure.
pub fn publish(settings: &RunSettings, c: &Collaborators<'_>) -> Result<RunReport> {
    c.dns.verify()?;
    info!("DNS credentials verified");
    c.pins.authenticate()?;
    info!("pin service credentials verified");

    let range = plan_range(settings, c.blocks)?;
    info!(
        stop = range.checkpoints_stop,
        blocks = range.checkpoints_to_generate(),
        "updating checkpoints"
    );

    let lines = merger::retrieve(
        c.blocks,
        range.watermark,
        range.checkpoints_stop,
        settings.batch_size,
    )?;
    let appended = lines.lines().count();
    if appended == 0 {
        info!("no new checkpoints; republishing existing ledger");
    } else {
        ledger::append(&settings.ledger_path, &lines)?;
        info!(
            path = %settings.ledger_path.display(),
            appended,
            "updated checkpoints"
        );
    }

    let content_hash = c.store.add_file(&settings.ledger_path)?;
    info!(hash = %content_hash, "added ledger to IPFS");

    let host_nodes = if settings.announce_addresses {
        c.store.host_addresses()?
    } else {
        Vec::new()
    };
    let req = PinRequest {
        content_hash: content_hash.clone(),
        display_name: settings.display_name.clone(),
        host_nodes,
    };
    PinStatusMachine::new(c.pins, c.sink)
        .with_poll_interval(settings.poll_interval)
        .with_sleep(c.sleep)
        .pin(&req)?;

    let dns_record_id = c.dns.publish(&content_hash)?;
    info!(hash = %content_hash, record = %dns_record_id, "updated DNSLink record");

    Ok(RunReport {
        range,
        appended,
        content_hash,
        dns_record_id,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::ledger::Checkpoint;
    use crate::pin::{PinEvent, RecordingSink};
    use std::cell::RefCell;
    use std::fs;
    use std::path::Path;

    fn hash(n: u64) -> String {
        format!("{n:064x}")
    }

    struct Chain {
        tip: u64,
        calls: RefCell<Vec<u64>>,
    }

    impl BlockSource for Chain {
        fn network_height(&self) -> Result<u64> {
            Ok(self.tip)
        }

        fn headers_up_to(&self, height: u64) -> Result<Vec<Checkpoint>> {
            self.calls.borrow_mut().push(height);
            Ok((height.saturating_sub(999)..=height)
                .map(|h| Checkpoint {
                    height: h,
                    hash: hash(h),
                })
                .collect())
        }
    }

    #[derive(Default)]
    struct Store {
        added: RefCell<Vec<PathBuf>>,
    }

    impl ContentStore for Store {
        fn add_file(&self, path: &Path) -> Result<String> {
            self.added.borrow_mut().push(path.to_path_buf());
            Ok("QmLedger".into())
        }

        fn host_addresses(&self) -> Result<Vec<String>> {
            Ok(vec!["/ip4/203.0.113.7/tcp/4001/p2p/QmNode".into()])
        }
    }

    #[derive(Default)]
    struct Pins {
        submitted: RefCell<Vec<PinRequest>>,
    }

    impl PinService for Pins {
        fn submit(&self, req: &PinRequest) -> Result<()> {
            self.submitted.borrow_mut().push(req.clone());
            Ok(())
        }

        fn pending_jobs(&self, _hash: &str) -> Result<u64> {
            Ok(0)
        }

        fn pinned_count(&self, _hash: &str) -> Result<u64> {
            Ok(1)
        }
    }

    #[derive(Default)]
    struct Dns {
        published: RefCell<Vec<String>>,
    }

    impl DnsLinkPublisher for Dns {
        fn publish(&self, hash: &str) -> Result<String> {
            self.published.borrow_mut().push(hash.to_string());
            Ok("rec-1".into())
        }
    }

    fn settings(path: PathBuf, delay_blocks: u64) -> RunSettings {
        RunSettings {
            ledger_path: path,
            delay_blocks,
            batch_size: 1000,
            display_name: "checkpoints.csv".into(),
            poll_interval: Duration::from_secs(5),
            announce_addresses: true,
        }
    }

    fn no_sleep(_: Duration) {}

    #[test]
    fn compute_range_scenarios() {
        let plan = compute_range(0, 5000, 2880).expect("range");
        assert_eq!(plan.checkpoints_stop, 2120);
        assert_eq!(plan.checkpoints_to_generate(), 2120);

        let err = compute_range(100, 90, 0).expect_err("ahead of delay");
        assert_eq!(err.kind(), ErrorKind::Range);
        assert!(err.to_string().contains("more blocks than the configured delay allows"));

        // Network younger than the delay window.
        assert_eq!(compute_range(0, 100, 2880).expect_err("young").kind(), ErrorKind::Range);
        assert_eq!(compute_range(50, 2930, 2880).expect("even").checkpoints_to_generate(), 0);
    }

    #[test]
    fn empty_ledger_publishes_full_range() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let path = tmp.path().join("checkpoints.csv");
        let chain = Chain {
            tip: 5000,
            calls: RefCell::new(Vec::new()),
        };
        let (store, pins, dns, sink) = (
            Store::default(),
            Pins::default(),
            Dns::default(),
            RecordingSink::default(),
        );
        let c = Collaborators {
            blocks: &chain,
            store: &store,
            pins: &pins,
            dns: &dns,
            sink: &sink,
            sleep: no_sleep,
        };

        let report = publish(&settings(path.clone(), 2880), &c).expect("publish");
        assert_eq!(
            report.range,
            RangePlan {
                watermark: 0,
                network_height: 5000,
                checkpoints_stop: 2120,
            }
        );
        assert_eq!(report.appended, 2120);
        assert_eq!(*chain.calls.borrow(), vec![120, 1120, 2120]);
        assert_eq!(ledger::watermark(&path).expect("watermark"), 2120);

        let body = fs::read_to_string(&path).expect("ledger");
        assert!(body.starts_with(&format!("1,{}\n", hash(1))));
        assert_eq!(body.lines().count(), 2120);

        assert_eq!(*store.added.borrow(), vec![path]);
        assert_eq!(pins.submitted.borrow()[0].content_hash, "QmLedger");
        assert_eq!(
            pins.submitted.borrow()[0].host_nodes,
            vec!["/ip4/203.0.113.7/tcp/4001/p2p/QmNode".to_string()]
        );
        assert_eq!(*dns.published.borrow(), vec!["QmLedger".to_string()]);
        assert_eq!(report.dns_record_id, "rec-1");
        assert_eq!(
            sink.events().last(),
            Some(&PinEvent::Pinned {
                hash: "QmLedger".into()
            })
        );
    }

    #[test]
    fn ledger_ahead_of_delay_fetches_nothing() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let path = tmp.path().join("checkpoints.csv");
        let original = format!("100,{}\n", hash(100));
        fs::write(&path, &original).expect("write ledger");

        let chain = Chain {
            tip: 90,
            calls: RefCell::new(Vec::new()),
        };
        let (store, pins, dns, sink) = (
            Store::default(),
            Pins::default(),
            Dns::default(),
            RecordingSink::default(),
        );
        let c = Collaborators {
            blocks: &chain,
            store: &store,
            pins: &pins,
            dns: &dns,
            sink: &sink,
            sleep: no_sleep,
        };

        let err = publish(&settings(path.clone(), 0), &c).expect_err("range error");
        assert_eq!(err.kind(), ErrorKind::Range);
        assert!(chain.calls.borrow().is_empty());
        assert!(store.added.borrow().is_empty());
        assert!(dns.published.borrow().is_empty());
        assert_eq!(fs::read_to_string(&path).expect("ledger"), original);
    }

    #[test]
    fn unparsable_ledger_aborts_before_fetch() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let path = tmp.path().join("checkpoints.csv");
        fs::write(&path, "garbage\n").expect("write ledger");
        let chain = Chain {
            tip: 5000,
            calls: RefCell::new(Vec::new()),
        };
        let err = plan_range(&settings(path, 0), &chain).expect_err("parse error");
        assert_eq!(err.kind(), ErrorKind::Parse);
        assert!(chain.calls.borrow().is_empty());
    }

    #[test]
    fn up_to_date_ledger_is_republished_unchanged() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let path = tmp.path().join("checkpoints.csv");
        let original = format!("2120,{}\n", hash(2120));
        fs::write(&path, &original).expect("write ledger");

        let chain = Chain {
            tip: 5000,
            calls: RefCell::new(Vec::new()),
        };
        let (store, pins, dns, sink) = (
            Store::default(),
            Pins::default(),
            Dns::default(),
            RecordingSink::default(),
        );
        let c = Collaborators {
            blocks: &chain,
            store: &store,
            pins: &pins,
            dns: &dns,
            sink: &sink,
            sleep: no_sleep,
        };

        let report = publish(&settings(path.clone(), 2880), &c).expect("publish");
        assert_eq!(report.appended, 0);
        assert!(chain.calls.borrow().is_empty());
        assert_eq!(fs::read_to_string(&path).expect("ledger"), original);
        assert_eq!(*dns.published.borrow(), vec!["QmLedger".to_string()]);
    }
}
