use std::path::PathBuf;
use std::time::Duration;

use checkpoint_publisher::config::{self, PublisherConfig};

fn example_path() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("../../configs/publisher.example.toml")
}

#[test]
fn example_config_defers_ledger_and_node_to_env() {
    let doc = config::load(&example_path()).expect("load example config");
    let cfg = PublisherConfig::from_doc(&doc).expect("deserialize example config");

    assert_eq!(cfg.batch_size().expect("batch size"), 1000);
    assert_eq!(cfg.poll_interval().expect("poll"), Duration::from_secs(5));
    assert_eq!(cfg.ledger.path, None);
    assert_eq!(cfg.ledger.path_env.as_deref(), Some("CHECKPOINT_FILE"));
    assert_eq!(cfg.ledger.delay_days, None);
    assert_eq!(cfg.ledger.delay_days_env.as_deref(), Some("CHECKPOINT_DELAY"));
    assert_eq!(cfg.ipfs.api_url, "");
    assert_eq!(cfg.ipfs.api_url_env.as_deref(), Some("IPFS_API_URL"));
    assert_eq!(cfg.pinata.api_key_env.as_deref(), Some("PINATA_API_KEY"));
    assert_eq!(
        cfg.cloudflare.subdomain_env.as_deref(),
        Some("CLOUDFLARE_SUBDOMAIN")
    );
}
