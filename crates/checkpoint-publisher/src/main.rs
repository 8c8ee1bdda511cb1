use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use checkpoint_publisher::Result;
use checkpoint_publisher::batcher;
use checkpoint_publisher::blockapi::HttpBlockSource;
use checkpoint_publisher::config::{self, ConfigDoc, PublisherConfig};
use checkpoint_publisher::dnslink::{CloudflareDnsLink, DnsLinkPublisher};
use checkpoint_publisher::ipfs::IpfsNode;
use checkpoint_publisher::pin::pinata::PinataClient;
use checkpoint_publisher::pin::{PinRequest, PinService, PinStatusMachine, TracingSink};
use checkpoint_publisher::run::{self, Collaborators, RunSettings};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(author, version, about)]
struct Args {
    /// Optional TOML config; secrets may still come from the environment
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    log_json: bool,
    #[command(subcommand)]
    cmd: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Extend the ledger, publish it to IPFS, pin it and update the DNSLink record
    Run,
    /// Print the range and batches the next run would fetch, without fetching
    Plan,
    /// Pin an existing content hash through the pin service and wait for it
    Pin {
        hash: String,
        /// Display name recorded with the pin (defaults to pinata.display_name)
        #[arg(long)]
        name: Option<String>,
    },
    /// Point the DNSLink record at a content hash
    Dnslink { hash: String },
}

fn main() -> ExitCode {
    dotenv::dotenv().ok();
    let args = Args::parse();
    init_logging(args.log_json);

    match dispatch(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!(kind = ?err.kind(), "{err}");
            ExitCode::FAILURE
        }
    }
}

fn init_logging(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

fn dispatch(args: Args) -> Result<()> {
    let doc = match args.config.as_deref() {
        Some(path) => config::load(path)?,
        None => ConfigDoc::empty(),
    };
    let cfg = PublisherConfig::from_doc(&doc)?;

    match args.cmd {
        Command::Run => cmd_run(&cfg),
        Command::Plan => cmd_plan(&cfg),
        Command::Pin { hash, name } => cmd_pin(&cfg, &hash, name),
        Command::Dnslink { hash } => cmd_dnslink(&cfg, &hash),
    }
}

fn run_settings(cfg: &PublisherConfig) -> Result<RunSettings> {
    Ok(RunSettings {
        ledger_path: cfg.ledger_path(),
        delay_blocks: cfg.delay_blocks()?,
        batch_size: cfg.batch_size()?,
        display_name: cfg.pinata.display_name.clone(),
        poll_interval: cfg.poll_interval()?,
        announce_addresses: cfg.ipfs.announce_addresses,
    })
}

fn block_source(cfg: &PublisherConfig) -> Result<HttpBlockSource> {
    HttpBlockSource::new(
        &cfg.block_api.base_url,
        Duration::from_secs(cfg.block_api.timeout_secs),
    )
}

fn pinata(cfg: &PublisherConfig) -> Result<PinataClient> {
    let (key, secret) = cfg.pinata_credentials()?;
    PinataClient::new(
        &cfg.pinata.base_url,
        &key,
        &secret,
        Duration::from_secs(cfg.pinata.timeout_secs),
    )
}

fn cloudflare(cfg: &PublisherConfig) -> Result<CloudflareDnsLink> {
    let (token, zone_id, subdomain) = cfg.cloudflare_target()?;
    CloudflareDnsLink::new(
        &cfg.cloudflare.base_url,
        &token,
        &zone_id,
        &subdomain,
        Duration::from_secs(cfg.cloudflare.timeout_secs),
    )
}

fn cmd_run(cfg: &PublisherConfig) -> Result<()> {
    // Missing credentials fail before any network call.
    let pins = pinata(cfg)?;
    let dns = cloudflare(cfg)?;
    let settings = run_settings(cfg)?;
    let blocks = block_source(cfg)?;
    let store = IpfsNode::new(
        &cfg.ipfs_api_url(),
        Duration::from_secs(cfg.ipfs.timeout_secs),
    )?;
    let sink = TracingSink;

    let report = run::publish(
        &settings,
        &Collaborators {
            blocks: &blocks,
            store: &store,
            pins: &pins,
            dns: &dns,
            sink: &sink,
            sleep: std::thread::sleep,
        },
    )?;

    if cfg.pinata.unpin_previous {
        let removed = pins.unpin_superseded(&report.content_hash, &settings.display_name)?;
        info!(count = removed.len(), "unpinned superseded ledgers");
    }

    info!(
        hash = %report.content_hash,
        appended = report.appended,
        stop = report.range.checkpoints_stop,
        "process complete"
    );
    Ok(())
}

fn cmd_plan(cfg: &PublisherConfig) -> Result<()> {
    let settings = run_settings(cfg)?;
    let blocks = block_source(cfg)?;
    let range = run::plan_range(&settings, &blocks)?;
    let batches = batcher::plan(range.watermark, range.checkpoints_stop, settings.batch_size)?;

    println!("ledger:          {}", settings.ledger_path.display());
    println!("watermark:       {}", range.watermark);
    println!("network height:  {}", range.network_height);
    println!("delay:           {} blocks", settings.delay_blocks);
    println!(
        "checkpoints:     ({}, {}] = {} blocks",
        range.watermark,
        range.checkpoints_stop,
        range.checkpoints_to_generate()
    );
    for (i, bound) in batches.iter().enumerate() {
        println!("{:>4}. headers up to {}", i + 1, bound);
    }
    Ok(())
}

fn cmd_pin(cfg: &PublisherConfig, hash: &str, name: Option<String>) -> Result<()> {
    let pins = pinata(cfg)?;
    pins.authenticate()?;
    let sink = TracingSink;
    let req = PinRequest {
        content_hash: hash.trim().to_string(),
        display_name: name.unwrap_or_else(|| cfg.pinata.display_name.clone()),
        host_nodes: Vec::new(),
    };
    let pinned = PinStatusMachine::new(&pins, &sink)
        .with_poll_interval(cfg.poll_interval()?)
        .pin(&req)?;
    info!(hash = %pinned, "pinned");
    Ok(())
}

fn cmd_dnslink(cfg: &PublisherConfig, hash: &str) -> Result<()> {
    let dns = cloudflare(cfg)?;
    dns.verify()?;
    let id = dns.publish(hash.trim())?;
    info!(record = %id, hash, "updated DNSLink record");
    Ok(())
}
