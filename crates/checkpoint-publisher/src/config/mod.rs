use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use serde::de::DeserializeOwned;
use toml::Value;

use crate::error::{Error, Result};

/// Blocks produced per day at the chain's 30 second target.
pub const BLOCKS_PER_DAY: u64 = 2880;

#[derive(Debug, Clone)]
pub struct ConfigDoc {
    pub path: Option<PathBuf>,
    pub value: Value,
}

impl ConfigDoc {
    pub fn empty() -> Self {
        Self {
            path: None,
            value: Value::Table(Default::default()),
        }
    }

    pub fn value_path(&self, path: &str) -> Option<&Value> {
        let path = path.trim();
        if path.is_empty() {
            return Some(&self.value);
        }

        let mut cur = &self.value;
        for seg in path.split('.') {
            let tbl = cur.as_table()?;
            cur = tbl.get(seg)?;
        }
        Some(cur)
    }

    pub fn deserialize_path<T: DeserializeOwned>(&self, path: &str) -> Result<Option<T>> {
        let Some(v) = self.value_path(path) else {
            return Ok(None);
        };
        let parsed = v
            .clone()
            .try_into()
            .map_err(|e| Error::config(format!("failed to deserialize config at '{}': {e}", path)))?;
        Ok(Some(parsed))
    }
}

fn merge_values(base: &mut Value, child: Value) {
    match (base, child) {
        (Value::Table(base_tbl), Value::Table(child_tbl)) => {
            for (k, v) in child_tbl {
                match base_tbl.get_mut(&k) {
                    Some(existing) => merge_values(existing, v),
                    None => {
                        base_tbl.insert(k, v);
                    }
                }
            }
        }
        (base_slot, child_val) => {
            *base_slot = child_val;
        }
    }
}

fn load_value_inner(path: &Path, stack: &mut HashSet<PathBuf>) -> Result<Value> {
    let canonical = path.canonicalize().unwrap_or_else(|_| path.to_path_buf());
    if !stack.insert(canonical.clone()) {
        return Err(Error::config(format!(
            "config extends cycle detected at {}",
            canonical.display()
        )));
    }

    let data = fs::read_to_string(path)
        .map_err(|e| Error::config(format!("failed to read config {}: {e}", path.display())))?;
    let mut value: Value = toml::from_str(&data)
        .map_err(|e| Error::config(format!("TOML parse error in {}: {e}", path.display())))?;

    let mut out = Value::Table(Default::default());
    if let Some(ext) = value.get("extends").and_then(Value::as_str) {
        let p = PathBuf::from(ext);
        let base_path = if p.is_absolute() {
            p
        } else {
            path.parent().unwrap_or_else(|| Path::new(".")).join(p)
        };
        out = load_value_inner(&base_path, stack)?;
    }
    if let Some(tbl) = value.as_table_mut() {
        tbl.remove("extends");
    }
    merge_values(&mut out, value);

    stack.remove(&canonical);
    Ok(out)
}

pub fn load(path: &Path) -> Result<ConfigDoc> {
    let mut stack = HashSet::<PathBuf>::new();
    let value = load_value_inner(path, &mut stack)?;
    Ok(ConfigDoc {
        path: Some(path.to_path_buf()),
        value,
    })
}

fn default_ledger_path() -> String {
    "./checkpoints.csv".into()
}

fn default_display_name() -> String {
    "checkpoints.csv".into()
}

fn env_name(s: &str) -> Option<String> {
    Some(s.into())
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LedgerConfig {
    pub path: Option<String>,
    pub path_env: Option<String>,
    pub delay_days: Option<u64>,
    pub delay_days_env: Option<String>,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            path: None,
            path_env: env_name("CHECKPOINT_FILE"),
            delay_days: None,
            delay_days_env: env_name("CHECKPOINT_DELAY"),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BlockApiConfig {
    pub base_url: String,
    pub timeout_secs: u64,
    pub batch_size: u64,
}

impl Default for BlockApiConfig {
    fn default() -> Self {
        Self {
            base_url: crate::blockapi::DEFAULT_BASE_URL.into(),
            timeout_secs: crate::blockapi::DEFAULT_TIMEOUT.as_secs(),
            batch_size: crate::batcher::DEFAULT_BATCH_SIZE,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct IpfsConfig {
    pub api_url: String,
    pub api_url_env: Option<String>,
    pub timeout_secs: u64,
    /// Send the node's addresses to the pin service as host hints.
    pub announce_addresses: bool,
}

impl Default for IpfsConfig {
    fn default() -> Self {
        Self {
            api_url: String::new(),
            api_url_env: env_name("IPFS_API_URL"),
            timeout_secs: 60,
            announce_addresses: true,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PinataConfig {
    pub base_url: String,
    pub api_key: Option<String>,
    pub api_key_env: Option<String>,
    pub secret_api_key: Option<String>,
    pub secret_api_key_env: Option<String>,
    pub timeout_secs: u64,
    pub poll_interval_secs: u64,
    #[serde(default = "default_display_name")]
    pub display_name: String,
    /// Unpin older ledgers pinned under the same display name.
    pub unpin_previous: bool,
}

impl Default for PinataConfig {
    fn default() -> Self {
        Self {
            base_url: crate::pin::pinata::DEFAULT_BASE_URL.into(),
            api_key: None,
            api_key_env: env_name("PINATA_API_KEY"),
            secret_api_key: None,
            secret_api_key_env: env_name("PINATA_SECRET_API_KEY"),
            timeout_secs: 30,
            poll_interval_secs: crate::pin::DEFAULT_POLL_INTERVAL.as_secs(),
            display_name: default_display_name(),
            unpin_previous: false,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CloudflareConfig {
    pub base_url: String,
    pub token: Option<String>,
    pub token_env: Option<String>,
    pub zone_id: Option<String>,
    pub zone_id_env: Option<String>,
    pub subdomain: Option<String>,
    pub subdomain_env: Option<String>,
    pub timeout_secs: u64,
}

impl Default for CloudflareConfig {
    fn default() -> Self {
        Self {
            base_url: crate::dnslink::DEFAULT_BASE_URL.into(),
            token: None,
            token_env: env_name("CLOUDFLARE_TOKEN"),
            zone_id: None,
            zone_id_env: env_name("CLOUDFLARE_ZONE_ID"),
            subdomain: None,
            subdomain_env: env_name("CLOUDFLARE_SUBDOMAIN"),
            timeout_secs: crate::dnslink::DEFAULT_TIMEOUT.as_secs(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct PublisherConfig {
    pub ledger: LedgerConfig,
    pub block_api: BlockApiConfig,
    pub ipfs: IpfsConfig,
    pub pinata: PinataConfig,
    pub cloudflare: CloudflareConfig,
}

impl PublisherConfig {
    pub fn from_doc(doc: &ConfigDoc) -> Result<Self> {
        Ok(Self {
            ledger: doc.deserialize_path("ledger")?.unwrap_or_default(),
            block_api: doc.deserialize_path("block_api")?.unwrap_or_default(),
            ipfs: doc.deserialize_path("ipfs")?.unwrap_or_default(),
            pinata: doc.deserialize_path("pinata")?.unwrap_or_default(),
            cloudflare: doc.deserialize_path("cloudflare")?.unwrap_or_default(),
        })
    }

    pub fn ledger_path(&self) -> PathBuf {
        PathBuf::from(
            resolve_string_field(self.ledger.path.as_deref(), self.ledger.path_env.as_deref())
                .unwrap_or_else(default_ledger_path),
        )
    }

    pub fn delay_days(&self) -> Result<u64> {
        if let Some(days) = self.ledger.delay_days {
            return Ok(days);
        }
        match resolve_env_ref(self.ledger.delay_days_env.as_deref()) {
            Some(raw) => raw.parse::<u64>().map_err(|e| {
                Error::config(format!("invalid checkpoint delay '{raw}' (expected days): {e}"))
            }),
            None => Ok(1),
        }
    }

    /// Blocks between the network tip and the newest checkpoint.
    pub fn delay_blocks(&self) -> Result<u64> {
        self.delay_days()?
            .checked_mul(BLOCKS_PER_DAY)
            .ok_or_else(|| Error::config("checkpoint delay is too large"))
    }

    pub fn batch_size(&self) -> Result<u64> {
        if self.block_api.batch_size == 0 {
            return Err(Error::config("block_api.batch_size must be greater than zero"));
        }
        Ok(self.block_api.batch_size)
    }

    pub fn ipfs_api_url(&self) -> String {
        resolve_string_field(Some(self.ipfs.api_url.as_str()), self.ipfs.api_url_env.as_deref())
            .unwrap_or_else(|| crate::ipfs::DEFAULT_API_URL.into())
    }

    pub fn poll_interval(&self) -> Result<Duration> {
        if self.pinata.poll_interval_secs == 0 {
            return Err(Error::config("pinata.poll_interval_secs must be greater than zero"));
        }
        Ok(Duration::from_secs(self.pinata.poll_interval_secs))
    }

    pub fn pinata_credentials(&self) -> Result<(String, String)> {
        let key = resolve_required_string_field(
            "pinata.api_key",
            self.pinata.api_key.as_deref(),
            self.pinata.api_key_env.as_deref(),
        )?;
        let secret = resolve_required_string_field(
            "pinata.secret_api_key",
            self.pinata.secret_api_key.as_deref(),
            self.pinata.secret_api_key_env.as_deref(),
        )?;
        Ok((key, secret))
    }

    /// Token, zone id and subdomain.
    pub fn cloudflare_target(&self) -> Result<(String, String, String)> {
        let cf = &self.cloudflare;
        let token = resolve_required_string_field(
            "cloudflare.token",
            cf.token.as_deref(),
            cf.token_env.as_deref(),
        )?;
        let zone_id = resolve_required_string_field(
            "cloudflare.zone_id",
            cf.zone_id.as_deref(),
            cf.zone_id_env.as_deref(),
        )?;
        let subdomain = resolve_required_string_field(
            "cloudflare.subdomain",
            cf.subdomain.as_deref(),
            cf.subdomain_env.as_deref(),
        )?;
        Ok((token, zone_id, subdomain))
    }
}

fn resolve_env_ref(env_key: Option<&str>) -> Option<String> {
    env_key
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .and_then(|k| std::env::var(k).ok())
        .map(|v| v.trim().to_string())
        .filter(|s| !s.is_empty())
}

/// A non-empty literal wins over the environment variable it names.
fn resolve_string_field(literal: Option<&str>, env_key: Option<&str>) -> Option<String> {
    let direct = literal
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(ToOwned::to_owned);
    direct.or_else(|| resolve_env_ref(env_key))
}

fn resolve_required_string_field(
    cfg_path: &str,
    literal: Option<&str>,
    env_key: Option<&str>,
) -> Result<String> {
    resolve_string_field(literal, env_key).ok_or_else(|| {
        if let Some(k) = env_key.map(str::trim).filter(|s| !s.is_empty()) {
            Error::config(format!("{cfg_path} is empty (also checked env var '{k}')"))
        } else {
            Error::config(format!("{cfg_path} is empty"))
        }
    })
}
