use std::time::Duration;

use reqwest::Url;
use reqwest::blocking::{Client, RequestBuilder, Response};
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::pin::{PinRequest, PinService};

pub const DEFAULT_BASE_URL: &str = "https://api.pinata.cloud";

/// A body without `count` is an unreadable probe, not a zero.
#[derive(Debug, Deserialize)]
struct CountResponse {
    count: u64,
}

#[derive(Debug, Deserialize)]
struct PinListResponse {
    #[serde(default)]
    rows: Vec<PinListRow>,
}

#[derive(Debug, Deserialize)]
struct PinListRow {
    ipfs_pin_hash: String,
}

/// Pinata pinning API client using key/secret header auth.
pub struct PinataClient {
    base_url: String,
    api_key: String,
    secret_api_key: String,
    client: Client,
}

impl PinataClient {
    pub fn new(
        base_url: &str,
        api_key: &str,
        secret_api_key: &str,
        timeout: Duration,
    ) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::http(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            secret_api_key: secret_api_key.to_string(),
            client,
        })
    }

    fn url(&self, path: &str, params: &[(&str, &str)]) -> Result<Url> {
        let raw = format!("{}/{}", self.base_url, path.trim_start_matches('/'));
        let parsed = if params.is_empty() {
            Url::parse(&raw)
        } else {
            Url::parse_with_params(&raw, params)
        };
        parsed.map_err(|e| Error::http(format!("invalid Pinata URL '{raw}': {e}")))
    }

    fn authed(&self, req: RequestBuilder) -> RequestBuilder {
        req.header("pinata_api_key", &self.api_key)
            .header("pinata_secret_api_key", &self.secret_api_key)
    }

    fn send(&self, what: &str, req: RequestBuilder) -> Result<Response> {
        let res = self
            .authed(req)
            .send()
            .map_err(|e| Error::http(format!("Pinata {what} failed: {e}")))?;
        if res.status().is_success() {
            return Ok(res);
        }
        let status = res.status();
        let body = res.text().unwrap_or_default();
        Err(Error::http(format!(
            "Pinata {what} failed with status {status}: {}",
            body.trim()
        )))
    }

    fn get_count(&self, what: &str, path: &str, params: &[(&str, &str)]) -> Result<u64> {
        let url = self.url(path, params)?;
        debug!(%url, "Pinata {what}");
        let res = self.send(what, self.client.get(url))?;
        let body: CountResponse = res
            .json()
            .map_err(|e| Error::http(format!("Pinata {what} returned invalid JSON: {e}")))?;
        Ok(body.count)
    }

    /// Hashes currently pinned under `name`.
    pub fn pinned_by_name(&self, name: &str) -> Result<Vec<String>> {
        let url = self.url(
            "data/pinList",
            &[("status", "pinned"), ("metadata[name]", name)],
        )?;
        let res = self.send("pin list", self.client.get(url))?;
        let body: PinListResponse = res
            .json()
            .map_err(|e| Error::http(format!("Pinata pin list returned invalid JSON: {e}")))?;
        Ok(body.rows.into_iter().map(|r| r.ipfs_pin_hash).collect())
    }

    pub fn unpin(&self, hash: &str) -> Result<()> {
        let url = self.url(&format!("pinning/unpin/{hash}"), &[])?;
        self.send("unpin", self.client.delete(url))?;
        Ok(())
    }

    /// Unpins every pin named `name` except `keep`. Individual unpin failures
    /// are logged and skipped.
    pub fn unpin_superseded(&self, keep: &str, name: &str) -> Result<Vec<String>> {
        let mut removed = Vec::new();
        for hash in self.pinned_by_name(name)? {
            if hash == keep {
                continue;
            }
            match self.unpin(&hash) {
                Ok(()) => removed.push(hash),
                Err(err) => warn!(%hash, error = %err, "failed to unpin superseded ledger"),
            }
        }
        Ok(removed)
    }
}

impl PinService for PinataClient {
    fn authenticate(&self) -> Result<()> {
        let url = self.url("data/testAuthentication", &[])?;
        self.send("authentication", self.client.get(url))
            .map_err(|e| Error::config(format!("Pinata credentials rejected: {e}")))?;
        Ok(())
    }

    fn submit(&self, req: &PinRequest) -> Result<()> {
        let url = self.url("pinning/pinByHash", &[])?;
        let mut body = json!({
            "hashToPin": req.content_hash,
            "pinataMetadata": {
                "name": req.display_name,
                "keyvalues": {
                    "published_at": chrono::Utc::now().to_rfc3339(),
                },
            },
        });
        if !req.host_nodes.is_empty() {
            body["pinataOptions"] = json!({ "hostNodes": req.host_nodes });
        }
        self.send("pin by hash", self.client.post(url).json(&body))?;
        Ok(())
    }

    fn pending_jobs(&self, hash: &str) -> Result<u64> {
        self.get_count(
            "pin jobs",
            "pinning/pinJobs",
            &[("ipfs_pin_hash", hash), ("status", "searching")],
        )
    }

    fn pinned_count(&self, hash: &str) -> Result<u64> {
        self.get_count(
            "pin list",
            "data/pinList",
            &[("status", "pinned"), ("hashContains", hash)],
        )
    }
}
