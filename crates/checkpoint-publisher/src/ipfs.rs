use std::path::Path;
use std::time::Duration;

use reqwest::blocking::{Client, multipart};
use serde::Deserialize;
use tracing::debug;

use crate::error::{Error, Result};

pub const DEFAULT_API_URL: &str = "http://127.0.0.1:5001";

/// Somewhere the ledger can be published as content-addressed data.
pub trait ContentStore {
    /// Adds the file and returns its content hash.
    fn add_file(&self, path: &Path) -> Result<String>;

    /// Addresses other nodes can fetch the content from.
    fn host_addresses(&self) -> Result<Vec<String>> {
        Ok(Vec::new())
    }
}

#[derive(Debug, Deserialize)]
struct AddResponse {
    #[serde(rename = "Hash")]
    hash: String,
}

#[derive(Debug, Deserialize)]
struct IdResponse {
    #[serde(rename = "Addresses", default)]
    addresses: Vec<String>,
}

/// RPC client for an already-running IPFS node.
pub struct IpfsNode {
    api_url: String,
    client: Client,
}

impl IpfsNode {
    pub fn new(api_url: &str, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::http(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            api_url: api_url.trim_end_matches('/').to_string(),
            client,
        })
    }

    fn rpc_url(&self, command: &str) -> String {
        format!("{}/api/v0/{}", self.api_url, command)
    }
}

impl ContentStore for IpfsNode {
    fn add_file(&self, path: &Path) -> Result<String> {
        let form = multipart::Form::new()
            .file("file", path)
            .map_err(|e| Error::msg(format!("failed to read {}: {e}", path.display())))?;
        // The node pins what it adds, so the file stays local until replaced.
        let url = self.rpc_url("add?pin=true");
        debug!(%url, path = %path.display(), "adding file to IPFS");
        let res = self
            .client
            .post(&url)
            .multipart(form)
            .send()
            .map_err(|e| Error::http(format!("IPFS add failed: {e}")))?;
        if !res.status().is_success() {
            return Err(Error::http(format!(
                "IPFS add failed with status {}",
                res.status()
            )));
        }
        let body: AddResponse = res
            .json()
            .map_err(|e| Error::http(format!("IPFS add returned invalid JSON: {e}")))?;
        Ok(body.hash)
    }

    fn host_addresses(&self) -> Result<Vec<String>> {
        let res = self
            .client
            .post(self.rpc_url("id"))
            .send()
            .map_err(|e| Error::http(format!("IPFS id failed: {e}")))?;
        if !res.status().is_success() {
            return Err(Error::http(format!(
                "IPFS id failed with status {}",
                res.status()
            )));
        }
        let body: IdResponse = res
            .json()
            .map_err(|e| Error::http(format!("IPFS id returned invalid JSON: {e}")))?;
        // Loopback addresses are useless to a remote pinning service.
        Ok(body
            .addresses
            .into_iter()
            .filter(|a| !a.starts_with("/ip4/127.") && !a.starts_with("/ip6/::1"))
            .collect())
    }
}
