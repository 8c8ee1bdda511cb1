use std::time::Duration;

use reqwest::blocking::Client;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::error::{Error, Result};
use crate::ledger::Checkpoint;
use crate::merger::BlockSource;

pub const DEFAULT_BASE_URL: &str = "https://blockapi.turtlepay.io";
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Deserialize)]
struct HeightResponse {
    network_height: u64,
}

/// Block explorer API serving network height and bulk header lookups.
pub struct HttpBlockSource {
    base_url: String,
    client: Client,
}

impl HttpBlockSource {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::http(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
        })
    }

    fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let url = format!("{}/{}", self.base_url, path);
        debug!(%url, "block API request");
        let res = self
            .client
            .get(&url)
            .send()
            .map_err(|e| Error::http(format!("block API request {url} failed: {e}")))?;
        if !res.status().is_success() {
            return Err(Error::http(format!(
                "block API request {url} failed with status {}",
                res.status()
            )));
        }
        res.json()
            .map_err(|e| Error::http(format!("block API returned invalid JSON for {url}: {e}")))
    }
}

impl BlockSource for HttpBlockSource {
    fn network_height(&self) -> Result<u64> {
        let body: HeightResponse = self.get_json("height")?;
        Ok(body.network_height)
    }

    fn headers_up_to(&self, height: u64) -> Result<Vec<Checkpoint>> {
        self.get_json(&format!("block/headers/{height}/bulk"))
    }
}
