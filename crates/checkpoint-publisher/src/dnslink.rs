use std::time::Duration;

use reqwest::blocking::{Client, RequestBuilder};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::json;
use tracing::{debug, info};

use crate::error::{Error, Result};

pub const DEFAULT_BASE_URL: &str = "https://api.cloudflare.com/client/v4";
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// Points a DNS name at the latest published content hash.
pub trait DnsLinkPublisher {
    /// Checks credentials before any work is done.
    fn verify(&self) -> Result<()> {
        Ok(())
    }

    /// Upserts the pointer for `hash`, returning the DNS record id.
    fn publish(&self, hash: &str) -> Result<String>;
}

pub fn record_name(subdomain: &str) -> String {
    format!("_dnslink.{}", subdomain.trim())
}

pub fn record_value(hash: &str) -> String {
    format!("dnslink=/ipfs/{}", hash.trim())
}

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    #[serde(default)]
    success: bool,
    result: Option<T>,
    #[serde(default)]
    errors: Vec<ApiMessage>,
}

#[derive(Debug, Deserialize)]
struct ApiMessage {
    #[serde(default)]
    code: i64,
    #[serde(default)]
    message: String,
}

#[derive(Debug, Deserialize)]
struct DnsRecord {
    id: String,
    name: String,
}

/// Cloudflare-hosted DNSLink TXT record for one zone and subdomain.
pub struct CloudflareDnsLink {
    base_url: String,
    token: String,
    zone_id: String,
    subdomain: String,
    client: Client,
}

impl CloudflareDnsLink {
    pub fn new(
        base_url: &str,
        token: &str,
        zone_id: &str,
        subdomain: &str,
        timeout: Duration,
    ) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::http(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            token: token.to_string(),
            zone_id: zone_id.to_string(),
            subdomain: subdomain.to_string(),
            client,
        })
    }

    fn url(&self, endpoint: &str) -> String {
        format!("{}/{}", self.base_url, endpoint)
    }

    fn call<T: DeserializeOwned>(&self, what: &str, req: RequestBuilder) -> Result<T> {
        let res = req
            .bearer_auth(&self.token)
            .send()
            .map_err(|e| Error::http(format!("Cloudflare {what} failed: {e}")))?;
        let status = res.status();
        let body: Envelope<T> = res.json().map_err(|e| {
            Error::http(format!(
                "Cloudflare {what} returned invalid JSON (status {status}): {e}"
            ))
        })?;
        if !status.is_success() || !body.success {
            let detail = body
                .errors
                .iter()
                .map(|m| format!("{} {}", m.code, m.message))
                .collect::<Vec<_>>()
                .join("; ");
            return Err(Error::http(format!(
                "Cloudflare {what} failed with status {status}: {detail}"
            )));
        }
        body.result
            .ok_or_else(|| Error::http(format!("Cloudflare {what} returned no result")))
    }

    /// Id of the existing DNSLink TXT record, if any.
    pub fn find_record_id(&self) -> Result<Option<String>> {
        let name = record_name(&self.subdomain);
        let url = self.url(&format!(
            "zones/{}/dns_records?type=TXT&per_page=100",
            self.zone_id
        ));
        let records: Vec<DnsRecord> = self.call("record lookup", self.client.get(url))?;
        Ok(records.into_iter().find(|r| r.name == name).map(|r| r.id))
    }

    fn create_record(&self, name: &str, value: &str) -> Result<String> {
        let url = self.url(&format!("zones/{}/dns_records", self.zone_id));
        let body = json!({ "type": "TXT", "name": name, "content": value });
        let record: DnsRecord = self.call("record create", self.client.post(url).json(&body))?;
        Ok(record.id)
    }

    fn update_record(&self, record_id: &str, name: &str, value: &str) -> Result<String> {
        let url = self.url(&format!("zones/{}/dns_records/{}", self.zone_id, record_id));
        let body = json!({ "type": "TXT", "name": name, "content": value });
        let record: DnsRecord = self.call("record update", self.client.put(url).json(&body))?;
        Ok(record.id)
    }
}

#[derive(Debug, Deserialize)]
struct TokenStatus {
    #[serde(default)]
    status: String,
}

impl DnsLinkPublisher for CloudflareDnsLink {
    fn verify(&self) -> Result<()> {
        let token: TokenStatus = self
            .call("token verify", self.client.get(self.url("user/tokens/verify")))
            .map_err(|e| Error::config(format!("Cloudflare token rejected: {e}")))?;
        if !token.status.is_empty() && token.status != "active" {
            return Err(Error::config(format!(
                "Cloudflare token is {} (expected active)",
                token.status
            )));
        }
        Ok(())
    }

    fn publish(&self, hash: &str) -> Result<String> {
        let name = record_name(&self.subdomain);
        let value = record_value(hash);
        let id = match self.find_record_id()? {
            Some(id) => {
                debug!(%name, %id, "updating DNSLink record");
                self.update_record(&id, &name, &value)?
            }
            None => {
                info!(%name, "creating DNSLink record");
                self.create_record(&name, &value)?
            }
        };
        Ok(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_shape() {
        assert_eq!(record_name("checkpoints.example.com"), "_dnslink.checkpoints.example.com");
        assert_eq!(record_value("QmHash"), "dnslink=/ipfs/QmHash");
    }
}
