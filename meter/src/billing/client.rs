use super::BillingApi;
use super::models::{Acknowledgement, HeartbeatResponse, TenantListing, UsageReport};
use crate::config::BillingConfig;
use crate::error::{MeterError, Result};
use crate::recorder::UsageRecord;
use async_trait::async_trait;
use reqwest::{Response, Url};
use serde::de::DeserializeOwned;
use tracing::{debug, instrument};

/// HTTP client for the billing panel.
pub struct BillingClient {
    http: reqwest::Client,
    base_url: String,
    node_id: String,
    api_key: String,
}

impl BillingClient {
    pub fn new(config: &BillingConfig) -> Result<Self> {
        let base_url = config.base_url.trim_end_matches('/').to_string();
        Url::parse(&base_url)
            .map_err(|e| MeterError::Config(format!("invalid billing base_url {base_url:?}: {e}")))?;

        let http = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .connect_timeout(config.request_timeout())
            .user_agent(concat!("tenant-meter/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            http,
            base_url,
            node_id: config.node_id.clone(),
            api_key: config.api_key.clone(),
        })
    }

    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path)
    }

    async fn check_status(response: Response) -> Result<Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = match response.text().await {
            Ok(body) => body,
            Err(e) => {
                debug!(status = status.as_u16(), error = %e, "Failed to read error response body");
                String::new()
            }
        };
        Err(MeterError::Status {
            status: status.as_u16(),
            body,
        })
    }

    async fn decode<T: DeserializeOwned>(response: Response) -> Result<T> {
        let bytes = Self::check_status(response).await?.bytes().await?;
        Ok(serde_json::from_slice(&bytes)?)
    }
}

#[async_trait]
impl BillingApi for BillingClient {
    #[instrument(skip(self), fields(node = %self.node_id))]
    async fn fetch_tenants(&self) -> Result<TenantListing> {
        let response = self
            .http
            .get(self.endpoint("tenants"))
            .query(&[("node", &self.node_id)])
            .bearer_auth(&self.api_key)
            .send()
            .await?;

        let bytes = Self::check_status(response).await?.bytes().await?;
        let listing = TenantListing::from_slice(&bytes)?;
        debug!(
            count = listing.tenants.len(),
            malformed = listing.malformed.len(),
            "Fetched tenant list"
        );
        Ok(listing)
    }

    #[instrument(skip(self, batch), fields(node = %self.node_id, records = batch.len()))]
    async fn report_usage(&self, batch: &[UsageRecord]) -> Result<()> {
        let response = self
            .http
            .post(self.endpoint("usage"))
            .query(&[("node", &self.node_id)])
            .bearer_auth(&self.api_key)
            .json(&UsageReport::from_records(batch))
            .send()
            .await?;

        let ack: Acknowledgement = Self::decode(response).await?;
        if !ack.is_success() {
            return Err(MeterError::Rejected(ack.message()));
        }
        Ok(())
    }

    #[instrument(skip(self), fields(node = %self.node_id))]
    async fn heartbeat(&self) -> Result<String> {
        let response = self
            .http
            .get(self.endpoint("heartbeat"))
            .query(&[("id", &self.node_id)])
            .bearer_auth(&self.api_key)
            .send()
            .await?;

        let heartbeat: HeartbeatResponse = Self::decode(response).await?;
        Ok(heartbeat.status)
    }
}
