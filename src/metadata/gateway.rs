use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value as JsonValue;
use url::Url;

use super::{Metadata, MetadataClient, MetadataError, MetadataKind};

/// Fetches documents over HTTP from IPFS gateways, trying each in order.
pub struct GatewayMetadataClient {
    http_client: reqwest::Client,
    gateways: Vec<Url>,
}

impl GatewayMetadataClient {
    pub fn new(gateways: &[String], timeout: Duration) -> anyhow::Result<Self> {
        let gateways = gateways
            .iter()
            .map(|g| Url::parse(g))
            .collect::<Result<Vec<_>, _>>()?;
        let http_client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http_client,
            gateways,
        })
    }

    fn document_url(gateway: &Url, cid: &str) -> String {
        format!("{}/ipfs/{}", gateway.as_str().trim_end_matches('/'), cid)
    }

    async fn fetch_from(&self, gateway: &Url, cid: &str) -> Result<JsonValue, MetadataError> {
        let response = self
            .http_client
            .get(Self::document_url(gateway, cid))
            .send()
            .await?;

        match response.status() {
            reqwest::StatusCode::OK => Ok(response.json::<JsonValue>().await?),
            status => Err(MetadataError::Status {
                gateway: gateway.to_string(),
                cid: cid.to_string(),
                status,
            }),
        }
    }
}

#[async_trait]
impl MetadataClient for GatewayMetadataClient {
    async fn fetch(&self, cid: &str, kind: MetadataKind) -> Result<Metadata, MetadataError> {
        for gateway in &self.gateways {
            match self.fetch_from(gateway, cid).await {
                Ok(document) => return Metadata::parse(kind, cid, document),
                Err(e) => {
                    tracing::warn!("Failed to fetch {} metadata {} from {}: {}", kind, cid, gateway, e);
                }
            }
        }
        Err(MetadataError::Unavailable(cid.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_document_url_joins_without_double_slash() {
        let gateway = Url::parse("https://ipfs.io/").unwrap();
        assert_eq!(
            GatewayMetadataClient::document_url(&gateway, "QmAbc"),
            "https://ipfs.io/ipfs/QmAbc"
        );
    }

    #[test]
    fn test_invalid_gateway_is_rejected() {
        assert!(GatewayMetadataClient::new(&["not a url".to_string()], Duration::from_secs(1)).is_err());
    }
}
