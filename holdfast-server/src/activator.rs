use async_trait::async_trait;
use holdfast_core::{ChunkActivator, ClaimRecord, HoldError, Result, WorldCatalog};
use std::collections::HashSet;
use std::time::Duration;

/// Client for the host's forced-activation service.
///
/// Every request runs under a bounded timeout so a stuck host never stalls
/// the simulation thread driving us.
pub struct HttpActivator {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpActivator {
    pub fn new(endpoint: &str, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|error| {
                HoldError::Config(format!("failed to build activation client: {}", error))
            })?;

        Ok(Self {
            client,
            endpoint: endpoint.trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl ChunkActivator for HttpActivator {
    async fn add_claim(&self, claim: &ClaimRecord) -> Result<()> {
        let url = format!("{}/claims", self.endpoint);
        let response = self
            .client
            .post(&url)
            .json(claim)
            .send()
            .await
            .map_err(|error| HoldError::Activation(error.to_string()))?;

        if !response.status().is_success() {
            return Err(HoldError::Activation(format!(
                "add failed for claim {}: status={}",
                claim.id,
                response.status()
            )));
        }
        Ok(())
    }

    async fn remove_claim(&self, claim: &ClaimRecord) -> Result<()> {
        let url = format!("{}/claims/{}", self.endpoint, claim.id);
        let response = self
            .client
            .delete(&url)
            .send()
            .await
            .map_err(|error| HoldError::Activation(error.to_string()))?;

        // removing an inactive claim is a no-op per the host contract
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(());
        }
        if !response.status().is_success() {
            return Err(HoldError::Activation(format!(
                "remove failed for claim {}: status={}",
                claim.id,
                response.status()
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl WorldCatalog for HttpActivator {
    async fn existing_world_ids(&self) -> Result<HashSet<String>> {
        let url = format!("{}/worlds", self.endpoint);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|error| HoldError::Activation(error.to_string()))?;

        if !response.status().is_success() {
            return Err(HoldError::Activation(format!(
                "world listing failed: status={}",
                response.status()
            )));
        }

        let worlds: Vec<String> = response
            .json()
            .await
            .map_err(|error| HoldError::Activation(error.to_string()))?;
        Ok(worlds.into_iter().collect())
    }
}
