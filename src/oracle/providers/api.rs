use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use tracing::warn;
use uuid::Uuid;

use crate::error::{AppError, AppResult, OracleError};
use crate::ledger::models::Milestone;
use crate::oracle::traits::{OracleProvider, VerificationResult};
use crate::oracle::value::OracleData;
use crate::resolution::conditions;

/// Expected response from an external verification endpoint
#[derive(Debug, Deserialize)]
struct ApiVerificationResponse {
    #[serde(default)]
    verified: Option<bool>,
    #[serde(default)]
    data: serde_json::Value,
}

/// Oracle provider that polls an external HTTP API for milestone facts.
/// The endpoint can be overridden per milestone through `oracle_params.path`.
pub struct ApiOracle {
    client: Client,
    base_url: String,
}

impl ApiOracle {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.into(),
        }
    }

    fn endpoint(&self, campaign_id: Uuid, milestone: &Milestone) -> String {
        if let Some(path) = milestone
            .oracle_params
            .get("path")
            .and_then(|p| p.as_str())
        {
            return format!("{}{}", self.base_url, path);
        }
        format!(
            "{}/campaigns/{}/milestones/{}",
            self.base_url, campaign_id, milestone.id
        )
    }
}

#[async_trait]
impl OracleProvider for ApiOracle {
    fn name(&self) -> &'static str {
        "api"
    }

    async fn verify(
        &self,
        campaign_id: Uuid,
        milestone: &Milestone,
    ) -> AppResult<VerificationResult> {
        let url = self.endpoint(campaign_id, milestone);

        let response = self.client.get(&url).send().await?;
        if !response.status().is_success() {
            return Err(AppError::Oracle(OracleError::CallFailed {
                oracle_id: milestone.oracle_id.clone(),
                message: format!("{} returned {}", url, response.status()),
            }));
        }

        let body: ApiVerificationResponse = response.json().await.map_err(|e| {
            AppError::Oracle(OracleError::MalformedResponse(format!("{}: {}", url, e)))
        })?;

        let oracle_data = OracleData::from_json(&body.data);
        if oracle_data.is_empty() && body.data.as_object().is_some_and(|o| !o.is_empty()) {
            warn!("Oracle {} returned only nested data fields", milestone.oracle_id);
        }

        // an explicit upstream verdict is trusted; the milestone condition
        // still has to hold when one is configured
        let mut verified = body.verified.unwrap_or(true);
        if let (Some(field), Some(operator)) =
            (&milestone.condition.field, milestone.condition.operator)
        {
            verified = verified
                && conditions::evaluate(
                    &oracle_data,
                    field,
                    operator,
                    milestone.condition.value,
                    milestone.condition.value_end,
                );
        }

        Ok(if verified {
            VerificationResult::verified(milestone, oracle_data)
        } else {
            VerificationResult::unverified(milestone, oracle_data)
        })
    }
}
