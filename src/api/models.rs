use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;
use validator::Validate;

use crate::ledger::models::{
    CalculationParams, JobStatus, Milestone, MilestoneCondition, PledgeType,
};
use crate::oracle::traits::VerificationResult;
use crate::oracle::value::OracleData;
use crate::oracle::webhook::DeliveryStats;

#[derive(Debug, Deserialize, Validate)]
pub struct TriggerResolutionRequest {
    pub campaign_id: Uuid,
    #[serde(default)]
    pub force: bool,
}

#[derive(Debug, Serialize)]
pub struct TriggerResolutionResponse {
    pub job_id: Uuid,
    pub campaign_id: Uuid,
    pub status: JobStatus,
}

#[derive(Debug, Deserialize, Validate)]
pub struct ScheduleResolutionRequest {
    pub campaign_id: Uuid,
    pub deadline: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct OkResponse {
    pub status: &'static str,
}

impl OkResponse {
    pub fn ok() -> Self {
        Self { status: "ok" }
    }
}

#[derive(Debug, Serialize)]
pub struct JobsForCampaignResponse {
    pub jobs: Vec<crate::ledger::models::ResolutionJob>,
    pub count: usize,
}

/// Milestone supplied inline for a dry-run verification pass
#[derive(Debug, Serialize, Deserialize, Validate)]
pub struct MilestoneInput {
    pub milestone_id: Option<Uuid>,
    #[validate(length(min = 1, message = "oracle_id must not be empty"))]
    pub oracle_id: String,
    #[serde(default)]
    pub condition: MilestoneCondition,
    #[serde(default)]
    pub release_percentage: u32,
    #[serde(default)]
    pub oracle_params: serde_json::Value,
}

impl MilestoneInput {
    pub fn into_milestone(self, campaign_id: Uuid) -> Milestone {
        Milestone {
            id: self.milestone_id.unwrap_or_else(Uuid::new_v4),
            campaign_id,
            oracle_id: self.oracle_id,
            condition: self.condition,
            release_percentage: self.release_percentage,
            oracle_params: self.oracle_params,
        }
    }
}

#[derive(Debug, Deserialize, Validate)]
pub struct DryRunVerifyRequest {
    #[validate(length(min = 1, message = "at least one milestone is required"))]
    pub milestones: Vec<MilestoneInput>,
}

#[derive(Debug, Serialize)]
pub struct VerifySummary {
    pub total: usize,
    pub verified: usize,
    pub failed: usize,
}

#[derive(Debug, Serialize)]
pub struct DryRunVerifyResponse {
    pub results: Vec<VerificationResult>,
    pub summary: VerifySummary,
}

/// Pledge supplied inline for a dry-run calculation. The escrowed amount
/// is a decimal-string encoded integer (wei-equivalent), never a float.
#[derive(Debug, Serialize, Deserialize, Validate)]
pub struct PledgeInput {
    pub pledge_id: Option<Uuid>,
    pub pledge_type: PledgeType,
    #[validate(length(min = 1, message = "escrowed_amount must not be empty"))]
    pub escrowed_amount: String,
    #[serde(default)]
    pub params: Option<CalculationParams>,
}

/// Pre-supplied verification result for a dry-run calculation
#[derive(Debug, Deserialize)]
pub struct MilestoneResultInput {
    pub milestone_id: Option<Uuid>,
    #[serde(default)]
    pub oracle_id: Option<String>,
    pub verified: bool,
    #[serde(default)]
    pub release_percentage: u32,
    #[serde(default)]
    pub oracle_data: serde_json::Value,
}

impl MilestoneResultInput {
    pub fn into_result(self) -> VerificationResult {
        VerificationResult {
            milestone_id: self.milestone_id.unwrap_or_else(Uuid::new_v4),
            oracle_id: self.oracle_id.unwrap_or_else(|| "dry-run".to_string()),
            verified: self.verified,
            oracle_data: OracleData::from_json(&self.oracle_data),
            release_percentage: self.release_percentage,
            error: None,
        }
    }
}

#[derive(Debug, Deserialize, Validate)]
pub struct DryRunCalculateRequest {
    #[validate(length(min = 1, message = "at least one pledge is required"))]
    pub pledges: Vec<PledgeInput>,
    /// Shorthand: one verified result is synthesized around this data
    #[serde(default)]
    pub oracle_data: Option<serde_json::Value>,
    #[serde(default)]
    pub milestone_results: Option<Vec<MilestoneResultInput>>,
}

#[derive(Debug, Serialize)]
pub struct PledgeOutcomeEntry {
    pub pledge_id: Uuid,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub release_amount: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub refund_amount: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct CalculateSummary {
    pub total_released: String,
    pub total_refunded: String,
    pub pledges: usize,
    pub errors: usize,
}

#[derive(Debug, Serialize)]
pub struct DryRunCalculateResponse {
    pub outcomes: Vec<PledgeOutcomeEntry>,
    pub summary: CalculateSummary,
}

#[derive(Debug, Deserialize, Validate)]
pub struct WebhookRequest {
    #[validate(length(min = 1, message = "nonce must not be empty"))]
    pub nonce: String,
    #[validate(length(min = 1, message = "signature must not be empty"))]
    pub signature: String,
    /// Kept unparsed: the HMAC covers these bytes exactly as sent
    pub payload: Box<serde_json::value::RawValue>,
}

#[derive(Debug, Serialize)]
pub struct WebhookResponse {
    pub status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub job_id: Option<Uuid>,
}

#[derive(Debug, Serialize)]
pub struct WebhookStatsResponse {
    pub oracles: HashMap<String, DeliveryStats>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct SubmitAttestationRequest {
    pub milestone_id: Uuid,
    #[validate(length(min = 1, message = "attester must not be empty"))]
    pub attester: String,
    #[serde(default)]
    pub oracle_data: serde_json::Value,
}

#[derive(Debug, Serialize)]
pub struct SubmitAttestationResponse {
    pub milestone_id: Uuid,
    pub digest: String,
    pub submitted_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub registered_oracles: Vec<String>,
}
