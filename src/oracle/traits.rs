use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::AppResult;
use crate::ledger::models::Milestone;
use crate::oracle::value::OracleData;

/// Outcome of a single milestone verification attempt. Immutable; lives
/// only for the duration of one resolution pass.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerificationResult {
    pub milestone_id: Uuid,
    pub oracle_id: String,
    pub verified: bool,
    pub oracle_data: OracleData,
    /// Share of flat pledges this milestone releases, copied from the
    /// milestone so the calculator needs nothing but results
    pub release_percentage: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl VerificationResult {
    pub fn verified(milestone: &Milestone, oracle_data: OracleData) -> Self {
        Self {
            milestone_id: milestone.id,
            oracle_id: milestone.oracle_id.clone(),
            verified: true,
            oracle_data,
            release_percentage: milestone.release_percentage,
            error: None,
        }
    }

    pub fn unverified(milestone: &Milestone, oracle_data: OracleData) -> Self {
        Self {
            milestone_id: milestone.id,
            oracle_id: milestone.oracle_id.clone(),
            verified: false,
            oracle_data,
            release_percentage: milestone.release_percentage,
            error: None,
        }
    }

    pub fn failed(milestone: &Milestone, error: impl Into<String>) -> Self {
        Self {
            milestone_id: milestone.id,
            oracle_id: milestone.oracle_id.clone(),
            verified: false,
            oracle_data: OracleData::new(),
            release_percentage: milestone.release_percentage,
            error: Some(error.into()),
        }
    }
}

/// A pluggable verifier of milestone facts. Providers may consult local
/// attestations, poll external APIs, or aggregate sub-oracles; the router
/// is agnostic to which.
#[async_trait]
pub trait OracleProvider: Send + Sync {
    /// Provider variant name ("attestation", "api", "aggregator")
    fn name(&self) -> &'static str;

    async fn verify(
        &self,
        campaign_id: Uuid,
        milestone: &Milestone,
    ) -> AppResult<VerificationResult>;
}
