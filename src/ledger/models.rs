use chrono::{DateTime, Utc};
use num_bigint::BigUint;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::Type;
use std::fmt;
use uuid::Uuid;

use crate::ledger::amount;

/// Campaign life-cycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Type)]
#[sqlx(type_name = "campaign_status", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum CampaignStatus {
    Active,
    Succeeded,
    Failed,
}

impl fmt::Display for CampaignStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl CampaignStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CampaignStatus::Active => "active",
            CampaignStatus::Succeeded => "succeeded",
            CampaignStatus::Failed => "failed",
        }
    }
}

/// Crowdfunding campaign - owner of milestones and pledges
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Campaign {
    pub id: Uuid,
    pub creator: String,
    pub title: String,
    pub status: CampaignStatus,
    pub deadline: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// Pledge type - determines which calculation rule applies at resolution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Type)]
#[sqlx(type_name = "pledge_type", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum PledgeType {
    Flat,
    PerUnit,
    Tiered,
    Conditional,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Type)]
#[sqlx(type_name = "pledge_status", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum PledgeStatus {
    Escrowed,
    Resolved,
    Unresolved,
}

/// Predicate operator for conditional pledges and milestone conditions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConditionOperator {
    Exists,
    Eq,
    Gt,
    Gte,
    Lt,
    Lte,
    Between,
}

/// One band of a tiered pledge: units past `threshold` earn `rate` each
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tier {
    pub threshold: u64,
    #[serde(with = "amount::serde_string")]
    pub rate: BigUint,
}

/// Per-type calculation parameters. A pledge carries only the fields its
/// type uses; everything else stays None.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CalculationParams {
    #[serde(default, with = "amount::serde_string_opt")]
    pub per_unit_amount: Option<BigUint>,
    #[serde(default)]
    pub unit_field: Option<String>,
    #[serde(default, with = "amount::serde_string_opt")]
    pub cap: Option<BigUint>,
    #[serde(default)]
    pub tiers: Option<Vec<Tier>>,
    #[serde(default)]
    pub condition_field: Option<String>,
    #[serde(default)]
    pub condition_operator: Option<ConditionOperator>,
    #[serde(default)]
    pub condition_value: Option<Decimal>,
    #[serde(default)]
    pub condition_value_end: Option<Decimal>,
}

/// A backer's escrowed pledge. `escrowed_amount` is immutable after
/// creation; only the engine resolves it, exactly once.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Pledge {
    pub id: Uuid,
    pub campaign_id: Uuid,
    pub backer: String,
    pub pledge_type: PledgeType,
    #[serde(with = "amount::serde_string")]
    pub escrowed_amount: BigUint,
    #[serde(default)]
    pub params: Option<CalculationParams>,
    pub status: PledgeStatus,
}

/// Condition attached to a milestone, checked against oracle output
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MilestoneCondition {
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub field: Option<String>,
    #[serde(default)]
    pub operator: Option<ConditionOperator>,
    #[serde(default)]
    pub value: Option<Decimal>,
    #[serde(default)]
    pub value_end: Option<Decimal>,
}

/// An externally-verifiable fact gating fund release. Referenced by
/// pledges only indirectly, through shared field names in oracle output.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Milestone {
    pub id: Uuid,
    pub campaign_id: Uuid,
    pub oracle_id: String,
    pub condition: MilestoneCondition,
    /// Share of a flat pledge released when this milestone verifies
    #[serde(default)]
    pub release_percentage: u32,
    /// Provider-specific verification parameters (opaque to the engine)
    #[serde(default)]
    pub oracle_params: serde_json::Value,
}

/// Resolution job status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }
}

/// What caused a resolution job to be created
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TriggerSource {
    Manual,
    Webhook,
    Poll,
    Schedule,
}

impl TriggerSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            TriggerSource::Manual => "manual",
            TriggerSource::Webhook => "webhook",
            TriggerSource::Poll => "poll",
            TriggerSource::Schedule => "schedule",
        }
    }
}

/// Aggregate outcome of a completed resolution pass
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResolutionSummary {
    pub milestones_verified: usize,
    pub milestones_failed: usize,
    pub pledges_resolved: usize,
    pub pledges_unresolved: usize,
    #[serde(with = "amount::serde_string")]
    pub total_released: BigUint,
    #[serde(with = "amount::serde_string")]
    pub total_refunded: BigUint,
}

/// One end-to-end attempt to verify a campaign's milestones and settle
/// its pledges. At most one non-terminal job exists per campaign.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolutionJob {
    pub id: Uuid,
    pub campaign_id: Uuid,
    pub status: JobStatus,
    pub triggered_by: TriggerSource,
    pub result: Option<ResolutionSummary>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl ResolutionJob {
    pub fn new(campaign_id: Uuid, triggered_by: TriggerSource) -> Self {
        Self {
            id: Uuid::new_v4(),
            campaign_id,
            status: JobStatus::Pending,
            triggered_by,
            result: None,
            error: None,
            created_at: Utc::now(),
            finished_at: None,
        }
    }

    pub fn is_active(&self) -> bool {
        !self.status.is_terminal()
    }
}
