use async_trait::async_trait;
use chrono::{DateTime, Utc};
use num_bigint::BigUint;
use parking_lot::RwLock;
use std::collections::HashMap;
use uuid::Uuid;

use crate::error::{AppResult, ResolutionError};
use crate::ledger::models::{Campaign, CampaignStatus, Milestone, Pledge, PledgeStatus};
use crate::ledger::provider::DataProvider;

#[derive(Debug, Clone)]
pub struct MintRecord {
    pub pledge_id: Uuid,
    pub holder: String,
    pub campaign_id: Uuid,
    pub outcome_summary: String,
}

/// In-memory data provider used by tests, dry-run endpoints, and
/// database-less runs. Same contract as the Postgres provider.
pub struct MemoryDataProvider {
    campaigns: RwLock<HashMap<Uuid, Campaign>>,
    pledges: RwLock<HashMap<Uuid, Pledge>>,
    milestones: RwLock<HashMap<Uuid, Milestone>>,
    resolutions: RwLock<HashMap<Uuid, (BigUint, BigUint)>>,
    minted: RwLock<Vec<MintRecord>>,
}

impl MemoryDataProvider {
    pub fn new() -> Self {
        Self {
            campaigns: RwLock::new(HashMap::new()),
            pledges: RwLock::new(HashMap::new()),
            milestones: RwLock::new(HashMap::new()),
            resolutions: RwLock::new(HashMap::new()),
            minted: RwLock::new(Vec::new()),
        }
    }

    pub fn insert_campaign(&self, campaign: Campaign) {
        self.campaigns.write().insert(campaign.id, campaign);
    }

    pub fn insert_pledge(&self, pledge: Pledge) {
        self.pledges.write().insert(pledge.id, pledge);
    }

    pub fn insert_milestone(&self, milestone: Milestone) {
        self.milestones.write().insert(milestone.id, milestone);
    }

    pub fn resolution_for(&self, pledge_id: Uuid) -> Option<(BigUint, BigUint)> {
        self.resolutions.read().get(&pledge_id).cloned()
    }

    pub fn minted(&self) -> Vec<MintRecord> {
        self.minted.read().clone()
    }

    pub fn campaign(&self, campaign_id: Uuid) -> Option<Campaign> {
        self.campaigns.read().get(&campaign_id).cloned()
    }
}

impl Default for MemoryDataProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DataProvider for MemoryDataProvider {
    async fn get_campaign(&self, campaign_id: Uuid) -> AppResult<Option<Campaign>> {
        Ok(self.campaigns.read().get(&campaign_id).cloned())
    }

    async fn get_pledges_for_campaign(&self, campaign_id: Uuid) -> AppResult<Vec<Pledge>> {
        let mut pledges: Vec<Pledge> = self
            .pledges
            .read()
            .values()
            .filter(|p| p.campaign_id == campaign_id)
            .cloned()
            .collect();
        pledges.sort_by_key(|p| p.id);
        Ok(pledges)
    }

    async fn get_milestones_for_campaign(&self, campaign_id: Uuid) -> AppResult<Vec<Milestone>> {
        let mut milestones: Vec<Milestone> = self
            .milestones
            .read()
            .values()
            .filter(|m| m.campaign_id == campaign_id)
            .cloned()
            .collect();
        milestones.sort_by_key(|m| m.id);
        Ok(milestones)
    }

    async fn resolve_pledge(
        &self,
        pledge_id: Uuid,
        release_amount: &BigUint,
        refund_amount: &BigUint,
    ) -> AppResult<()> {
        let mut pledges = self.pledges.write();
        let pledge = pledges.get_mut(&pledge_id).ok_or_else(|| {
            ResolutionError::CommitFailed(format!("pledge {} not found", pledge_id))
        })?;
        if pledge.status != PledgeStatus::Escrowed {
            return Err(ResolutionError::CommitFailed(format!(
                "pledge {} is not in escrowed state",
                pledge_id
            ))
            .into());
        }
        pledge.status = PledgeStatus::Resolved;
        self.resolutions
            .write()
            .insert(pledge_id, (release_amount.clone(), refund_amount.clone()));
        Ok(())
    }

    async fn update_campaign_status(
        &self,
        campaign_id: Uuid,
        status: CampaignStatus,
        _total_released: &BigUint,
        _total_refunded: &BigUint,
    ) -> AppResult<()> {
        let mut campaigns = self.campaigns.write();
        let campaign = campaigns.get_mut(&campaign_id).ok_or_else(|| {
            ResolutionError::CommitFailed(format!("campaign {} not found", campaign_id))
        })?;
        campaign.status = status;
        Ok(())
    }

    async fn mint_commemorative(
        &self,
        pledge_id: Uuid,
        holder: &str,
        campaign_id: Uuid,
        outcome_summary: &str,
    ) -> AppResult<()> {
        self.minted.write().push(MintRecord {
            pledge_id,
            holder: holder.to_string(),
            campaign_id,
            outcome_summary: outcome_summary.to_string(),
        });
        Ok(())
    }

    async fn campaigns_past_deadline(&self, now: DateTime<Utc>) -> AppResult<Vec<Campaign>> {
        Ok(self
            .campaigns
            .read()
            .values()
            .filter(|c| {
                c.status == CampaignStatus::Active
                    && c.deadline.map(|d| d <= now).unwrap_or(false)
            })
            .cloned()
            .collect())
    }
}
