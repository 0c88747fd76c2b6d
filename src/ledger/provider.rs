use async_trait::async_trait;
use chrono::{DateTime, Utc};
use num_bigint::BigUint;
use sqlx::types::BigDecimal;
use sqlx::{PgPool, Row};
use std::str::FromStr;
use uuid::Uuid;

use crate::error::{AppError, AppResult, ResolutionError};
use crate::ledger::models::{
    CalculationParams, Campaign, CampaignStatus, Milestone, MilestoneCondition, Pledge,
    PledgeStatus, PledgeType,
};

/// Persistence boundary consumed (not owned) by the resolution core.
/// Campaign/pledge CRUD, the release/refund side effect, and commemorative
/// minting all live behind this seam; amounts cross it as
/// arbitrary-precision integers.
#[async_trait]
pub trait DataProvider: Send + Sync {
    async fn get_campaign(&self, campaign_id: Uuid) -> AppResult<Option<Campaign>>;

    async fn get_pledges_for_campaign(&self, campaign_id: Uuid) -> AppResult<Vec<Pledge>>;

    async fn get_milestones_for_campaign(&self, campaign_id: Uuid) -> AppResult<Vec<Milestone>>;

    /// Settle one pledge: release/refund are exact, their sum equals the
    /// escrowed amount
    async fn resolve_pledge(
        &self,
        pledge_id: Uuid,
        release_amount: &BigUint,
        refund_amount: &BigUint,
    ) -> AppResult<()>;

    async fn update_campaign_status(
        &self,
        campaign_id: Uuid,
        status: CampaignStatus,
        total_released: &BigUint,
        total_refunded: &BigUint,
    ) -> AppResult<()>;

    /// Fire-and-forget commemorative mint for a resolved pledge
    async fn mint_commemorative(
        &self,
        pledge_id: Uuid,
        holder: &str,
        campaign_id: Uuid,
        outcome_summary: &str,
    ) -> AppResult<()>;

    /// Active campaigns whose deadline has passed, for the poller
    async fn campaigns_past_deadline(&self, now: DateTime<Utc>) -> AppResult<Vec<Campaign>>;
}

/// Postgres-backed data provider
pub struct PgDataProvider {
    pub pool: PgPool,
}

impl PgDataProvider {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn campaign_from_row(row: &sqlx::postgres::PgRow) -> AppResult<Campaign> {
        Ok(Campaign {
            id: row.try_get("id")?,
            creator: row.try_get("creator")?,
            title: row.try_get("title")?,
            status: row.try_get("status")?,
            deadline: row.try_get("deadline")?,
            created_at: row.try_get("created_at")?,
        })
    }

    fn pledge_from_row(row: &sqlx::postgres::PgRow) -> AppResult<Pledge> {
        let escrowed: BigDecimal = row.try_get("escrowed_amount")?;
        let params: Option<serde_json::Value> = row.try_get("params")?;
        let params = match params {
            Some(value) => Some(
                serde_json::from_value::<CalculationParams>(value)
                    .map_err(|e| AppError::Internal(format!("corrupt pledge params: {}", e)))?,
            ),
            None => None,
        };

        Ok(Pledge {
            id: row.try_get("id")?,
            campaign_id: row.try_get("campaign_id")?,
            backer: row.try_get("backer")?,
            pledge_type: row.try_get::<PledgeType, _>("pledge_type")?,
            escrowed_amount: decode_amount(&escrowed)?,
            params,
            status: row.try_get::<PledgeStatus, _>("status")?,
        })
    }

    fn milestone_from_row(row: &sqlx::postgres::PgRow) -> AppResult<Milestone> {
        let condition: serde_json::Value = row.try_get("condition")?;
        Ok(Milestone {
            id: row.try_get("id")?,
            campaign_id: row.try_get("campaign_id")?,
            oracle_id: row.try_get("oracle_id")?,
            condition: serde_json::from_value::<MilestoneCondition>(condition)
                .map_err(|e| AppError::Internal(format!("corrupt milestone condition: {}", e)))?,
            release_percentage: row.try_get::<i32, _>("release_percentage")? as u32,
            oracle_params: row.try_get("oracle_params")?,
        })
    }
}

/// NUMERIC(78,0) round-trips through decimal strings; anything fractional
/// or negative in an amount column is corrupt data
fn decode_amount(value: &BigDecimal) -> AppResult<BigUint> {
    value
        .to_string()
        .parse::<BigUint>()
        .map_err(|_| AppError::InvalidAmount(value.to_string()))
}

fn encode_amount(value: &BigUint) -> AppResult<BigDecimal> {
    BigDecimal::from_str(&value.to_str_radix(10))
        .map_err(|e| AppError::InvalidAmount(format!("{}: {}", value, e)))
}

#[async_trait]
impl DataProvider for PgDataProvider {
    async fn get_campaign(&self, campaign_id: Uuid) -> AppResult<Option<Campaign>> {
        let row = sqlx::query(
            r#"
            SELECT id, creator, title, status, deadline, created_at
            FROM campaigns
            WHERE id = $1
            "#,
        )
        .bind(campaign_id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(Self::campaign_from_row).transpose()
    }

    async fn get_pledges_for_campaign(&self, campaign_id: Uuid) -> AppResult<Vec<Pledge>> {
        let rows = sqlx::query(
            r#"
            SELECT id, campaign_id, backer, pledge_type, escrowed_amount, params, status
            FROM pledges
            WHERE campaign_id = $1
            ORDER BY created_at
            "#,
        )
        .bind(campaign_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(Self::pledge_from_row).collect()
    }

    async fn get_milestones_for_campaign(&self, campaign_id: Uuid) -> AppResult<Vec<Milestone>> {
        let rows = sqlx::query(
            r#"
            SELECT id, campaign_id, oracle_id, condition, release_percentage, oracle_params
            FROM milestones
            WHERE campaign_id = $1
            ORDER BY created_at
            "#,
        )
        .bind(campaign_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(Self::milestone_from_row).collect()
    }

    async fn resolve_pledge(
        &self,
        pledge_id: Uuid,
        release_amount: &BigUint,
        refund_amount: &BigUint,
    ) -> AppResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE pledges
            SET status = 'resolved', release_amount = $2, refund_amount = $3, resolved_at = now()
            WHERE id = $1 AND status = 'escrowed'
            "#,
        )
        .bind(pledge_id)
        .bind(encode_amount(release_amount)?)
        .bind(encode_amount(refund_amount)?)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::Resolution(ResolutionError::CommitFailed(format!(
                "pledge {} is not in escrowed state",
                pledge_id
            ))));
        }
        Ok(())
    }

    async fn update_campaign_status(
        &self,
        campaign_id: Uuid,
        status: CampaignStatus,
        total_released: &BigUint,
        total_refunded: &BigUint,
    ) -> AppResult<()> {
        sqlx::query(
            r#"
            UPDATE campaigns
            SET status = $2, total_released = $3, total_refunded = $4, updated_at = now()
            WHERE id = $1
            "#,
        )
        .bind(campaign_id)
        .bind(status)
        .bind(encode_amount(total_released)?)
        .bind(encode_amount(total_refunded)?)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn mint_commemorative(
        &self,
        pledge_id: Uuid,
        holder: &str,
        campaign_id: Uuid,
        outcome_summary: &str,
    ) -> AppResult<()> {
        sqlx::query(
            r#"
            INSERT INTO commemoratives (pledge_id, holder, campaign_id, outcome_summary)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (pledge_id) DO NOTHING
            "#,
        )
        .bind(pledge_id)
        .bind(holder)
        .bind(campaign_id)
        .bind(outcome_summary)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn campaigns_past_deadline(&self, now: DateTime<Utc>) -> AppResult<Vec<Campaign>> {
        let rows = sqlx::query(
            r#"
            SELECT id, creator, title, status, deadline, created_at
            FROM campaigns
            WHERE status = 'active' AND deadline IS NOT NULL AND deadline <= $1
            "#,
        )
        .bind(now)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(Self::campaign_from_row).collect()
    }
}
