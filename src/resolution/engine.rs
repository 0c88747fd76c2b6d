use chrono::{DateTime, Utc};
use num_bigint::BigUint;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::error::{AppError, AppResult, OracleError, ResolutionError};
use crate::ledger::models::{
    CampaignStatus, JobStatus, Milestone, Pledge, PledgeStatus, ResolutionJob, ResolutionSummary,
    TriggerSource,
};
use crate::ledger::provider::DataProvider;
use crate::oracle::router::OracleRouter;
use crate::oracle::traits::VerificationResult;
use crate::resolution::calculator;
use crate::resolution::events::ResolutionSubscriber;

/// Engine tuning knobs. Oracle calls are bounded by `oracle_timeout`; a
/// timeout counts as a verification failure, never a job failure.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub oracle_timeout: Duration,
    pub oracle_retry_attempts: u32,
    pub retry_backoff: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            oracle_timeout: Duration::from_secs(10),
            oracle_retry_attempts: 2,
            retry_backoff: Duration::from_millis(200),
        }
    }
}

/// Orchestrates the resolution job life-cycle: trigger, verify, calculate,
/// commit. Job state is in-memory; the campaign-keyed active index under a
/// single mutex is the mutual exclusion preventing two concurrent passes
/// for one campaign.
pub struct ResolutionEngine {
    provider: Arc<dyn DataProvider>,
    router: Arc<OracleRouter>,
    config: EngineConfig,
    jobs: RwLock<HashMap<Uuid, ResolutionJob>>,
    active_jobs: Mutex<HashMap<Uuid, Uuid>>,
    schedules: Mutex<HashMap<Uuid, JoinHandle<()>>>,
    subscribers: RwLock<Vec<Arc<dyn ResolutionSubscriber>>>,
}

impl ResolutionEngine {
    pub fn new(
        provider: Arc<dyn DataProvider>,
        router: Arc<OracleRouter>,
        config: EngineConfig,
    ) -> Self {
        Self {
            provider,
            router,
            config,
            jobs: RwLock::new(HashMap::new()),
            active_jobs: Mutex::new(HashMap::new()),
            schedules: Mutex::new(HashMap::new()),
            subscribers: RwLock::new(Vec::new()),
        }
    }

    pub fn subscribe(&self, subscriber: Arc<dyn ResolutionSubscriber>) {
        self.subscribers.write().push(subscriber);
    }

    /// Trigger a resolution pass for a campaign.
    ///
    /// Idempotent: while a pending/processing job exists for the campaign
    /// and `force` is not set, the existing job is returned unchanged.
    /// `force` bypasses the check and starts a fresh pass.
    pub fn trigger_resolution(
        self: &Arc<Self>,
        campaign_id: Uuid,
        triggered_by: TriggerSource,
        force: bool,
    ) -> ResolutionJob {
        self.trigger_with_results(campaign_id, triggered_by, force, Vec::new())
            .0
    }

    /// Trigger with externally-supplied verification results (webhook
    /// path). Milestones covered by `external` skip the live oracle call.
    ///
    /// The flag is `false` when an already-active job was joined; in that
    /// case `external` was discarded, and the caller must not treat the
    /// results as applied.
    pub fn trigger_with_results(
        self: &Arc<Self>,
        campaign_id: Uuid,
        triggered_by: TriggerSource,
        force: bool,
        external: Vec<VerificationResult>,
    ) -> (ResolutionJob, bool) {
        // One lock guards check-then-set; nothing yields in between, so
        // the at-most-one-active-job invariant holds across threads.
        let mut active = self.active_jobs.lock();

        if !force {
            if let Some(job_id) = active.get(&campaign_id) {
                if let Some(job) = self.jobs.read().get(job_id) {
                    if job.is_active() {
                        info!(
                            "Resolution already active for campaign {}: returning job {}",
                            campaign_id, job.id
                        );
                        return (job.clone(), false);
                    }
                }
            }
        }

        let job = ResolutionJob::new(campaign_id, triggered_by);
        self.jobs.write().insert(job.id, job.clone());
        active.insert(campaign_id, job.id);
        drop(active);

        self.notify(|s| s.on_queued(&job));

        let engine = self.clone();
        let job_id = job.id;
        tokio::spawn(async move {
            engine.run_resolution(job_id, campaign_id, external).await;
        });

        (job, true)
    }

    /// Register a deferred trigger firing at `deadline`. Rescheduling the
    /// same campaign replaces the prior timer.
    pub fn schedule_resolution(
        self: &Arc<Self>,
        campaign_id: Uuid,
        deadline: DateTime<Utc>,
    ) -> AppResult<()> {
        if deadline <= Utc::now() {
            return Err(ResolutionError::DeadlinePassed(deadline).into());
        }

        let mut schedules = self.schedules.lock();
        if let Some(previous) = schedules.remove(&campaign_id) {
            previous.abort();
            info!("Replacing scheduled resolution for campaign {}", campaign_id);
        }

        let engine = self.clone();
        let handle = tokio::spawn(async move {
            let wait = (deadline - Utc::now()).to_std().unwrap_or(Duration::ZERO);
            tokio::time::sleep(wait).await;
            engine.schedules.lock().remove(&campaign_id);
            engine.trigger_resolution(campaign_id, TriggerSource::Schedule, false);
        });
        schedules.insert(campaign_id, handle);

        info!(
            "⏰ Resolution scheduled for campaign {} at {}",
            campaign_id, deadline
        );
        Ok(())
    }

    /// Remove a scheduled trigger. Cancelling after it fired is a no-op.
    pub fn cancel_scheduled_resolution(&self, campaign_id: Uuid) {
        if let Some(handle) = self.schedules.lock().remove(&campaign_id) {
            handle.abort();
            info!("Cancelled scheduled resolution for campaign {}", campaign_id);
        }
    }

    pub fn get_job(&self, job_id: Uuid) -> Option<ResolutionJob> {
        self.jobs.read().get(&job_id).cloned()
    }

    pub fn get_jobs_for_campaign(&self, campaign_id: Uuid) -> Vec<ResolutionJob> {
        let mut jobs: Vec<ResolutionJob> = self
            .jobs
            .read()
            .values()
            .filter(|j| j.campaign_id == campaign_id)
            .cloned()
            .collect();
        jobs.sort_by_key(|j| (j.created_at, j.id));
        jobs
    }

    /// Background task auto-triggering campaigns whose deadline passed
    pub fn start_deadline_poller(self: &Arc<Self>, interval: Duration) -> JoinHandle<()> {
        let engine = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                match engine.provider.campaigns_past_deadline(Utc::now()).await {
                    Ok(campaigns) => {
                        for campaign in campaigns {
                            engine.trigger_resolution(campaign.id, TriggerSource::Poll, false);
                        }
                    }
                    Err(e) => error!("Deadline poll failed: {:?}", e),
                }
            }
        })
    }

    /// Verify milestones concurrently (fan-out/fan-in), preserving
    /// declaration order in the returned slice. Externally-supplied
    /// results take the place of a live call for their milestone.
    pub async fn verify_milestones(
        &self,
        campaign_id: Uuid,
        milestones: &[Milestone],
        external: &[VerificationResult],
    ) -> Vec<VerificationResult> {
        let calls = milestones.iter().map(|milestone| async move {
            if let Some(supplied) = external.iter().find(|r| r.milestone_id == milestone.id) {
                let mut result = supplied.clone();
                result.release_percentage = milestone.release_percentage;
                return result;
            }
            self.verify_with_retries(campaign_id, milestone).await
        });
        futures::future::join_all(calls).await
    }

    async fn verify_with_retries(
        &self,
        campaign_id: Uuid,
        milestone: &Milestone,
    ) -> VerificationResult {
        let attempts = self.config.oracle_retry_attempts + 1;
        let mut last: Option<VerificationResult> = None;

        for attempt in 1..=attempts {
            match tokio::time::timeout(
                self.config.oracle_timeout,
                self.router.verify_milestone(campaign_id, milestone),
            )
            .await
            {
                Ok(Ok(result)) => {
                    if result.error.is_none() {
                        return result;
                    }
                    last = Some(result);
                }
                Ok(Err(e)) => {
                    let misconfigured = matches!(e, AppError::Oracle(OracleError::NotFound(_)));
                    last = Some(VerificationResult::failed(milestone, e.to_string()));
                    if misconfigured {
                        // retrying cannot register an oracle
                        break;
                    }
                }
                Err(_) => {
                    last = Some(VerificationResult::failed(
                        milestone,
                        OracleError::Timeout(milestone.oracle_id.clone()).to_string(),
                    ));
                }
            }

            if attempt < attempts {
                warn!(
                    "Oracle call failed for milestone {} (attempt {}/{}), retrying",
                    milestone.id, attempt, attempts
                );
                tokio::time::sleep(self.config.retry_backoff).await;
            }
        }

        last.unwrap_or_else(|| VerificationResult::failed(milestone, "no verification attempt"))
    }

    async fn run_resolution(
        self: Arc<Self>,
        job_id: Uuid,
        campaign_id: Uuid,
        external: Vec<VerificationResult>,
    ) {
        self.update_job(job_id, |job| job.status = JobStatus::Processing);

        match self.execute(campaign_id, &external).await {
            Ok(summary) => {
                let job = self.update_job(job_id, |job| {
                    job.status = JobStatus::Completed;
                    job.result = Some(summary.clone());
                    job.finished_at = Some(Utc::now());
                });
                self.clear_active(campaign_id, job_id);
                if let Some(job) = job {
                    self.notify(|s| s.on_completed(&job));
                }
            }
            Err(e) => {
                let job = self.update_job(job_id, |job| {
                    job.status = JobStatus::Failed;
                    job.error = Some(e.to_string());
                    job.finished_at = Some(Utc::now());
                });
                self.clear_active(campaign_id, job_id);
                if let Some(job) = job {
                    self.notify(|s| s.on_failed(&job));
                }
            }
        }
    }

    /// One resolution pass: load, verify, calculate, commit.
    ///
    /// Individual oracle failures and individual pledge calculation errors
    /// never abort the pass; load and commit errors fail the whole job.
    async fn execute(
        &self,
        campaign_id: Uuid,
        external: &[VerificationResult],
    ) -> AppResult<ResolutionSummary> {
        let campaign = self
            .provider
            .get_campaign(campaign_id)
            .await?
            .ok_or(ResolutionError::CampaignNotFound(campaign_id))?;
        // a settled campaign keeps its committed outcome; a re-trigger
        // completes without touching the ledger
        if campaign.status != CampaignStatus::Active {
            info!(
                "Campaign {} is already {}: nothing to resolve",
                campaign_id, campaign.status
            );
            return Ok(ResolutionSummary::default());
        }
        let pledges = self.provider.get_pledges_for_campaign(campaign_id).await?;
        let milestones = self.provider.get_milestones_for_campaign(campaign_id).await?;

        let results = self
            .verify_milestones(campaign_id, &milestones, external)
            .await;
        let milestones_verified = results.iter().filter(|r| r.verified).count();
        let milestones_failed = results.len() - milestones_verified;

        let mut outcomes: Vec<(Pledge, calculator::PledgeOutcome)> = Vec::new();
        let mut pledges_unresolved = 0usize;
        for pledge in pledges.into_iter().filter(|p| p.status == PledgeStatus::Escrowed) {
            match calculator::calculate(&pledge, &results) {
                Ok(outcome) => outcomes.push((pledge, outcome)),
                Err(e) => {
                    warn!("Calculation failed for pledge {}: {}", pledge.id, e);
                    pledges_unresolved += 1;
                }
            }
        }

        let mut total_released = BigUint::from(0u32);
        let mut total_refunded = BigUint::from(0u32);
        for (pledge, outcome) in &outcomes {
            self.provider
                .resolve_pledge(pledge.id, &outcome.release, &outcome.refund)
                .await
                .map_err(|e| ResolutionError::CommitFailed(e.to_string()))?;
            total_released += &outcome.release;
            total_refunded += &outcome.refund;
        }

        let status = if total_released > BigUint::from(0u32) {
            CampaignStatus::Succeeded
        } else {
            CampaignStatus::Failed
        };
        self.provider
            .update_campaign_status(campaign_id, status, &total_released, &total_refunded)
            .await
            .map_err(|e| ResolutionError::CommitFailed(e.to_string()))?;

        // fire-and-forget: a minting failure never fails the job
        for (pledge, outcome) in &outcomes {
            let provider = self.provider.clone();
            let pledge_id = pledge.id;
            let holder = pledge.backer.clone();
            let outcome_summary =
                format!("released {} / refunded {}", outcome.release, outcome.refund);
            tokio::spawn(async move {
                if let Err(e) = provider
                    .mint_commemorative(pledge_id, &holder, campaign_id, &outcome_summary)
                    .await
                {
                    warn!("Commemorative mint failed for pledge {}: {:?}", pledge_id, e);
                }
            });
        }

        Ok(ResolutionSummary {
            milestones_verified,
            milestones_failed,
            pledges_resolved: outcomes.len(),
            pledges_unresolved,
            total_released,
            total_refunded,
        })
    }

    fn update_job(
        &self,
        job_id: Uuid,
        mutate: impl FnOnce(&mut ResolutionJob),
    ) -> Option<ResolutionJob> {
        let mut jobs = self.jobs.write();
        let job = jobs.get_mut(&job_id)?;
        mutate(job);
        Some(job.clone())
    }

    fn clear_active(&self, campaign_id: Uuid, job_id: Uuid) {
        let mut active = self.active_jobs.lock();
        if active.get(&campaign_id) == Some(&job_id) {
            active.remove(&campaign_id);
        }
    }

    fn notify(&self, f: impl Fn(&dyn ResolutionSubscriber)) {
        for subscriber in self.subscribers.read().iter() {
            f(subscriber.as_ref());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AppResult;
    use crate::ledger::memory::MemoryDataProvider;
    use crate::ledger::models::{
        CalculationParams, Campaign, ConditionOperator, MilestoneCondition, PledgeType, Tier,
    };
    use crate::oracle::traits::OracleProvider;
    use crate::oracle::value::{OracleData, OracleValue};
    use async_trait::async_trait;
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;

    struct StaticOracle {
        verified: bool,
        fields: Vec<(String, Decimal)>,
    }

    impl StaticOracle {
        fn verifying(fields: &[(&str, Decimal)]) -> Self {
            Self {
                verified: true,
                fields: fields
                    .iter()
                    .map(|(k, v)| (k.to_string(), *v))
                    .collect(),
            }
        }
    }

    #[async_trait]
    impl OracleProvider for StaticOracle {
        fn name(&self) -> &'static str {
            "attestation"
        }

        async fn verify(
            &self,
            _campaign_id: Uuid,
            milestone: &Milestone,
        ) -> AppResult<VerificationResult> {
            let mut data = OracleData::new();
            for (k, v) in &self.fields {
                data.insert(k.clone(), OracleValue::Number(*v));
            }
            Ok(if self.verified {
                VerificationResult::verified(milestone, data)
            } else {
                VerificationResult::unverified(milestone, data)
            })
        }
    }

    struct BrokenOracle;

    #[async_trait]
    impl OracleProvider for BrokenOracle {
        fn name(&self) -> &'static str {
            "api"
        }

        async fn verify(
            &self,
            _campaign_id: Uuid,
            _milestone: &Milestone,
        ) -> AppResult<VerificationResult> {
            Err(AppError::Oracle(OracleError::CallFailed {
                oracle_id: "broken".to_string(),
                message: "upstream down".to_string(),
            }))
        }
    }

    /// Delegates loads to memory, fails every commit
    struct FailingCommitProvider {
        inner: MemoryDataProvider,
    }

    #[async_trait]
    impl DataProvider for FailingCommitProvider {
        async fn get_campaign(&self, id: Uuid) -> AppResult<Option<Campaign>> {
            self.inner.get_campaign(id).await
        }
        async fn get_pledges_for_campaign(&self, id: Uuid) -> AppResult<Vec<Pledge>> {
            self.inner.get_pledges_for_campaign(id).await
        }
        async fn get_milestones_for_campaign(&self, id: Uuid) -> AppResult<Vec<Milestone>> {
            self.inner.get_milestones_for_campaign(id).await
        }
        async fn resolve_pledge(&self, _: Uuid, _: &BigUint, _: &BigUint) -> AppResult<()> {
            Err(ResolutionError::CommitFailed("database unavailable".to_string()).into())
        }
        async fn update_campaign_status(
            &self,
            _: Uuid,
            _: CampaignStatus,
            _: &BigUint,
            _: &BigUint,
        ) -> AppResult<()> {
            Err(ResolutionError::CommitFailed("database unavailable".to_string()).into())
        }
        async fn mint_commemorative(&self, _: Uuid, _: &str, _: Uuid, _: &str) -> AppResult<()> {
            Ok(())
        }
        async fn campaigns_past_deadline(&self, now: DateTime<Utc>) -> AppResult<Vec<Campaign>> {
            self.inner.campaigns_past_deadline(now).await
        }
    }

    fn campaign(id: Uuid) -> Campaign {
        Campaign {
            id,
            creator: "0xcreator".to_string(),
            title: "Run a marathon for the shelter".to_string(),
            status: CampaignStatus::Active,
            deadline: None,
            created_at: Utc::now(),
        }
    }

    fn milestone(campaign_id: Uuid, oracle_id: &str, pct: u32) -> Milestone {
        Milestone {
            id: Uuid::new_v4(),
            campaign_id,
            oracle_id: oracle_id.to_string(),
            condition: MilestoneCondition::default(),
            release_percentage: pct,
            oracle_params: serde_json::Value::Null,
        }
    }

    fn pledge(
        campaign_id: Uuid,
        pledge_type: PledgeType,
        escrowed: u64,
        params: Option<CalculationParams>,
    ) -> Pledge {
        Pledge {
            id: Uuid::new_v4(),
            campaign_id,
            backer: "0xbacker".to_string(),
            pledge_type,
            escrowed_amount: BigUint::from(escrowed),
            params,
            status: PledgeStatus::Escrowed,
        }
    }

    fn engine_with(
        provider: Arc<dyn DataProvider>,
        oracles: Vec<(&str, Arc<dyn OracleProvider>)>,
    ) -> Arc<ResolutionEngine> {
        let mut router = OracleRouter::new();
        for (id, oracle) in oracles {
            router.register(id.to_string(), oracle);
        }
        let config = EngineConfig {
            oracle_timeout: Duration::from_millis(500),
            oracle_retry_attempts: 1,
            retry_backoff: Duration::from_millis(10),
        };
        Arc::new(ResolutionEngine::new(provider, Arc::new(router), config))
    }

    async fn wait_terminal(engine: &ResolutionEngine, job_id: Uuid) -> ResolutionJob {
        for _ in 0..500 {
            if let Some(job) = engine.get_job(job_id) {
                if job.status.is_terminal() {
                    return job;
                }
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("job {} never reached a terminal state", job_id);
    }

    #[tokio::test]
    async fn test_trigger_is_idempotent_without_force() {
        let provider = Arc::new(MemoryDataProvider::new());
        let campaign_id = Uuid::new_v4();
        provider.insert_campaign(campaign(campaign_id));
        let engine = engine_with(
            provider,
            vec![("gps", Arc::new(StaticOracle::verifying(&[])) as _)],
        );

        let first = engine.trigger_resolution(campaign_id, TriggerSource::Manual, false);
        let second = engine.trigger_resolution(campaign_id, TriggerSource::Manual, false);
        assert_eq!(first.id, second.id);

        wait_terminal(&engine, first.id).await;
        assert_eq!(engine.get_jobs_for_campaign(campaign_id).len(), 1);
    }

    #[tokio::test]
    async fn test_force_starts_a_new_job() {
        let provider = Arc::new(MemoryDataProvider::new());
        let campaign_id = Uuid::new_v4();
        provider.insert_campaign(campaign(campaign_id));
        let engine = engine_with(
            provider,
            vec![("gps", Arc::new(StaticOracle::verifying(&[])) as _)],
        );

        let first = engine.trigger_resolution(campaign_id, TriggerSource::Manual, false);
        let second = engine.trigger_resolution(campaign_id, TriggerSource::Manual, true);
        assert_ne!(first.id, second.id);

        wait_terminal(&engine, first.id).await;
        wait_terminal(&engine, second.id).await;
    }

    #[tokio::test]
    async fn test_full_resolution_flow() {
        let provider = Arc::new(MemoryDataProvider::new());
        let campaign_id = Uuid::new_v4();
        provider.insert_campaign(campaign(campaign_id));

        // one verifying milestone, one whose oracle is down
        provider.insert_milestone(milestone(campaign_id, "gps", 100));
        provider.insert_milestone(milestone(campaign_id, "broken", 50));

        let per_unit = pledge(
            campaign_id,
            PledgeType::PerUnit,
            100,
            Some(CalculationParams {
                per_unit_amount: Some(BigUint::from(2u32)),
                unit_field: Some("miles_completed".to_string()),
                ..Default::default()
            }),
        );
        let conditional = pledge(
            campaign_id,
            PledgeType::Conditional,
            500,
            Some(CalculationParams {
                condition_field: Some("miles_completed".to_string()),
                condition_operator: Some(ConditionOperator::Between),
                condition_value: Some(dec!(20)),
                condition_value_end: Some(dec!(30)),
                ..Default::default()
            }),
        );
        let tiered = pledge(
            campaign_id,
            PledgeType::Tiered,
            200,
            Some(CalculationParams {
                unit_field: Some("miles_completed".to_string()),
                tiers: Some(vec![
                    Tier { threshold: 0, rate: BigUint::from(1u32) },
                    Tier { threshold: 10, rate: BigUint::from(2u32) },
                    Tier { threshold: 20, rate: BigUint::from(3u32) },
                ]),
                ..Default::default()
            }),
        );
        let per_unit_id = per_unit.id;
        let conditional_id = conditional.id;
        let tiered_id = tiered.id;
        provider.insert_pledge(per_unit);
        provider.insert_pledge(conditional);
        provider.insert_pledge(tiered);

        let engine = engine_with(
            provider.clone(),
            vec![
                (
                    "gps",
                    Arc::new(StaticOracle::verifying(&[("miles_completed", dec!(26.2))])) as _,
                ),
                ("broken", Arc::new(BrokenOracle) as _),
            ],
        );

        let job = engine.trigger_resolution(campaign_id, TriggerSource::Manual, false);
        let job = wait_terminal(&engine, job.id).await;

        assert_eq!(job.status, JobStatus::Completed);
        let summary = job.result.unwrap();
        assert_eq!(summary.milestones_verified, 1);
        assert_eq!(summary.milestones_failed, 1);
        assert_eq!(summary.pledges_resolved, 3);
        assert_eq!(summary.pledges_unresolved, 0);
        // 52 (per_unit) + 500 (conditional) + 48 (tiered)
        assert_eq!(summary.total_released, BigUint::from(600u32));
        assert_eq!(summary.total_refunded, BigUint::from(200u32));

        let (release, refund) = provider.resolution_for(per_unit_id).unwrap();
        assert_eq!((release, refund), (BigUint::from(52u32), BigUint::from(48u32)));
        let (release, _) = provider.resolution_for(conditional_id).unwrap();
        assert_eq!(release, BigUint::from(500u32));
        let (release, _) = provider.resolution_for(tiered_id).unwrap();
        assert_eq!(release, BigUint::from(48u32));

        assert_eq!(
            provider.campaign(campaign_id).unwrap().status,
            CampaignStatus::Succeeded
        );

        // minting is fire-and-forget; give the spawned tasks a moment
        for _ in 0..100 {
            if provider.minted().len() == 3 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(provider.minted().len(), 3);
        let mint = provider
            .minted()
            .into_iter()
            .find(|m| m.pledge_id == per_unit_id)
            .unwrap();
        assert_eq!(mint.campaign_id, campaign_id);
        assert_eq!(mint.holder, "0xbacker");
        assert!(mint.outcome_summary.contains("released 52"));
    }

    #[tokio::test]
    async fn test_retrigger_after_settlement_leaves_the_outcome_intact() {
        let provider = Arc::new(MemoryDataProvider::new());
        let campaign_id = Uuid::new_v4();
        provider.insert_campaign(campaign(campaign_id));
        provider.insert_milestone(milestone(campaign_id, "gps", 100));
        let p = pledge(
            campaign_id,
            PledgeType::Flat,
            100,
            Some(CalculationParams::default()),
        );
        let pledge_id = p.id;
        provider.insert_pledge(p);

        let engine = engine_with(
            provider.clone(),
            vec![("gps", Arc::new(StaticOracle::verifying(&[])) as _)],
        );

        let first = engine.trigger_resolution(campaign_id, TriggerSource::Manual, false);
        wait_terminal(&engine, first.id).await;
        assert_eq!(
            provider.campaign(campaign_id).unwrap().status,
            CampaignStatus::Succeeded
        );

        let second = engine.trigger_resolution(campaign_id, TriggerSource::Manual, false);
        let second = wait_terminal(&engine, second.id).await;
        assert_eq!(second.status, JobStatus::Completed);
        let summary = second.result.unwrap();
        assert_eq!(summary.pledges_resolved, 0);
        assert_eq!(summary.total_released, BigUint::from(0u32));

        // the committed outcome survives the second pass
        assert_eq!(
            provider.campaign(campaign_id).unwrap().status,
            CampaignStatus::Succeeded
        );
        let (release, refund) = provider.resolution_for(pledge_id).unwrap();
        assert_eq!((release, refund), (BigUint::from(100u32), BigUint::from(0u32)));
    }

    #[tokio::test]
    async fn test_commit_failure_fails_the_job() {
        let inner = MemoryDataProvider::new();
        let campaign_id = Uuid::new_v4();
        inner.insert_campaign(campaign(campaign_id));
        inner.insert_milestone(milestone(campaign_id, "gps", 100));
        inner.insert_pledge(pledge(
            campaign_id,
            PledgeType::Flat,
            100,
            Some(CalculationParams::default()),
        ));

        let engine = engine_with(
            Arc::new(FailingCommitProvider { inner }),
            vec![("gps", Arc::new(StaticOracle::verifying(&[])) as _)],
        );

        let job = engine.trigger_resolution(campaign_id, TriggerSource::Manual, false);
        let job = wait_terminal(&engine, job.id).await;
        assert_eq!(job.status, JobStatus::Failed);
        assert!(job.error.as_deref().unwrap().contains("database unavailable"));

        // a failed job is terminal: the next trigger creates a new job
        let retry = engine.trigger_resolution(campaign_id, TriggerSource::Manual, false);
        assert_ne!(retry.id, job.id);
        wait_terminal(&engine, retry.id).await;
    }

    #[tokio::test]
    async fn test_missing_campaign_fails_the_job() {
        let engine = engine_with(
            Arc::new(MemoryDataProvider::new()),
            vec![("gps", Arc::new(StaticOracle::verifying(&[])) as _)],
        );
        let job = engine.trigger_resolution(Uuid::new_v4(), TriggerSource::Manual, false);
        let job = wait_terminal(&engine, job.id).await;
        assert_eq!(job.status, JobStatus::Failed);
        assert!(job.error.as_deref().unwrap().contains("Campaign not found"));
    }

    #[tokio::test]
    async fn test_schedule_then_cancel_creates_no_job() {
        let provider = Arc::new(MemoryDataProvider::new());
        let campaign_id = Uuid::new_v4();
        provider.insert_campaign(campaign(campaign_id));
        let engine = engine_with(
            provider,
            vec![("gps", Arc::new(StaticOracle::verifying(&[])) as _)],
        );

        engine
            .schedule_resolution(campaign_id, Utc::now() + chrono::Duration::milliseconds(150))
            .unwrap();
        engine.cancel_scheduled_resolution(campaign_id);

        tokio::time::sleep(Duration::from_millis(400)).await;
        assert!(engine.get_jobs_for_campaign(campaign_id).is_empty());
    }

    #[tokio::test]
    async fn test_schedule_fires_at_deadline() {
        let provider = Arc::new(MemoryDataProvider::new());
        let campaign_id = Uuid::new_v4();
        provider.insert_campaign(campaign(campaign_id));
        let engine = engine_with(
            provider,
            vec![("gps", Arc::new(StaticOracle::verifying(&[])) as _)],
        );

        engine
            .schedule_resolution(campaign_id, Utc::now() + chrono::Duration::milliseconds(50))
            .unwrap();

        let mut fired = None;
        for _ in 0..200 {
            if let Some(job) = engine.get_jobs_for_campaign(campaign_id).into_iter().next() {
                fired = Some(job);
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        let job = fired.expect("scheduled resolution never fired");
        assert_eq!(job.triggered_by, TriggerSource::Schedule);
        wait_terminal(&engine, job.id).await;
    }

    #[tokio::test]
    async fn test_reschedule_replaces_the_prior_timer() {
        let provider = Arc::new(MemoryDataProvider::new());
        let campaign_id = Uuid::new_v4();
        provider.insert_campaign(campaign(campaign_id));
        let engine = engine_with(
            provider,
            vec![("gps", Arc::new(StaticOracle::verifying(&[])) as _)],
        );

        engine
            .schedule_resolution(campaign_id, Utc::now() + chrono::Duration::milliseconds(50))
            .unwrap();
        engine
            .schedule_resolution(campaign_id, Utc::now() + chrono::Duration::milliseconds(500))
            .unwrap();

        // well past the first deadline: the replaced timer must not fire
        tokio::time::sleep(Duration::from_millis(250)).await;
        assert!(engine.get_jobs_for_campaign(campaign_id).is_empty());

        let mut fired = None;
        for _ in 0..200 {
            if let Some(job) = engine.get_jobs_for_campaign(campaign_id).into_iter().next() {
                fired = Some(job);
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        let job = fired.expect("rescheduled resolution never fired");
        assert_eq!(job.triggered_by, TriggerSource::Schedule);
        wait_terminal(&engine, job.id).await;
        assert_eq!(engine.get_jobs_for_campaign(campaign_id).len(), 1);
    }

    #[tokio::test]
    async fn test_schedule_rejects_past_deadline() {
        let engine = engine_with(Arc::new(MemoryDataProvider::new()), vec![]);
        let result =
            engine.schedule_resolution(Uuid::new_v4(), Utc::now() - chrono::Duration::seconds(1));
        assert!(matches!(
            result,
            Err(AppError::Resolution(ResolutionError::DeadlinePassed(_)))
        ));
    }

    #[tokio::test]
    async fn test_external_results_bypass_live_oracle() {
        let provider = Arc::new(MemoryDataProvider::new());
        let campaign_id = Uuid::new_v4();
        provider.insert_campaign(campaign(campaign_id));
        let m = milestone(campaign_id, "broken", 100);
        let milestone_id = m.id;
        provider.insert_milestone(m.clone());
        let p = pledge(
            campaign_id,
            PledgeType::PerUnit,
            100,
            Some(CalculationParams {
                per_unit_amount: Some(BigUint::from(2u32)),
                unit_field: Some("miles_completed".to_string()),
                ..Default::default()
            }),
        );
        let pledge_id = p.id;
        provider.insert_pledge(p);

        // the live oracle is down; the webhook-supplied result carries the data
        let engine = engine_with(provider.clone(), vec![("broken", Arc::new(BrokenOracle) as _)]);

        let mut data = OracleData::new();
        data.insert("miles_completed", OracleValue::Number(dec!(26.2)));
        let external = VerificationResult {
            milestone_id,
            oracle_id: "broken".to_string(),
            verified: true,
            oracle_data: data,
            release_percentage: 0,
            error: None,
        };

        let (job, started) = engine.trigger_with_results(
            campaign_id,
            TriggerSource::Webhook,
            false,
            vec![external],
        );
        assert!(started);
        let job = wait_terminal(&engine, job.id).await;

        assert_eq!(job.status, JobStatus::Completed);
        let summary = job.result.unwrap();
        assert_eq!(summary.milestones_verified, 1);
        let (release, refund) = provider.resolution_for(pledge_id).unwrap();
        assert_eq!((release, refund), (BigUint::from(52u32), BigUint::from(48u32)));
    }

    #[tokio::test]
    async fn test_deadline_poller_triggers_overdue_campaigns() {
        let provider = Arc::new(MemoryDataProvider::new());
        let campaign_id = Uuid::new_v4();
        let mut c = campaign(campaign_id);
        c.deadline = Some(Utc::now() - chrono::Duration::seconds(5));
        provider.insert_campaign(c);
        let engine = engine_with(
            provider,
            vec![("gps", Arc::new(StaticOracle::verifying(&[])) as _)],
        );

        let poller = engine.start_deadline_poller(Duration::from_millis(20));

        let mut fired = None;
        for _ in 0..200 {
            if let Some(job) = engine.get_jobs_for_campaign(campaign_id).into_iter().next() {
                fired = Some(job);
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        poller.abort();
        let job = fired.expect("poller never triggered the overdue campaign");
        assert_eq!(job.triggered_by, TriggerSource::Poll);
        wait_terminal(&engine, job.id).await;
    }
}
