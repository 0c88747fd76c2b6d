use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use num_bigint::BigUint;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;
use validator::Validate;

use crate::api::models::*;
use crate::error::{AppError, AppResult, ResolutionError};
use crate::ledger::amount::parse_amount;
use crate::ledger::models::{Pledge, PledgeStatus, TriggerSource};
use crate::oracle::providers::attestation::AttestationOracle;
use crate::oracle::webhook::{WebhookHandler, WebhookOutcome};
use crate::oracle::{OracleData, OracleRouter, VerificationResult};
use crate::resolution::calculator;
use crate::resolution::engine::ResolutionEngine;

#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<ResolutionEngine>,
    pub router: Arc<OracleRouter>,
    pub webhooks: Arc<WebhookHandler>,
    pub attestation: Arc<AttestationOracle>,
}

fn validated<T: Validate>(req: &T) -> AppResult<()> {
    req.validate()
        .map_err(|e| AppError::InvalidInput(e.to_string()))
}

pub async fn trigger_resolution(
    State(state): State<AppState>,
    Json(req): Json<TriggerResolutionRequest>,
) -> AppResult<impl IntoResponse> {
    validated(&req)?;
    info!(
        "⚙️ Resolution trigger requested for campaign {} (force: {})",
        req.campaign_id, req.force
    );

    let job = state
        .engine
        .trigger_resolution(req.campaign_id, TriggerSource::Manual, req.force);

    Ok((
        StatusCode::ACCEPTED,
        Json(TriggerResolutionResponse {
            job_id: job.id,
            campaign_id: job.campaign_id,
            status: job.status,
        }),
    ))
}

pub async fn schedule_resolution(
    State(state): State<AppState>,
    Json(req): Json<ScheduleResolutionRequest>,
) -> AppResult<impl IntoResponse> {
    validated(&req)?;
    state
        .engine
        .schedule_resolution(req.campaign_id, req.deadline)?;
    Ok(Json(OkResponse::ok()))
}

pub async fn cancel_scheduled_resolution(
    State(state): State<AppState>,
    Path(campaign_id): Path<Uuid>,
) -> AppResult<impl IntoResponse> {
    state.engine.cancel_scheduled_resolution(campaign_id);
    Ok(Json(OkResponse::ok()))
}

pub async fn get_job(
    State(state): State<AppState>,
    Path(job_id): Path<Uuid>,
) -> AppResult<impl IntoResponse> {
    let job = state
        .engine
        .get_job(job_id)
        .ok_or(ResolutionError::JobNotFound(job_id))?;
    Ok(Json(job))
}

pub async fn get_jobs_for_campaign(
    State(state): State<AppState>,
    Path(campaign_id): Path<Uuid>,
) -> AppResult<impl IntoResponse> {
    let jobs = state.engine.get_jobs_for_campaign(campaign_id);
    let count = jobs.len();
    Ok(Json(JobsForCampaignResponse { jobs, count }))
}

/// Dry run: verify the supplied milestones through the registered
/// oracles without touching any pledge.
pub async fn dry_run_verify(
    State(state): State<AppState>,
    Path(campaign_id): Path<Uuid>,
    Json(req): Json<DryRunVerifyRequest>,
) -> AppResult<impl IntoResponse> {
    validated(&req)?;
    for milestone in &req.milestones {
        validated(milestone)?;
    }

    let milestones: Vec<_> = req
        .milestones
        .into_iter()
        .map(|m| m.into_milestone(campaign_id))
        .collect();

    let results = state
        .engine
        .verify_milestones(campaign_id, &milestones, &[])
        .await;

    let verified = results.iter().filter(|r| r.verified).count();
    let summary = VerifySummary {
        total: results.len(),
        verified,
        failed: results.len() - verified,
    };
    Ok(Json(DryRunVerifyResponse { results, summary }))
}

/// Dry run: run the pledge calculator against supplied verification
/// results (or a single synthesized result around `oracle_data`).
/// Nothing is committed.
pub async fn dry_run_calculate(
    Path(campaign_id): Path<Uuid>,
    Json(req): Json<DryRunCalculateRequest>,
) -> AppResult<impl IntoResponse> {
    validated(&req)?;

    let results: Vec<VerificationResult> = match (req.milestone_results, req.oracle_data) {
        (Some(inputs), _) => inputs.into_iter().map(|m| m.into_result()).collect(),
        (None, Some(data)) => vec![VerificationResult {
            milestone_id: Uuid::new_v4(),
            oracle_id: "dry-run".to_string(),
            verified: true,
            oracle_data: OracleData::from_json(&data),
            release_percentage: 100,
            error: None,
        }],
        (None, None) => Vec::new(),
    };

    let mut outcomes = Vec::with_capacity(req.pledges.len());
    let mut total_released = BigUint::from(0u32);
    let mut total_refunded = BigUint::from(0u32);
    let mut errors = 0usize;

    for input in req.pledges {
        validated(&input)?;
        let pledge = Pledge {
            id: input.pledge_id.unwrap_or_else(Uuid::new_v4),
            campaign_id,
            backer: "dry-run".to_string(),
            pledge_type: input.pledge_type,
            escrowed_amount: parse_amount(&input.escrowed_amount)?,
            params: input.params,
            status: PledgeStatus::Escrowed,
        };

        match calculator::calculate(&pledge, &results) {
            Ok(outcome) => {
                total_released += &outcome.release;
                total_refunded += &outcome.refund;
                outcomes.push(PledgeOutcomeEntry {
                    pledge_id: pledge.id,
                    release_amount: Some(outcome.release.to_str_radix(10)),
                    refund_amount: Some(outcome.refund.to_str_radix(10)),
                    error: None,
                });
            }
            Err(e) => {
                errors += 1;
                outcomes.push(PledgeOutcomeEntry {
                    pledge_id: pledge.id,
                    release_amount: None,
                    refund_amount: None,
                    error: Some(e.to_string()),
                });
            }
        }
    }

    let pledges = outcomes.len();
    Ok(Json(DryRunCalculateResponse {
        outcomes,
        summary: CalculateSummary {
            total_released: total_released.to_str_radix(10),
            total_refunded: total_refunded.to_str_radix(10),
            pledges,
            errors,
        },
    }))
}

pub async fn oracle_webhook(
    State(state): State<AppState>,
    Path(oracle_id): Path<String>,
    Json(req): Json<WebhookRequest>,
) -> AppResult<impl IntoResponse> {
    validated(&req)?;

    match state
        .webhooks
        .handle(&oracle_id, req.payload.get(), &req.signature, &req.nonce)?
    {
        WebhookOutcome::Accepted(job) => Ok((
            StatusCode::ACCEPTED,
            Json(WebhookResponse {
                status: "accepted",
                job_id: Some(job.id),
            }),
        )),
        WebhookOutcome::Replayed => Ok((
            StatusCode::OK,
            Json(WebhookResponse {
                status: "replayed",
                job_id: None,
            }),
        )),
        // a resolution pass was already running; the oracle should redeliver
        WebhookOutcome::NotApplied => Ok((
            StatusCode::CONFLICT,
            Json(WebhookResponse {
                status: "not_applied",
                job_id: None,
            }),
        )),
    }
}

pub async fn webhook_stats(State(state): State<AppState>) -> AppResult<impl IntoResponse> {
    Ok(Json(WebhookStatsResponse {
        oracles: state.webhooks.stats(),
    }))
}

pub async fn submit_attestation(
    State(state): State<AppState>,
    Json(req): Json<SubmitAttestationRequest>,
) -> AppResult<impl IntoResponse> {
    validated(&req)?;
    let attestation = state.attestation.submit_attestation(
        req.milestone_id,
        req.attester,
        OracleData::from_json(&req.oracle_data),
    );
    Ok((
        StatusCode::CREATED,
        Json(SubmitAttestationResponse {
            milestone_id: attestation.milestone_id,
            digest: attestation.digest,
            submitted_at: attestation.submitted_at,
        }),
    ))
}

pub async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    Json(HealthResponse {
        status: "healthy",
        registered_oracles: state.router.registered_oracles(),
    })
}
