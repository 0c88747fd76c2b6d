use tracing::{error, info};

use crate::ledger::models::ResolutionJob;

/// Observer for resolution life-cycle transitions. Subscribers are called
/// synchronously after each state transition and are never awaited, so
/// they cannot block or alter engine behavior.
pub trait ResolutionSubscriber: Send + Sync {
    fn on_queued(&self, _job: &ResolutionJob) {}
    fn on_completed(&self, _job: &ResolutionJob) {}
    fn on_failed(&self, _job: &ResolutionJob) {}
}

/// Default subscriber: structured logs only
pub struct LogSubscriber;

impl ResolutionSubscriber for LogSubscriber {
    fn on_queued(&self, job: &ResolutionJob) {
        info!(
            "📋 Resolution queued: job={} campaign={} trigger={}",
            job.id,
            job.campaign_id,
            job.triggered_by.as_str()
        );
    }

    fn on_completed(&self, job: &ResolutionJob) {
        if let Some(summary) = &job.result {
            info!(
                "✓ Resolution completed: job={} campaign={} verified={}/{} released={} refunded={}",
                job.id,
                job.campaign_id,
                summary.milestones_verified,
                summary.milestones_verified + summary.milestones_failed,
                summary.total_released,
                summary.total_refunded
            );
        } else {
            info!("✓ Resolution completed: job={} campaign={}", job.id, job.campaign_id);
        }
    }

    fn on_failed(&self, job: &ResolutionJob) {
        error!(
            "❌ Resolution failed: job={} campaign={} error={}",
            job.id,
            job.campaign_id,
            job.error.as_deref().unwrap_or("unknown")
        );
    }
}
