use async_trait::async_trait;
use std::sync::Arc;
use tracing::warn;
use uuid::Uuid;

use crate::error::{AppError, AppResult, OracleError};
use crate::ledger::models::Milestone;
use crate::oracle::traits::{OracleProvider, VerificationResult};
use crate::oracle::value::OracleData;

/// Oracle provider that fans out to sub-oracles and verifies when a
/// quorum of them agree. Oracle data from agreeing sources is merged
/// first-wins in source order.
pub struct AggregatorOracle {
    sources: Vec<Arc<dyn OracleProvider>>,
    quorum: usize,
}

impl AggregatorOracle {
    pub fn new(sources: Vec<Arc<dyn OracleProvider>>, quorum: usize) -> Self {
        Self { sources, quorum }
    }
}

#[async_trait]
impl OracleProvider for AggregatorOracle {
    fn name(&self) -> &'static str {
        "aggregator"
    }

    async fn verify(
        &self,
        campaign_id: Uuid,
        milestone: &Milestone,
    ) -> AppResult<VerificationResult> {
        let calls = self
            .sources
            .iter()
            .map(|source| source.verify(campaign_id, milestone));
        let outcomes = futures::future::join_all(calls).await;

        let mut sub_results = Vec::new();
        let mut errors = Vec::new();
        for outcome in outcomes {
            match outcome {
                Ok(result) => sub_results.push(result),
                Err(e) => {
                    warn!("Aggregator sub-oracle failed for milestone {}: {}", milestone.id, e);
                    errors.push(e.to_string());
                }
            }
        }

        if sub_results.is_empty() {
            return Err(AppError::Oracle(OracleError::CallFailed {
                oracle_id: milestone.oracle_id.clone(),
                message: format!("all sub-oracles failed: {}", errors.join("; ")),
            }));
        }

        let agreeing: Vec<&VerificationResult> =
            sub_results.iter().filter(|r| r.verified).collect();

        let mut merged = OracleData::new();
        for result in &agreeing {
            merged.merge_missing(&result.oracle_data);
        }

        Ok(if agreeing.len() >= self.quorum {
            VerificationResult::verified(milestone, merged)
        } else {
            // a quorum shortfall is a legitimate unverified outcome
            VerificationResult::unverified(milestone, merged)
        })
    }
}
