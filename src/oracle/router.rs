use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::{AppError, AppResult, OracleError};
use crate::ledger::models::Milestone;
use crate::oracle::traits::{OracleProvider, VerificationResult};

/// Registry mapping oracle identifiers to provider implementations.
/// Dispatches verification calls and normalizes provider failures into
/// unverified results; retry policy belongs to the ResolutionEngine.
pub struct OracleRouter {
    providers: HashMap<String, Arc<dyn OracleProvider>>,
}

impl OracleRouter {
    pub fn new() -> Self {
        Self {
            providers: HashMap::new(),
        }
    }

    pub fn register(&mut self, oracle_id: String, provider: Arc<dyn OracleProvider>) {
        info!(
            "Registering oracle provider: {} (variant: {})",
            oracle_id,
            provider.name()
        );
        self.providers.insert(oracle_id, provider);
    }

    pub fn registered_oracles(&self) -> Vec<String> {
        self.providers.keys().cloned().collect()
    }

    /// Verify one milestone through its configured oracle.
    ///
    /// An unregistered oracle_id is an error, never a silent false
    /// verification. A provider failure is reported as an unverified
    /// result carrying the error detail.
    pub async fn verify_milestone(
        &self,
        campaign_id: Uuid,
        milestone: &Milestone,
    ) -> AppResult<VerificationResult> {
        let provider = self
            .providers
            .get(&milestone.oracle_id)
            .cloned()
            .ok_or_else(|| AppError::Oracle(OracleError::NotFound(milestone.oracle_id.clone())))?;

        match provider.verify(campaign_id, milestone).await {
            Ok(result) => Ok(result),
            Err(e) => {
                warn!(
                    "Oracle {} failed for milestone {}: {}",
                    milestone.oracle_id, milestone.id, e
                );
                Ok(VerificationResult::failed(milestone, e.to_string()))
            }
        }
    }
}

impl Default for OracleRouter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::models::MilestoneCondition;
    use crate::oracle::value::OracleData;
    use async_trait::async_trait;

    struct AlwaysErrors;

    #[async_trait]
    impl OracleProvider for AlwaysErrors {
        fn name(&self) -> &'static str {
            "api"
        }

        async fn verify(
            &self,
            _campaign_id: Uuid,
            _milestone: &Milestone,
        ) -> AppResult<VerificationResult> {
            Err(AppError::Oracle(OracleError::CallFailed {
                oracle_id: "gps".to_string(),
                message: "connection refused".to_string(),
            }))
        }
    }

    struct AlwaysVerifies;

    #[async_trait]
    impl OracleProvider for AlwaysVerifies {
        fn name(&self) -> &'static str {
            "attestation"
        }

        async fn verify(
            &self,
            _campaign_id: Uuid,
            milestone: &Milestone,
        ) -> AppResult<VerificationResult> {
            Ok(VerificationResult::verified(milestone, OracleData::new()))
        }
    }

    fn milestone(oracle_id: &str) -> Milestone {
        Milestone {
            id: Uuid::new_v4(),
            campaign_id: Uuid::new_v4(),
            oracle_id: oracle_id.to_string(),
            condition: MilestoneCondition::default(),
            release_percentage: 100,
            oracle_params: serde_json::Value::Null,
        }
    }

    #[tokio::test]
    async fn test_unregistered_oracle_is_an_error() {
        let router = OracleRouter::new();
        let result = router
            .verify_milestone(Uuid::new_v4(), &milestone("ghost"))
            .await;
        assert!(matches!(
            result,
            Err(AppError::Oracle(OracleError::NotFound(_)))
        ));
    }

    #[tokio::test]
    async fn test_provider_failure_becomes_unverified_result() {
        let mut router = OracleRouter::new();
        router.register("gps".to_string(), Arc::new(AlwaysErrors));

        let result = router
            .verify_milestone(Uuid::new_v4(), &milestone("gps"))
            .await
            .unwrap();
        assert!(!result.verified);
        assert!(result.error.as_deref().unwrap().contains("connection refused"));
    }

    #[tokio::test]
    async fn test_dispatch_by_oracle_id() {
        let mut router = OracleRouter::new();
        router.register("attested".to_string(), Arc::new(AlwaysVerifies));
        router.register("gps".to_string(), Arc::new(AlwaysErrors));

        let ok = router
            .verify_milestone(Uuid::new_v4(), &milestone("attested"))
            .await
            .unwrap();
        assert!(ok.verified);

        let failed = router
            .verify_milestone(Uuid::new_v4(), &milestone("gps"))
            .await
            .unwrap();
        assert!(!failed.verified);
    }
}
