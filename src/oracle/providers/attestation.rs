use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use tracing::info;
use uuid::Uuid;

use crate::error::AppResult;
use crate::ledger::models::Milestone;
use crate::oracle::traits::{OracleProvider, VerificationResult};
use crate::oracle::value::OracleData;
use crate::resolution::conditions;

/// A locally-submitted claim about a milestone, bound to its content by a
/// sha256 digest computed at submission time
#[derive(Debug, Clone, Serialize)]
pub struct Attestation {
    pub milestone_id: Uuid,
    pub attester: String,
    pub oracle_data: OracleData,
    pub digest: String,
    pub submitted_at: DateTime<Utc>,
}

/// Oracle provider backed by submitted attestations rather than a live
/// external source. Verification checks the stored digest and then the
/// milestone's condition against the attested data.
pub struct AttestationOracle {
    attestations: RwLock<HashMap<Uuid, Vec<Attestation>>>,
}

impl AttestationOracle {
    pub fn new() -> Self {
        Self {
            attestations: RwLock::new(HashMap::new()),
        }
    }

    pub fn submit_attestation(
        &self,
        milestone_id: Uuid,
        attester: impl Into<String>,
        oracle_data: OracleData,
    ) -> Attestation {
        let attester = attester.into();
        let attestation = Attestation {
            digest: Self::digest(milestone_id, &attester, &oracle_data),
            milestone_id,
            attester,
            oracle_data,
            submitted_at: Utc::now(),
        };
        info!(
            "Attestation submitted for milestone {} by {}",
            milestone_id, attestation.attester
        );
        self.attestations
            .write()
            .entry(milestone_id)
            .or_default()
            .push(attestation.clone());
        attestation
    }

    fn digest(milestone_id: Uuid, attester: &str, data: &OracleData) -> String {
        let mut hasher = Sha256::new();
        hasher.update(milestone_id.as_bytes());
        hasher.update(attester.as_bytes());
        // field order must not affect the digest
        let mut fields: Vec<(&String, String)> = data
            .0
            .iter()
            .map(|(k, v)| (k, serde_json::to_string(v).unwrap_or_default()))
            .collect();
        fields.sort();
        for (key, value) in fields {
            hasher.update(key.as_bytes());
            hasher.update(value.as_bytes());
        }
        hex::encode(hasher.finalize())
    }
}

impl Default for AttestationOracle {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl OracleProvider for AttestationOracle {
    fn name(&self) -> &'static str {
        "attestation"
    }

    async fn verify(
        &self,
        _campaign_id: Uuid,
        milestone: &Milestone,
    ) -> AppResult<VerificationResult> {
        let latest = self
            .attestations
            .read()
            .get(&milestone.id)
            .and_then(|a| a.last().cloned());

        let attestation = match latest {
            Some(a) => a,
            // nothing attested yet is a legitimate unverified state
            None => return Ok(VerificationResult::unverified(milestone, OracleData::new())),
        };

        let expected = Self::digest(milestone.id, &attestation.attester, &attestation.oracle_data);
        if expected != attestation.digest {
            return Ok(VerificationResult::failed(
                milestone,
                "attestation digest mismatch",
            ));
        }

        let satisfied = match (&milestone.condition.field, milestone.condition.operator) {
            (Some(field), Some(operator)) => conditions::evaluate(
                &attestation.oracle_data,
                field,
                operator,
                milestone.condition.value,
                milestone.condition.value_end,
            ),
            // no condition configured: an intact attestation is enough
            _ => true,
        };

        Ok(if satisfied {
            VerificationResult::verified(milestone, attestation.oracle_data)
        } else {
            VerificationResult::unverified(milestone, attestation.oracle_data)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::models::{ConditionOperator, MilestoneCondition};
    use crate::oracle::value::OracleValue;
    use rust_decimal_macros::dec;

    fn milestone_with_condition() -> Milestone {
        Milestone {
            id: Uuid::new_v4(),
            campaign_id: Uuid::new_v4(),
            oracle_id: "attested".to_string(),
            condition: MilestoneCondition {
                description: Some("run at least 20 miles".to_string()),
                field: Some("miles_completed".to_string()),
                operator: Some(ConditionOperator::Gte),
                value: Some(dec!(20)),
                value_end: None,
            },
            release_percentage: 100,
            oracle_params: serde_json::Value::Null,
        }
    }

    fn data(miles: rust_decimal::Decimal) -> OracleData {
        let mut d = OracleData::new();
        d.insert("miles_completed", OracleValue::Number(miles));
        d
    }

    #[tokio::test]
    async fn test_no_attestation_is_unverified_not_an_error() {
        let oracle = AttestationOracle::new();
        let result = oracle
            .verify(Uuid::new_v4(), &milestone_with_condition())
            .await
            .unwrap();
        assert!(!result.verified);
        assert!(result.error.is_none());
    }

    #[tokio::test]
    async fn test_attestation_satisfying_condition_verifies() {
        let oracle = AttestationOracle::new();
        let milestone = milestone_with_condition();
        oracle.submit_attestation(milestone.id, "0xrunner", data(dec!(26.2)));

        let result = oracle.verify(milestone.campaign_id, &milestone).await.unwrap();
        assert!(result.verified);
        assert_eq!(
            result.oracle_data.get("miles_completed"),
            Some(&OracleValue::Number(dec!(26.2)))
        );
    }

    #[tokio::test]
    async fn test_attestation_failing_condition_is_unverified() {
        let oracle = AttestationOracle::new();
        let milestone = milestone_with_condition();
        oracle.submit_attestation(milestone.id, "0xrunner", data(dec!(12)));

        let result = oracle.verify(milestone.campaign_id, &milestone).await.unwrap();
        assert!(!result.verified);
    }

    #[tokio::test]
    async fn test_latest_attestation_wins() {
        let oracle = AttestationOracle::new();
        let milestone = milestone_with_condition();
        oracle.submit_attestation(milestone.id, "0xrunner", data(dec!(5)));
        oracle.submit_attestation(milestone.id, "0xrunner", data(dec!(22)));

        let result = oracle.verify(milestone.campaign_id, &milestone).await.unwrap();
        assert!(result.verified);
    }

    #[test]
    fn test_digest_is_field_order_independent() {
        let id = Uuid::new_v4();
        let mut a = OracleData::new();
        a.insert("miles_completed", OracleValue::Number(dec!(26)));
        a.insert("elevation_gain", OracleValue::Number(dec!(500)));

        let mut b = OracleData::new();
        b.insert("elevation_gain", OracleValue::Number(dec!(500)));
        b.insert("miles_completed", OracleValue::Number(dec!(26)));

        assert_eq!(
            AttestationOracle::digest(id, "0xrunner", &a),
            AttestationOracle::digest(id, "0xrunner", &b)
        );
    }
}
