use chrono::{DateTime, Duration, Utc};
use hmac::{Hmac, Mac};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::{AppResult, WebhookError};
use crate::ledger::models::{ResolutionJob, TriggerSource};
use crate::oracle::traits::VerificationResult;
use crate::oracle::value::OracleData;
use crate::resolution::engine::ResolutionEngine;

type HmacSha256 = Hmac<Sha256>;

/// Inbound oracle push event body
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookPayload {
    pub campaign_id: Uuid,
    pub milestone_id: Uuid,
    pub verified: bool,
    #[serde(default)]
    pub oracle_data: serde_json::Value,
}

/// Per-oracle delivery counters for observability
#[derive(Debug, Clone, Default, Serialize)]
pub struct DeliveryStats {
    pub received: u64,
    pub accepted: u64,
    pub rejected: u64,
    pub replayed: u64,
    pub deferred: u64,
}

#[derive(Debug)]
pub enum WebhookOutcome {
    /// Event accepted; a resolution job was started with its data
    Accepted(ResolutionJob),
    /// Duplicate (oracle_id, nonce): acknowledged, no side effect
    Replayed,
    /// A resolution pass was already running; the data was not applied
    /// and the nonce was not consumed, so the oracle can redeliver
    NotApplied,
}

/// Ingests oracle push events: verifies the HMAC signature against the
/// oracle's configured secret, deduplicates by nonce, and feeds the
/// verified data into the ResolutionEngine as an externally-supplied
/// verification.
pub struct WebhookHandler {
    engine: Arc<ResolutionEngine>,
    secrets: HashMap<String, String>,
    /// oracle_id -> nonce -> first seen; pruned past the retention window
    seen_nonces: Mutex<HashMap<String, HashMap<String, DateTime<Utc>>>>,
    stats: Mutex<HashMap<String, DeliveryStats>>,
    nonce_retention: Duration,
}

impl WebhookHandler {
    pub fn new(
        engine: Arc<ResolutionEngine>,
        secrets: HashMap<String, String>,
        nonce_retention: Duration,
    ) -> Self {
        Self {
            engine,
            secrets,
            seen_nonces: Mutex::new(HashMap::new()),
            stats: Mutex::new(HashMap::new()),
            nonce_retention,
        }
    }

    /// The signed message: nonce and the payload JSON exactly as sent.
    /// Signing the raw bytes keeps senders free of any canonical-form
    /// requirement on their JSON.
    pub fn signing_message(nonce: &str, raw_payload: &str) -> String {
        format!("{}.{}", nonce, raw_payload)
    }

    /// Hex HMAC-SHA256 over the signing message. Public so oracle
    /// integrations and tests can produce valid signatures.
    pub fn compute_signature(secret: &str, message: &str) -> String {
        let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
            .expect("HMAC accepts keys of any length");
        mac.update(message.as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }

    /// `raw_payload` is the payload JSON as it appeared on the wire;
    /// the signature is checked against it before anything is parsed.
    pub fn handle(
        &self,
        oracle_id: &str,
        raw_payload: &str,
        signature: &str,
        nonce: &str,
    ) -> AppResult<WebhookOutcome> {
        self.bump(oracle_id, |s| s.received += 1);

        let secret = match self.secrets.get(oracle_id) {
            Some(secret) => secret,
            None => {
                self.bump(oracle_id, |s| s.rejected += 1);
                return Err(WebhookError::UnknownOracle(oracle_id.to_string()).into());
            }
        };

        if !self.verify_signature(secret, signature, nonce, raw_payload) {
            warn!("❌ Bad webhook signature from oracle {}", oracle_id);
            self.bump(oracle_id, |s| s.rejected += 1);
            return Err(WebhookError::InvalidSignature(oracle_id.to_string()).into());
        }

        let payload: WebhookPayload = match serde_json::from_str(raw_payload) {
            Ok(payload) => payload,
            Err(e) => {
                self.bump(oracle_id, |s| s.rejected += 1);
                return Err(WebhookError::MalformedPayload(e.to_string()).into());
            }
        };

        if !payload.oracle_data.is_null() && !payload.oracle_data.is_object() {
            self.bump(oracle_id, |s| s.rejected += 1);
            return Err(WebhookError::MalformedPayload(
                "oracle_data must be a JSON object".to_string(),
            )
            .into());
        }

        if self.is_replay(oracle_id, nonce) {
            info!(
                "Webhook replay from oracle {} (nonce {}): acknowledged, no effect",
                oracle_id, nonce
            );
            self.bump(oracle_id, |s| s.replayed += 1);
            return Ok(WebhookOutcome::Replayed);
        }

        let result = VerificationResult {
            milestone_id: payload.milestone_id,
            oracle_id: oracle_id.to_string(),
            verified: payload.verified,
            oracle_data: OracleData::from_json(&payload.oracle_data),
            release_percentage: 0, // re-stamped from the milestone by the engine
            error: None,
        };

        let (job, started) = self.engine.trigger_with_results(
            payload.campaign_id,
            TriggerSource::Webhook,
            false,
            vec![result],
        );
        if !started {
            // the running pass already fanned out; leave the nonce
            // unmarked so a redelivery can land once it finishes
            warn!(
                "Webhook from oracle {} not applied: resolution already running for campaign {}",
                oracle_id, payload.campaign_id
            );
            self.bump(oracle_id, |s| s.deferred += 1);
            return Ok(WebhookOutcome::NotApplied);
        }

        self.mark_seen(oracle_id, nonce);
        info!(
            "⚙️ Webhook accepted from oracle {}: milestone {} verified={}",
            oracle_id, payload.milestone_id, payload.verified
        );
        self.bump(oracle_id, |s| s.accepted += 1);
        Ok(WebhookOutcome::Accepted(job))
    }

    pub fn stats(&self) -> HashMap<String, DeliveryStats> {
        self.stats.lock().clone()
    }

    fn verify_signature(
        &self,
        secret: &str,
        signature: &str,
        nonce: &str,
        raw_payload: &str,
    ) -> bool {
        let message = Self::signing_message(nonce, raw_payload);
        let mut mac = match HmacSha256::new_from_slice(secret.as_bytes()) {
            Ok(mac) => mac,
            Err(_) => return false,
        };
        mac.update(message.as_bytes());
        let Ok(supplied) = hex::decode(signature) else {
            return false;
        };
        // constant-time comparison
        mac.verify_slice(&supplied).is_ok()
    }

    /// Seen-nonce check only; marking is deferred until the payload has
    /// actually been applied. The map is pruned on every access, which
    /// bounds it to the retention window.
    fn is_replay(&self, oracle_id: &str, nonce: &str) -> bool {
        let cutoff = Utc::now() - self.nonce_retention;
        let mut seen = self.seen_nonces.lock();
        let nonces = seen.entry(oracle_id.to_string()).or_default();
        nonces.retain(|_, first_seen| *first_seen > cutoff);
        nonces.contains_key(nonce)
    }

    fn mark_seen(&self, oracle_id: &str, nonce: &str) {
        self.seen_nonces
            .lock()
            .entry(oracle_id.to_string())
            .or_default()
            .insert(nonce.to_string(), Utc::now());
    }

    fn bump(&self, oracle_id: &str, f: impl FnOnce(&mut DeliveryStats)) {
        let mut stats = self.stats.lock();
        f(stats.entry(oracle_id.to_string()).or_default())
    }
}
