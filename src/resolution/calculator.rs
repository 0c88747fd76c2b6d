use num_bigint::BigUint;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use thiserror::Error;

use crate::ledger::models::{CalculationParams, Pledge, PledgeType, Tier};
use crate::oracle::traits::VerificationResult;
use crate::oracle::value::OracleData;
use crate::resolution::conditions;

/// Release/refund split for one pledge. Always satisfies
/// `release + refund == escrowed`, both non-negative.
#[derive(Debug, Clone, PartialEq)]
pub struct PledgeOutcome {
    pub release: BigUint,
    pub refund: BigUint,
}

impl PledgeOutcome {
    fn full_refund(escrowed: &BigUint) -> Self {
        Self {
            release: BigUint::from(0u32),
            refund: escrowed.clone(),
        }
    }

    fn full_release(escrowed: &BigUint) -> Self {
        Self {
            release: escrowed.clone(),
            refund: BigUint::from(0u32),
        }
    }

    fn split(release: BigUint, escrowed: &BigUint) -> Self {
        let release = release.min(escrowed.clone());
        let refund = escrowed - &release;
        Self { release, refund }
    }
}

/// A single pledge's calculation can fail without aborting the batch;
/// the engine catches this and marks the pledge unresolved.
#[derive(Debug, Error)]
pub enum CalcError {
    #[error("unit value out of integer range: {0}")]
    UnitOutOfRange(Decimal),
}

/// Compute the release/refund split for a pledge against the verification
/// results of one resolution pass. Pure and deterministic; the result
/// slice may arrive in any order, fields are matched by name.
pub fn calculate(
    pledge: &Pledge,
    results: &[VerificationResult],
) -> Result<PledgeOutcome, CalcError> {
    let escrowed = &pledge.escrowed_amount;

    let params = match &pledge.params {
        Some(p) => p,
        None => return Ok(PledgeOutcome::full_refund(escrowed)),
    };
    if results.is_empty() {
        return Ok(PledgeOutcome::full_refund(escrowed));
    }

    match pledge.pledge_type {
        PledgeType::Flat => Ok(calculate_flat(escrowed, results)),
        PledgeType::PerUnit => calculate_per_unit(escrowed, params, results),
        PledgeType::Tiered => calculate_tiered(escrowed, params, results),
        PledgeType::Conditional => Ok(calculate_conditional(escrowed, params, results)),
    }
}

/// flat: escrowed x (sum of release percentages over verified milestones) / 100
fn calculate_flat(escrowed: &BigUint, results: &[VerificationResult]) -> PledgeOutcome {
    let pct: u64 = results
        .iter()
        .filter(|r| r.verified)
        .map(|r| r.release_percentage as u64)
        .sum();

    let release = escrowed * BigUint::from(pct) / BigUint::from(100u32);
    PledgeOutcome::split(release, escrowed)
}

/// per_unit: floor(unit value) x per-unit amount, capped then clamped
fn calculate_per_unit(
    escrowed: &BigUint,
    params: &CalculationParams,
    results: &[VerificationResult],
) -> Result<PledgeOutcome, CalcError> {
    let (per_unit_amount, unit_field) = match (&params.per_unit_amount, &params.unit_field) {
        (Some(amount), Some(field)) => (amount, field),
        _ => return Ok(PledgeOutcome::full_refund(escrowed)),
    };

    let units = match unit_value(results, unit_field) {
        Some(v) => floor_units(v)?,
        None => return Ok(PledgeOutcome::full_refund(escrowed)),
    };
    if units == 0 {
        return Ok(PledgeOutcome::full_refund(escrowed));
    }

    let release = apply_cap(BigUint::from(units) * per_unit_amount, &params.cap);
    Ok(PledgeOutcome::split(release, escrowed))
}

/// tiered: accumulate floored units per band x band rate. Input tier order
/// is not trusted; thresholds are sorted ascending before use.
fn calculate_tiered(
    escrowed: &BigUint,
    params: &CalculationParams,
    results: &[VerificationResult],
) -> Result<PledgeOutcome, CalcError> {
    let unit_field = match &params.unit_field {
        Some(field) => field,
        None => return Ok(PledgeOutcome::full_refund(escrowed)),
    };
    let mut tiers: Vec<Tier> = match &params.tiers {
        Some(t) if !t.is_empty() => t.clone(),
        _ => return Ok(PledgeOutcome::full_refund(escrowed)),
    };
    tiers.sort_by_key(|t| t.threshold);

    let unit = match unit_value(results, unit_field) {
        Some(v) if v > Decimal::ZERO => v,
        _ => return Ok(PledgeOutcome::full_refund(escrowed)),
    };

    let mut release = BigUint::from(0u32);
    for (i, tier) in tiers.iter().enumerate() {
        let start = Decimal::from(tier.threshold);
        if unit <= start {
            break;
        }
        // a tier's open end is the next threshold, unbounded for the last
        let reached = match tiers.get(i + 1) {
            Some(next) => unit.min(Decimal::from(next.threshold)),
            None => unit,
        };
        let span = floor_units(reached - start)?;
        release += BigUint::from(span) * &tier.rate;
    }

    let release = apply_cap(release, &params.cap);
    Ok(PledgeOutcome::split(release, escrowed))
}

/// conditional: binary outcome, no partial release
fn calculate_conditional(
    escrowed: &BigUint,
    params: &CalculationParams,
    results: &[VerificationResult],
) -> PledgeOutcome {
    let (field, operator) = match (&params.condition_field, params.condition_operator) {
        (Some(field), Some(op)) => (field, op),
        _ => return PledgeOutcome::full_refund(escrowed),
    };

    let data = match first_matching(results, field) {
        Some(data) => data,
        None => return PledgeOutcome::full_refund(escrowed),
    };

    if conditions::evaluate(
        data,
        field,
        operator,
        params.condition_value,
        params.condition_value_end,
    ) {
        PledgeOutcome::full_release(escrowed)
    } else {
        PledgeOutcome::full_refund(escrowed)
    }
}

/// First verified result whose data contains `field`, in supplied order
fn first_matching<'a>(results: &'a [VerificationResult], field: &str) -> Option<&'a OracleData> {
    results
        .iter()
        .find(|r| r.verified && r.oracle_data.contains(field))
        .map(|r| &r.oracle_data)
}

fn unit_value(results: &[VerificationResult], field: &str) -> Option<Decimal> {
    first_matching(results, field)?
        .get(field)
        .and_then(|v| v.as_number())
        .filter(|v| *v > Decimal::ZERO)
}

/// Fractional units are not rewarded
fn floor_units(value: Decimal) -> Result<u128, CalcError> {
    value
        .floor()
        .to_u128()
        .ok_or(CalcError::UnitOutOfRange(value))
}

fn apply_cap(release: BigUint, cap: &Option<BigUint>) -> BigUint {
    match cap {
        Some(c) if *c > BigUint::from(0u32) && release > *c => c.clone(),
        _ => release,
    }
}
