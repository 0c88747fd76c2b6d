use rust_decimal::Decimal;

use crate::ledger::models::ConditionOperator;
use crate::oracle::value::OracleData;

/// Evaluate a predicate over oracle output.
///
/// All comparisons coerce the field value to a number; absent or
/// non-numeric fields fail every operator except `exists`, which only
/// requires the field to be present and non-null. `between` is inclusive
/// on both ends, with a missing upper bound collapsing to `[value, value]`.
pub fn evaluate(
    data: &OracleData,
    field: &str,
    operator: ConditionOperator,
    value: Option<Decimal>,
    value_end: Option<Decimal>,
) -> bool {
    if operator == ConditionOperator::Exists {
        return data.get(field).map(|v| !v.is_null()).unwrap_or(false);
    }

    let actual = match data.get(field).and_then(|v| v.as_number()) {
        Some(n) => n,
        None => return false,
    };
    let expected = match value {
        Some(v) => v,
        None => return false,
    };

    match operator {
        ConditionOperator::Exists => unreachable!(),
        ConditionOperator::Eq => actual == expected,
        ConditionOperator::Gt => actual > expected,
        ConditionOperator::Gte => actual >= expected,
        ConditionOperator::Lt => actual < expected,
        ConditionOperator::Lte => actual <= expected,
        ConditionOperator::Between => {
            let high = value_end.unwrap_or(expected);
            actual >= expected && actual <= high
        }
    }
}
