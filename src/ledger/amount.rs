use num_bigint::BigUint;

use crate::error::{AppError, AppResult};

/// Parse a decimal-string amount (wei-equivalent unsigned integer)
pub fn parse_amount(raw: &str) -> AppResult<BigUint> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(AppError::InvalidAmount("empty string".to_string()));
    }
    trimmed
        .parse::<BigUint>()
        .map_err(|_| AppError::InvalidAmount(format!("not an unsigned integer: {}", raw)))
}

/// Serde helpers: BigUint <-> decimal string on every JSON boundary.
/// Amounts never cross the wire as floats or digit arrays.
pub mod serde_string {
    use num_bigint::BigUint;
    use serde::{de, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(amount: &BigUint, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&amount.to_str_radix(10))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<BigUint, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.trim()
            .parse::<BigUint>()
            .map_err(|_| de::Error::custom(format!("invalid amount: {}", raw)))
    }
}

/// Same as [`serde_string`] but for optional amounts
pub mod serde_string_opt {
    use num_bigint::BigUint;
    use serde::{de, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(
        amount: &Option<BigUint>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match amount {
            Some(a) => serializer.serialize_some(&a.to_str_radix(10)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<BigUint>, D::Error> {
        let raw: Option<String> = Option::deserialize(deserializer)?;
        match raw {
            None => Ok(None),
            Some(s) => s
                .trim()
                .parse::<BigUint>()
                .map(Some)
                .map_err(|_| de::Error::custom(format!("invalid amount: {}", s))),
        }
    }
}
