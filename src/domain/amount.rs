use crate::error::BillingError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// A positive monetary amount in the minor currency unit (cents).
///
/// Invoices, transactions and refund requests all carry an `Amount`, so a
/// non-positive value cannot enter the system past construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "i64", into = "i64")]
pub struct Amount(i64);

impl Amount {
    pub fn new(value: i64) -> Result<Self, BillingError> {
        if value > 0 {
            Ok(Self(value))
        } else {
            Err(BillingError::ValidationError(format!(
                "Amount must be a positive integer, got {}",
                value
            )))
        }
    }

    pub fn value(&self) -> i64 {
        self.0
    }
}

impl TryFrom<i64> for Amount {
    type Error = BillingError;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<Amount> for i64 {
    fn from(amount: Amount) -> Self {
        amount.0
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_amount_rejects_non_positive() {
        for value in [0, -1, i64::MIN] {
            assert!(matches!(
                Amount::new(value),
                Err(BillingError::ValidationError(_))
            ));
        }
        assert_eq!(Amount::new(1).unwrap().value(), 1);
    }

    #[test]
    fn test_amount_deserialization_validates() {
        let amount: Amount = serde_json::from_str("1000").unwrap();
        assert_eq!(amount.value(), 1000);
        assert!(serde_json::from_str::<Amount>("0").is_err());
    }
}
