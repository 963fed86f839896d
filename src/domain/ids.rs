use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// A platform user: facility, professional or operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(pub u64);

/// A completed shift that a payment settles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ShiftId(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PaymentId(pub Uuid);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PaymentMethodId(pub Uuid);

const PAYOUT_KEY_PREFIX: &str = "payout-";
const REFUND_KEY_PREFIX: &str = "refund-";

impl PaymentId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Idempotency key sent with every payout attempt for this payment.
    ///
    /// Derived only from the id, so retries reuse it.
    pub fn payout_key(&self) -> String {
        format!("{}{}", PAYOUT_KEY_PREFIX, self.0)
    }

    pub fn refund_key(&self) -> String {
        format!("{}{}", REFUND_KEY_PREFIX, self.0)
    }

    /// Recovers the payment id from a key produced by `payout_key` or `refund_key`.
    pub fn from_idempotency_key(key: &str) -> Option<Self> {
        key.strip_prefix(PAYOUT_KEY_PREFIX)
            .or_else(|| key.strip_prefix(REFUND_KEY_PREFIX))
            .and_then(|raw| Uuid::parse_str(raw).ok())
            .map(Self)
    }
}

impl Default for PaymentId {
    fn default() -> Self {
        Self::new()
    }
}

impl PaymentMethodId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for PaymentMethodId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for ShiftId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for PaymentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for PaymentMethodId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for PaymentId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_idempotency_keys_are_stable() {
        let id = PaymentId::new();
        assert_eq!(id.payout_key(), id.payout_key());
        assert_ne!(id.payout_key(), id.refund_key());
    }

    #[test]
    fn test_payment_id_from_idempotency_key() {
        let id = PaymentId::new();
        assert_eq!(PaymentId::from_idempotency_key(&id.payout_key()), Some(id));
        assert_eq!(PaymentId::from_idempotency_key(&id.refund_key()), Some(id));
        assert_eq!(PaymentId::from_idempotency_key("batch-123"), None);
        assert_eq!(PaymentId::from_idempotency_key("payout-not-a-uuid"), None);
    }
}
