use super::ids::{PaymentMethodId, UserId};
use crate::error::EscrowError;
use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

static EMAIL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[a-zA-Z0-9._%+-]+@[a-zA-Z0-9.-]+\.[a-zA-Z]{2,}$").expect("valid email pattern")
});

static CASHTAG: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\$[a-zA-Z0-9_-]{1,20}$").expect("valid cashtag pattern")
});

static PHONE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\+?[0-9 ().-]+$").expect("valid phone pattern"));

/// The payment networks a professional can be paid out through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    Paypal,
    Cashapp,
    Coinbase,
    BankTransfer,
}

impl ProviderKind {
    pub const ALL: [ProviderKind; 4] = [
        ProviderKind::Paypal,
        ProviderKind::Cashapp,
        ProviderKind::Coinbase,
        ProviderKind::BankTransfer,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderKind::Paypal => "paypal",
            ProviderKind::Cashapp => "cashapp",
            ProviderKind::Coinbase => "coinbase",
            ProviderKind::BankTransfer => "bank_transfer",
        }
    }

    /// Checks that `identifier` has the shape this provider addresses accounts by.
    pub fn validate_account_identifier(&self, identifier: &str) -> Result<(), EscrowError> {
        let valid = match self {
            ProviderKind::Paypal | ProviderKind::Coinbase => is_email(identifier),
            ProviderKind::Cashapp => is_cashtag(identifier),
            ProviderKind::BankTransfer => is_email(identifier) || is_phone(identifier),
        };
        if valid {
            Ok(())
        } else {
            Err(EscrowError::ValidationError(format!(
                "Invalid {} account identifier: {:?}",
                self, identifier
            )))
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderKind {
    type Err = EscrowError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "paypal" => Ok(ProviderKind::Paypal),
            "cashapp" => Ok(ProviderKind::Cashapp),
            "coinbase" => Ok(ProviderKind::Coinbase),
            "bank_transfer" | "zelle" => Ok(ProviderKind::BankTransfer),
            other => Err(EscrowError::ValidationError(format!(
                "Unknown payment provider: {}",
                other
            ))),
        }
    }
}

fn is_email(value: &str) -> bool {
    EMAIL.is_match(value)
}

fn is_cashtag(value: &str) -> bool {
    CASHTAG.is_match(value) && value.chars().any(|c| c.is_ascii_alphabetic())
}

fn is_phone(value: &str) -> bool {
    let digits = value.chars().filter(|c| c.is_ascii_digit()).count();
    PHONE.is_match(value) && (10..=15).contains(&digits)
}

/// A payout destination enrolled by a user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentMethod {
    pub id: PaymentMethodId,
    pub owner_user_id: UserId,
    pub provider: ProviderKind,
    pub account_identifier: String,
    pub is_default: bool,
    pub created_at: DateTime<Utc>,
}

impl PaymentMethod {
    /// Builds a validated method. Whether it ends up default is decided by the store.
    pub fn new(
        owner: UserId,
        provider: ProviderKind,
        account_identifier: &str,
        make_default: bool,
        now: DateTime<Utc>,
    ) -> Result<Self, EscrowError> {
        let account_identifier = account_identifier.trim();
        provider.validate_account_identifier(account_identifier)?;
        Ok(Self {
            id: PaymentMethodId::new(),
            owner_user_id: owner,
            provider,
            account_identifier: account_identifier.to_string(),
            is_default: make_default,
            created_at: now,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_email_providers() {
        for provider in [ProviderKind::Paypal, ProviderKind::Coinbase] {
            assert!(
                provider
                    .validate_account_identifier("nurse.jane@example.com")
                    .is_ok()
            );
            assert!(provider.validate_account_identifier("nurse.jane").is_err());
            assert!(provider.validate_account_identifier("a@b").is_err());
        }
    }

    #[test]
    fn test_cashtag() {
        let cashapp = ProviderKind::Cashapp;
        assert!(cashapp.validate_account_identifier("$JaneRN").is_ok());
        assert!(cashapp.validate_account_identifier("JaneRN").is_err());
        assert!(cashapp.validate_account_identifier("$").is_err());
        assert!(cashapp.validate_account_identifier("$12345").is_err());
        assert!(
            cashapp
                .validate_account_identifier("$this_handle_is_far_too_long")
                .is_err()
        );
    }

    #[test]
    fn test_bank_transfer_accepts_email_or_phone() {
        let bank = ProviderKind::BankTransfer;
        assert!(bank.validate_account_identifier("jane@example.com").is_ok());
        assert!(bank.validate_account_identifier("+1 (555) 010-0199").is_ok());
        assert!(bank.validate_account_identifier("555-0199").is_err());
        assert!(bank.validate_account_identifier("call me").is_err());
    }

    #[test]
    fn test_provider_kind_parsing() {
        assert_eq!(
            "bank_transfer".parse::<ProviderKind>().unwrap(),
            ProviderKind::BankTransfer
        );
        assert_eq!("PayPal".parse::<ProviderKind>().unwrap(), ProviderKind::Paypal);
        assert!("venmo".parse::<ProviderKind>().is_err());
    }

    #[test]
    fn test_new_method_trims_identifier() {
        let method = PaymentMethod::new(
            UserId(7),
            ProviderKind::Paypal,
            "  jane@example.com ",
            true,
            Utc::now(),
        )
        .unwrap();
        assert_eq!(method.account_identifier, "jane@example.com");
    }
}
