//! Settings injected into the engine, scheduler and provider factory.
//!
//! Loaded from an optional JSON file; every field has a default so an empty
//! object is a valid configuration.

use crate::domain::ids::UserId;
use crate::domain::money::Currency;
use crate::error::{EscrowError, Result};
use secrecy::SecretString;
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub escrow: EscrowSettings,
    pub scheduler: SchedulerSettings,
    pub providers: ProviderSettings,
    /// Shared secret for verifying inbound provider webhooks.
    pub webhook_secret: Option<SecretString>,
    /// Users granted operator permissions by the binary.
    pub admins: Vec<UserId>,
}

/// Longest hold or dispute window accepted from configuration.
pub const MAX_WINDOW_SECS: u64 = 365 * 24 * 60 * 60;
/// Longest single provider call accepted from configuration.
pub const MAX_PAYOUT_TIMEOUT_SECS: u64 = 10 * 60;
pub const MAX_SCHEDULER_INTERVAL_SECS: u64 = 24 * 60 * 60;

impl Settings {
    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read(path)?;
        let settings: Settings = serde_json::from_slice(&raw).map_err(|e| {
            EscrowError::ValidationError(format!("Invalid config {}: {}", path.display(), e))
        })?;
        settings.validate()?;
        Ok(settings)
    }

    /// Rejects values the engine cannot represent as time arithmetic.
    pub fn validate(&self) -> Result<()> {
        EscrowConfig::try_from(&self.escrow)?;
        in_range(
            "scheduler.interval_secs",
            self.scheduler.interval_secs,
            1,
            MAX_SCHEDULER_INTERVAL_SECS,
        )
    }
}

fn in_range(field: &str, value: u64, min: u64, max: u64) -> Result<()> {
    if (min..=max).contains(&value) {
        Ok(())
    } else {
        Err(EscrowError::ValidationError(format!(
            "{} must be between {} and {}, got {}",
            field, min, max, value
        )))
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EscrowSettings {
    pub hold_duration_secs: u64,
    pub dispute_window_secs: u64,
    pub payout_timeout_secs: u64,
    pub currency: Currency,
}

impl Default for EscrowSettings {
    fn default() -> Self {
        Self {
            hold_duration_secs: 3 * 24 * 60 * 60,
            dispute_window_secs: 14 * 24 * 60 * 60,
            payout_timeout_secs: 30,
            currency: Currency::usd(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SchedulerSettings {
    pub interval_secs: u64,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self { interval_secs: 300 }
    }
}

impl SchedulerSettings {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs.clamp(1, MAX_SCHEDULER_INTERVAL_SECS))
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct ProviderSettings {
    pub paypal: Option<PayPalSettings>,
    /// Route every provider kind to the in-process simulator.
    pub simulate: bool,
}

#[derive(Debug, Deserialize)]
pub struct PayPalSettings {
    pub client_id: String,
    pub client_secret: SecretString,
    /// Overrides the sandbox/live default.
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default = "default_sandbox")]
    pub sandbox: bool,
}

fn default_sandbox() -> bool {
    true
}

/// Timing and currency rules of the escrow engine.
#[derive(Debug, Clone)]
pub struct EscrowConfig {
    pub hold_duration: chrono::Duration,
    pub dispute_window: chrono::Duration,
    /// Upper bound on a single provider call.
    pub payout_timeout: Duration,
    pub currency: Currency,
}

impl EscrowConfig {
    /// A `releasing` payment untouched for this long is assumed abandoned.
    pub fn stale_release_after(&self) -> chrono::Duration {
        self.payout_timeout
            .checked_mul(4)
            .and_then(|d| chrono::Duration::from_std(d).ok())
            .unwrap_or_else(|| chrono::Duration::minutes(2))
    }
}

impl Default for EscrowConfig {
    fn default() -> Self {
        Self {
            hold_duration: chrono::Duration::days(3),
            dispute_window: chrono::Duration::days(14),
            payout_timeout: Duration::from_secs(30),
            currency: Currency::usd(),
        }
    }
}

impl TryFrom<&EscrowSettings> for EscrowConfig {
    type Error = EscrowError;

    fn try_from(settings: &EscrowSettings) -> Result<Self> {
        Ok(Self {
            hold_duration: window("escrow.hold_duration_secs", settings.hold_duration_secs)?,
            dispute_window: window("escrow.dispute_window_secs", settings.dispute_window_secs)?,
            payout_timeout: {
                in_range(
                    "escrow.payout_timeout_secs",
                    settings.payout_timeout_secs,
                    1,
                    MAX_PAYOUT_TIMEOUT_SECS,
                )?;
                Duration::from_secs(settings.payout_timeout_secs)
            },
            currency: settings.currency.clone(),
        })
    }
}

fn window(field: &str, secs: u64) -> Result<chrono::Duration> {
    in_range(field, secs, 0, MAX_WINDOW_SECS)?;
    i64::try_from(secs)
        .ok()
        .and_then(chrono::Duration::try_seconds)
        .ok_or_else(|| EscrowError::ValidationError(format!("{} is out of range", field)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_config_uses_defaults() {
        let settings: Settings = serde_json::from_str("{}").unwrap();
        let escrow = EscrowConfig::try_from(&settings.escrow).unwrap();
        assert_eq!(escrow.hold_duration, chrono::Duration::days(3));
        assert_eq!(escrow.dispute_window, EscrowConfig::default().dispute_window);
        assert_eq!(escrow.payout_timeout, Duration::from_secs(30));
        assert_eq!(settings.scheduler.interval(), Duration::from_secs(300));
        assert!(settings.providers.paypal.is_none());
    }

    #[test]
    fn test_partial_config() {
        let settings: Settings = serde_json::from_str(
            r#"{
                "escrow": { "hold_duration_secs": 3600, "currency": "eur" },
                "providers": { "paypal": { "client_id": "id", "client_secret": "secret" } },
                "admins": [1, 2]
            }"#,
        )
        .unwrap();
        assert_eq!(settings.escrow.hold_duration_secs, 3600);
        assert_eq!(settings.escrow.payout_timeout_secs, 30);
        assert_eq!(settings.escrow.currency.code(), "EUR");
        assert!(settings.providers.paypal.unwrap().sandbox);
        assert_eq!(settings.admins, vec![UserId(1), UserId(2)]);
    }

    #[test]
    fn test_invalid_currency_is_rejected() {
        let result: std::result::Result<Settings, _> =
            serde_json::from_str(r#"{ "escrow": { "currency": "dollars" } }"#);
        assert!(result.is_err());
    }

    #[test]
    fn test_oversized_durations_are_rejected() {
        for json in [
            r#"{ "escrow": { "hold_duration_secs": 100000000000000000 } }"#,
            r#"{ "escrow": { "dispute_window_secs": 18446744073709551615 } }"#,
            r#"{ "escrow": { "payout_timeout_secs": 9223372036854775807 } }"#,
            r#"{ "escrow": { "payout_timeout_secs": 0 } }"#,
            r#"{ "scheduler": { "interval_secs": 0 } }"#,
        ] {
            let settings: Settings = serde_json::from_str(json).unwrap();
            assert!(
                matches!(settings.validate(), Err(EscrowError::ValidationError(_))),
                "accepted {}",
                json
            );
        }
    }

    #[test]
    fn test_from_file_validates() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        std::io::Write::write_all(
            &mut file,
            br#"{ "escrow": { "hold_duration_secs": 100000000000000000 } }"#,
        )
        .unwrap();
        assert!(matches!(
            Settings::from_file(file.path()),
            Err(EscrowError::ValidationError(_))
        ));
    }

    #[test]
    fn test_stale_release_after_never_overflows() {
        let config = EscrowConfig {
            payout_timeout: Duration::from_secs(u64::MAX / 2),
            ..EscrowConfig::default()
        };
        assert_eq!(config.stale_release_after(), chrono::Duration::minutes(2));
        assert_eq!(
            EscrowConfig::default().stale_release_after(),
            chrono::Duration::minutes(2)
        );
    }
}
