pub mod manual;
pub mod paypal;
pub mod simulated;

use crate::config::ProviderSettings;
use crate::domain::payment_method::ProviderKind;
use crate::domain::provider::{ProviderSet, SharedProvider};
use manual::ManualProvider;
use paypal::PayPalProvider;
use simulated::SimulatedProvider;
use std::sync::Arc;

/// Builds one adapter per provider kind from configuration.
///
/// PayPal is the only network with a payout API; the others (and PayPal when
/// no credentials are configured) fall back to operator-confirmed payouts.
pub fn build_providers(settings: &ProviderSettings) -> ProviderSet {
    if settings.simulate {
        return ProviderKind::ALL
            .into_iter()
            .fold(ProviderSet::new(), |set, kind| {
                set.with(Arc::new(SimulatedProvider::new(kind)))
            });
    }

    ProviderKind::ALL
        .into_iter()
        .fold(ProviderSet::new(), |set, kind| {
            let provider: SharedProvider = match (kind, &settings.paypal) {
                (ProviderKind::Paypal, Some(paypal)) => {
                    Arc::new(PayPalProvider::from_settings(paypal))
                }
                (ProviderKind::Paypal, None) => {
                    tracing::warn!("no PayPal credentials configured, payouts need manual confirmation");
                    Arc::new(ManualProvider::new(kind))
                }
                _ => Arc::new(ManualProvider::new(kind)),
            };
            set.with(provider)
        })
}
