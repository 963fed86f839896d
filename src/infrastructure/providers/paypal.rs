//! PayPal adapter: OAuth client credentials, Orders v2 for charges and
//! captures, Payouts v1 for paying professionals.

use crate::config::PayPalSettings;
use crate::domain::money::Money;
use crate::domain::payment_method::ProviderKind;
use crate::domain::provider::{
    AccessToken, CaptureOutcome, ChargeHandle, PaymentProvider, PayoutOutcome, PayoutRequest,
    RefundOutcome,
};
use crate::error::{ProviderError, ProviderResult};
use async_trait::async_trait;
use base64::{Engine, engine::general_purpose::STANDARD};
use chrono::{DateTime, Utc};
use reqwest::{Client, Method, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Mutex;
use tokio::sync::RwLock;

const SANDBOX_URL: &str = "https://api-m.sandbox.paypal.com";
const LIVE_URL: &str = "https://api-m.paypal.com";
const REQUEST_ID_HEADER: &str = "PayPal-Request-Id";

pub struct PayPalProvider {
    client_id: String,
    client_secret: SecretString,
    base_url: String,
    client: Client,
    access_token: RwLock<Option<PayPalToken>>,
    /// Payout results seen by this process, by idempotency key.
    payouts: Mutex<HashMap<String, PayoutOutcome>>,
}

#[derive(Debug, Clone)]
struct PayPalToken {
    token: String,
    expires_at: DateTime<Utc>,
}

impl PayPalProvider {
    /// Create a new PayPal provider against the sandbox.
    pub fn new(client_id: impl Into<String>, client_secret: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            client_secret: SecretString::from(client_secret.into()),
            base_url: SANDBOX_URL.to_string(),
            client: Client::new(),
            access_token: RwLock::new(None),
            payouts: Mutex::new(HashMap::new()),
        }
    }

    pub fn from_settings(settings: &PayPalSettings) -> Self {
        let provider = Self::new(
            settings.client_id.clone(),
            settings.client_secret.expose_secret().to_string(),
        );
        match (&settings.base_url, settings.sandbox) {
            (Some(url), _) => provider.with_base_url(url.clone()),
            (None, true) => provider,
            (None, false) => provider.production(),
        }
    }

    /// Use production environment
    pub fn production(self) -> Self {
        self.with_base_url(LIVE_URL)
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    /// Get or refresh access token
    async fn get_token(&self) -> ProviderResult<String> {
        {
            let token = self.access_token.read().await;
            if let Some(t) = token.as_ref()
                && t.expires_at > Utc::now()
            {
                return Ok(t.token.clone());
            }
        }

        let credentials = STANDARD.encode(format!(
            "{}:{}",
            self.client_id,
            self.client_secret.expose_secret()
        ));

        let response = self
            .client
            .post(format!("{}/v1/oauth2/token", self.base_url))
            .header("Authorization", format!("Basic {}", credentials))
            .form(&[("grant_type", "client_credentials")])
            .send()
            .await?;

        let body = check_response(response).await?;
        let token_response: PayPalTokenResponse = parse(body)?;
        let new_token = PayPalToken {
            token: token_response.access_token.clone(),
            expires_at: Utc::now()
                + chrono::Duration::seconds(token_response.expires_in.saturating_sub(60) as i64),
        };

        let mut token = self.access_token.write().await;
        *token = Some(new_token);

        Ok(token_response.access_token)
    }

    /// Sends an authenticated JSON request and returns the decoded body.
    async fn send<T: Serialize + ?Sized>(
        &self,
        method: Method,
        path: &str,
        request_id: Option<&str>,
        body: Option<&T>,
    ) -> ProviderResult<Value> {
        let token = self.get_token().await?;
        let mut builder = self
            .client
            .request(method, format!("{}{}", self.base_url, path))
            .bearer_auth(token);
        if let Some(request_id) = request_id {
            builder = builder.header(REQUEST_ID_HEADER, request_id);
        }
        if let Some(body) = body {
            builder = builder.json(body);
        }
        let response = builder.send().await?;
        check_response(response).await
    }

    fn remember(&self, key: &str, outcome: &PayoutOutcome) {
        let mut payouts = self.payouts.lock().unwrap_or_else(|e| e.into_inner());
        payouts.insert(key.to_string(), outcome.clone());
    }
}

/// Maps PayPal HTTP failures onto the provider failure taxonomy.
async fn check_response(response: reqwest::Response) -> ProviderResult<Value> {
    let status = response.status();
    let body: Value = response.json().await.unwrap_or(Value::Null);
    if status.is_success() {
        return Ok(body);
    }

    let message = body
        .get("message")
        .or_else(|| body.get("error_description"))
        .and_then(Value::as_str)
        .map(str::to_string)
        .unwrap_or_else(|| status.to_string());

    Err(match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => ProviderError::Auth(message),
        StatusCode::REQUEST_TIMEOUT | StatusCode::TOO_MANY_REQUESTS => {
            ProviderError::TransientNetwork(message)
        }
        s if s.is_server_error() => ProviderError::TransientNetwork(message),
        _ => ProviderError::Rejected(message),
    })
}

fn parse<T: for<'de> Deserialize<'de>>(body: Value) -> ProviderResult<T> {
    serde_json::from_value(body)
        .map_err(|e| ProviderError::Rejected(format!("Unexpected PayPal response: {}", e)))
}

fn paypal_amount(money: &Money) -> PayPalAmount {
    PayPalAmount {
        currency_code: money.currency.code().to_string(),
        value: money.amount.to_string(),
    }
}

#[async_trait]
impl PaymentProvider for PayPalProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Paypal
    }

    async fn authorize(&self) -> ProviderResult<AccessToken> {
        self.get_token().await.map(AccessToken)
    }

    async fn create_charge(&self, money: &Money, description: &str) -> ProviderResult<ChargeHandle> {
        let order_request = PayPalOrderRequest {
            intent: "CAPTURE".to_string(),
            purchase_units: vec![PayPalPurchaseUnit {
                amount: paypal_amount(money),
                description: Some(description.to_string()),
            }],
        };

        let body = self
            .send(Method::POST, "/v2/checkout/orders", None, Some(&order_request))
            .await?;
        let order: PayPalOrder = parse(body)?;

        let approval_url = order
            .links
            .iter()
            .find(|link| link.rel == "approve" || link.rel == "payer-action")
            .map(|link| link.href.clone());

        Ok(ChargeHandle {
            charge_ref: order.id,
            approval_url,
        })
    }

    async fn capture_charge(&self, charge_ref: &str) -> ProviderResult<CaptureOutcome> {
        let request_id = format!("capture-{}", charge_ref);
        let raw = self
            .send::<Value>(
                Method::POST,
                &format!("/v2/checkout/orders/{}/capture", charge_ref),
                Some(&request_id),
                None,
            )
            .await?;
        let order: PayPalCapturedOrder = parse(raw.clone())?;

        let capture_ref = order
            .purchase_units
            .iter()
            .flat_map(|unit| unit.payments.captures.iter())
            .map(|capture| capture.id.clone())
            .next()
            .unwrap_or_else(|| order.id.clone());

        Ok(CaptureOutcome {
            success: order.status == "COMPLETED",
            capture_ref,
            raw,
        })
    }

    async fn payout(&self, request: &PayoutRequest) -> ProviderResult<PayoutOutcome> {
        // PayPal replays the original response for a repeated PayPal-Request-Id,
        // so the idempotency key doubles as request id and batch id.
        let payout_request = PayPalPayoutRequest {
            sender_batch_header: PayPalBatchHeader {
                sender_batch_id: request.idempotency_key.clone(),
                email_subject: "You have a payout".to_string(),
            },
            items: vec![PayPalPayoutItem {
                recipient_type: "EMAIL".to_string(),
                amount: PayPalPayoutAmount {
                    value: request.money.amount.to_string(),
                    currency: request.money.currency.code().to_string(),
                },
                receiver: request.destination.account_identifier.clone(),
                note: request.memo.clone(),
                sender_item_id: request.idempotency_key.clone(),
            }],
        };

        let raw = self
            .send(
                Method::POST,
                "/v1/payments/payouts",
                Some(&request.idempotency_key),
                Some(&payout_request),
            )
            .await?;
        let batch: PayPalPayoutResponse = parse(raw.clone())?;

        let header = batch.batch_header;
        let outcome = match header.batch_status.as_str() {
            "DENIED" | "CANCELED" => {
                return Err(ProviderError::Rejected(format!(
                    "Payout batch {} {}",
                    header.payout_batch_id, header.batch_status
                )));
            }
            "SUCCESS" => PayoutOutcome::Completed {
                payout_ref: header.payout_batch_id,
                raw,
            },
            // PENDING, PROCESSING and NEW batches settle later, through the
            // PAYMENT.PAYOUTSBATCH webhooks or an operator.
            _ => PayoutOutcome::PendingManual {
                reference: header.payout_batch_id,
                raw,
            },
        };
        self.remember(&request.idempotency_key, &outcome);
        Ok(outcome)
    }

    async fn payout_status(&self, idempotency_key: &str) -> ProviderResult<Option<PayoutOutcome>> {
        // Payouts cannot be searched by sender batch id, so only batches this
        // process submitted are known. Anything else is reported as absent.
        let payouts = self.payouts.lock().unwrap_or_else(|e| e.into_inner());
        Ok(payouts.get(idempotency_key).cloned())
    }

    async fn refund_charge(
        &self,
        charge_ref: &str,
        money: &Money,
        idempotency_key: &str,
    ) -> ProviderResult<RefundOutcome> {
        let refund_request = PayPalRefundRequest {
            amount: Some(paypal_amount(money)),
            note_to_payer: Some("Shift payment refunded".to_string()),
        };

        let raw = self
            .send(
                Method::POST,
                &format!("/v2/payments/captures/{}/refund", charge_ref),
                Some(idempotency_key),
                Some(&refund_request),
            )
            .await?;
        let refund: PayPalRefund = parse(raw.clone())?;

        match refund.status.as_str() {
            "CANCELLED" | "FAILED" => Err(ProviderError::Rejected(format!(
                "Refund {} {}",
                refund.id, refund.status
            ))),
            _ => Ok(RefundOutcome {
                refund_ref: refund.id,
                raw,
            }),
        }
    }
}

// PayPal API types

#[derive(Debug, Deserialize)]
struct PayPalTokenResponse {
    access_token: String,
    expires_in: u64,
}

#[derive(Debug, Serialize)]
struct PayPalOrderRequest {
    intent: String,
    purchase_units: Vec<PayPalPurchaseUnit>,
}

#[derive(Debug, Serialize, Deserialize)]
struct PayPalPurchaseUnit {
    amount: PayPalAmount,
    #[serde(skip_serializing_if = "Option::is_none")]
    description: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
struct PayPalAmount {
    currency_code: String,
    value: String,
}

#[derive(Debug, Deserialize)]
struct PayPalOrder {
    id: String,
    #[serde(default)]
    links: Vec<PayPalLink>,
}

#[derive(Debug, Deserialize)]
struct PayPalLink {
    href: String,
    rel: String,
}

#[derive(Debug, Deserialize)]
struct PayPalCapturedOrder {
    id: String,
    status: String,
    #[serde(default)]
    purchase_units: Vec<PayPalCapturedUnit>,
}

#[derive(Debug, Deserialize)]
struct PayPalCapturedUnit {
    #[serde(default)]
    payments: PayPalPayments,
}

#[derive(Debug, Default, Deserialize)]
struct PayPalPayments {
    #[serde(default)]
    captures: Vec<PayPalCapture>,
}

#[derive(Debug, Deserialize)]
struct PayPalCapture {
    id: String,
}

#[derive(Debug, Serialize)]
struct PayPalPayoutRequest {
    sender_batch_header: PayPalBatchHeader,
    items: Vec<PayPalPayoutItem>,
}

#[derive(Debug, Serialize)]
struct PayPalBatchHeader {
    sender_batch_id: String,
    email_subject: String,
}

#[derive(Debug, Serialize)]
struct PayPalPayoutItem {
    recipient_type: String,
    amount: PayPalPayoutAmount,
    receiver: String,
    note: String,
    sender_item_id: String,
}

#[derive(Debug, Serialize)]
struct PayPalPayoutAmount {
    value: String,
    currency: String,
}

#[derive(Debug, Deserialize)]
struct PayPalPayoutResponse {
    batch_header: PayPalPayoutBatchHeader,
}

#[derive(Debug, Deserialize)]
struct PayPalPayoutBatchHeader {
    payout_batch_id: String,
    batch_status: String,
}

#[derive(Debug, Serialize)]
struct PayPalRefundRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    amount: Option<PayPalAmount>,
    #[serde(skip_serializing_if = "Option::is_none")]
    note_to_payer: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PayPalRefund {
    id: String,
    status: String,
}
