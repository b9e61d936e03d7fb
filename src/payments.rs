// src/payments.rs
use crate::config::Config;
use serde::Deserialize;
use serde_json::json;

#[derive(Debug, thiserror::Error)]
pub enum PaymentError {
    #[error("paypal request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("paypal rejected the request: {status} {body}")]
    Rejected { status: u16, body: String },
    #[error("paypal response is missing {0}")]
    MalformedResponse(&'static str),
}

#[derive(Debug, Deserialize)]
struct AccessToken {
    access_token: String,
}

#[derive(Debug, Deserialize)]
struct OrderLink {
    href: String,
    rel: String,
}

#[derive(Debug, Deserialize)]
struct OrderResponse {
    id: String,
    status: String,
    #[serde(default)]
    links: Vec<OrderLink>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreatedOrder {
    pub order_id: String,
    pub approve_url: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapturedOrder {
    pub order_id: String,
    pub status: String,
}

impl CapturedOrder {
    pub fn is_completed(&self) -> bool {
        self.status == "COMPLETED"
    }
}

/// Клиент PayPal Orders v2: создание заказа и его захват после одобрения.
#[derive(Clone)]
pub struct PayPalClient {
    http: reqwest::Client,
    api_url: String,
    client_id: String,
    client_secret: String,
    currency: String,
}

pub fn format_amount(amount: f64) -> String {
    format!("{:.2}", amount)
}

fn approve_url(order: &OrderResponse) -> Option<String> {
    order
        .links
        .iter()
        .find(|link| link.rel == "approve" || link.rel == "payer-action")
        .map(|link| link.href.clone())
}

async fn ensure_success(response: reqwest::Response) -> Result<reqwest::Response, PaymentError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(PaymentError::Rejected {
        status: status.as_u16(),
        body,
    })
}

impl PayPalClient {
    pub fn from_config(config: &Config) -> Self {
        Self {
            http: reqwest::Client::new(),
            api_url: config.paypal_api_url.trim_end_matches('/').to_string(),
            client_id: config.paypal_client_id.clone(),
            client_secret: config.paypal_client_secret.clone(),
            currency: config.payment_currency.clone(),
        }
    }

    async fn access_token(&self) -> Result<String, PaymentError> {
        let response = self
            .http
            .post(format!("{}/v1/oauth2/token", self.api_url))
            .basic_auth(&self.client_id, Some(&self.client_secret))
            .form(&[("grant_type", "client_credentials")])
            .send()
            .await?;
        let token: AccessToken = ensure_success(response).await?.json().await?;
        Ok(token.access_token)
    }

    pub async fn create_order(
        &self,
        amount: f64,
        reference_id: &str,
        description: &str,
    ) -> Result<CreatedOrder, PaymentError> {
        let token = self.access_token().await?;
        let body = json!({
            "intent": "CAPTURE",
            "purchase_units": [{
                "reference_id": reference_id,
                "description": description,
                "amount": {
                    "currency_code": self.currency,
                    "value": format_amount(amount),
                },
            }],
        });

        let response = self
            .http
            .post(format!("{}/v2/checkout/orders", self.api_url))
            .bearer_auth(token)
            .json(&body)
            .send()
            .await?;
        let order: OrderResponse = ensure_success(response).await?.json().await?;

        tracing::info!("Created PayPal order {} ({})", order.id, order.status);
        let approve_url = approve_url(&order).ok_or(PaymentError::MalformedResponse("approve link"))?;
        Ok(CreatedOrder {
            order_id: order.id,
            approve_url,
        })
    }

    pub async fn capture_order(&self, order_id: &str) -> Result<CapturedOrder, PaymentError> {
        let token = self.access_token().await?;
        let response = self
            .http
            .post(format!("{}/v2/checkout/orders/{}/capture", self.api_url, order_id))
            .bearer_auth(token)
            .json(&json!({}))
            .send()
            .await?;
        let order: OrderResponse = ensure_success(response).await?.json().await?;

        tracing::info!("Captured PayPal order {}: {}", order.id, order.status);
        Ok(CapturedOrder {
            order_id: order.id,
            status: order.status,
        })
    }
}
