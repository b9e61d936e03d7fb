// src/config.rs
use serde::Deserialize;

fn default_bind_address() -> String {
    "127.0.0.1:8080".to_string()
}

fn default_paypal_api_url() -> String {
    "https://api-m.sandbox.paypal.com".to_string()
}

fn default_currency() -> String {
    "USD".to_string()
}

fn default_plan_cache_ttl_secs() -> u64 {
    300
}

fn default_expiry_sweep_secs() -> u64 {
    3600
}

fn default_google_calendar_id() -> String {
    "primary".to_string()
}

#[derive(Clone, Debug, Deserialize)]
pub struct Config {
    pub database_url: String,
    pub jwt_secret: String,
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    pub paypal_client_id: String,
    pub paypal_client_secret: String,
    #[serde(default = "default_paypal_api_url")]
    pub paypal_api_url: String,
    #[serde(default = "default_currency")]
    pub payment_currency: String,
    #[serde(default = "default_plan_cache_ttl_secs")]
    pub plan_cache_ttl_secs: u64,
    #[serde(default = "default_expiry_sweep_secs")]
    pub expiry_sweep_secs: u64,
    // Google Meet: без этих переменных эндпоинт встреч отключен
    #[serde(default)]
    pub google_service_account_email: Option<String>,
    #[serde(default)]
    pub google_private_key: Option<String>,
    #[serde(default = "default_google_calendar_id")]
    pub google_calendar_id: String,
}

impl Config {
    pub fn from_env() -> Result<Self, envy::Error> {
        envy::from_env()
    }

    pub fn google_credentials(&self) -> Option<(&str, &str)> {
        match (&self.google_service_account_email, &self.google_private_key) {
            (Some(email), Some(key)) if !email.is_empty() && !key.is_empty() => {
                Some((email.as_str(), key.as_str()))
            }
            _ => None,
        }
    }
}
