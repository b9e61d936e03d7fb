// src/models.rs
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum UserRole {
    Club,
    Player,
    Admin,
}

impl UserRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            UserRole::Club => "club",
            UserRole::Player => "player",
            UserRole::Admin => "admin",
        }
    }

    pub fn from_string(s: &str) -> Option<Self> {
        match s {
            "club" => Some(UserRole::Club),
            "player" => Some(UserRole::Player),
            "admin" => Some(UserRole::Admin),
            _ => None,
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, FromRow)]
pub struct User {
    pub id: Uuid,
    pub email: String,
    pub full_name: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub role: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Serialize, Deserialize, Clone, Debug, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionPlan {
    pub id: Uuid,
    pub name: String,
    pub features: Vec<String>,
    pub price: f64,
    pub duration_days: i32,
    pub plan_type: String,
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SubscriptionStatus {
    Pending,
    Active,
    Expired,
    Cancelled,
}

impl SubscriptionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubscriptionStatus::Pending => "pending",
            SubscriptionStatus::Active => "active",
            SubscriptionStatus::Expired => "expired",
            SubscriptionStatus::Cancelled => "cancelled",
        }
    }

    pub fn from_string(s: &str) -> Self {
        match s {
            "active" => SubscriptionStatus::Active,
            "expired" => SubscriptionStatus::Expired,
            "cancelled" => SubscriptionStatus::Cancelled,
            _ => SubscriptionStatus::Pending,
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Subscription {
    pub id: Uuid,
    pub user_id: Uuid,
    pub plan_id: Uuid,
    pub status: String,
    pub start_date: Option<DateTime<Utc>>,
    pub end_date: Option<DateTime<Utc>>,
    pub paypal_order_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Subscription {
    pub fn status(&self) -> SubscriptionStatus {
        SubscriptionStatus::from_string(&self.status)
    }

    pub fn is_active_at(&self, now: DateTime<Utc>) -> bool {
        self.status() == SubscriptionStatus::Active
            && self.end_date.map(|end| end > now).unwrap_or(false)
    }
}

/// Активная подписка клуба вместе с планом, из которого берутся лимиты.
#[derive(Serialize, Clone, Debug)]
#[serde(rename_all = "camelCase")]
pub struct ActivePlan {
    pub subscription: Subscription,
    pub plan: SubscriptionPlan,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct UsageCounter {
    pub club_user_id: Uuid,
    pub month_year: String,
    pub player_views: i32,
    pub messages_sent: i32,
    pub favorites_count: i32,
}

impl UsageCounter {
    pub fn empty(club_user_id: Uuid, month_year: &str) -> Self {
        Self {
            club_user_id,
            month_year: month_year.to_string(),
            ..Default::default()
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct Claims {
    pub sub: String, // user_id
    pub role: UserRole,
    pub exp: usize,
}

#[derive(Serialize, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Serialize, Deserialize)]
pub struct RegisterRequest {
    pub email: String,
    pub full_name: String,
    pub password: String,
    pub role: UserRole,
}

#[derive(Serialize, Deserialize)]
pub struct PurchaseRequest {
    pub plan_id: Uuid,
}

#[derive(Serialize, Deserialize)]
pub struct CaptureRequest {
    pub order_id: String,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct MeetingRequest {
    pub summary: String,
    #[serde(default)]
    pub description: Option<String>,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    #[serde(default)]
    pub attendees: Vec<String>,
}
