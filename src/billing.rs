// src/billing.rs
use crate::auth::AuthUser;
use crate::db;
use crate::models::{CaptureRequest, PurchaseRequest, SubscriptionPlan};
use crate::payments::PayPalClient;
use actix_web::{HttpResponse, get, post, web};
use chrono::Utc;
use moka::future::Cache;
use serde_json::json;
use sqlx::PgPool;
use std::time::Duration;

const PLANS_CACHE_KEY: &str = "plans";

pub type PlanCache = Cache<String, Vec<SubscriptionPlan>>;

pub fn plan_cache(ttl_secs: u64) -> PlanCache {
    Cache::builder()
        .max_capacity(16)
        .time_to_live(Duration::from_secs(ttl_secs))
        .build()
}

pub fn init_routes(cfg: &mut web::ServiceConfig) {
    cfg.service(get_plans);
    cfg.service(purchase_subscription);
    cfg.service(capture_subscription);
}

#[get("/plans")]
pub async fn get_plans(
    pool: web::Data<PgPool>,
    cache: web::Data<PlanCache>,
) -> Result<HttpResponse, actix_web::Error> {
    if let Some(plans) = cache.get(PLANS_CACHE_KEY).await {
        tracing::debug!("Cache hit for plan catalogue");
        return Ok(HttpResponse::Ok().json(plans));
    }

    match db::list_plans(&pool).await {
        Ok(plans) => {
            cache.insert(PLANS_CACHE_KEY.to_string(), plans.clone()).await;
            Ok(HttpResponse::Ok().json(plans))
        }
        Err(e) => {
            tracing::error!("Database error fetching plans: {}", e);
            Ok(HttpResponse::InternalServerError().json(json!({"error": "Internal server error"})))
        }
    }
}

#[post("/subscription/purchase")]
pub async fn purchase_subscription(
    pool: web::Data<PgPool>,
    paypal: web::Data<PayPalClient>,
    user: AuthUser,
    purchase_req: web::Json<PurchaseRequest>,
) -> Result<HttpResponse, actix_web::Error> {
    if !user.is_club() {
        return Ok(HttpResponse::Forbidden().json(json!({"error": "Only clubs can subscribe"})));
    }

    let plan = match db::get_plan(&pool, purchase_req.plan_id).await {
        Ok(Some(plan)) => plan,
        Ok(None) => return Ok(HttpResponse::BadRequest().json(json!({"error": "Invalid plan"}))),
        Err(e) => {
            tracing::error!("Database error fetching plan: {}", e);
            return Ok(
                HttpResponse::InternalServerError().json(json!({"error": "Internal server error"}))
            );
        }
    };

    let order = match paypal
        .create_order(plan.price, &plan.id.to_string(), &plan.name)
        .await
    {
        Ok(order) => order,
        Err(e) => {
            tracing::error!("Payment processing error: {}", e);
            return Ok(HttpResponse::BadGateway()
                .json(json!({"error": "Payment processing error"})));
        }
    };

    match db::create_pending_subscription(&pool, user.id, plan.id, &order.order_id).await {
        Ok(subscription) => Ok(HttpResponse::Ok().json(json!({
            "subscriptionId": subscription.id,
            "status": subscription.status,
            "orderId": order.order_id,
            "approveUrl": order.approve_url,
        }))),
        Err(e) => {
            tracing::error!("Subscription creation error: {}", e);
            Ok(HttpResponse::InternalServerError().json(json!({"error": "Internal server error"})))
        }
    }
}

#[post("/subscription/capture")]
pub async fn capture_subscription(
    pool: web::Data<PgPool>,
    paypal: web::Data<PayPalClient>,
    user: AuthUser,
    capture_req: web::Json<CaptureRequest>,
) -> Result<HttpResponse, actix_web::Error> {
    let pending =
        match db::get_pending_subscription_by_order(&pool, user.id, &capture_req.order_id).await {
            Ok(Some(subscription)) => subscription,
            Ok(None) => {
                return Ok(HttpResponse::NotFound().json(json!({"error": "Pending order not found"})));
            }
            Err(e) => {
                tracing::error!("Database error fetching pending subscription: {}", e);
                return Ok(HttpResponse::InternalServerError()
                    .json(json!({"error": "Internal server error"})));
            }
        };

    let plan = match db::get_plan(&pool, pending.plan_id).await {
        Ok(Some(plan)) => plan,
        Ok(None) => {
            return Ok(HttpResponse::Conflict().json(json!({"error": "Plan is no longer available"})));
        }
        Err(e) => {
            tracing::error!("Database error fetching plan: {}", e);
            return Ok(
                HttpResponse::InternalServerError().json(json!({"error": "Internal server error"}))
            );
        }
    };

    match paypal.capture_order(&capture_req.order_id).await {
        Ok(captured) if captured.is_completed() => {}
        Ok(captured) => {
            tracing::warn!(
                "PayPal order {} not completed: {}",
                captured.order_id,
                captured.status
            );
            return Ok(HttpResponse::PaymentRequired().json(json!({"error": "Payment failed"})));
        }
        Err(e) => {
            tracing::error!("Payment capture error: {}", e);
            return Ok(HttpResponse::BadGateway()
                .json(json!({"error": "Payment processing error"})));
        }
    }

    match db::activate_subscription(&pool, pending.id, plan.duration_days, Utc::now()).await {
        Ok(subscription) => {
            tracing::info!(
                "Subscription {} activated for user {} until {:?}",
                subscription.id,
                user.id,
                subscription.end_date
            );
            Ok(HttpResponse::Ok().json(json!({
                "message": "Subscription activated",
                "subscriptionId": subscription.id,
                "expiresAt": subscription.end_date,
            })))
        }
        Err(e) => {
            // Деньги списаны, а подписка не активирована: нужен разбор вручную
            tracing::error!(
                "Subscription activation error for order {}: {}",
                capture_req.order_id,
                e
            );
            Ok(HttpResponse::InternalServerError().json(json!({"error": "Internal server error"})))
        }
    }
}

const MIN_SWEEP_PERIOD: Duration = Duration::from_secs(1);

// tokio::time::interval паникует на нулевом периоде
fn sweep_period(every: Duration) -> Duration {
    every.max(MIN_SWEEP_PERIOD)
}

/// Периодически переводит истекшие подписки в статус `expired`.
pub fn spawn_expiry_sweep(pool: PgPool, every: Duration) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(sweep_period(every));
        loop {
            interval.tick().await;
            match db::expire_lapsed_subscriptions(&pool).await {
                Ok(0) => {}
                Ok(n) => tracing::info!("Expired {} lapsed subscriptions", n),
                Err(e) => tracing::warn!("Subscription expiry sweep failed: {}", e),
            }
        }
    })
}
