// src/paywall.rs
use crate::auth::AuthUser;
use crate::usage::{RecordOutcome, UsageAccountant, UsageError};
use actix_web::{HttpResponse, delete, get, post, web};
use serde_json::json;
use uuid::Uuid;

const NO_SUBSCRIPTION_MESSAGE: &str = "يجب الاشتراك في إحدى الباقات للوصول إلى هذه الميزة";
const STORAGE_ERROR_MESSAGE: &str = "حدث خطأ أثناء تحديث الاستخدام، يرجى المحاولة مرة أخرى";

pub fn init_routes(cfg: &mut web::ServiceConfig) {
    cfg.service(get_limits);
    cfg.service(record_player_view);
    cfg.service(record_message);
    cfg.service(add_favorite);
    cfg.service(remove_favorite);
}

#[derive(Clone, Copy, Debug)]
enum QuotaKind {
    PlayerViews,
    Messages,
    Favorites,
}

impl QuotaKind {
    fn exhausted_message(&self) -> &'static str {
        match self {
            QuotaKind::PlayerViews => {
                "لقد وصلت إلى الحد الأقصى لمشاهدة اللاعبين هذا الشهر. قم بترقية باقتك للمزيد"
            }
            QuotaKind::Messages => {
                "لقد وصلت إلى الحد الأقصى للرسائل هذا الشهر. قم بترقية باقتك للمزيد"
            }
            QuotaKind::Favorites => {
                "لقد وصلت إلى الحد الأقصى لقائمة المفضلة. قم بترقية باقتك للمزيد"
            }
        }
    }
}

fn outcome_response(outcome: RecordOutcome, kind: QuotaKind) -> HttpResponse {
    let allowed = outcome.is_allowed();
    match outcome {
        RecordOutcome::Recorded { used } => HttpResponse::Ok().json(json!({
            "allowed": allowed,
            "charged": true,
            "used": used,
        })),
        RecordOutcome::AlreadyCounted => HttpResponse::Ok().json(json!({
            "allowed": allowed,
            "charged": false,
        })),
        RecordOutcome::QuotaExhausted => HttpResponse::PaymentRequired().json(json!({
            "allowed": allowed,
            "error": "Quota exhausted",
            "message": kind.exhausted_message(),
        })),
        RecordOutcome::NoActiveSubscription => HttpResponse::PaymentRequired().json(json!({
            "allowed": allowed,
            "error": "No active subscription",
            "message": NO_SUBSCRIPTION_MESSAGE,
        })),
    }
}

fn storage_error_response(e: &UsageError) -> HttpResponse {
    tracing::error!("Usage accounting error: {}", e);
    HttpResponse::InternalServerError().json(json!({
        "allowed": false,
        "error": "Internal server error",
        "message": STORAGE_ERROR_MESSAGE,
    }))
}

fn clubs_only() -> HttpResponse {
    HttpResponse::Forbidden().json(json!({"error": "Only clubs have usage quotas"}))
}

#[get("/subscription/limits")]
pub async fn get_limits(
    accountant: web::Data<UsageAccountant>,
    user: AuthUser,
) -> Result<HttpResponse, actix_web::Error> {
    match accountant.entitlements(user.id).await {
        Ok(entitlements) => Ok(HttpResponse::Ok().json(entitlements)),
        Err(e) => Ok(storage_error_response(&e)),
    }
}

#[post("/usage/player-views/{player_id}")]
pub async fn record_player_view(
    accountant: web::Data<UsageAccountant>,
    user: AuthUser,
    path: web::Path<Uuid>,
) -> Result<HttpResponse, actix_web::Error> {
    if !user.is_club() {
        return Ok(clubs_only());
    }
    let player_id = path.into_inner();

    match accountant.record_player_view(user.id, player_id).await {
        Ok(outcome) => Ok(outcome_response(outcome, QuotaKind::PlayerViews)),
        Err(e) => Ok(storage_error_response(&e)),
    }
}

#[post("/usage/messages")]
pub async fn record_message(
    accountant: web::Data<UsageAccountant>,
    user: AuthUser,
) -> Result<HttpResponse, actix_web::Error> {
    if !user.is_club() {
        return Ok(clubs_only());
    }

    match accountant.record_message_sent(user.id).await {
        Ok(outcome) => Ok(outcome_response(outcome, QuotaKind::Messages)),
        Err(e) => Ok(storage_error_response(&e)),
    }
}

#[post("/usage/favorites/{player_id}")]
pub async fn add_favorite(
    accountant: web::Data<UsageAccountant>,
    user: AuthUser,
    path: web::Path<Uuid>,
) -> Result<HttpResponse, actix_web::Error> {
    if !user.is_club() {
        return Ok(clubs_only());
    }

    match accountant.add_favorite(user.id, path.into_inner()).await {
        Ok(outcome) => Ok(outcome_response(outcome, QuotaKind::Favorites)),
        Err(e) => Ok(storage_error_response(&e)),
    }
}

#[delete("/usage/favorites/{player_id}")]
pub async fn remove_favorite(
    accountant: web::Data<UsageAccountant>,
    user: AuthUser,
    path: web::Path<Uuid>,
) -> Result<HttpResponse, actix_web::Error> {
    if !user.is_club() {
        return Ok(clubs_only());
    }

    match accountant.remove_favorite(user.id, path.into_inner()).await {
        Ok(true) => Ok(HttpResponse::NoContent().finish()),
        Ok(false) => Ok(HttpResponse::NotFound().json(json!({"error": "Player is not in favorites"}))),
        Err(e) => Ok(storage_error_response(&e)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::issue_token;
    use crate::config::test_support::test_config;
    use crate::features::FeatureId;
    use crate::models::UserRole;
    use crate::store::memory::MemoryUsageStore;
    use crate::usage::SystemClock;
    use actix_web::http::StatusCode;
    use actix_web::{App, test};
    use serde_json::Value;
    use std::sync::Arc;

    fn bearer(user_id: Uuid, role: UserRole) -> (&'static str, String) {
        let token = issue_token(user_id, role, &test_config().jwt_secret).unwrap();
        ("Authorization", format!("Bearer {}", token))
    }

    macro_rules! app {
        ($store:expr) => {
            test::init_service(
                App::new()
                    .app_data(web::Data::new(test_config()))
                    .app_data(web::Data::new(UsageAccountant::new(
                        $store.clone(),
                        Arc::new(SystemClock),
                    )))
                    .configure(init_routes),
            )
            .await
        };
    }

    #[actix_web::test]
    async fn limits_require_authentication() {
        let store = Arc::new(MemoryUsageStore::new());
        let app = app!(store);

        let req = test::TestRequest::get().uri("/subscription/limits").to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    }

    #[actix_web::test]
    async fn limits_report_resolved_plan() {
        let club = Uuid::new_v4();
        let store = Arc::new(
            MemoryUsageStore::new().with_plan(club, &["مشاهدة 25 لاعب", "الفلترة المتقدمة"]),
        );
        let app = app!(store);

        let req = test::TestRequest::get()
            .uri("/subscription/limits")
            .insert_header(bearer(club, UserRole::Club))
            .to_request();
        let body: Value = test::call_and_read_body_json(&app, req).await;

        assert_eq!(body["hasActiveSubscription"], true);
        assert_eq!(body["limits"]["playerViews"], 25);
        assert_eq!(body["limits"]["hasPositionFilter"], true);
        assert_eq!(body["usage"]["playerViews"], 0);
        assert_eq!(body["canViewPlayer"], true);
    }

    #[actix_web::test]
    async fn viewing_same_player_twice_charges_once() {
        let club = Uuid::new_v4();
        let store = Arc::new(MemoryUsageStore::new().with_plan(club, &[FeatureId::View10.label()]));
        let app = app!(store);
        let player = Uuid::new_v4();

        let mut bodies = Vec::new();
        for _ in 0..2 {
            let req = test::TestRequest::post()
                .uri(&format!("/usage/player-views/{}", player))
                .insert_header(bearer(club, UserRole::Club))
                .to_request();
            let resp = test::call_service(&app, req).await;
            assert_eq!(resp.status(), StatusCode::OK);
            let body: Value = test::read_body_json(resp).await;
            bodies.push(body);
        }

        assert_eq!(bodies[0]["charged"], true);
        assert_eq!(bodies[0]["used"], 1);
        assert_eq!(bodies[1]["charged"], false);
    }

    #[actix_web::test]
    async fn exhausted_message_quota_returns_arabic_message() {
        let club = Uuid::new_v4();
        let store = Arc::new(MemoryUsageStore::new().with_plan(club, &[]));
        let app = app!(store);

        for _ in 0..5 {
            let req = test::TestRequest::post()
                .uri("/usage/messages")
                .insert_header(bearer(club, UserRole::Club))
                .to_request();
            assert_eq!(test::call_service(&app, req).await.status(), StatusCode::OK);
        }

        let req = test::TestRequest::post()
            .uri("/usage/messages")
            .insert_header(bearer(club, UserRole::Club))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::PAYMENT_REQUIRED);
        let body: Value = test::read_body_json(resp).await;
        assert_eq!(body["allowed"], false);
        assert_eq!(body["message"], QuotaKind::Messages.exhausted_message());
    }

    #[actix_web::test]
    async fn players_cannot_spend_club_quota() {
        let player_user = Uuid::new_v4();
        let store = Arc::new(MemoryUsageStore::new());
        let app = app!(store);

        let req = test::TestRequest::post()
            .uri(&format!("/usage/player-views/{}", Uuid::new_v4()))
            .insert_header(bearer(player_user, UserRole::Player))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::FORBIDDEN);
    }

    #[actix_web::test]
    async fn club_without_subscription_is_told_to_subscribe() {
        let club = Uuid::new_v4();
        let store = Arc::new(MemoryUsageStore::new());
        let app = app!(store);

        let req = test::TestRequest::post()
            .uri(&format!("/usage/favorites/{}", Uuid::new_v4()))
            .insert_header(bearer(club, UserRole::Club))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::PAYMENT_REQUIRED);
        let body: Value = test::read_body_json(resp).await;
        assert_eq!(body["message"], NO_SUBSCRIPTION_MESSAGE);
    }

    #[actix_web::test]
    async fn storage_failure_is_distinct_from_quota_denial() {
        let club = Uuid::new_v4();
        let store = Arc::new(MemoryUsageStore::new().with_plan(club, &[]));
        store.set_failing(true);
        let app = app!(store);

        let req = test::TestRequest::post()
            .uri("/usage/messages")
            .insert_header(bearer(club, UserRole::Club))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body: Value = test::read_body_json(resp).await;
        assert_eq!(body["message"], STORAGE_ERROR_MESSAGE);
    }

    #[actix_web::test]
    async fn favorite_can_be_added_and_removed() {
        let club = Uuid::new_v4();
        let store = Arc::new(MemoryUsageStore::new().with_plan(club, &[]));
        let app = app!(store);
        let player = Uuid::new_v4();
        let uri = format!("/usage/favorites/{}", player);

        let req = test::TestRequest::post()
            .uri(&uri)
            .insert_header(bearer(club, UserRole::Club))
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::OK);

        let req = test::TestRequest::delete()
            .uri(&uri)
            .insert_header(bearer(club, UserRole::Club))
            .to_request();
        assert_eq!(
            test::call_service(&app, req).await.status(),
            StatusCode::NO_CONTENT
        );

        let req = test::TestRequest::delete()
            .uri(&uri)
            .insert_header(bearer(club, UserRole::Club))
            .to_request();
        assert_eq!(
            test::call_service(&app, req).await.status(),
            StatusCode::NOT_FOUND
        );
    }
}
