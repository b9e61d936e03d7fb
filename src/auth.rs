// src/auth.rs
use crate::config::Config;
use crate::db;
use crate::models::{Claims, LoginRequest, RegisterRequest, User, UserRole};
use actix_web::dev::Payload;
use actix_web::{FromRequest, HttpRequest, HttpResponse, post, web};
use bcrypt::{DEFAULT_COST, hash, verify};
use chrono::{Duration, Utc};
use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde_json::json;
use std::future::{Ready, ready};
use uuid::Uuid;

const TOKEN_TTL_HOURS: i64 = 24;

pub fn init_routes(cfg: &mut web::ServiceConfig) {
    cfg.service(login);
    cfg.service(register);
}

pub fn issue_token(
    user_id: Uuid,
    role: UserRole,
    secret: &str,
) -> Result<String, jsonwebtoken::errors::Error> {
    let expiration = Utc::now() + Duration::hours(TOKEN_TTL_HOURS);
    let claims = Claims {
        sub: user_id.to_string(),
        role,
        exp: expiration.timestamp() as usize,
    };
    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_ref()),
    )
}

pub fn verify_token(token: &str, secret: &str) -> Result<Claims, jsonwebtoken::errors::Error> {
    decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_ref()),
        &Validation::default(),
    )
    .map(|data| data.claims)
}

/// Пользователь из заголовка `Authorization: Bearer <jwt>`.
#[derive(Clone, Copy, Debug)]
pub struct AuthUser {
    pub id: Uuid,
    pub role: UserRole,
}

impl AuthUser {
    pub fn is_club(&self) -> bool {
        self.role == UserRole::Club
    }
}

fn authenticate(req: &HttpRequest) -> Result<AuthUser, actix_web::Error> {
    let config = req
        .app_data::<web::Data<Config>>()
        .ok_or_else(|| actix_web::error::ErrorInternalServerError("config is not registered"))?;

    let token = req
        .headers()
        .get(actix_web::http::header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .ok_or_else(|| actix_web::error::ErrorUnauthorized(json!({"error": "Unauthorized"})))?;

    let claims = verify_token(token, &config.jwt_secret).map_err(|e| {
        tracing::debug!("Rejected token: {}", e);
        actix_web::error::ErrorUnauthorized(json!({"error": "Unauthorized"}))
    })?;

    let id = Uuid::parse_str(&claims.sub)
        .map_err(|_| actix_web::error::ErrorUnauthorized(json!({"error": "Unauthorized"})))?;

    Ok(AuthUser {
        id,
        role: claims.role,
    })
}

impl FromRequest for AuthUser {
    type Error = actix_web::Error;
    type Future = Ready<Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, _payload: &mut Payload) -> Self::Future {
        ready(authenticate(req))
    }
}

#[post("/auth/login")]
pub async fn login(
    pool: web::Data<sqlx::PgPool>,
    config: web::Data<Config>,
    req: web::Json<LoginRequest>,
) -> Result<HttpResponse, actix_web::Error> {
    let user_result = db::get_user_by_email(&pool, &req.email).await;

    match user_result {
        Ok(Some(user)) => match verify(&req.password, &user.password_hash) {
            Ok(true) => {
                let Some(role) = UserRole::from_string(&user.role) else {
                    tracing::error!("User {} has unknown role {}", user.id, user.role);
                    return Ok(HttpResponse::InternalServerError()
                        .json(json!({"error": "Internal server error"})));
                };
                match issue_token(user.id, role, &config.jwt_secret) {
                    Ok(token) => Ok(HttpResponse::Ok().json(json!({
                        "token": token,
                        "user_id": user.id,
                        "role": role,
                    }))),
                    Err(e) => {
                        tracing::error!("Token generation error: {}", e);
                        Ok(HttpResponse::InternalServerError()
                            .json(json!({"error": "Internal server error"})))
                    }
                }
            }
            Ok(false) | Err(_) => {
                Ok(HttpResponse::Unauthorized().json(json!({"error": "Invalid credentials"})))
            }
        },
        Ok(None) => Ok(HttpResponse::Unauthorized().json(json!({"error": "Invalid credentials"}))),
        Err(e) => {
            tracing::error!("Database error during login: {}", e);
            Ok(HttpResponse::InternalServerError().json(json!({"error": "Internal server error"})))
        }
    }
}

#[post("/auth/register")]
pub async fn register(
    pool: web::Data<sqlx::PgPool>,
    req: web::Json<RegisterRequest>,
) -> Result<HttpResponse, actix_web::Error> {
    // Администраторов заводят вручную
    if req.role == UserRole::Admin {
        return Ok(HttpResponse::Forbidden().json(json!({"error": "Role not allowed"})));
    }

    let check_result = db::get_user_by_email(&pool, &req.email).await;
    match check_result {
        Ok(Some(_)) => {
            return Ok(HttpResponse::Conflict().json(json!({"error": "Email already registered"})));
        }
        Err(e) => {
            tracing::error!("Database error during registration check: {}", e);
            return Ok(
                HttpResponse::InternalServerError().json(json!({"error": "Internal server error"}))
            );
        }
        _ => {}
    }

    let hashed_password = match hash(&req.password, DEFAULT_COST) {
        Ok(hash) => hash,
        Err(e) => {
            tracing::error!("Password hashing error: {}", e);
            return Ok(
                HttpResponse::InternalServerError().json(json!({"error": "Internal server error"}))
            );
        }
    };

    let new_user = User {
        id: Uuid::new_v4(),
        email: req.email.clone(),
        full_name: req.full_name.clone(),
        password_hash: hashed_password,
        role: req.role.as_str().to_string(),
        created_at: Utc::now(),
    };

    match db::create_user(&pool, &new_user).await {
        Ok(()) => Ok(HttpResponse::Created().json(json!({
            "message": "User created successfully",
            "user_id": new_user.id,
        }))),
        Err(e) => {
            tracing::error!("User creation error: {}", e);
            Ok(HttpResponse::InternalServerError().json(json!({"error": "Internal server error"})))
        }
    }
}
