// src/meetings.rs
use crate::auth::AuthUser;
use crate::config::Config;
use crate::models::MeetingRequest;
use actix_web::{HttpResponse, post, web};
use chrono::Utc;
use jsonwebtoken::{Algorithm, EncodingKey, Header, encode};
use serde::{Deserialize, Serialize};
use serde_json::json;
use uuid::Uuid;

const GOOGLE_TOKEN_URL: &str = "https://oauth2.googleapis.com/token";
const GOOGLE_CALENDAR_URL: &str = "https://www.googleapis.com/calendar/v3/calendars";
const CALENDAR_SCOPE: &str = "https://www.googleapis.com/auth/calendar";

pub fn init_routes(cfg: &mut web::ServiceConfig) {
    cfg.service(create_meeting);
}

#[derive(Debug, thiserror::Error)]
pub enum MeetError {
    #[error("google credentials are not configured")]
    NotConfigured,
    #[error("invalid service account key: {0}")]
    InvalidKey(#[from] jsonwebtoken::errors::Error),
    #[error("google request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("google rejected the request: {status} {body}")]
    Rejected { status: u16, body: String },
}

#[derive(Debug, Serialize, Deserialize)]
struct ServiceAccountClaims {
    iss: String,
    scope: String,
    aud: String,
    iat: i64,
    exp: i64,
}

#[derive(Debug, Deserialize)]
struct AccessToken {
    access_token: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CalendarEvent {
    id: String,
    #[serde(default)]
    hangout_link: Option<String>,
    #[serde(default)]
    html_link: Option<String>,
}

#[derive(Debug, Serialize, PartialEq, Eq)]
pub struct CreatedMeeting {
    pub event_id: String,
    pub meet_link: Option<String>,
    pub html_link: Option<String>,
}

// Ключ в переменной окружения обычно хранится с экранированными переводами строк
fn normalize_private_key(key: &str) -> String {
    key.replace("\\n", "\n")
}

fn service_account_assertion(email: &str, private_key: &str) -> Result<String, MeetError> {
    let now = Utc::now().timestamp();
    let claims = ServiceAccountClaims {
        iss: email.to_string(),
        scope: CALENDAR_SCOPE.to_string(),
        aud: GOOGLE_TOKEN_URL.to_string(),
        iat: now,
        exp: now + 3600,
    };
    let key = EncodingKey::from_rsa_pem(normalize_private_key(private_key).as_bytes())?;
    Ok(encode(&Header::new(Algorithm::RS256), &claims, &key)?)
}

fn event_body(request: &MeetingRequest) -> serde_json::Value {
    json!({
        "summary": request.summary,
        "description": request.description.clone().unwrap_or_default(),
        "start": { "dateTime": request.start.to_rfc3339(), "timeZone": "UTC" },
        "end": { "dateTime": request.end.to_rfc3339(), "timeZone": "UTC" },
        "attendees": request
            .attendees
            .iter()
            .map(|email| json!({ "email": email }))
            .collect::<Vec<_>>(),
        "conferenceData": {
            "createRequest": {
                "requestId": Uuid::new_v4().to_string(),
                "conferenceSolutionKey": { "type": "hangoutsMeet" },
            },
        },
    })
}

pub fn validate_request(request: &MeetingRequest) -> Result<(), &'static str> {
    if request.summary.trim().is_empty() {
        return Err("summary is required");
    }
    if request.end <= request.start {
        return Err("end must be after start");
    }
    Ok(())
}

async fn ensure_success(response: reqwest::Response) -> Result<reqwest::Response, MeetError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(MeetError::Rejected {
        status: status.as_u16(),
        body,
    })
}

pub async fn create_meet_event(
    http: &reqwest::Client,
    config: &Config,
    request: &MeetingRequest,
) -> Result<CreatedMeeting, MeetError> {
    let (email, private_key) = config.google_credentials().ok_or(MeetError::NotConfigured)?;
    let assertion = service_account_assertion(email, private_key)?;

    let response = http
        .post(GOOGLE_TOKEN_URL)
        .form(&[
            ("grant_type", "urn:ietf:params:oauth:grant-type:jwt-bearer"),
            ("assertion", assertion.as_str()),
        ])
        .send()
        .await?;
    let token: AccessToken = ensure_success(response).await?.json().await?;

    let response = http
        .post(format!(
            "{}/{}/events",
            GOOGLE_CALENDAR_URL, config.google_calendar_id
        ))
        .query(&[("conferenceDataVersion", "1"), ("sendUpdates", "all")])
        .bearer_auth(token.access_token)
        .json(&event_body(request))
        .send()
        .await?;
    let event: CalendarEvent = ensure_success(response).await?.json().await?;

    Ok(CreatedMeeting {
        event_id: event.id,
        meet_link: event.hangout_link,
        html_link: event.html_link,
    })
}

#[post("/meetings")]
pub async fn create_meeting(
    config: web::Data<Config>,
    http: web::Data<reqwest::Client>,
    user: AuthUser,
    req: web::Json<MeetingRequest>,
) -> Result<HttpResponse, actix_web::Error> {
    if let Err(reason) = validate_request(&req) {
        return Ok(HttpResponse::BadRequest().json(json!({"error": reason})));
    }

    match create_meet_event(&http, &config, &req).await {
        Ok(meeting) => {
            tracing::info!("User {} created meeting {}", user.id, meeting.event_id);
            Ok(HttpResponse::Created().json(meeting))
        }
        Err(MeetError::NotConfigured) => Ok(HttpResponse::ServiceUnavailable()
            .json(json!({"error": "Meetings are not configured"}))),
        Err(e) => {
            tracing::error!("Google Meet creation error: {}", e);
            Ok(HttpResponse::BadGateway().json(json!({"error": "Failed to create meeting"})))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn request(offset_minutes: i64) -> MeetingRequest {
        let start = Utc::now();
        MeetingRequest {
            summary: "مقابلة مع اللاعب".to_string(),
            description: None,
            start,
            end: start + Duration::minutes(offset_minutes),
            attendees: vec!["club@example.com".into(), "player@example.com".into()],
        }
    }

    #[test]
    fn rejects_empty_summary_and_inverted_range() {
        assert!(validate_request(&request(30)).is_ok());
        assert_eq!(validate_request(&request(0)), Err("end must be after start"));
        let mut blank = request(30);
        blank.summary = "  ".into();
        assert_eq!(validate_request(&blank), Err("summary is required"));
    }

    #[test]
    fn event_body_requests_meet_conference() {
        let body = event_body(&request(45));
        assert_eq!(
            body["conferenceData"]["createRequest"]["conferenceSolutionKey"]["type"],
            "hangoutsMeet"
        );
        assert_eq!(body["attendees"].as_array().unwrap().len(), 2);
        assert_eq!(body["attendees"][0]["email"], "club@example.com");
        assert_eq!(body["description"], "");
    }

    #[test]
    fn escaped_newlines_in_key_are_restored() {
        assert_eq!(
            normalize_private_key("-----BEGIN-----\\nabc\\n-----END-----"),
            "-----BEGIN-----\nabc\n-----END-----"
        );
    }

    #[test]
    fn garbage_key_is_reported_as_invalid() {
        let result = service_account_assertion("svc@example.com", "not a pem");
        assert!(matches!(result, Err(MeetError::InvalidKey(_))));
    }

    #[tokio::test]
    async fn missing_credentials_short_circuit() {
        let config = crate::config::test_support::test_config();
        let result = create_meet_event(&reqwest::Client::new(), &config, &request(30)).await;
        assert!(matches!(result, Err(MeetError::NotConfigured)));
    }
}
