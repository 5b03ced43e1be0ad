use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::Json;
use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

use super::AppState;
use crate::auth::generate_key;
use crate::error::{AppError, Result};

#[derive(Debug, Serialize, Deserialize)]
pub struct SignupRequest {
    #[serde(default)]
    pub owner: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SignupResponse {
    pub key: String,
    pub active: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub owner: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    pub created_at: String,
}

/// POST /public/signup. Issues a fresh random key without admin auth;
/// mounted only when `PUBLIC_SIGNUP` is enabled.
pub async fn signup(
    State(state): State<AppState>,
    body: std::result::Result<Json<SignupRequest>, JsonRejection>,
) -> Result<Json<SignupResponse>> {
    let Json(request) = body.map_err(|_| AppError::BadRequest("bad request".to_string()))?;

    let key = generate_key();
    state.keys.upsert(&key, true, request.owner.as_deref()).await?;

    Ok(Json(SignupResponse {
        key,
        active: true,
        owner: request.owner,
        email: request.email,
        created_at: Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
    }))
}
