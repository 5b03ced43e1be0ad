use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::http::HeaderMap;
use axum::Json;
use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

use super::AppState;
use crate::auth::generate_key;
use crate::error::{AppError, Result};

/// If `key` is empty a random 32-byte hex key is generated. Owner is
/// optional.
#[derive(Debug, Serialize, Deserialize)]
pub struct CreateKeyRequest {
    #[serde(default)]
    pub key: Option<String>,
    #[serde(default)]
    pub owner: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CreateKeyResponse {
    pub key: String,
    pub active: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub owner: Option<String>,
    pub created_at: String,
}

/// POST /admin/create-key. Mounted only when an admin token is configured.
pub async fn create_key(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: std::result::Result<Json<CreateKeyRequest>, JsonRejection>,
) -> Result<Json<CreateKeyResponse>> {
    let expected = state.config.admin_token.as_deref().unwrap_or("");
    let provided = headers
        .get("x-admin-token")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");
    if expected.is_empty() || provided != expected {
        return Err(AppError::Unauthorized);
    }

    let Json(request) = body.map_err(|_| AppError::BadRequest("bad request".to_string()))?;
    let key = match request.key.filter(|k| !k.is_empty()) {
        Some(key) => key,
        None => generate_key(),
    };

    state.keys.upsert(&key, true, request.owner.as_deref()).await?;

    Ok(Json(CreateKeyResponse {
        key,
        active: true,
        owner: request.owner,
        created_at: Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
    }))
}
