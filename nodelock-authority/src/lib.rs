//! HTTP API of the REMOTE signing authority.
//!
//! The authority holds the issuer key; hosts in REMOTE mode send canonical
//! payload bytes here to be signed, or to have a signature checked when they
//! hold no public key of their own.

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use ed25519_dalek::{Signature, Signer, SigningKey, VerifyingKey};
use nodelock_license::{
    key, AuthMode, LicensePayload, PublicKeyResponse, SignRequest, SignResponse, VerifyRequest,
    VerifyResponse, DEFAULT_VALIDITY_SECS,
};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Issuer key and signing policy shared by all handlers.
pub struct AuthorityState {
    signing_key: SigningKey,
    key_id: String,
    max_validity_secs: i64,
}

impl AuthorityState {
    /// Signs windows of at most [`DEFAULT_VALIDITY_SECS`].
    pub fn new(signing_key: SigningKey) -> Self {
        let key_id = key::key_id(&signing_key.verifying_key());
        Self {
            signing_key,
            key_id,
            max_validity_secs: DEFAULT_VALIDITY_SECS,
        }
    }

    /// Sets the longest validity window the authority will sign.
    #[must_use]
    pub fn with_max_validity(mut self, max: Duration) -> Self {
        self.max_validity_secs = i64::try_from(max.as_secs()).unwrap_or(i64::MAX);
        self
    }

    pub fn max_validity_secs(&self) -> i64 {
        self.max_validity_secs
    }

    pub fn verifying_key(&self) -> VerifyingKey {
        self.signing_key.verifying_key()
    }

    pub fn key_id(&self) -> &str {
        &self.key_id
    }
}

/// Client error returned as `{"error": "..."}` with status 400.
#[derive(Debug)]
pub struct ApiError(String);

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (StatusCode::BAD_REQUEST, Json(json!({ "error": self.0 }))).into_response()
    }
}

fn decode_field(name: &str, value: &str) -> Result<Vec<u8>, ApiError> {
    BASE64
        .decode(value)
        .map_err(|e| ApiError(format!("{name} is not base64: {e}")))
}

async fn public_key_handler(State(state): State<Arc<AuthorityState>>) -> Json<PublicKeyResponse> {
    Json(PublicKeyResponse {
        public_key: key::encode_public_key(&state.verifying_key()),
        key_id: state.key_id.clone(),
    })
}

async fn sign_handler(
    State(state): State<Arc<AuthorityState>>,
    Json(req): Json<SignRequest>,
) -> Result<Json<SignResponse>, ApiError> {
    let bytes = decode_field("payload", &req.payload)?;

    // Only well-formed REMOTE license payloads get signed
    let payload = LicensePayload::from_bytes(&bytes).map_err(|e| {
        warn!(error = %e, "Refusing to sign malformed payload");
        ApiError(e.to_string())
    })?;
    if payload.issuer != AuthMode::Remote {
        warn!(host = %payload.host, "Refusing to sign payload not marked REMOTE");
        return Err(ApiError("payload issuer must be REMOTE".into()));
    }
    // Decoding guarantees expires_at > issued_at
    let window = payload.expires_at.saturating_sub(payload.issued_at);
    if window > state.max_validity_secs {
        warn!(
            host = %payload.host,
            window,
            max = state.max_validity_secs,
            "Refusing to sign payload with oversized validity window"
        );
        return Err(ApiError(format!(
            "validity window of {window}s exceeds the {}s maximum",
            state.max_validity_secs
        )));
    }

    let signature = state.signing_key.sign(&bytes);
    info!(host = %payload.host, expires_at = %payload.expires_at_utc(), "Signed license payload");
    Ok(Json(SignResponse {
        signature: BASE64.encode(signature.to_bytes()),
    }))
}

async fn verify_handler(
    State(state): State<Arc<AuthorityState>>,
    Json(req): Json<VerifyRequest>,
) -> Result<Json<VerifyResponse>, ApiError> {
    let payload = decode_field("payload", &req.payload)?;
    let signature = decode_field("signature", &req.signature)?;
    let signature = Signature::from_slice(&signature)
        .map_err(|_| ApiError("signature must be 64 bytes".into()))?;

    let valid = state.verifying_key().verify_strict(&payload, &signature).is_ok();
    let expire_at = valid
        .then(|| LicensePayload::from_bytes(&payload).ok())
        .flatten()
        .map(|p| p.expires_at_utc().to_rfc3339());

    debug!(valid, "Verified license payload");
    Ok(Json(VerifyResponse { valid, expire_at }))
}

/// Build the HTTP API router around the issuer key.
pub fn build_router(state: Arc<AuthorityState>) -> Router {
    Router::new()
        .route("/api/v1/public-key", get(public_key_handler))
        .route("/api/v1/sign", post(sign_handler))
        .route("/api/v1/verify", post(verify_handler))
        .with_state(state)
}
