use axum::{
    extract::{Request, State},
    http::StatusCode,
    middleware::Next,
    response::Response,
};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use soko_core::{Caller, Role};
use uuid::Uuid;

use crate::error::AppError;
use crate::state::AppState;

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Claims {
    pub sub: String,
    pub role: Role,
    pub exp: usize,
}

impl Claims {
    /// The verified caller identity handlers work with. The role comes
    /// from the token; party-ownership is re-checked per order by the
    /// engine, so a stale claim cannot act on someone else's order.
    pub fn caller(&self) -> Result<Caller, AppError> {
        let user_id = Uuid::parse_str(&self.sub)
            .map_err(|_| AppError::AuthenticationError("malformed subject claim".to_string()))?;
        Ok(Caller::new(user_id, self.role))
    }
}

/// Mint a token for a user. Used by the seeding path and by tests; the
/// login flow that resolves roles lives outside this service.
pub fn issue_token(
    secret: &str,
    user_id: Uuid,
    role: Role,
    expiration_seconds: u64,
) -> Result<String, AppError> {
    let exp = chrono::Utc::now().timestamp() as usize + expiration_seconds as usize;
    let claims = Claims {
        sub: user_id.to_string(),
        role,
        exp,
    };
    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
    .map_err(|_| AppError::AuthenticationError("token issuance failed".to_string()))
}

pub async fn require_auth(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    // 1. Extract token from Authorization header
    let auth_header = req
        .headers()
        .get("Authorization")
        .and_then(|h| h.to_str().ok())
        .ok_or(StatusCode::UNAUTHORIZED)?;

    let token = auth_header
        .strip_prefix("Bearer ")
        .ok_or(StatusCode::UNAUTHORIZED)?;

    // 2. Decode and validate JWT
    let token_data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(state.auth.secret.as_bytes()),
        &Validation::default(),
    )
    .map_err(|_| StatusCode::UNAUTHORIZED)?;

    // 3. Inject claims into request extensions
    req.extensions_mut().insert(token_data.claims);

    Ok(next.run(req).await)
}
