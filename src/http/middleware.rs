//! Player token verification and the auth middleware

use axum::{
    extract::{Request, State},
    http::StatusCode,
    middleware::Next,
    response::{IntoResponse, Json, Response},
};
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use uuid::Uuid;

use crate::app::AppState;
use crate::util::time::unix_millis;

type HmacSha256 = Hmac<Sha256>;

/// Role carried by the project's service key; granted operator routes
pub const OPERATOR_ROLE: &str = "service_role";

#[derive(Debug, Deserialize)]
struct TokenHeader {
    alg: String,
}

/// Claims of a player token issued by the identity provider
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlayerClaims {
    /// Player id
    pub sub: Uuid,
    /// Expiration time (Unix seconds)
    pub exp: u64,
    #[serde(default)]
    pub iat: u64,
    #[serde(default)]
    pub role: Option<String>,
}

/// Verify an HS256 token against `secret` and return its claims
pub fn verify_token(token: &str, secret: &str) -> Result<PlayerClaims, AuthError> {
    let mut parts = token.split('.');
    let (Some(header_b64), Some(payload_b64), Some(signature_b64), None) =
        (parts.next(), parts.next(), parts.next(), parts.next())
    else {
        return Err(AuthError::InvalidToken);
    };

    let header: TokenHeader = URL_SAFE_NO_PAD
        .decode(header_b64)
        .ok()
        .and_then(|raw| serde_json::from_slice(&raw).ok())
        .ok_or(AuthError::InvalidToken)?;
    if header.alg != "HS256" {
        return Err(AuthError::InvalidToken);
    }

    let signature = URL_SAFE_NO_PAD
        .decode(signature_b64)
        .map_err(|_| AuthError::InvalidToken)?;
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).map_err(|_| AuthError::InvalidToken)?;
    mac.update(header_b64.as_bytes());
    mac.update(b".");
    mac.update(payload_b64.as_bytes());
    mac.verify_slice(&signature)
        .map_err(|_| AuthError::InvalidToken)?;

    let payload = URL_SAFE_NO_PAD
        .decode(payload_b64)
        .map_err(|_| AuthError::InvalidToken)?;
    let claims: PlayerClaims =
        serde_json::from_slice(&payload).map_err(|_| AuthError::InvalidToken)?;

    if claims.exp < unix_millis() / 1000 {
        return Err(AuthError::TokenExpired);
    }

    Ok(claims)
}

/// Extract the token from an Authorization header value
pub fn extract_bearer_token(auth_header: &str) -> Option<&str> {
    auth_header.strip_prefix("Bearer ")
}

/// Authentication errors
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("Missing authorization header")]
    MissingHeader,

    #[error("Invalid authorization header format")]
    InvalidFormat,

    #[error("Invalid token")]
    InvalidToken,

    #[error("Token expired")]
    TokenExpired,

    #[error("Operator role required")]
    Forbidden,
}

impl AuthError {
    pub fn code(&self) -> &'static str {
        match self {
            AuthError::MissingHeader | AuthError::InvalidFormat => "bad_auth_header",
            AuthError::InvalidToken => "invalid_token",
            AuthError::TokenExpired => "token_expired",
            AuthError::Forbidden => "forbidden",
        }
    }
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let status = match &self {
            AuthError::InvalidFormat => StatusCode::BAD_REQUEST,
            AuthError::Forbidden => StatusCode::FORBIDDEN,
            _ => StatusCode::UNAUTHORIZED,
        };

        (status, Json(serde_json::json!({ "error": self.to_string() }))).into_response()
    }
}

/// Player attached to an authenticated request
#[derive(Debug, Clone)]
pub struct AuthenticatedPlayer {
    pub player_id: Uuid,
    pub claims: PlayerClaims,
}

/// Reject requests without a valid bearer token
pub async fn require_auth(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, AuthError> {
    let auth_header = request
        .headers()
        .get("Authorization")
        .and_then(|h| h.to_str().ok())
        .ok_or(AuthError::MissingHeader)?;

    let token = extract_bearer_token(auth_header).ok_or(AuthError::InvalidFormat)?;
    let claims = verify_token(token, &state.config.jwt_secret)?;

    request.extensions_mut().insert(AuthenticatedPlayer {
        player_id: claims.sub,
        claims,
    });

    Ok(next.run(request).await)
}

impl AuthenticatedPlayer {
    pub fn is_operator(&self) -> bool {
        self.claims.role.as_deref() == Some(OPERATOR_ROLE)
    }
}

/// Runs inside `require_auth`; rejects tokens without the operator role
pub async fn require_operator(request: Request, next: Next) -> Result<Response, AuthError> {
    let allowed = request
        .extensions()
        .get::<AuthenticatedPlayer>()
        .is_some_and(AuthenticatedPlayer::is_operator);
    if !allowed {
        return Err(AuthError::Forbidden);
    }
    Ok(next.run(request).await)
}

/// Sign claims the way the identity provider does; test helper
#[cfg(test)]
pub(crate) fn sign_token(claims: &serde_json::Value, secret: &str) -> String {
    let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"HS256","typ":"JWT"}"#);
    let payload = URL_SAFE_NO_PAD.encode(claims.to_string());
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).unwrap();
    mac.update(format!("{}.{}", header, payload).as_bytes());
    let signature = URL_SAFE_NO_PAD.encode(mac.finalize().into_bytes());
    format!("{}.{}.{}", header, payload, signature)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const SECRET: &str = "test-secret";

    fn in_an_hour() -> u64 {
        unix_millis() / 1000 + 3_600
    }

    #[test]
    fn valid_token_yields_player_id() {
        let player = Uuid::new_v4();
        let token = sign_token(&json!({ "sub": player, "exp": in_an_hour() }), SECRET);

        let claims = verify_token(&token, SECRET).unwrap();
        assert_eq!(claims.sub, player);
    }

    #[test]
    fn wrong_secret_is_rejected() {
        let token = sign_token(&json!({ "sub": Uuid::new_v4(), "exp": in_an_hour() }), SECRET);
        assert!(matches!(
            verify_token(&token, "other-secret"),
            Err(AuthError::InvalidToken)
        ));
    }

    #[test]
    fn expired_token_is_rejected() {
        let token = sign_token(&json!({ "sub": Uuid::new_v4(), "exp": 1 }), SECRET);
        assert!(matches!(
            verify_token(&token, SECRET),
            Err(AuthError::TokenExpired)
        ));
    }

    #[test]
    fn malformed_tokens_are_rejected() {
        for token in ["", "a.b", "a.b.c.d", "not.a.token"] {
            assert!(matches!(
                verify_token(token, SECRET),
                Err(AuthError::InvalidToken)
            ));
        }
    }

    #[test]
    fn only_service_role_is_operator() {
        let player = |role: Option<&str>| AuthenticatedPlayer {
            player_id: Uuid::new_v4(),
            claims: PlayerClaims {
                sub: Uuid::new_v4(),
                exp: in_an_hour(),
                iat: 0,
                role: role.map(String::from),
            },
        };
        assert!(player(Some(OPERATOR_ROLE)).is_operator());
        assert!(!player(Some("authenticated")).is_operator());
        assert!(!player(None).is_operator());
    }

    #[test]
    fn bearer_prefix_is_required() {
        assert_eq!(extract_bearer_token("Bearer abc"), Some("abc"));
        assert_eq!(extract_bearer_token("Basic abc"), None);
    }
}
