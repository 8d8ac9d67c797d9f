//! Admin authorization. Spectators are anonymous; only collaborator and
//! admin endpoints check a bearer key.

use axum::http::{HeaderMap, StatusCode};

pub fn extract_bearer_from_headers(headers: &HeaderMap) -> Result<String, (StatusCode, String)> {
    headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer ").map(String::from))
        .ok_or((
            StatusCode::UNAUTHORIZED,
            "missing authorization".to_string(),
        ))
}

/// Compare without short-circuiting on the first differing byte.
fn keys_match(given: &str, expected: &str) -> bool {
    let (a, b) = (given.as_bytes(), expected.as_bytes());
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

/// Require `Authorization: Bearer <admin key>`.
pub fn require_admin(headers: &HeaderMap, admin_api_key: &str) -> Result<(), (StatusCode, String)> {
    let token = extract_bearer_from_headers(headers)?;
    if admin_api_key.is_empty() || !keys_match(&token, admin_api_key) {
        return Err((StatusCode::UNAUTHORIZED, "invalid admin api key".to_string()));
    }
    Ok(())
}
