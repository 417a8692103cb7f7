use axum::http::{header, HeaderMap};
use chrono::Utc;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use uuid::Uuid;

use crate::error::ApiError;
use crate::types::AppState;

pub const ADMIN_TOKEN_HEADER: &str = "x-rt-admin-token";
pub const SESSION_COOKIE: &str = "rt_session";
pub const SESSION_TTL_SECS: i64 = 7 * 24 * 3600;

/// Which caller class a route accepts. Machine callers present a static
/// shared secret in a header; browser sessions present a signed, expiring
/// cookie. The two exist because the threat models differ: scripts should not
/// perform interactive login and browsers should not hold a long-lived secret.
#[derive(Debug, Clone, Copy)]
pub enum AdminGuard {
    StaticToken,
    SignedSession,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Identity {
    MachineToken,
    AdminSession,
}

impl AdminGuard {
    pub fn authorize(&self, state: &AppState, headers: &HeaderMap) -> Result<Identity, ApiError> {
        match self {
            // Fail closed: an unconfigured server-side secret means no admin
            // route is usable at all.
            AdminGuard::StaticToken => {
                let Some(expected) = state.admin.token.as_deref() else {
                    return Err(ApiError::Unauthorized);
                };
                let presented = headers
                    .get(ADMIN_TOKEN_HEADER)
                    .and_then(|v| v.to_str().ok())
                    .unwrap_or("");
                if presented == expected {
                    Ok(Identity::MachineToken)
                } else {
                    Err(ApiError::Unauthorized)
                }
            }
            // Missing, malformed, expired and bad-signature all answer the
            // same way so callers cannot probe which check failed.
            AdminGuard::SignedSession => {
                let token = session_cookie(headers).ok_or(ApiError::Unauthorized)?;
                if verify_session_token(&state.admin.session_secret, &token) {
                    Ok(Identity::AdminSession)
                } else {
                    Err(ApiError::Unauthorized)
                }
            }
        }
    }
}

fn sign_session(secret: &str, exp: i64, nonce: &str) -> Option<String> {
    let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes()).ok()?;
    mac.update(format!("admin:{exp}:{nonce}").as_bytes());
    Some(hex::encode(mac.finalize().into_bytes()))
}

/// Stateless session token: `{exp}.{nonce}.{sig}`. Validity is purely a
/// function of the signature and the embedded expiry.
pub fn issue_session_token(secret: &str) -> Option<String> {
    let exp = Utc::now().timestamp() + SESSION_TTL_SECS;
    let nonce = Uuid::new_v4().simple().to_string();
    let sig = sign_session(secret, exp, &nonce)?;
    Some(format!("{exp}.{nonce}.{sig}"))
}

pub fn verify_session_token(secret: &str, token: &str) -> bool {
    let mut parts = token.splitn(3, '.');
    let (Some(exp), Some(nonce), Some(sig)) = (parts.next(), parts.next(), parts.next()) else {
        return false;
    };
    let Ok(exp) = exp.parse::<i64>() else {
        return false;
    };
    if exp < Utc::now().timestamp() {
        return false;
    }
    let Ok(signature_bytes) = hex::decode(sig.trim()) else {
        return false;
    };
    let Ok(mut mac) = Hmac::<Sha256>::new_from_slice(secret.as_bytes()) else {
        return false;
    };
    mac.update(format!("admin:{exp}:{nonce}").as_bytes());
    mac.verify_slice(&signature_bytes).is_ok()
}

pub fn session_cookie(headers: &HeaderMap) -> Option<String> {
    let raw = headers.get(header::COOKIE)?.to_str().ok()?;
    for pair in raw.split(';') {
        if let Some(value) = pair.trim().strip_prefix(&format!("{SESSION_COOKIE}=")) {
            if !value.is_empty() {
                return Some(value.to_string());
            }
        }
    }
    None
}

pub fn session_set_cookie(token: &str) -> String {
    format!(
        "{SESSION_COOKIE}={token}; Max-Age={SESSION_TTL_SECS}; Path=/; HttpOnly; Secure; SameSite=Strict"
    )
}

pub fn session_clear_cookie() -> String {
    format!("{SESSION_COOKIE}=; Max-Age=0; Path=/; HttpOnly; Secure; SameSite=Strict")
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    use crate::store::{AuditLog, ConfigStore, KnowledgeStore};
    use crate::types::{AdminCredentials, ProviderCredentials};
    use tempfile::TempDir;

    fn test_state(token: Option<&str>) -> (TempDir, AppState) {
        let dir = TempDir::new().unwrap();
        let admin = AdminCredentials {
            token: token.map(str::to_string),
            user: Some("admin".to_string()),
            pass: Some("hunter2".to_string()),
            session_secret: "test-secret".to_string(),
        };
        let state = AppState::new(
            ProviderCredentials::default(),
            admin,
            ConfigStore::load(dir.path().join("config.json")),
            KnowledgeStore::load(dir.path().join("knowledge.txt")),
            AuditLog::new(dir.path().join("events.jsonl")),
        );
        (dir, state)
    }

    #[test]
    fn session_token_round_trip() {
        let token = issue_session_token("secret").unwrap();
        assert!(verify_session_token("secret", &token));
        assert!(!verify_session_token("other-secret", &token));
    }

    #[test]
    fn expired_session_token_rejected() {
        let exp = Utc::now().timestamp() - 60;
        let sig = sign_session("secret", exp, "nonce").unwrap();
        let token = format!("{exp}.nonce.{sig}");
        assert!(!verify_session_token("secret", &token));
    }

    #[test]
    fn tampered_session_token_rejected() {
        let token = issue_session_token("secret").unwrap();
        let mut parts = token.splitn(3, '.').map(str::to_string).collect::<Vec<_>>();
        parts[0] = (Utc::now().timestamp() + 999_999).to_string();
        assert!(!verify_session_token("secret", &parts.join(".")));
        assert!(!verify_session_token("secret", "garbage"));
        assert!(!verify_session_token("secret", ""));
    }

    #[test]
    fn token_guard_exact_match() {
        let (_dir, state) = test_state(Some("s3cret"));
        let mut headers = HeaderMap::new();
        headers.insert(ADMIN_TOKEN_HEADER, HeaderValue::from_static("s3cret"));
        assert_eq!(
            AdminGuard::StaticToken.authorize(&state, &headers).unwrap(),
            Identity::MachineToken
        );

        headers.insert(ADMIN_TOKEN_HEADER, HeaderValue::from_static("wrong"));
        assert!(AdminGuard::StaticToken.authorize(&state, &headers).is_err());
        assert!(AdminGuard::StaticToken
            .authorize(&state, &HeaderMap::new())
            .is_err());
    }

    #[test]
    fn token_guard_fails_closed_when_unconfigured() {
        let (_dir, state) = test_state(None);
        let mut headers = HeaderMap::new();
        headers.insert(ADMIN_TOKEN_HEADER, HeaderValue::from_static("anything"));
        assert!(AdminGuard::StaticToken.authorize(&state, &headers).is_err());
    }

    #[test]
    fn session_guard_accepts_valid_cookie_only() {
        let (_dir, state) = test_state(None);
        let token = issue_session_token(&state.admin.session_secret).unwrap();

        let mut headers = HeaderMap::new();
        headers.insert(
            header::COOKIE,
            HeaderValue::from_str(&format!("other=1; {SESSION_COOKIE}={token}")).unwrap(),
        );
        assert_eq!(
            AdminGuard::SignedSession
                .authorize(&state, &headers)
                .unwrap(),
            Identity::AdminSession
        );

        let mut bad = HeaderMap::new();
        bad.insert(
            header::COOKIE,
            HeaderValue::from_static("rt_session=not-a-token"),
        );
        assert!(AdminGuard::SignedSession.authorize(&state, &bad).is_err());
        assert!(AdminGuard::SignedSession
            .authorize(&state, &HeaderMap::new())
            .is_err());
    }

    #[test]
    fn cookie_attributes_are_browser_safe() {
        let set = session_set_cookie("abc");
        assert!(set.contains("HttpOnly"));
        assert!(set.contains("Secure"));
        assert!(set.contains("SameSite=Strict"));
        let clear = session_clear_cookie();
        assert!(clear.contains("Max-Age=0"));
    }
}
