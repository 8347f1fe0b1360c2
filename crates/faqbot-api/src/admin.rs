use std::collections::HashSet;
use std::fmt;
use std::time::Duration;

use hmac::{Hmac, Mac};
use parking_lot::Mutex;
use sha2::{Digest, Sha256};
use ulid::Ulid;

use crate::ApiError;

type HmacSha256 = Hmac<Sha256>;

/// Name of the cookie carrying the signed admin session.
pub const SESSION_COOKIE: &str = "faqbot_session";

/// Default lifetime of an admin session (12 hours).
pub const DEFAULT_SESSION_TTL: Duration = Duration::from_secs(12 * 60 * 60);

pub struct AdminCredentials {
    username: String,
    password: String,
}

impl AdminCredentials {
    #[must_use]
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self { username: username.into(), password: password.into() }
    }

    /// Compare through SHA-256 digests so the check does not short-circuit on length.
    #[must_use]
    pub fn verify(&self, username: &str, password: &str) -> bool {
        let user_ok =
            Sha256::digest(self.username.as_bytes()) == Sha256::digest(username.as_bytes());
        let pass_ok =
            Sha256::digest(self.password.as_bytes()) == Sha256::digest(password.as_bytes());
        user_ok & pass_ok
    }
}

impl fmt::Debug for AdminCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AdminCredentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Live admin sessions. A cookie value is `<token>.<hex hmac-sha256(token)>`;
/// it is accepted only when the signature verifies, the token has not been revoked
/// and the ULID timestamp of the token is younger than the session ttl.
pub struct SessionManager {
    key: Vec<u8>,
    ttl: Duration,
    active: Mutex<HashSet<String>>,
}

impl SessionManager {
    #[must_use]
    pub fn new(secret_key: &str) -> Self {
        Self::with_ttl(secret_key, DEFAULT_SESSION_TTL)
    }

    #[must_use]
    pub fn with_ttl(secret_key: &str, ttl: Duration) -> Self {
        Self { key: secret_key.as_bytes().to_vec(), ttl, active: Mutex::new(HashSet::new()) }
    }

    /// Start a session and return the cookie value for it.
    ///
    /// # Errors
    /// Returns [`ApiError::Internal`] when the signing key is rejected.
    pub fn issue(&self) -> Result<String, ApiError> {
        let token = Ulid::new().to_string();
        let mac = self
            .mac(&token)
            .ok_or_else(|| ApiError::Internal("session signing key rejected".to_string()))?;
        let signature = hex::encode(mac.finalize().into_bytes());
        let mut active = self.active.lock();
        // prune expired sessions
        active.retain(|existing| !self.is_expired(existing));
        active.insert(token.clone());
        Ok(format!("{token}.{signature}"))
    }

    #[must_use]
    pub fn is_authenticated(&self, cookie_value: &str) -> bool {
        self.verified_token(cookie_value)
            .is_some_and(|token| !self.is_expired(token) && self.active.lock().contains(token))
    }

    /// End the session behind `cookie_value`. Returns whether a live session was removed.
    pub fn revoke(&self, cookie_value: &str) -> bool {
        match self.verified_token(cookie_value) {
            Some(token) => self.active.lock().remove(token),
            None => false,
        }
    }

    #[must_use]
    pub fn active_count(&self) -> usize {
        self.active.lock().len()
    }

    /// Tokens that are not ULIDs never came from [`Self::issue`] and count as expired.
    fn is_expired(&self, token: &str) -> bool {
        let Ok(ulid) = Ulid::from_string(token) else {
            return true;
        };
        match ulid.datetime().elapsed() {
            Ok(age) => age >= self.ttl,
            // minted "in the future" by clock skew; still fresh
            Err(_) => false,
        }
    }

    fn verified_token<'a>(&self, cookie_value: &'a str) -> Option<&'a str> {
        let (token, signature) = cookie_value.split_once('.')?;
        let signature = hex::decode(signature).ok()?;
        self.mac(token)?.verify_slice(&signature).ok()?;
        Some(token)
    }

    fn mac(&self, token: &str) -> Option<HmacSha256> {
        let mut mac = HmacSha256::new_from_slice(&self.key).ok()?;
        mac.update(token.as_bytes());
        Some(mac)
    }
}

impl fmt::Debug for SessionManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionManager")
            .field("ttl", &self.ttl)
            .field("active", &self.active_count())
            .finish_non_exhaustive()
    }
}

/// Login/logout and the admin check every admin route goes through.
#[derive(Debug)]
pub struct AdminGate {
    credentials: AdminCredentials,
    sessions: SessionManager,
}

impl AdminGate {
    #[must_use]
    pub fn new(credentials: AdminCredentials, sessions: SessionManager) -> Self {
        Self { credentials, sessions }
    }

    /// Check credentials and open a session.
    ///
    /// # Errors
    /// Returns [`ApiError::Unauthorized`] on a credential mismatch.
    pub fn login(&self, username: &str, password: &str) -> Result<String, ApiError> {
        if !self.credentials.verify(username, password) {
            tracing::warn!(username, "rejected admin login");
            return Err(ApiError::Unauthorized("Invalid credentials.".to_string()));
        }
        let cookie = self.sessions.issue()?;
        tracing::info!(username, "admin logged in");
        Ok(cookie)
    }

    pub fn logout(&self, cookie_value: Option<&str>) {
        if cookie_value.is_some_and(|value| self.sessions.revoke(value)) {
            tracing::info!("admin logged out");
        }
    }

    #[must_use]
    pub fn is_admin(&self, cookie_value: Option<&str>) -> bool {
        cookie_value.is_some_and(|value| self.sessions.is_authenticated(value))
    }

    /// # Errors
    /// Returns [`ApiError::Unauthorized`] unless `cookie_value` names a live admin session.
    pub fn require_admin(&self, cookie_value: Option<&str>) -> Result<(), ApiError> {
        if self.is_admin(cookie_value) {
            Ok(())
        } else {
            Err(ApiError::Unauthorized("Admin login required.".to_string()))
        }
    }
}
