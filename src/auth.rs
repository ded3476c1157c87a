//! Admin authentication.
//!
//! Route handlers only see the [`Authenticator`] trait, so the credential
//! scheme can change without touching route logic. The shipped implementation
//! checks a configured username/password pair and hands out random opaque
//! bearer tokens that expire after a fixed lifetime.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use serde::Serialize;

use crate::error::{Error, Result};

// ---

/// A freshly issued bearer token.
#[derive(Debug, Clone, Serialize)]
pub struct IssuedToken {
    pub token: String,
    /// Seconds until the token stops being accepted.
    pub expires_in: u64,
}

pub trait Authenticator: Send + Sync {
    /// Exchange credentials for a bearer token.
    fn login(&self, username: &str, password: &str) -> Result<IssuedToken>;

    /// Accept or reject a bearer token. Failures are always
    /// [`Error::Unauthorized`] with no detail about why.
    fn verify(&self, token: &str) -> Result<()>;
}

/// Compare without short-circuiting on the first differing byte.
fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    // ---
    let mut diff = (a.len() ^ b.len()) as u8;
    for (i, x) in a.iter().enumerate() {
        diff |= x ^ b.get(i).copied().unwrap_or(0);
    }
    diff == 0 && a.len() == b.len()
}

/// Username/password from configuration, tokens held in memory.
pub struct SharedSecretAuthenticator {
    username: String,
    password: String,
    ttl: Duration,
    tokens: Mutex<HashMap<String, Instant>>,
}

impl SharedSecretAuthenticator {
    pub fn new(username: &str, password: &str, ttl: Duration) -> Self {
        // ---
        Self {
            username: username.to_string(),
            password: password.to_string(),
            ttl,
            tokens: Mutex::new(HashMap::new()),
        }
    }
}

impl Authenticator for SharedSecretAuthenticator {
    fn login(&self, username: &str, password: &str) -> Result<IssuedToken> {
        // ---
        // Evaluate both halves so timing does not reveal which one was wrong.
        let user_ok = constant_time_eq(username.as_bytes(), self.username.as_bytes());
        let pass_ok = constant_time_eq(password.as_bytes(), self.password.as_bytes());
        if !(user_ok & pass_ok) {
            tracing::warn!("Rejected admin login");
            return Err(Error::Unauthorized);
        }

        let token = uuid::Uuid::new_v4().simple().to_string();
        let now = Instant::now();
        let mut tokens = self
            .tokens
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        tokens.retain(|_, expires| *expires > now);
        tokens.insert(token.clone(), now + self.ttl);

        tracing::info!("Admin login succeeded");
        Ok(IssuedToken {
            token,
            expires_in: self.ttl.as_secs(),
        })
    }

    fn verify(&self, token: &str) -> Result<()> {
        // ---
        let mut tokens = self
            .tokens
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        match tokens.get(token) {
            Some(expires) if *expires > Instant::now() => Ok(()),
            Some(_) => {
                tokens.remove(token);
                Err(Error::Unauthorized)
            }
            None => Err(Error::Unauthorized),
        }
    }
}
