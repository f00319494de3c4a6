//! crates/notenest_core/src/identity.rs
//!
//! Resolves the caller behind a bearer token. Every mutating operation takes the
//! `VerifiedIdentity` produced here as its acting user.

use std::sync::Arc;

use tracing::debug;

use crate::domain::VerifiedIdentity;
use crate::error::{CoreError, CoreResult};
use crate::ports::IdentityVerifier;

#[derive(Clone)]
pub struct Authenticator {
    verifier: Arc<dyn IdentityVerifier>,
}

impl Authenticator {
    pub fn new(verifier: Arc<dyn IdentityVerifier>) -> Self {
        Self { verifier }
    }

    /// Accepts either a raw token or an `Authorization` header value.
    pub async fn authenticate(&self, token: &str) -> CoreResult<VerifiedIdentity> {
        let token = token.trim();
        let token = token.strip_prefix("Bearer ").unwrap_or(token).trim();
        if token.is_empty() {
            return Err(CoreError::Unauthenticated);
        }
        match self.verifier.verify(token).await {
            Ok(identity) if !identity.user_id.is_empty() => Ok(identity),
            Ok(_) => Err(CoreError::Unauthenticated),
            Err(e) => {
                debug!("Token rejected: {}", e);
                Err(CoreError::Unauthenticated)
            }
        }
    }
}
