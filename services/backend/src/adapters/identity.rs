//! services/backend/src/adapters/identity.rs
//!
//! An `IdentityVerifier` backed by session documents. A session token is the id of
//! a document in the `authSessions` collection written by the sign-in flow.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use notenest_core::domain::VerifiedIdentity;
use notenest_core::ports::{DocumentStore, IdentityVerifier, PortError, PortResult};
use notenest_core::store::collections;
use serde::Deserialize;
use tracing::debug;

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SessionRecord {
    user_id: String,
    #[serde(default)]
    email: String,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    expires_at: DateTime<Utc>,
}

#[derive(Clone)]
pub struct SessionTokenVerifier {
    store: Arc<dyn DocumentStore>,
}

impl SessionTokenVerifier {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl IdentityVerifier for SessionTokenVerifier {
    async fn verify(&self, token: &str) -> PortResult<VerifiedIdentity> {
        let session: SessionRecord = self
            .store
            .get(collections::AUTH_SESSIONS, token)
            .await?
            .ok_or(PortError::Unauthorized)?
            .decode()
            .map_err(|_| PortError::Unauthorized)?;
        if session.expires_at <= Utc::now() {
            debug!(user_id = %session.user_id, "Expired session token");
            return Err(PortError::Unauthorized);
        }
        Ok(VerifiedIdentity {
            user_id: session.user_id,
            email: session.email,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use notenest_core::MemoryStore;
    use serde_json::json;

    async fn session(store: &MemoryStore, token: &str, expires_at: DateTime<Utc>) {
        let fields = json!({
            "userId": "u1",
            "email": "u1@uni.edu",
            "expiresAt": expires_at.timestamp_millis(),
        });
        store
            .set(
                collections::AUTH_SESSIONS,
                token,
                fields.as_object().cloned().unwrap(),
            )
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn live_sessions_resolve_and_expired_ones_do_not() {
        let store = Arc::new(MemoryStore::new());
        session(&store, "live", Utc::now() + Duration::hours(1)).await;
        session(&store, "old", Utc::now() - Duration::hours(1)).await;
        let verifier = SessionTokenVerifier::new(store);

        let identity = verifier.verify("live").await.unwrap();
        assert_eq!(identity.user_id, "u1");
        assert_eq!(identity.email, "u1@uni.edu");
        assert!(matches!(verifier.verify("old").await, Err(PortError::Unauthorized)));
        assert!(matches!(verifier.verify("nope").await, Err(PortError::Unauthorized)));
    }
}
