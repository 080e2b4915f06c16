use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use sha2::{Digest, Sha256};

use neon_store::SqliteEvalStore;
use neon_types::{EvalError, RequestContext};

/// SHA-256 hex digest of an API key secret. Only the hash is ever stored or
/// compared; the plaintext never reaches the store.
pub fn hash_api_key(token: &str) -> String {
    let digest = Sha256::digest(token.as_bytes());
    digest.iter().map(|byte| format!("{byte:02x}")).collect()
}

#[async_trait]
/// Resolves a bearer token to an authenticated request context.
///
/// Key issuance and rotation live outside the engine; this is the minimum
/// contract the gateway needs.
pub trait ApiKeyAuthenticator: Send + Sync {
    async fn authenticate(&self, token: &str) -> Result<RequestContext, EvalError>;
}

/// Authenticator backed by the engine store's `api_keys` table.
pub struct StoreApiKeyAuthenticator {
    store: Arc<SqliteEvalStore>,
}

impl StoreApiKeyAuthenticator {
    pub fn new(store: Arc<SqliteEvalStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl ApiKeyAuthenticator for StoreApiKeyAuthenticator {
    async fn authenticate(&self, token: &str) -> Result<RequestContext, EvalError> {
        let Some(key) = self.store.find_api_key_by_hash(&hash_api_key(token)).await? else {
            return Err(EvalError::Unauthorized("unknown API key".to_string()));
        };
        if !key.is_active {
            return Err(EvalError::Unauthorized("API key is disabled".to_string()));
        }
        if key
            .expires_at
            .is_some_and(|expires_at| expires_at <= Utc::now())
        {
            return Err(EvalError::Unauthorized("API key has expired".to_string()));
        }
        let mut context = RequestContext::new(key.project_id, key.scopes);
        context.principal = Some(key.key_prefix);
        Ok(context)
    }
}
