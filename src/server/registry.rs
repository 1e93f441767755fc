use std::collections::HashMap;

use tokio::sync::Mutex;
use tracing::debug;
use uuid::Uuid;

/// Maps an opaque client key to the bearer token issued to it.
///
/// Lookups scan the table; it holds one entry per running desktop process.
pub struct TokenRegistry {
    tokens: Mutex<HashMap<String, String>>,
}

impl TokenRegistry {
    pub fn new() -> Self {
        Self {
            tokens: Mutex::new(HashMap::new()),
        }
    }

    /// Returns the token for `key`, minting one on first registration.
    pub async fn register(&self, key: &str) -> String {
        let mut tokens = self.tokens.lock().await;
        if let Some(existing) = tokens.get(key) {
            debug!(client_key = key, "desktop client already registered");
            return existing.clone();
        }

        let token = Uuid::new_v4().simple().to_string();
        tokens.insert(key.to_string(), token.clone());
        debug!(
            client_key = key,
            token_fingerprint = %fingerprint(&token),
            "registered desktop client"
        );
        token
    }

    pub async fn deregister(&self, key: &str) {
        if self.tokens.lock().await.remove(key).is_some() {
            debug!(client_key = key, "deregistered desktop client");
        }
    }

    pub async fn token_is_valid(&self, token: &str) -> bool {
        self.tokens
            .lock()
            .await
            .values()
            .any(|registered| registered == token)
    }

    pub async fn len(&self) -> usize {
        self.tokens.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.tokens.lock().await.is_empty()
    }
}

impl Default for TokenRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Short prefix of a token, safe to put in logs.
pub(crate) fn fingerprint(token: &str) -> &str {
    token.get(..6).unwrap_or("")
}
