use std::sync::Arc;
use tokio::sync::RwLock;

/// Process-wide session token.
///
/// Set by the login flow (outside this crate), read on every live request,
/// cleared by the gateway when the server reports the session expired.
#[derive(Clone, Default)]
pub struct SessionState {
    token: Arc<RwLock<Option<String>>>,
}

impl SessionState {
    pub fn new(token: Option<String>) -> Self {
        let token = token.map(|t| t.trim().to_string()).filter(|t| !t.is_empty());
        Self {
            token: Arc::new(RwLock::new(token)),
        }
    }

    pub async fn token(&self) -> Option<String> {
        self.token.read().await.clone()
    }

    pub async fn set(&self, token: impl Into<String>) {
        *self.token.write().await = Some(token.into());
    }

    pub async fn clear(&self) {
        self.token.write().await.take();
    }

    pub async fn is_authenticated(&self) -> bool {
        self.token.read().await.is_some()
    }
}

impl std::fmt::Debug for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionState").finish_non_exhaustive()
    }
}
