use std::{path::Path, sync::Arc};

use anyhow::{Context, Result};
use async_trait::async_trait;
use shared::protocol::UserProfile;
use storage::Storage;
use tokio::sync::Mutex;

const TOKEN_KEY: &str = "session.token";
const USER_KEY: &str = "session.user";

/// Cache for the session token and user profile. The identity provider and
/// backend stay sources of truth; this is only what lets a restart skip the
/// login screen. `put_session` and `clear` must be atomic: the cache never
/// holds a token without the decision about its paired user, or vice versa.
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn token(&self) -> Result<Option<String>>;
    async fn user(&self) -> Result<Option<UserProfile>>;
    async fn put_session(&self, token: &str, user: &UserProfile) -> Result<()>;
    async fn put_user(&self, user: &UserProfile) -> Result<()>;
    async fn clear(&self) -> Result<()>;
}

/// SQLite-backed store used by real frontends.
pub struct DurableSessionStore {
    store: Storage,
}

impl DurableSessionStore {
    pub async fn initialize(database_url: &str) -> Result<Arc<Self>> {
        let store = Storage::new(database_url)
            .await
            .with_context(|| format!("failed to initialize session cache at '{database_url}'"))?;
        Ok(Arc::new(Self { store }))
    }

    pub fn sqlite_url_for_data_dir(base_dir: &Path) -> String {
        format!("sqlite://{}", base_dir.join("session_cache.sqlite3").display())
    }
}

#[async_trait]
impl SessionStore for DurableSessionStore {
    async fn token(&self) -> Result<Option<String>> {
        self.store.get_value(TOKEN_KEY).await
    }

    async fn user(&self) -> Result<Option<UserProfile>> {
        let Some(raw) = self.store.get_value(USER_KEY).await? else {
            return Ok(None);
        };
        let user = serde_json::from_str(&raw).context("corrupt cached user profile")?;
        Ok(Some(user))
    }

    async fn put_session(&self, token: &str, user: &UserProfile) -> Result<()> {
        let user_json = serde_json::to_string(user)?;
        self.store
            .put_values(&[(TOKEN_KEY, token), (USER_KEY, &user_json)])
            .await
    }

    async fn put_user(&self, user: &UserProfile) -> Result<()> {
        let user_json = serde_json::to_string(user)?;
        self.store.put_value(USER_KEY, &user_json).await
    }

    async fn clear(&self) -> Result<()> {
        self.store.delete_values(&[TOKEN_KEY, USER_KEY]).await
    }
}

/// In-memory store for tests and throwaway sessions.
#[derive(Default)]
pub struct InMemorySessionStore {
    inner: Mutex<CachedSession>,
}

#[derive(Default)]
struct CachedSession {
    token: Option<String>,
    user: Option<UserProfile>,
}

impl InMemorySessionStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub async fn seed(&self, token: Option<&str>, user: Option<&UserProfile>) {
        let mut inner = self.inner.lock().await;
        inner.token = token.map(str::to_string);
        inner.user = user.cloned();
    }
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn token(&self) -> Result<Option<String>> {
        Ok(self.inner.lock().await.token.clone())
    }

    async fn user(&self) -> Result<Option<UserProfile>> {
        Ok(self.inner.lock().await.user.clone())
    }

    async fn put_session(&self, token: &str, user: &UserProfile) -> Result<()> {
        let mut inner = self.inner.lock().await;
        inner.token = Some(token.to_string());
        inner.user = Some(user.clone());
        Ok(())
    }

    async fn put_user(&self, user: &UserProfile) -> Result<()> {
        self.inner.lock().await.user = Some(user.clone());
        Ok(())
    }

    async fn clear(&self) -> Result<()> {
        let mut inner = self.inner.lock().await;
        inner.token = None;
        inner.user = None;
        Ok(())
    }
}

#[cfg(test)]
#[path = "tests/session_store_tests.rs"]
mod tests;
