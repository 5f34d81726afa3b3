use std::sync::Arc;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use reqwest::Client;
use shared::protocol::{
    AuthResponse, LoginRequest, ProfileResponse, RegisterRequest, SocialLoginRequest,
    UpdateProfileRequest, UserProfile,
};
use tokio::{
    sync::{broadcast, Mutex},
    task::JoinHandle,
};
use tracing::{info, warn};

use crate::error::{decode_api_response, ends_session, SessionError};
use crate::session_store::SessionStore;
use shared::domain::Role;

const SESSION_EVENT_CAPACITY: usize = 64;

/// Opaque user handle returned by the identity provider.
#[derive(Debug, Clone, PartialEq)]
pub struct IdentityUser {
    pub display_name: Option<String>,
    pub email: String,
    pub photo_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum IdentityState {
    SignedIn(IdentityUser),
    SignedOut,
}

/// External identity service (hosted OAuth/password provider). Consumed, not
/// implemented, by this crate; frontends inject their binding.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    async fn create_user(&self, email: &str, password: &str) -> Result<IdentityUser>;
    async fn sign_in(&self, email: &str, password: &str) -> Result<IdentityUser>;
    async fn sign_in_with_popup(&self) -> Result<IdentityUser>;
    async fn sign_out(&self) -> Result<()>;
    fn subscribe_state(&self) -> broadcast::Receiver<IdentityState>;
}

pub struct MissingIdentityProvider {
    state: broadcast::Sender<IdentityState>,
}

impl Default for MissingIdentityProvider {
    fn default() -> Self {
        let (state, _) = broadcast::channel(1);
        Self { state }
    }
}

impl MissingIdentityProvider {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl IdentityProvider for MissingIdentityProvider {
    async fn create_user(&self, _email: &str, _password: &str) -> Result<IdentityUser> {
        Err(anyhow!("identity provider is unavailable"))
    }

    async fn sign_in(&self, _email: &str, _password: &str) -> Result<IdentityUser> {
        Err(anyhow!("identity provider is unavailable"))
    }

    async fn sign_in_with_popup(&self) -> Result<IdentityUser> {
        Err(anyhow!("identity provider is unavailable"))
    }

    async fn sign_out(&self) -> Result<()> {
        Ok(())
    }

    fn subscribe_state(&self) -> broadcast::Receiver<IdentityState> {
        self.state.subscribe()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Session {
    Authenticated(UserProfile),
    Unauthenticated,
}

impl Session {
    pub fn is_authenticated(&self) -> bool {
        matches!(self, Session::Authenticated(_))
    }
}

#[derive(Debug, Clone)]
pub enum SessionEvent {
    Changed(Session),
    Notification(String),
}

/// What one reconciliation cycle must do, given the three signals. Evaluated
/// in strict priority order; pure so the table is testable without mocks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileAction {
    /// Identity session is gone: drop the cached token and user.
    ClearSession,
    /// Identity session exists but there is no token; a token is a mandatory
    /// precondition for any authenticated fetch, so stay signed out.
    StayUnauthenticated,
    /// Token and cached user both present: trust the cache, no network.
    TrustCache,
    /// Token present, no cached user: fetch the profile once.
    FetchProfile,
}

pub fn reconcile_action(identity_signed_in: bool, has_token: bool, has_user: bool) -> ReconcileAction {
    if !identity_signed_in {
        return ReconcileAction::ClearSession;
    }
    if !has_token {
        return ReconcileAction::StayUnauthenticated;
    }
    if has_user {
        return ReconcileAction::TrustCache;
    }
    ReconcileAction::FetchProfile
}

struct SessionManagerState {
    session: Session,
    token: Option<String>,
    profile_fetch_inflight: bool,
}

/// Reconciles the identity-provider session, the cached token, and the cached
/// profile into one `Session` value the rest of the application consumes.
pub struct SessionManager {
    http: Client,
    api_base: String,
    identity: Arc<dyn IdentityProvider>,
    store: Arc<dyn SessionStore>,
    inner: Mutex<SessionManagerState>,
    events: broadcast::Sender<SessionEvent>,
}

impl SessionManager {
    pub fn new(
        api_base: impl Into<String>,
        identity: Arc<dyn IdentityProvider>,
        store: Arc<dyn SessionStore>,
    ) -> Arc<Self> {
        let (events, _) = broadcast::channel(SESSION_EVENT_CAPACITY);
        Arc::new(Self {
            http: Client::new(),
            api_base: api_base.into(),
            identity,
            store,
            inner: Mutex::new(SessionManagerState {
                session: Session::Unauthenticated,
                token: None,
                profile_fetch_inflight: false,
            }),
            events,
        })
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    pub async fn current_session(&self) -> Session {
        self.inner.lock().await.session.clone()
    }

    pub async fn token(&self) -> Option<String> {
        self.inner.lock().await.token.clone()
    }

    /// Applies identity-provider state changes for the lifetime of the
    /// manager. Call once after construction.
    pub fn spawn_reconcile_task(self: &Arc<Self>) -> JoinHandle<()> {
        let manager = Arc::clone(self);
        let mut state_rx = self.identity.subscribe_state();
        tokio::spawn(async move {
            loop {
                match state_rx.recv().await {
                    Ok(state) => {
                        if let Err(err) = manager.handle_identity_state(state).await {
                            warn!("session: reconciliation cycle failed: {err}");
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "session: identity state stream lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        })
    }

    /// One reconciliation cycle. Safe to call concurrently: the profile fetch
    /// is guarded so duplicate identity-provider callbacks cannot double-hit
    /// the backend or race each other's cache writes.
    pub async fn handle_identity_state(&self, state: IdentityState) -> Result<()> {
        let identity_signed_in = matches!(state, IdentityState::SignedIn(_));
        let cached_token = self.store.token().await?;
        let cached_user = self.store.user().await?;

        match reconcile_action(
            identity_signed_in,
            cached_token.is_some(),
            cached_user.is_some(),
        ) {
            ReconcileAction::ClearSession => {
                self.store.clear().await?;
                self.apply_session(None, Session::Unauthenticated).await;
                Ok(())
            }
            ReconcileAction::StayUnauthenticated => {
                self.apply_session(None, Session::Unauthenticated).await;
                Ok(())
            }
            ReconcileAction::TrustCache => {
                let user = cached_user.ok_or_else(|| anyhow!("cached user vanished mid-cycle"))?;
                info!(user_id = %user.user_id, "session: restored from cache");
                self.apply_session(cached_token, Session::Authenticated(user))
                    .await;
                Ok(())
            }
            ReconcileAction::FetchProfile => {
                let token = cached_token.ok_or_else(|| anyhow!("cached token vanished mid-cycle"))?;
                self.fetch_profile_once(token).await
            }
        }
    }

    /// Fetches `GET /auth/me` at most once per reconciliation cycle. Any
    /// failure clears the session: a stale token is never silently reused.
    async fn fetch_profile_once(&self, token: String) -> Result<()> {
        {
            let mut inner = self.inner.lock().await;
            if inner.profile_fetch_inflight {
                return Ok(());
            }
            inner.profile_fetch_inflight = true;
        }

        let result = self.fetch_profile(&token).await;

        self.inner.lock().await.profile_fetch_inflight = false;

        match result {
            Ok(user) => {
                self.store.put_user(&user).await?;
                info!(user_id = %user.user_id, "session: profile fetched");
                self.apply_session(Some(token), Session::Authenticated(user))
                    .await;
                Ok(())
            }
            Err(err) => {
                warn!("session: profile fetch failed, clearing session: {err}");
                self.store.clear().await?;
                self.apply_session(None, Session::Unauthenticated).await;
                Err(err)
            }
        }
    }

    async fn fetch_profile(&self, token: &str) -> Result<UserProfile> {
        let response = self
            .http
            .get(format!("{}/auth/me", self.api_base))
            .bearer_auth(token)
            .send()
            .await?;
        let body: ProfileResponse = decode_api_response(response).await?;
        Ok(body.user)
    }

    pub async fn login(&self, email: &str, password: &str) -> Result<UserProfile> {
        let identity_user = match self.identity.sign_in(email, password).await {
            Ok(user) => user,
            Err(err) => return Err(self.identity_failure(err).await),
        };

        let request = self.http.post(format!("{}/auth/login", self.api_base)).json(
            &LoginRequest {
                email: identity_user.email.clone(),
                password: password.to_string(),
            },
        );
        self.complete_sign_in(request).await
    }

    pub async fn register(&self, name: &str, email: &str, password: &str, role: Role) -> Result<UserProfile> {
        let identity_user = match self.identity.create_user(email, password).await {
            Ok(user) => user,
            Err(err) => return Err(self.identity_failure(err).await),
        };

        let request = self
            .http
            .post(format!("{}/auth/register", self.api_base))
            .json(&RegisterRequest {
                name: name.to_string(),
                email: identity_user.email.clone(),
                password: password.to_string(),
                role,
            });
        self.complete_sign_in(request).await
    }

    pub async fn login_with_identity_provider(&self, role: Role) -> Result<UserProfile> {
        let identity_user = match self.identity.sign_in_with_popup().await {
            Ok(user) => user,
            Err(err) => return Err(self.identity_failure(err).await),
        };

        let name = identity_user
            .display_name
            .clone()
            .unwrap_or_else(|| identity_user.email.clone());
        let request = self
            .http
            .post(format!("{}/auth/social-login", self.api_base))
            .json(&SocialLoginRequest {
                name,
                email: identity_user.email.clone(),
                photo_url: identity_user.photo_url.clone(),
                role,
            });
        self.complete_sign_in(request).await
    }

    /// Shared tail of login/register/social-login: backend call, then cache
    /// and in-memory session updated together. A backend failure rolls the
    /// identity sign-in back so no half-authenticated state survives.
    async fn complete_sign_in(&self, request: reqwest::RequestBuilder) -> Result<UserProfile> {
        let auth: AuthResponse = match self.execute(request).await {
            Ok(auth) => auth,
            Err(err) => {
                if let Err(sign_out_err) = self.identity.sign_out().await {
                    warn!("session: identity rollback sign-out failed: {sign_out_err}");
                }
                let _ = self
                    .events
                    .send(SessionEvent::Notification(format!("sign-in failed: {err}")));
                return Err(err);
            }
        };

        self.store.put_session(&auth.token, &auth.user).await?;
        info!(user_id = %auth.user.user_id, "session: signed in");
        self.apply_session(Some(auth.token), Session::Authenticated(auth.user.clone()))
            .await;
        Ok(auth.user)
    }

    pub async fn logout(&self) -> Result<()> {
        if let Err(err) = self.identity.sign_out().await {
            warn!("session: identity sign-out failed: {err}");
        }
        self.store.clear().await?;
        info!("session: signed out");
        self.apply_session(None, Session::Unauthenticated).await;
        Ok(())
    }

    pub async fn update_profile(&self, fields: UpdateProfileRequest) -> Result<UserProfile> {
        let token = self
            .token()
            .await
            .ok_or(SessionError::NotAuthenticated)?;

        let request = self
            .http
            .put(format!("{}/users/profile", self.api_base))
            .bearer_auth(&token)
            .json(&fields);
        let body: ProfileResponse = self.execute(request).await?;

        self.store.put_user(&body.user).await?;
        self.apply_session(Some(token), Session::Authenticated(body.user.clone()))
            .await;
        Ok(body.user)
    }

    /// Sends a backend request. Token-scoped rejections are handled centrally
    /// here (cache clear + unauthenticated emission) because every caller
    /// needs the same behavior; other errors propagate to the caller.
    async fn execute<T: serde::de::DeserializeOwned>(
        &self,
        request: reqwest::RequestBuilder,
    ) -> Result<T> {
        let response = request.send().await.map_err(|err| {
            warn!("session: backend request failed: {err}");
            err
        })?;
        match decode_api_response(response).await {
            Ok(value) => Ok(value),
            Err(err) => {
                if ends_session(&err) {
                    warn!("session: token rejected by backend, clearing session: {err}");
                    self.store.clear().await?;
                    self.apply_session(None, Session::Unauthenticated).await;
                }
                Err(err)
            }
        }
    }

    async fn identity_failure(&self, err: anyhow::Error) -> anyhow::Error {
        let _ = self.events.send(SessionEvent::Notification(format!(
            "sign-in failed: {err}"
        )));
        SessionError::Identity(err.to_string()).into()
    }

    async fn apply_session(&self, token: Option<String>, session: Session) {
        let changed = {
            let mut inner = self.inner.lock().await;
            let changed = inner.session != session;
            inner.token = token;
            inner.session = session.clone();
            changed
        };
        if changed {
            let _ = self.events.send(SessionEvent::Changed(session));
        }
    }
}

#[cfg(test)]
#[path = "tests/session_tests.rs"]
mod tests;
