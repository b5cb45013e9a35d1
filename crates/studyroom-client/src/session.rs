use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::AbortHandle;
use tracing::{debug, info, warn};

use studyroom_api::{AuthBackend, ProfileStore};
use studyroom_types::api::AuthSession;
use studyroom_types::{Identity, Profile, ProfileUpdate};

use crate::error::SessionError;

/// Refresh this long before the access token expires.
const REFRESH_MARGIN: Duration = Duration::from_secs(60);

/// Wait before retrying a failed background refresh.
const REFRESH_RETRY: Duration = Duration::from_secs(30);

/// What every consumer of the session sees.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SessionState {
    pub identity: Option<Identity>,
    pub profile: Option<Profile>,
    /// False until the first session restore attempt finishes, successful or not.
    pub ready: bool,
}

/// Process-wide owner of the current identity and profile. Nothing else
/// writes them; consumers read snapshots or watch for changes.
#[derive(Clone)]
pub struct SessionProvider {
    inner: Arc<SessionInner>,
}

struct SessionInner {
    auth: Option<Arc<dyn AuthBackend>>,
    profiles: Option<Arc<dyn ProfileStore>>,
    state: watch::Sender<SessionState>,
    tokens: Mutex<Option<AuthSession>>,
    /// Background task renewing the access token while someone is signed in.
    refresher: Mutex<Option<AbortHandle>>,
}

impl Drop for SessionInner {
    fn drop(&mut self) {
        let refresher = self.refresher.get_mut().unwrap_or_else(PoisonError::into_inner);
        if let Some(task) = refresher.take() {
            task.abort();
        }
    }
}

impl SessionProvider {
    pub fn new(auth: Arc<dyn AuthBackend>, profiles: Arc<dyn ProfileStore>) -> Self {
        Self::build(Some(auth), Some(profiles))
    }

    /// Provider for a process without backend credentials: ready, signed out,
    /// and every operation fails with [`SessionError::NotConfigured`].
    pub fn unconfigured() -> Self {
        let provider = Self::build(None, None);
        provider.publish(None, None);
        provider
    }

    fn build(auth: Option<Arc<dyn AuthBackend>>, profiles: Option<Arc<dyn ProfileStore>>) -> Self {
        let (state, _) = watch::channel(SessionState::default());
        Self {
            inner: Arc::new(SessionInner {
                auth,
                profiles,
                state,
                tokens: Mutex::new(None),
                refresher: Mutex::new(None),
            }),
        }
    }

    fn auth(&self) -> Result<&Arc<dyn AuthBackend>, SessionError> {
        self.inner.auth.as_ref().ok_or(SessionError::NotConfigured)
    }

    fn publish(&self, identity: Option<Identity>, profile: Option<Profile>) {
        self.inner.state.send_replace(SessionState {
            identity,
            profile,
            ready: true,
        });
    }

    fn store_tokens(&self, session: Option<AuthSession>) {
        *self.tokens() = session;
    }

    fn tokens(&self) -> MutexGuard<'_, Option<AuthSession>> {
        self.inner.tokens.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn refresher(&self) -> MutexGuard<'_, Option<AbortHandle>> {
        self.inner.refresher.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// (Re)start the background refresh for the tokens just stored.
    fn start_refresh(&self) {
        let task = tokio::spawn(refresh_loop(Arc::downgrade(&self.inner)));
        if let Some(old) = self.refresher().replace(task.abort_handle()) {
            old.abort();
        }
    }

    fn stop_refresh(&self) {
        if let Some(task) = self.refresher().take() {
            task.abort();
        }
    }

    /// Time until the held access token should be renewed. `None` when the
    /// grant carried no lifetime or there is nothing to refresh with.
    fn refresh_due(&self) -> Option<Duration> {
        let tokens = self.tokens();
        let session = tokens.as_ref()?;
        session.refresh_token.as_ref()?;
        let lifetime = Duration::from_secs(session.expires_in?);
        Some(lifetime.saturating_sub(REFRESH_MARGIN).max(Duration::from_secs(1)))
    }

    /// Publish the session's identity, then load its profile.
    async fn adopt(&self, session: AuthSession) -> Identity {
        let identity = session.user.clone();
        self.store_tokens(Some(session));
        self.start_refresh();
        self.publish(Some(identity.clone()), None);
        self.load_profile(&identity).await;
        identity
    }

    async fn load_profile(&self, identity: &Identity) {
        let Some(profiles) = &self.inner.profiles else {
            return;
        };
        match profiles.fetch_profile(identity.id).await {
            Ok(profile) => {
                // Another sign-in or sign-out may have happened meanwhile.
                self.inner.state.send_if_modified(|state| {
                    if state.identity.as_ref().map(|i| i.id) != Some(identity.id) {
                        return false;
                    }
                    state.profile = profile;
                    true
                });
            }
            Err(e) => warn!("Failed to load profile for {}: {}", identity.id, e),
        }
    }

    /// Restore a previous session from its refresh token. Always ends ready,
    /// signed out if there was nothing to restore or the restore failed.
    pub async fn initialize(&self, refresh_token: Option<&str>) {
        let restored = match (self.inner.auth.as_ref(), refresh_token) {
            (Some(auth), Some(token)) => match auth.refresh(token).await {
                Ok(session) => Some(session),
                Err(e) => {
                    warn!("Failed to restore session: {}", e);
                    None
                }
            },
            _ => None,
        };

        match restored {
            Some(session) => {
                let identity = self.adopt(session).await;
                info!("Restored session for {}", identity.id);
            }
            None => self.publish(None, None),
        }
    }

    /// Create an account. `Ok(None)` when the backend wants the email confirmed
    /// first; nobody is signed in then.
    pub async fn sign_up(
        &self,
        email: &str,
        password: &str,
    ) -> Result<Option<Identity>, SessionError> {
        let (email, password) = validate_credentials(email, password)?;
        match self.auth()?.sign_up(email, password).await? {
            Some(session) => Ok(Some(self.adopt(session).await)),
            None => Ok(None),
        }
    }

    pub async fn sign_in(&self, email: &str, password: &str) -> Result<Identity, SessionError> {
        let (email, password) = validate_credentials(email, password)?;
        let session = self.auth()?.sign_in(email, password).await?;
        let identity = self.adopt(session).await;
        info!("Signed in as {}", identity.id);
        Ok(identity)
    }

    /// URL to open in a browser for a federated sign-in.
    pub fn sign_in_with_provider(
        &self,
        provider: &str,
        redirect_to: Option<&str>,
    ) -> Result<String, SessionError> {
        Ok(self.auth()?.authorize_url(provider, redirect_to)?)
    }

    /// Sign out locally no matter what the backend answers.
    pub async fn sign_out(&self) -> Result<(), SessionError> {
        let result = match self.inner.auth.as_ref() {
            Some(auth) => auth.sign_out().await,
            None => Ok(()),
        };
        self.stop_refresh();
        self.store_tokens(None);
        self.publish(None, None);
        info!("Signed out");
        result.map_err(SessionError::from)
    }

    /// Exchange the held refresh token for a new access token. Runs on its
    /// own shortly before each token expires.
    pub async fn refresh(&self) -> Result<(), SessionError> {
        let refresh_token = self.refresh_token().ok_or(SessionError::NotSignedIn)?;

        let session = self.auth()?.refresh(&refresh_token).await?;
        let identity = session.user.clone();
        self.store_tokens(Some(session));
        // Same user: keep the loaded profile, but still notify so token holders re-read.
        let profile = self.profile().filter(|p| p.id == identity.id);
        self.publish(Some(identity), profile);
        Ok(())
    }

    pub async fn update_profile(&self, update: ProfileUpdate) -> Result<Profile, SessionError> {
        let identity = self.identity().ok_or(SessionError::NotSignedIn)?;
        let profiles = self
            .inner
            .profiles
            .as_ref()
            .ok_or(SessionError::NotConfigured)?;
        if update.is_empty() {
            return Err(SessionError::InvalidInput("nothing to update"));
        }

        let profile = profiles.update_profile(identity.id, &update).await?;
        self.inner.state.send_modify(|state| {
            if state.identity.as_ref().map(|i| i.id) == Some(identity.id) {
                state.profile = Some(profile.clone());
            }
        });
        Ok(profile)
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.inner.state.subscribe()
    }

    pub fn state(&self) -> SessionState {
        self.inner.state.borrow().clone()
    }

    pub fn identity(&self) -> Option<Identity> {
        self.inner.state.borrow().identity.clone()
    }

    pub fn profile(&self) -> Option<Profile> {
        self.inner.state.borrow().profile.clone()
    }

    pub fn access_token(&self) -> Option<String> {
        self.tokens()
            .as_ref()
            .map(|session| session.access_token.clone())
    }

    pub fn refresh_token(&self) -> Option<String> {
        self.tokens()
            .as_ref()
            .and_then(|session| session.refresh_token.clone())
    }
}

/// Renews the access token ahead of expiry until sign-out or until the
/// provider is dropped. Holds only a weak reference between rounds.
async fn refresh_loop(inner: Weak<SessionInner>) {
    let mut retrying = false;
    loop {
        let delay = {
            let Some(inner) = inner.upgrade() else { return };
            let provider = SessionProvider { inner };
            match (retrying, provider.refresh_due()) {
                (_, None) => return,
                (true, Some(_)) => REFRESH_RETRY,
                (false, Some(due)) => due,
            }
        };
        tokio::time::sleep(delay).await;

        let Some(inner) = inner.upgrade() else { return };
        let provider = SessionProvider { inner };
        match provider.refresh().await {
            Ok(()) => {
                debug!("Access token refreshed");
                retrying = false;
            }
            Err(SessionError::NotSignedIn) => return,
            Err(e) => {
                warn!("Background token refresh failed: {}", e);
                retrying = true;
            }
        }
    }
}

fn validate_credentials<'a>(
    email: &'a str,
    password: &'a str,
) -> Result<(&'a str, &'a str), SessionError> {
    let email = email.trim();
    if email.is_empty() {
        return Err(SessionError::InvalidInput("email is required"));
    }
    if password.is_empty() {
        return Err(SessionError::InvalidInput("password is required"));
    }
    Ok((email, password))
}
