use std::sync::{Arc, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Url};
use tracing::{info, warn};

use studyroom_types::api::{AuthSession, PasswordCredentials, RefreshTokenRequest};

use crate::error::ApiError;
use crate::http::{read_body, read_json, trim_base};
use crate::ports::AuthBackend;

/// Project URL, public key and the current user's access token, shared by every
/// hosted-backend adapter so row-level policies see the signed-in user.
#[derive(Clone)]
pub struct BaasAuth {
    inner: Arc<BaasAuthInner>,
}

struct BaasAuthInner {
    project_url: String,
    anon_key: String,
    client: Client,
    access_token: RwLock<Option<String>>,
}

impl BaasAuth {
    pub fn new(project_url: &str, anon_key: &str, timeout: Duration) -> Result<Self, ApiError> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            inner: Arc::new(BaasAuthInner {
                project_url: trim_base(project_url),
                anon_key: anon_key.to_string(),
                client,
                access_token: RwLock::new(None),
            }),
        })
    }

    pub fn project_url(&self) -> &str {
        &self.inner.project_url
    }

    pub fn anon_key(&self) -> &str {
        &self.inner.anon_key
    }

    pub fn client(&self) -> &Client {
        &self.inner.client
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.inner.project_url, path)
    }

    pub fn access_token(&self) -> Option<String> {
        self.inner
            .access_token
            .read()
            .ok()
            .and_then(|token| token.clone())
    }

    pub fn set_access_token(&self, token: Option<String>) {
        match self.inner.access_token.write() {
            Ok(mut slot) => *slot = token,
            Err(e) => warn!("Access token lock poisoned: {}", e),
        }
    }

    /// Attach the project key and the user's bearer token, falling back to the
    /// public key when nobody is signed in.
    pub fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        let bearer = self
            .access_token()
            .unwrap_or_else(|| self.inner.anon_key.clone());
        request
            .header("apikey", &self.inner.anon_key)
            .bearer_auth(bearer)
    }
}

/// Identity operations against the hosted backend's auth service.
#[derive(Clone)]
pub struct AuthClient {
    baas: BaasAuth,
}

impl AuthClient {
    pub fn new(baas: BaasAuth) -> Self {
        Self { baas }
    }

    async fn token_grant<T: serde::Serialize + Sync>(
        &self,
        grant_type: &str,
        body: &T,
    ) -> Result<AuthSession, ApiError> {
        let url = self.baas.url(&format!("/auth/v1/token?grant_type={}", grant_type));
        let res = self
            .baas
            .authorize(self.baas.client().post(url))
            .json(body)
            .send()
            .await?;
        let session: AuthSession = read_json(res).await?;
        self.baas.set_access_token(Some(session.access_token.clone()));
        Ok(session)
    }
}

#[async_trait]
impl AuthBackend for AuthClient {
    async fn sign_up(&self, email: &str, password: &str) -> Result<Option<AuthSession>, ApiError> {
        let res = self
            .baas
            .authorize(self.baas.client().post(self.baas.url("/auth/v1/signup")))
            .json(&PasswordCredentials { email, password })
            .send()
            .await?;
        let body: serde_json::Value = read_json(res).await?;

        // With email confirmation on, the service answers with the bare user.
        if body.get("access_token").is_none() {
            info!("Sign-up for {} awaits email confirmation", email);
            return Ok(None);
        }
        let session: AuthSession = serde_json::from_value(body)?;
        self.baas.set_access_token(Some(session.access_token.clone()));
        Ok(Some(session))
    }

    async fn sign_in(&self, email: &str, password: &str) -> Result<AuthSession, ApiError> {
        self.token_grant("password", &PasswordCredentials { email, password })
            .await
    }

    async fn refresh(&self, refresh_token: &str) -> Result<AuthSession, ApiError> {
        self.token_grant("refresh_token", &RefreshTokenRequest { refresh_token })
            .await
    }

    async fn sign_out(&self) -> Result<(), ApiError> {
        if self.baas.access_token().is_none() {
            return Ok(());
        }
        let res = self
            .baas
            .authorize(self.baas.client().post(self.baas.url("/auth/v1/logout")))
            .send()
            .await;
        // The local token goes regardless; a dead server must not keep us signed in.
        self.baas.set_access_token(None);
        read_body(res?).await?;
        Ok(())
    }

    fn authorize_url(&self, provider: &str, redirect_to: Option<&str>) -> Result<String, ApiError> {
        let mut url = Url::parse(&self.baas.url("/auth/v1/authorize"))
            .map_err(|_| ApiError::NotConfigured("backend project URL"))?;
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("provider", provider);
            if let Some(redirect) = redirect_to {
                query.append_pair("redirect_to", redirect);
            }
        }
        Ok(url.into())
    }
}
