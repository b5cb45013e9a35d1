use std::sync::Arc;

use anyhow::{Context, bail};
use tracing::{info, warn};

use studyroom_api::storage::PROFILE_BUCKET;
use studyroom_api::{ApiGateway, AuthClient, BaasAuth, RoomStore, StorageClient, TableClient};
use studyroom_client::{ProfileEditor, RoomController, RouteHistory, SessionProvider};
use studyroom_realtime::{Dispatcher, RealtimeClient, RealtimeSource};

use crate::config::{BaasConfig, Config};

/// Everything a command needs, built once from the configuration.
pub struct App {
    pub config: Config,
    pub gateway: Arc<ApiGateway>,
    pub session: SessionProvider,
    pub routes: Arc<RouteHistory>,
    baas: Option<BaasAuth>,
    tables: Option<Arc<TableClient>>,
}

impl App {
    pub async fn build(config: Config) -> anyhow::Result<Self> {
        let gateway = Arc::new(
            ApiGateway::new(&config.api_url, config.http_timeout)
                .context("failed to build API client")?,
        );

        let baas = match &config.baas {
            Some(BaasConfig { url, anon_key }) => Some(
                BaasAuth::new(url, anon_key, config.http_timeout)
                    .context("failed to build backend client")?,
            ),
            None => None,
        };

        let tables = baas.clone().map(|baas| Arc::new(TableClient::new(baas)));
        let session = match (&baas, &tables) {
            (Some(baas), Some(tables)) => {
                SessionProvider::new(Arc::new(AuthClient::new(baas.clone())), tables.clone())
            }
            _ => SessionProvider::unconfigured(),
        };
        session.initialize(config.refresh_token.as_deref()).await;

        Ok(Self {
            config,
            gateway,
            session,
            routes: Arc::new(RouteHistory::new()),
            baas,
            tables,
        })
    }

    /// Sign in when credentials were given on the command line.
    pub async fn sign_in(
        &self,
        email: Option<&str>,
        password: Option<&str>,
    ) -> anyhow::Result<()> {
        match (email, password) {
            (Some(email), Some(password)) => {
                self.session.sign_in(email, password).await?;
                Ok(())
            }
            (None, None) => Ok(()),
            _ => bail!("--email and --password must be given together"),
        }
    }

    pub fn require_identity(&self) -> anyhow::Result<()> {
        if self.session.identity().is_none() {
            bail!("this command needs --email and --password");
        }
        Ok(())
    }

    pub fn controller(&self) -> RoomController {
        RoomController::new(
            self.tables.clone().map(|tables| tables as Arc<dyn RoomStore>),
            self.gateway.clone(),
            self.session.clone(),
            self.routes.clone(),
            self.config.language.clone(),
        )
    }

    pub fn profile_editor(&self) -> anyhow::Result<ProfileEditor> {
        let Some(baas) = &self.baas else {
            bail!("avatar storage is not configured");
        };
        Ok(ProfileEditor::new(
            self.session.clone(),
            Arc::new(StorageClient::new(baas.clone(), PROFILE_BUCKET)),
        ))
    }

    /// Live row source: the backend's realtime socket, or a local hub that
    /// never receives anything when the backend is unavailable.
    pub async fn realtime(&self) -> Arc<dyn RealtimeSource> {
        let Some(baas) = &self.baas else {
            warn!("Live updates disabled: backend is not configured");
            return Arc::new(Dispatcher::new());
        };

        let token = self.session.access_token();
        match RealtimeClient::connect(baas.project_url(), baas.anon_key(), token).await {
            Ok(client) => {
                self.forward_tokens(client.clone());
                Arc::new(client)
            }
            Err(e) => {
                warn!("Live updates unavailable: {}", e);
                Arc::new(Dispatcher::new())
            }
        }
    }

    /// Keep the socket's channel authorization in step with the session.
    fn forward_tokens(&self, client: RealtimeClient) {
        let session = self.session.clone();
        let mut changes = session.subscribe();
        tokio::spawn(async move {
            while changes.changed().await.is_ok() {
                if !client.is_running() {
                    break;
                }
                client.set_access_token(session.access_token());
            }
            info!("Stopped forwarding session tokens to realtime");
        });
    }
}
