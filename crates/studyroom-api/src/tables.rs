use async_trait::async_trait;
use serde::de::IgnoredAny;
use tracing::debug;
use uuid::Uuid;

use studyroom_types::{Profile, ProfileUpdate, Room, RoomCode};

use crate::auth::BaasAuth;
use crate::error::ApiError;
use crate::http::{read_body, read_json};
use crate::ports::{ProfileStore, RoomStore};

pub const ROOMS_TABLE: &str = "rooms";
pub const USERS_TABLE: &str = "users";

/// Row access to the hosted backend's REST tables (`/rest/v1/{table}`).
#[derive(Clone)]
pub struct TableClient {
    baas: BaasAuth,
}

impl TableClient {
    pub fn new(baas: BaasAuth) -> Self {
        Self { baas }
    }

    fn table_url(&self, table: &str) -> String {
        self.baas.url(&format!("/rest/v1/{}", table))
    }
}

#[async_trait]
impl RoomStore for TableClient {
    async fn room_exists(&self, code: &RoomCode) -> Result<bool, ApiError> {
        let res = self
            .baas
            .authorize(self.baas.client().get(self.table_url(ROOMS_TABLE)))
            .query(&[("select", "room_id".to_string()), ("room_id", format!("eq.{}", code))])
            .send()
            .await?;
        let rows: Vec<IgnoredAny> = read_json(res).await?;
        debug!("Room lookup {} matched {} rows", code, rows.len());
        Ok(!rows.is_empty())
    }

    async fn insert_room(&self, room: &Room) -> Result<(), ApiError> {
        let res = self
            .baas
            .authorize(self.baas.client().post(self.table_url(ROOMS_TABLE)))
            .header("Prefer", "return=minimal")
            .json(&[room])
            .send()
            .await?;
        read_body(res).await?;
        Ok(())
    }
}

#[async_trait]
impl ProfileStore for TableClient {
    async fn fetch_profile(&self, id: Uuid) -> Result<Option<Profile>, ApiError> {
        let res = self
            .baas
            .authorize(self.baas.client().get(self.table_url(USERS_TABLE)))
            .query(&[("select", "*".to_string()), ("id", format!("eq.{}", id))])
            .send()
            .await?;
        let rows: Vec<Profile> = read_json(res).await?;
        Ok(rows.into_iter().next())
    }

    async fn update_profile(&self, id: Uuid, update: &ProfileUpdate) -> Result<Profile, ApiError> {
        if self.baas.access_token().is_none() {
            return Err(ApiError::Unauthenticated);
        }
        let res = self
            .baas
            .authorize(self.baas.client().patch(self.table_url(USERS_TABLE)))
            .query(&[("id", format!("eq.{}", id))])
            .header("Prefer", "return=representation")
            .json(update)
            .send()
            .await?;
        let rows: Vec<Profile> = read_json(res).await?;
        rows.into_iter()
            .next()
            .ok_or_else(|| ApiError::Rejected(format!("no profile row for {}", id)))
    }
}
