//! Resource traits consumed by the client. `ApiGateway` and the hosted-backend
//! adapters implement them; tests substitute in-memory fakes.

use async_trait::async_trait;
use uuid::Uuid;

use studyroom_types::api::{AuthSession, EndSessionResponse, SendMessageRequest};
use studyroom_types::{
    ChatMessage, HistoryEntry, Profile, ProfileUpdate, Room, RoomCode, SessionAnalysis,
    SessionStats, SessionSummary, SkillSignal,
};

use crate::error::ApiError;

#[async_trait]
pub trait ChatApi: Send + Sync {
    async fn chat_history(&self, room: &RoomCode) -> Result<Vec<ChatMessage>, ApiError>;
    async fn send_message(&self, req: &SendMessageRequest) -> Result<(), ApiError>;
    async fn clear_chat(&self, room: &RoomCode) -> Result<(), ApiError>;
}

#[async_trait]
pub trait SummaryApi: Send + Sync {
    async fn summary(&self, room: &RoomCode) -> Result<SessionSummary, ApiError>;
    async fn generate_summary(
        &self,
        room: &RoomCode,
        target_language: &str,
    ) -> Result<SessionAnalysis, ApiError>;
    async fn save_summary(&self, room: &RoomCode, analysis: &SessionAnalysis)
    -> Result<(), ApiError>;
}

#[async_trait]
pub trait AnalyticsApi: Send + Sync {
    async fn skill_signals(&self, room: &RoomCode) -> Result<Vec<SkillSignal>, ApiError>;
    async fn session_stats(&self, room: &RoomCode) -> Result<SessionStats, ApiError>;
    async fn engagement(&self, room: &RoomCode) -> Result<serde_json::Value, ApiError>;
}

#[async_trait]
pub trait HistoryApi: Send + Sync {
    async fn room_history(&self, room: &RoomCode) -> Result<Vec<HistoryEntry>, ApiError>;
    async fn user_history(&self, user: Uuid) -> Result<Vec<HistoryEntry>, ApiError>;
    async fn end_session(&self, room: &RoomCode) -> Result<EndSessionResponse, ApiError>;
}

#[async_trait]
pub trait AuthBackend: Send + Sync {
    /// `Ok(None)` when the account was created but still awaits email confirmation.
    async fn sign_up(&self, email: &str, password: &str) -> Result<Option<AuthSession>, ApiError>;
    async fn sign_in(&self, email: &str, password: &str) -> Result<AuthSession, ApiError>;
    async fn refresh(&self, refresh_token: &str) -> Result<AuthSession, ApiError>;
    async fn sign_out(&self) -> Result<(), ApiError>;
    /// Browser URL that starts a federated sign-in with `provider`.
    fn authorize_url(&self, provider: &str, redirect_to: Option<&str>) -> Result<String, ApiError>;
}

#[async_trait]
pub trait RoomStore: Send + Sync {
    async fn room_exists(&self, code: &RoomCode) -> Result<bool, ApiError>;
    async fn insert_room(&self, room: &Room) -> Result<(), ApiError>;
}

#[async_trait]
pub trait ProfileStore: Send + Sync {
    async fn fetch_profile(&self, id: Uuid) -> Result<Option<Profile>, ApiError>;
    async fn update_profile(&self, id: Uuid, update: &ProfileUpdate) -> Result<Profile, ApiError>;
}

#[async_trait]
pub trait AvatarStorage: Send + Sync {
    /// Store `bytes` at `path` and return the public URL it is served from.
    async fn upload_avatar(
        &self,
        path: &str,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> Result<String, ApiError>;
}
