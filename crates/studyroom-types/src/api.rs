use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{Identity, Role, RoomCode, SessionAnalysis, SkillSignal};

// -- Auth --

#[derive(Debug, Serialize)]
pub struct PasswordCredentials<'a> {
    pub email: &'a str,
    pub password: &'a str,
}

#[derive(Debug, Serialize)]
pub struct RefreshTokenRequest<'a> {
    pub refresh_token: &'a str,
}

/// Token grant returned by sign-in, sign-up (when confirmation is off) and refresh.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthSession {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub expires_in: Option<u64>,
    pub user: Identity,
}

// -- Chat --

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SendMessageRequest {
    pub session_id: RoomCode,
    pub user_id: Uuid,
    pub role: Role,
    pub content: String,
}

// -- Summary --

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerateSummaryRequest {
    pub session_id: RoomCode,
    pub target_language: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SaveSummaryRequest {
    pub session_id: RoomCode,
    pub analysis_data: SessionAnalysis,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuizRequest {
    pub session_id: RoomCode,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EndSessionRequest {
    pub room_id: RoomCode,
}

// -- Responses --

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SignalsResponse {
    #[serde(default)]
    pub signals: Option<Vec<SkillSignal>>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StatusResponse {
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EndSessionResponse {
    #[serde(default)]
    pub status: Option<String>,
    pub analysis: SessionAnalysis,
    #[serde(default)]
    pub archived: bool,
}
