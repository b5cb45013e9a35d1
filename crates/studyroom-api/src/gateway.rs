use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use tracing::debug;
use uuid::Uuid;

use studyroom_types::api::{
    EndSessionRequest, EndSessionResponse, GenerateSummaryRequest, QuizRequest,
    SaveSummaryRequest, SendMessageRequest, SignalsResponse, StatusResponse,
};
use studyroom_types::{
    ChatMessage, HistoryEntry, RoomCode, SessionAnalysis, SessionStats, SessionSummary,
    SkillSignal,
};

use crate::error::ApiError;
use crate::http::{read_body, read_json, read_json_or_default, trim_base};
use crate::ports::{AnalyticsApi, ChatApi, HistoryApi, SummaryApi};

/// Header carrying the caller's identity on `/history/user`.
pub const USER_ID_HEADER: &str = "X-User-Id";

/// The single HTTP client every panel routes its reads and writes through.
#[derive(Clone)]
pub struct ApiGateway {
    client: Client,
    base_url: String,
}

impl ApiGateway {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, ApiError> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self::with_client(client, base_url))
    }

    pub fn with_client(client: Client, base_url: &str) -> Self {
        Self {
            client,
            base_url: trim_base(base_url),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Assessment material (questions, flashcards) for a room's discussion.
    pub async fn generate_quiz(&self, room: &RoomCode) -> Result<serde_json::Value, ApiError> {
        let res = self
            .client
            .post(self.url("/quiz/generate"))
            .json(&QuizRequest {
                session_id: room.clone(),
            })
            .send()
            .await?;
        read_json(res).await
    }
}

#[async_trait]
impl ChatApi for ApiGateway {
    async fn chat_history(&self, room: &RoomCode) -> Result<Vec<ChatMessage>, ApiError> {
        let res = self
            .client
            .get(self.url(&format!("/chat/history/{}", room)))
            .send()
            .await?;
        read_json_or_default(res).await
    }

    async fn send_message(&self, req: &SendMessageRequest) -> Result<(), ApiError> {
        let res = self.client.post(self.url("/chat/send")).json(req).send().await?;
        read_body(res).await?;
        debug!("Sent message to room {}", req.session_id);
        Ok(())
    }

    async fn clear_chat(&self, room: &RoomCode) -> Result<(), ApiError> {
        let res = self
            .client
            .delete(self.url(&format!("/chat/clear/{}", room)))
            .send()
            .await?;
        let status: StatusResponse = read_json_or_default(res).await?;
        match status.status.as_deref() {
            Some("success") | None => Ok(()),
            Some(other) => Err(ApiError::Rejected(
                status.message.unwrap_or_else(|| format!("clear returned status {other}")),
            )),
        }
    }
}

#[async_trait]
impl SummaryApi for ApiGateway {
    async fn summary(&self, room: &RoomCode) -> Result<SessionSummary, ApiError> {
        let res = self
            .client
            .get(self.url(&format!("/summary/{}", room)))
            .send()
            .await?;
        read_json_or_default(res).await
    }

    async fn generate_summary(
        &self,
        room: &RoomCode,
        target_language: &str,
    ) -> Result<SessionAnalysis, ApiError> {
        let res = self
            .client
            .post(self.url("/summary/generate"))
            .json(&GenerateSummaryRequest {
                session_id: room.clone(),
                target_language: target_language.to_string(),
            })
            .send()
            .await?;
        let analysis: SessionAnalysis = read_json(res).await?;
        if let Some(reason) = analysis.error() {
            return Err(ApiError::Rejected(reason.to_string()));
        }
        Ok(analysis)
    }

    async fn save_summary(
        &self,
        room: &RoomCode,
        analysis: &SessionAnalysis,
    ) -> Result<(), ApiError> {
        let res = self
            .client
            .post(self.url("/summary/save"))
            .json(&SaveSummaryRequest {
                session_id: room.clone(),
                analysis_data: analysis.clone(),
            })
            .send()
            .await?;
        read_body(res).await?;
        Ok(())
    }
}

#[async_trait]
impl AnalyticsApi for ApiGateway {
    async fn skill_signals(&self, room: &RoomCode) -> Result<Vec<SkillSignal>, ApiError> {
        let res = self
            .client
            .get(self.url(&format!("/analytics/signals/{}", room)))
            .send()
            .await?;
        let body: SignalsResponse = read_json_or_default(res).await?;
        Ok(body.signals.unwrap_or_default())
    }

    async fn session_stats(&self, room: &RoomCode) -> Result<SessionStats, ApiError> {
        let res = self
            .client
            .get(self.url(&format!("/analytics/stats/{}", room)))
            .send()
            .await?;
        read_json_or_default(res).await
    }

    async fn engagement(&self, room: &RoomCode) -> Result<serde_json::Value, ApiError> {
        let res = self
            .client
            .get(self.url(&format!("/analytics/engagement/{}", room)))
            .send()
            .await?;
        read_json_or_default(res).await
    }
}

#[async_trait]
impl HistoryApi for ApiGateway {
    async fn room_history(&self, room: &RoomCode) -> Result<Vec<HistoryEntry>, ApiError> {
        let res = self
            .client
            .get(self.url(&format!("/history/sessions/{}", room)))
            .send()
            .await?;
        read_json_or_default(res).await
    }

    async fn user_history(&self, user: Uuid) -> Result<Vec<HistoryEntry>, ApiError> {
        let res = self
            .client
            .get(self.url("/history/user"))
            .header(USER_ID_HEADER, user.to_string())
            .send()
            .await?;
        read_json_or_default(res).await
    }

    async fn end_session(&self, room: &RoomCode) -> Result<EndSessionResponse, ApiError> {
        let res = self
            .client
            .post(self.url("/history/end"))
            .json(&EndSessionRequest {
                room_id: room.clone(),
            })
            .send()
            .await?;
        read_json(res).await
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use axum::extract::{Path, State};
    use axum::http::{HeaderMap, StatusCode};
    use axum::routing::{delete, get, post};
    use axum::{Json, Router};
    use serde_json::{Value, json};

    use super::*;

    type Seen = Arc<Mutex<Vec<String>>>;

    async fn serve(router: Router) -> ApiGateway {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        ApiGateway::new(&format!("http://{addr}/api/v1/"), Duration::from_secs(5)).unwrap()
    }

    fn room(code: &str) -> RoomCode {
        RoomCode::parse(code).unwrap()
    }

    #[tokio::test]
    async fn history_decodes_messages_and_null_body() {
        let router = Router::new().route(
            "/api/v1/chat/history/{room}",
            get(|Path(room): Path<String>| async move {
                if room == "EMPTY1" {
                    return Json(Value::Null);
                }
                Json(json!([
                    {"room_id": room, "user_id": null, "role": "assistant", "content": "hi"},
                    {"room_id": room, "user_id": null, "role": "user", "content": "hello"},
                ]))
            }),
        );
        let api = serve(router).await;

        let messages = api.chat_history(&room("ABC123")).await.unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].content, "hi");
        assert!(api.chat_history(&room("EMPTY1")).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn send_posts_wire_body() {
        let seen: Seen = Arc::default();
        let router = Router::new()
            .route(
                "/api/v1/chat/send",
                post(|State(seen): State<Seen>, Json(body): Json<Value>| async move {
                    seen.lock().unwrap().push(body.to_string());
                    Json(json!({"ok": true}))
                }),
            )
            .with_state(seen.clone());
        let api = serve(router).await;

        let user = Uuid::new_v4();
        api.send_message(&SendMessageRequest {
            session_id: room("ABC123"),
            user_id: user,
            role: studyroom_types::Role::User,
            content: "question".into(),
        })
        .await
        .unwrap();

        let bodies = seen.lock().unwrap();
        let body: Value = serde_json::from_str(&bodies[0]).unwrap();
        assert_eq!(body["session_id"], "ABC123");
        assert_eq!(body["role"], "user");
        assert_eq!(body["user_id"], user.to_string());
    }

    #[tokio::test]
    async fn server_errors_surface_as_status() {
        let router = Router::new().route(
            "/api/v1/chat/clear/{room}",
            delete(|| async { (StatusCode::INTERNAL_SERVER_ERROR, "boom") }),
        );
        let api = serve(router).await;

        let err = api.clear_chat(&room("ABC123")).await.unwrap_err();
        assert!(matches!(err, ApiError::Status { status: 500, ref body } if body == "boom"));
    }

    #[tokio::test]
    async fn generate_with_error_payload_is_rejected() {
        let router = Router::new().route(
            "/api/v1/summary/generate",
            post(|| async { Json(json!({"error": "No messages found for this session"})) }),
        );
        let api = serve(router).await;

        let err = api.generate_summary(&room("ABC123"), "English").await.unwrap_err();
        assert!(matches!(err, ApiError::Rejected(ref reason) if reason.contains("No messages")));
    }

    #[tokio::test]
    async fn signals_unwrap_envelope() {
        let router = Router::new().route(
            "/api/v1/analytics/signals/{room}",
            get(|| async {
                Json(json!({"signals": [
                    {"name": "Critical Thinking", "level": 3},
                    {"name": "Research", "level": 2},
                ]}))
            }),
        );
        let api = serve(router).await;

        let signals = api.skill_signals(&room("ABC123")).await.unwrap();
        assert_eq!(signals.len(), 2);
        assert_eq!(signals[0].level.get(), 3);
    }

    #[tokio::test]
    async fn user_history_carries_identity_header() {
        let seen: Seen = Arc::default();
        let router = Router::new()
            .route(
                "/api/v1/history/user",
                get(|State(seen): State<Seen>, headers: HeaderMap| async move {
                    let id = headers
                        .get(USER_ID_HEADER)
                        .and_then(|v| v.to_str().ok())
                        .unwrap_or_default()
                        .to_string();
                    seen.lock().unwrap().push(id);
                    Json(json!([{"id": "h1", "topic": "Graphs"}]))
                }),
            )
            .with_state(seen.clone());
        let api = serve(router).await;

        let user = Uuid::new_v4();
        let entries = api.user_history(user).await.unwrap();
        assert_eq!(entries[0].topic(), "Graphs");
        assert_eq!(seen.lock().unwrap()[0], user.to_string());
    }
}
