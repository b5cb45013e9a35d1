//! In-memory stand-ins for the remote services. Each records the calls it
//! receives so tests can assert on what was (or was not) sent.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Value, json};
use tokio::sync::oneshot;
use uuid::Uuid;

use studyroom_api::{
    AnalyticsApi, ApiError, AuthBackend, AvatarStorage, ChatApi, HistoryApi, ProfileStore,
    RoomStore, SummaryApi,
};
use studyroom_types::api::{AuthSession, EndSessionResponse, SendMessageRequest};
use studyroom_types::{
    ChatMessage, HistoryEntry, Identity, Profile, ProfileUpdate, RecentAvatars, Role, Room,
    RoomCode, SessionAnalysis, SessionStats, SessionSummary, SkillLevel, SkillSignal,
};

pub fn room(code: &str) -> RoomCode {
    RoomCode::parse(code).unwrap()
}

pub fn user(n: u128) -> Uuid {
    Uuid::from_u128(n)
}

pub fn message(content: &str) -> ChatMessage {
    ChatMessage {
        id: None,
        room_id: None,
        user_id: None,
        role: Role::User,
        content: content.to_string(),
        created_at: None,
    }
}

/// Poll `condition` until it holds, yielding to spawned tasks in between.
pub async fn eventually(condition: impl Fn() -> bool) {
    for _ in 0..400 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("condition not reached in time");
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap()
}

fn failure() -> ApiError {
    ApiError::Status {
        status: 500,
        body: "boom".into(),
    }
}

/// Call log plus a one-shot failure switch.
#[derive(Default)]
struct Recorder {
    calls: Mutex<Vec<String>>,
    fail_next: AtomicBool,
}

impl Recorder {
    fn record(&self, call: String) -> Result<(), ApiError> {
        lock(&self.calls).push(call);
        if self.fail_next.swap(false, Ordering::SeqCst) {
            return Err(failure());
        }
        Ok(())
    }

    fn calls(&self) -> Vec<String> {
        lock(&self.calls).clone()
    }

    fn fail_next(&self) {
        self.fail_next.store(true, Ordering::SeqCst);
    }
}

/// Parks the next gated call until the returned sender fires (or is dropped).
#[derive(Default)]
struct Gate(Mutex<Option<oneshot::Receiver<()>>>);

impl Gate {
    fn hold(&self) -> oneshot::Sender<()> {
        let (tx, rx) = oneshot::channel();
        *lock(&self.0) = Some(rx);
        tx
    }

    async fn pass(&self) {
        let rx = lock(&self.0).take();
        if let Some(rx) = rx {
            let _ = rx.await;
        }
    }
}

// -- Chat --

#[derive(Default)]
pub struct FakeChat {
    history: Mutex<Vec<ChatMessage>>,
    gate: Gate,
    clear_gate: Gate,
    history_calls: AtomicU64,
    clear_calls: AtomicU64,
    fail_history: AtomicBool,
    fail_send: AtomicBool,
    fail_clear: AtomicBool,
    sent: Mutex<Vec<SendMessageRequest>>,
    cleared: Mutex<Vec<RoomCode>>,
}

impl FakeChat {
    pub fn set_history(&self, history: Vec<ChatMessage>) {
        *lock(&self.history) = history;
    }

    pub fn hold_history(&self) -> oneshot::Sender<()> {
        self.gate.hold()
    }

    pub fn hold_clear(&self) -> oneshot::Sender<()> {
        self.clear_gate.hold()
    }

    pub fn fail_history(&self) {
        self.fail_history.store(true, Ordering::SeqCst);
    }

    pub fn fail_send(&self) {
        self.fail_send.store(true, Ordering::SeqCst);
    }

    pub fn fail_clear(&self) {
        self.fail_clear.store(true, Ordering::SeqCst);
    }

    pub fn sent(&self) -> Vec<SendMessageRequest> {
        lock(&self.sent).clone()
    }

    pub fn cleared(&self) -> Vec<RoomCode> {
        lock(&self.cleared).clone()
    }

    pub fn history_calls(&self) -> u64 {
        self.history_calls.load(Ordering::SeqCst)
    }

    pub fn clear_calls(&self) -> u64 {
        self.clear_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ChatApi for FakeChat {
    async fn chat_history(&self, _room: &RoomCode) -> Result<Vec<ChatMessage>, ApiError> {
        self.history_calls.fetch_add(1, Ordering::SeqCst);
        self.gate.pass().await;
        if self.fail_history.load(Ordering::SeqCst) {
            return Err(failure());
        }
        Ok(lock(&self.history).clone())
    }

    async fn send_message(&self, req: &SendMessageRequest) -> Result<(), ApiError> {
        if self.fail_send.load(Ordering::SeqCst) {
            return Err(failure());
        }
        lock(&self.sent).push(req.clone());
        Ok(())
    }

    async fn clear_chat(&self, room: &RoomCode) -> Result<(), ApiError> {
        self.clear_calls.fetch_add(1, Ordering::SeqCst);
        self.clear_gate.pass().await;
        if self.fail_clear.load(Ordering::SeqCst) {
            return Err(failure());
        }
        lock(&self.cleared).push(room.clone());
        Ok(())
    }
}

// -- Summaries --

#[derive(Default)]
pub struct FakeSummaries {
    recorder: Recorder,
    summary: Mutex<SessionSummary>,
    analysis: Mutex<Option<Value>>,
    gate: Gate,
    fail_generate: AtomicBool,
    fail_save: AtomicBool,
}

impl FakeSummaries {
    pub fn calls(&self) -> Vec<String> {
        self.recorder.calls()
    }

    pub fn set_summary(&self, text: &str, key_points: &[&str]) {
        *lock(&self.summary) = SessionSummary {
            summary_text: Some(text.to_string()),
            key_points: key_points.iter().map(|p| p.to_string()).collect(),
            suggested_topics: Vec::new(),
        };
    }

    pub fn set_analysis(&self, analysis: Value) {
        *lock(&self.analysis) = Some(analysis);
    }

    pub fn hold_generate(&self) -> oneshot::Sender<()> {
        self.gate.hold()
    }

    pub fn fail_generate(&self) {
        self.fail_generate.store(true, Ordering::SeqCst);
    }

    /// Fails the next save only.
    pub fn fail_save(&self) {
        self.fail_save.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl SummaryApi for FakeSummaries {
    async fn summary(&self, room: &RoomCode) -> Result<SessionSummary, ApiError> {
        self.recorder.record(format!("summary {room}"))?;
        Ok(lock(&self.summary).clone())
    }

    async fn generate_summary(
        &self,
        room: &RoomCode,
        target_language: &str,
    ) -> Result<SessionAnalysis, ApiError> {
        self.recorder
            .record(format!("generate {room} {target_language}"))?;
        self.gate.pass().await;
        if self.fail_generate.load(Ordering::SeqCst) {
            return Err(failure());
        }
        let analysis = lock(&self.analysis)
            .clone()
            .unwrap_or_else(|| json!({"summary_text": format!("Notes for {room}")}));
        Ok(SessionAnalysis(analysis))
    }

    async fn save_summary(
        &self,
        room: &RoomCode,
        _analysis: &SessionAnalysis,
    ) -> Result<(), ApiError> {
        self.recorder.record(format!("save {room}"))?;
        if self.fail_save.swap(false, Ordering::SeqCst) {
            return Err(failure());
        }
        Ok(())
    }
}

// -- Analytics --

#[derive(Default)]
pub struct FakeAnalytics {
    recorder: Recorder,
    signals: Mutex<Vec<SkillSignal>>,
    gate: Gate,
}

impl FakeAnalytics {
    pub fn calls(&self) -> Vec<String> {
        self.recorder.calls()
    }

    pub fn set_signals(&self, signals: &[(&str, i64)]) {
        *lock(&self.signals) = signals
            .iter()
            .map(|(name, level)| SkillSignal {
                name: name.to_string(),
                level: SkillLevel::new(*level),
            })
            .collect();
    }

    pub fn fail_next(&self) {
        self.recorder.fail_next();
    }

    /// Parks the next skill-signal fetch.
    pub fn hold(&self) -> oneshot::Sender<()> {
        self.gate.hold()
    }
}

#[async_trait]
impl AnalyticsApi for FakeAnalytics {
    async fn skill_signals(&self, room: &RoomCode) -> Result<Vec<SkillSignal>, ApiError> {
        self.recorder.record(format!("signals {room}"))?;
        self.gate.pass().await;
        Ok(lock(&self.signals).clone())
    }

    async fn session_stats(&self, room: &RoomCode) -> Result<SessionStats, ApiError> {
        self.recorder.record(format!("stats {room}"))?;
        Ok(SessionStats {
            message_count: 12,
            user_message_count: 8,
            insight_count: 4,
            duration_mins: 30,
        })
    }

    async fn engagement(&self, room: &RoomCode) -> Result<Value, ApiError> {
        self.recorder.record(format!("engagement {room}"))?;
        Ok(json!({"participants": 2}))
    }
}

// -- History --

#[derive(Default)]
pub struct FakeHistory {
    entries: Mutex<Vec<HistoryEntry>>,
    user_requests: Mutex<Vec<Uuid>>,
}

impl FakeHistory {
    pub fn add_entry(&self, id: &str, topic: &str) {
        lock(&self.entries).push(HistoryEntry {
            id: id.to_string(),
            room_id: None,
            created_at: None,
            topic: Some(topic.to_string()),
            summary_data: Value::Null,
        });
    }

    pub fn user_requests(&self) -> Vec<Uuid> {
        lock(&self.user_requests).clone()
    }
}

#[async_trait]
impl HistoryApi for FakeHistory {
    async fn room_history(&self, _room: &RoomCode) -> Result<Vec<HistoryEntry>, ApiError> {
        Ok(lock(&self.entries).clone())
    }

    async fn user_history(&self, user: Uuid) -> Result<Vec<HistoryEntry>, ApiError> {
        lock(&self.user_requests).push(user);
        Ok(lock(&self.entries).clone())
    }

    async fn end_session(&self, _room: &RoomCode) -> Result<EndSessionResponse, ApiError> {
        Ok(EndSessionResponse {
            status: Some("success".into()),
            analysis: SessionAnalysis(Value::Null),
            archived: true,
        })
    }
}

// -- Identity / profiles --

/// Every grant signs in `user(1)`; tokens are numbered by grant.
#[derive(Default)]
pub struct FakeAuth {
    recorder: Recorder,
    grants: AtomicU64,
}

impl FakeAuth {
    pub fn calls(&self) -> Vec<String> {
        self.recorder.calls()
    }

    pub fn fail_next(&self) {
        self.recorder.fail_next();
    }

    fn grant(&self, email: Option<&str>) -> AuthSession {
        let n = self.grants.fetch_add(1, Ordering::SeqCst) + 1;
        AuthSession {
            access_token: format!("token-{n}"),
            refresh_token: Some(format!("refresh-{n}")),
            expires_in: Some(3600),
            user: Identity {
                id: user(1),
                email: email.map(str::to_string),
            },
        }
    }
}

#[async_trait]
impl AuthBackend for FakeAuth {
    async fn sign_up(
        &self,
        email: &str,
        _password: &str,
    ) -> Result<Option<AuthSession>, ApiError> {
        self.recorder.record(format!("sign_up {email}"))?;
        Ok(Some(self.grant(Some(email))))
    }

    async fn sign_in(&self, email: &str, _password: &str) -> Result<AuthSession, ApiError> {
        self.recorder.record(format!("sign_in {email}"))?;
        Ok(self.grant(Some(email)))
    }

    async fn refresh(&self, refresh_token: &str) -> Result<AuthSession, ApiError> {
        self.recorder.record(format!("refresh {refresh_token}"))?;
        Ok(self.grant(None))
    }

    async fn sign_out(&self) -> Result<(), ApiError> {
        self.recorder.record("sign_out".into())
    }

    fn authorize_url(
        &self,
        provider: &str,
        _redirect_to: Option<&str>,
    ) -> Result<String, ApiError> {
        Ok(format!("https://auth.test/authorize?provider={provider}"))
    }
}

#[derive(Default)]
pub struct FakeProfiles {
    recorder: Recorder,
    profiles: Mutex<HashMap<Uuid, Profile>>,
}

impl FakeProfiles {
    pub fn calls(&self) -> Vec<String> {
        self.recorder.calls()
    }

    pub fn fail_next(&self) {
        self.recorder.fail_next();
    }

    pub fn insert(&self, id: Uuid, name: &str) {
        lock(&self.profiles).insert(
            id,
            Profile {
                id,
                display_name: Some(name.to_string()),
                avatar_url: None,
                avatars: RecentAvatars::default(),
            },
        );
    }

    pub fn set_avatars(&self, id: Uuid, avatars: RecentAvatars) {
        if let Some(profile) = lock(&self.profiles).get_mut(&id) {
            profile.avatar_url = avatars.head().map(str::to_string);
            profile.avatars = avatars;
        }
    }
}

#[async_trait]
impl ProfileStore for FakeProfiles {
    async fn fetch_profile(&self, id: Uuid) -> Result<Option<Profile>, ApiError> {
        self.recorder.record(format!("fetch {id}"))?;
        Ok(lock(&self.profiles).get(&id).cloned())
    }

    async fn update_profile(&self, id: Uuid, update: &ProfileUpdate) -> Result<Profile, ApiError> {
        self.recorder.record(format!("update {id}"))?;
        let mut profiles = lock(&self.profiles);
        let profile = profiles.entry(id).or_insert_with(|| Profile {
            id,
            display_name: None,
            avatar_url: None,
            avatars: RecentAvatars::default(),
        });
        if let Some(name) = &update.display_name {
            profile.display_name = Some(name.clone());
        }
        if let Some(url) = &update.avatar_url {
            profile.avatar_url = Some(url.clone());
        }
        if let Some(avatars) = &update.avatars {
            profile.avatars = avatars.clone();
        }
        Ok(profile.clone())
    }
}

#[derive(Default)]
pub struct FakeStorage {
    uploads: Mutex<Vec<(String, String)>>,
}

impl FakeStorage {
    /// `(path, content type)` per upload.
    pub fn uploads(&self) -> Vec<(String, String)> {
        lock(&self.uploads).clone()
    }
}

#[async_trait]
impl AvatarStorage for FakeStorage {
    async fn upload_avatar(
        &self,
        path: &str,
        _bytes: Vec<u8>,
        content_type: &str,
    ) -> Result<String, ApiError> {
        lock(&self.uploads).push((path.to_string(), content_type.to_string()));
        Ok(format!("https://cdn.test/{path}"))
    }
}

// -- Rooms --

#[derive(Default)]
pub struct FakeRooms {
    recorder: Recorder,
    existing: Mutex<HashSet<RoomCode>>,
    lookups: Mutex<Vec<RoomCode>>,
    inserted: Mutex<Vec<Room>>,
}

impl FakeRooms {
    pub fn add(&self, code: RoomCode) {
        lock(&self.existing).insert(code);
    }

    pub fn fail_next(&self) {
        self.recorder.fail_next();
    }

    pub fn lookups(&self) -> Vec<RoomCode> {
        lock(&self.lookups).clone()
    }

    pub fn inserted(&self) -> Vec<Room> {
        lock(&self.inserted).clone()
    }
}

#[async_trait]
impl RoomStore for FakeRooms {
    async fn room_exists(&self, code: &RoomCode) -> Result<bool, ApiError> {
        lock(&self.lookups).push(code.clone());
        self.recorder.record(format!("exists {code}"))?;
        Ok(lock(&self.existing).contains(code))
    }

    async fn insert_room(&self, room: &Room) -> Result<(), ApiError> {
        self.recorder.record(format!("insert {}", room.room_id))?;
        lock(&self.inserted).push(room.clone());
        Ok(())
    }
}
