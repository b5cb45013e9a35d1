use std::fmt;

use chrono::{DateTime, Utc};
use rand::Rng;
use rand::distr::Alphanumeric;
use serde::{Deserialize, Deserializer, Serialize};
use uuid::Uuid;

/// Length of a freshly generated room code.
pub const ROOM_CODE_LEN: usize = 6;

/// How many previously used avatars a profile keeps around for quick swapping.
pub const MAX_RECENT_AVATARS: usize = 5;

// -- Rooms --

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RoomCodeError {
    #[error("room code is empty")]
    Empty,
    #[error("room code may only contain letters and digits: {0:?}")]
    InvalidCharacter(String),
}

/// Human-readable room identifier. Always uppercase ASCII alphanumeric.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RoomCode(String);

impl RoomCode {
    /// Normalize user input into a room code: trim, uppercase, validate.
    pub fn parse(input: &str) -> Result<Self, RoomCodeError> {
        let trimmed = input.trim();
        if trimmed.is_empty() {
            return Err(RoomCodeError::Empty);
        }
        if !trimmed.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(RoomCodeError::InvalidCharacter(trimmed.to_string()));
        }
        Ok(Self(trimmed.to_ascii_uppercase()))
    }

    /// Random code. Collisions are not checked; the space is 36^6.
    pub fn generate() -> Self {
        let code: String = rand::rng()
            .sample_iter(&Alphanumeric)
            .take(ROOM_CODE_LEN)
            .map(|b| char::from(b).to_ascii_uppercase())
            .collect();
        Self(code)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RoomCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for RoomCode {
    type Error = RoomCodeError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<RoomCode> for String {
    fn from(code: RoomCode) -> Self {
        code.0
    }
}

/// Row in the `rooms` table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Room {
    pub room_id: RoomCode,
    pub created_by: Uuid,
    pub host_id: Uuid,
    pub name: String,
    pub is_active: bool,
}

impl Room {
    /// A new active room with a random code, owned by `owner`.
    pub fn new_for(owner: Uuid) -> Self {
        let room_id = RoomCode::generate();
        Self {
            name: format!("Study Room {}", room_id),
            room_id,
            created_by: owner,
            host_id: owner,
            is_active: true,
        }
    }
}

// -- Identity / profile --

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub id: Uuid,
    #[serde(default)]
    pub email: Option<String>,
}

/// Most-recent-first list of avatar URLs, never longer than [`MAX_RECENT_AVATARS`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "Option<Vec<String>>", into = "Vec<String>")]
pub struct RecentAvatars(Vec<String>);

impl RecentAvatars {
    /// Move `url` to the head, dropping any older copy and evicting past the cap.
    pub fn promote(&mut self, url: impl Into<String>) {
        let url = url.into();
        self.0.retain(|existing| *existing != url);
        self.0.insert(0, url);
        self.0.truncate(MAX_RECENT_AVATARS);
    }

    /// Copy of the list with `url` promoted.
    pub fn promoted(&self, url: impl Into<String>) -> Self {
        let mut next = self.clone();
        next.promote(url);
        next
    }

    pub fn head(&self) -> Option<&str> {
        self.0.first().map(String::as_str)
    }

    pub fn contains(&self, url: &str) -> bool {
        self.0.iter().any(|u| u == url)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }
}

impl From<Option<Vec<String>>> for RecentAvatars {
    fn from(urls: Option<Vec<String>>) -> Self {
        let mut urls = urls.unwrap_or_default();
        urls.truncate(MAX_RECENT_AVATARS);
        Self(urls)
    }
}

impl From<RecentAvatars> for Vec<String> {
    fn from(avatars: RecentAvatars) -> Self {
        avatars.0
    }
}

/// Row in the `users` table, 1:1 with an [`Identity`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Profile {
    pub id: Uuid,
    #[serde(default, rename = "name", alias = "full_name")]
    pub display_name: Option<String>,
    #[serde(default)]
    pub avatar_url: Option<String>,
    #[serde(default)]
    pub avatars: RecentAvatars,
}

/// Partial profile write. Absent fields are left untouched server-side.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ProfileUpdate {
    #[serde(rename = "name", skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub avatar_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub avatars: Option<RecentAvatars>,
}

impl ProfileUpdate {
    pub fn is_empty(&self) -> bool {
        self.display_name.is_none() && self.avatar_url.is_none() && self.avatars.is_none()
    }
}

// -- Messages --

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Role {
    User,
    Assistant,
}

impl From<String> for Role {
    fn from(raw: String) -> Self {
        if raw == "user" { Self::User } else { Self::Assistant }
    }
}

impl From<Role> for String {
    fn from(role: Role) -> Self {
        match role {
            Role::User => "user".into(),
            Role::Assistant => "assistant".into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageId {
    Int(i64),
    Text(String),
}

/// A chat row, as returned by the history endpoint or pushed by the realtime channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    #[serde(default)]
    pub id: Option<MessageId>,
    #[serde(default, alias = "session_id")]
    pub room_id: Option<String>,
    #[serde(default, deserialize_with = "lenient_uuid")]
    pub user_id: Option<Uuid>,
    pub role: Role,
    #[serde(default, deserialize_with = "null_as_default")]
    pub content: String,
    #[serde(default, alias = "timestamp", deserialize_with = "lenient_timestamp")]
    pub created_at: Option<DateTime<Utc>>,
}

impl ChatMessage {
    pub fn is_from(&self, user: Uuid) -> bool {
        self.user_id == Some(user)
    }

    pub fn is_assistant(&self) -> bool {
        self.role == Role::Assistant
    }
}

// -- Summaries / analytics --

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionSummary {
    #[serde(default)]
    pub summary_text: Option<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub key_points: Vec<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub suggested_topics: Vec<String>,
}

impl SessionSummary {
    pub fn is_empty(&self) -> bool {
        self.summary_text.as_deref().is_none_or(str::is_empty) && self.key_points.is_empty()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionStats {
    #[serde(default, deserialize_with = "null_as_default")]
    pub message_count: u64,
    #[serde(default, deserialize_with = "null_as_default")]
    pub user_message_count: u64,
    #[serde(default, deserialize_with = "null_as_default")]
    pub insight_count: u64,
    #[serde(default, deserialize_with = "null_as_default")]
    pub duration_mins: u64,
}

/// Skill level on the fixed 1..=5 scale. Out-of-range values clamp on decode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "i64", into = "u8")]
pub struct SkillLevel(u8);

impl SkillLevel {
    pub const MIN: u8 = 1;
    pub const MAX: u8 = 5;

    pub fn new(level: i64) -> Self {
        Self(level.clamp(Self::MIN as i64, Self::MAX as i64) as u8)
    }

    pub fn get(self) -> u8 {
        self.0
    }

    /// One flag per step of the scale, lit up to and including the level.
    pub fn indicators(self) -> [bool; Self::MAX as usize] {
        let mut lit = [false; Self::MAX as usize];
        for (step, slot) in lit.iter_mut().enumerate() {
            *slot = step < self.0 as usize;
        }
        lit
    }
}

impl From<i64> for SkillLevel {
    fn from(level: i64) -> Self {
        Self::new(level)
    }
}

impl From<SkillLevel> for u8 {
    fn from(level: SkillLevel) -> Self {
        level.0
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkillSignal {
    pub name: String,
    pub level: SkillLevel,
}

/// Opaque output of the analysis endpoint, passed back verbatim when saving.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionAnalysis(pub serde_json::Value);

impl SessionAnalysis {
    /// Server-side refusal, e.g. "No messages found for this session".
    pub fn error(&self) -> Option<&str> {
        self.0.get("error").and_then(serde_json::Value::as_str)
    }

}

/// Archived session from the `session_history` table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub id: String,
    #[serde(default)]
    pub room_id: Option<String>,
    #[serde(default, deserialize_with = "lenient_timestamp")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub topic: Option<String>,
    #[serde(default)]
    pub summary_data: serde_json::Value,
}

impl HistoryEntry {
    pub fn topic(&self) -> &str {
        self.topic
            .as_deref()
            .filter(|t| !t.is_empty())
            .unwrap_or("General Discussion")
    }

    pub fn duration_mins(&self) -> Option<u64> {
        self.summary_data
            .pointer("/stats/duration_mins")
            .and_then(serde_json::Value::as_u64)
            .filter(|mins| *mins > 0)
    }

    pub fn key_concept_count(&self) -> usize {
        self.summary_data
            .pointer("/summary/key_concepts")
            .and_then(serde_json::Value::as_array)
            .map_or(0, Vec::len)
    }

    pub fn summary_text(&self) -> Option<&str> {
        self.summary_data
            .pointer("/summary/summary_text")
            .and_then(serde_json::Value::as_str)
    }
}

// -- Lenient field decoding --

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// Assistant rows carry no author, or a non-uuid marker. Both decode as `None`.
fn lenient_uuid<'de, D>(deserializer: D) -> Result<Option<Uuid>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(raw
        .as_ref()
        .and_then(serde_json::Value::as_str)
        .and_then(|s| s.parse().ok()))
}

/// Accepts RFC 3339 and the naive `YYYY-MM-DDTHH:MM:SS[.f]` form some writers emit.
fn lenient_timestamp<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<String>::deserialize(deserializer)?;
    Ok(raw.and_then(|s| {
        s.parse::<DateTime<Utc>>()
            .or_else(|_| {
                chrono::NaiveDateTime::parse_from_str(&s, "%Y-%m-%dT%H:%M:%S%.f")
                    .map(|ndt| ndt.and_utc())
            })
            .map_err(|e| tracing::warn!("Unparseable timestamp '{}': {}", s, e))
            .ok()
    }))
}
