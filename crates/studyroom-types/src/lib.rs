pub mod api;
pub mod events;
pub mod models;

pub use events::{RowEvent, SubscriptionKey, MESSAGES_TABLE};
pub use models::{
    ChatMessage, HistoryEntry, Identity, Profile, ProfileUpdate, RecentAvatars, Role, Room,
    RoomCode, RoomCodeError, SessionAnalysis, SessionStats, SessionSummary, SkillLevel,
    SkillSignal, MAX_RECENT_AVATARS,
};
