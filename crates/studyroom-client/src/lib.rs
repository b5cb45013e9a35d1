//! Client-side state for the study-room app.
//!
//! Every panel follows the same room-scoped lifecycle: mount on a room, fetch
//! once, optionally listen for pushed rows, and tear everything down when the
//! room changes or the panel goes away. Panels never surface fetch failures to
//! their readers; they log them and fall back to empty state.

pub mod chat;
pub mod controller;
pub mod error;
pub mod navigation;
pub mod panel;
pub mod profile;
pub mod report;
pub mod session;

#[cfg(test)]
mod testing;

pub use chat::{ChatLine, ChatPanel, ChatView, SendOutcome};
pub use controller::{CreateOutcome, JoinOutcome, RoomController};
pub use error::{EndSessionError, SessionError};
pub use navigation::{Navigator, Route, RouteHistory};
pub use panel::{
    HistoryPanel, LoadOutcome, ResourcePanel, RoomResource, SkillsPanel, StatsPanel,
    SummaryPanel,
};
pub use profile::ProfileEditor;
pub use report::{SessionReport, UserHistory};
pub use session::{SessionProvider, SessionState};
