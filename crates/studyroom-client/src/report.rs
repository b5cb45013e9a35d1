use tracing::{debug, error};

use studyroom_api::{AnalyticsApi, HistoryApi, SummaryApi};
use studyroom_types::{HistoryEntry, RoomCode, SessionStats, SessionSummary, SkillSignal};

use crate::session::SessionProvider;

/// Everything the results view shows for one finished session. Each part
/// that fails to load stays at its default.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SessionReport {
    pub stats: SessionStats,
    pub signals: Vec<SkillSignal>,
    pub summary: SessionSummary,
    pub engagement: serde_json::Value,
}

impl SessionReport {
    pub async fn load(
        analytics: &dyn AnalyticsApi,
        summaries: &dyn SummaryApi,
        room: &RoomCode,
    ) -> Self {
        let mut report = Self::default();

        match analytics.session_stats(room).await {
            Ok(stats) => report.stats = stats,
            Err(e) => error!("Failed to fetch stats for room {}: {}", room, e),
        }
        match analytics.skill_signals(room).await {
            Ok(signals) => report.signals = signals,
            Err(e) => error!("Failed to fetch skill signals for room {}: {}", room, e),
        }
        match summaries.summary(room).await {
            Ok(summary) => report.summary = summary,
            Err(e) => error!("Failed to fetch summary for room {}: {}", room, e),
        }
        match analytics.engagement(room).await {
            Ok(engagement) => report.engagement = engagement,
            Err(e) => debug!("No engagement data for room {}: {}", room, e),
        }

        report
    }
}

/// Past sessions of the signed-in user, newest first as the server orders them.
pub struct UserHistory;

impl UserHistory {
    /// Empty when nobody is signed in or the request fails.
    pub async fn load(history: &dyn HistoryApi, session: &SessionProvider) -> Vec<HistoryEntry> {
        let Some(identity) = session.identity() else {
            debug!("User history skipped: not signed in");
            return Vec::new();
        };
        history.user_history(identity.id).await.unwrap_or_else(|e| {
            error!("Failed to fetch history for {}: {}", identity.id, e);
            Vec::new()
        })
    }
}
