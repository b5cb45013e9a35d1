use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use tracing::{debug, error};

use studyroom_api::{AnalyticsApi, ApiError, HistoryApi, SummaryApi};
use studyroom_types::{HistoryEntry, RoomCode, SessionStats, SessionSummary, SkillSignal};

/// What happened to one fetch issued by a panel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadOutcome {
    Loaded,
    /// The request failed; the failure was logged and state left as it was.
    Failed,
    /// The panel moved to another room (or unmounted) while the request was in flight.
    Stale,
    /// A request was already in flight; nothing was issued.
    Busy,
    /// The panel is not bound to a room.
    Unmounted,
}

/// Room-scoped state shared between a panel and the tasks feeding it.
///
/// Every retarget bumps `generation`; writers carry the generation they were
/// started under and are ignored once it is no longer current.
pub(crate) struct PanelState<T> {
    room: Option<RoomCode>,
    generation: u64,
    data: T,
    busy: bool,
}

#[derive(Clone)]
pub(crate) struct PanelCell<T> {
    state: Arc<Mutex<PanelState<T>>>,
}

impl<T: Default + Clone> PanelCell<T> {
    pub(crate) fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(PanelState {
                room: None,
                generation: 0,
                data: T::default(),
                busy: false,
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, PanelState<T>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Bind to `room` (or unbind), dropping whatever was held for the old room.
    pub(crate) fn retarget(&self, room: Option<RoomCode>) -> u64 {
        let mut state = self.lock();
        state.generation += 1;
        state.room = room;
        state.data = T::default();
        state.busy = false;
        state.generation
    }

    pub(crate) fn room(&self) -> Option<RoomCode> {
        self.lock().room.clone()
    }

    pub(crate) fn current(&self) -> Option<(RoomCode, u64)> {
        let state = self.lock();
        state.room.clone().map(|room| (room, state.generation))
    }

    pub(crate) fn snapshot(&self) -> T {
        self.lock().data.clone()
    }

    pub(crate) fn is_busy(&self) -> bool {
        self.lock().busy
    }

    /// Claim the busy flag for the current room. `Err` says why nothing may be issued.
    pub(crate) fn begin(&self) -> Result<(RoomCode, u64), LoadOutcome> {
        let mut state = self.lock();
        let Some(room) = state.room.clone() else {
            return Err(LoadOutcome::Unmounted);
        };
        if state.busy {
            return Err(LoadOutcome::Busy);
        }
        state.busy = true;
        Ok((room, state.generation))
    }

    /// Release the busy flag claimed under `generation`, applying `update` if
    /// that generation is still current.
    pub(crate) fn finish(&self, generation: u64, update: impl FnOnce(&mut T)) -> bool {
        let mut state = self.lock();
        if state.generation != generation {
            return false;
        }
        state.busy = false;
        update(&mut state.data);
        true
    }

    /// Mutate the data if `generation` is still current.
    pub(crate) fn update(&self, generation: u64, update: impl FnOnce(&mut T)) -> bool {
        let mut state = self.lock();
        if state.generation != generation {
            return false;
        }
        update(&mut state.data);
        true
    }
}

/// A remote resource fetched per room.
#[async_trait]
pub trait RoomResource: Send + Sync + 'static {
    type Data: Clone + Default + Send + 'static;

    /// Used in diagnostics.
    const NAME: &'static str;

    async fn fetch(&self, room: &RoomCode) -> Result<Self::Data, ApiError>;
}

/// Panel bound to one room-scoped resource. Fetches once on mount, then only
/// on explicit refresh; a refresh while one is in flight is refused.
pub struct ResourcePanel<R: RoomResource> {
    resource: Arc<R>,
    cell: PanelCell<R::Data>,
}

impl<R: RoomResource> ResourcePanel<R> {
    pub fn new(resource: R) -> Self {
        Self {
            resource: Arc::new(resource),
            cell: PanelCell::new(),
        }
    }

    /// Bind to `room` and issue its one initial fetch.
    pub async fn mount(&self, room: RoomCode) -> LoadOutcome {
        self.cell.retarget(Some(room));
        self.refresh().await
    }

    /// Rebind only if `room` differs from the current one.
    pub async fn set_room(&self, room: RoomCode) -> LoadOutcome {
        if self.cell.room().as_ref() == Some(&room) {
            return LoadOutcome::Loaded;
        }
        self.mount(room).await
    }

    /// Re-issue the fetch and replace state with the response.
    pub async fn refresh(&self) -> LoadOutcome {
        let (room, generation) = match self.cell.begin() {
            Ok(claim) => claim,
            Err(outcome) => return outcome,
        };

        match self.resource.fetch(&room).await {
            Ok(data) => {
                if self.cell.finish(generation, |held| *held = data) {
                    debug!("Loaded {} for room {}", R::NAME, room);
                    LoadOutcome::Loaded
                } else {
                    LoadOutcome::Stale
                }
            }
            Err(e) => {
                error!("Failed to fetch {} for room {}: {}", R::NAME, room, e);
                if self.cell.finish(generation, |_| {}) {
                    LoadOutcome::Failed
                } else {
                    LoadOutcome::Stale
                }
            }
        }
    }

    pub fn unmount(&self) {
        self.cell.retarget(None);
    }

    pub fn snapshot(&self) -> R::Data {
        self.cell.snapshot()
    }

    /// True while a fetch is in flight; the refresh control should be disabled.
    pub fn is_busy(&self) -> bool {
        self.cell.is_busy()
    }

    pub fn room(&self) -> Option<RoomCode> {
        self.cell.room()
    }
}

// -- Resources --

pub struct SummaryResource(pub Arc<dyn SummaryApi>);

#[async_trait]
impl RoomResource for SummaryResource {
    type Data = SessionSummary;
    const NAME: &'static str = "summary";

    async fn fetch(&self, room: &RoomCode) -> Result<SessionSummary, ApiError> {
        self.0.summary(room).await
    }
}

pub struct SkillsResource(pub Arc<dyn AnalyticsApi>);

#[async_trait]
impl RoomResource for SkillsResource {
    type Data = Vec<SkillSignal>;
    const NAME: &'static str = "skill signals";

    async fn fetch(&self, room: &RoomCode) -> Result<Vec<SkillSignal>, ApiError> {
        self.0.skill_signals(room).await
    }
}

pub struct StatsResource(pub Arc<dyn AnalyticsApi>);

#[async_trait]
impl RoomResource for StatsResource {
    type Data = SessionStats;
    const NAME: &'static str = "session stats";

    async fn fetch(&self, room: &RoomCode) -> Result<SessionStats, ApiError> {
        self.0.session_stats(room).await
    }
}

pub struct RoomHistoryResource(pub Arc<dyn HistoryApi>);

#[async_trait]
impl RoomResource for RoomHistoryResource {
    type Data = Vec<HistoryEntry>;
    const NAME: &'static str = "session history";

    async fn fetch(&self, room: &RoomCode) -> Result<Vec<HistoryEntry>, ApiError> {
        self.0.room_history(room).await
    }
}

pub type SummaryPanel = ResourcePanel<SummaryResource>;
pub type SkillsPanel = ResourcePanel<SkillsResource>;
pub type StatsPanel = ResourcePanel<StatsResource>;
pub type HistoryPanel = ResourcePanel<RoomHistoryResource>;
