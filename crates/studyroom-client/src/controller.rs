use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tracing::{error, info, warn};

use studyroom_api::{ApiError, RoomStore, SummaryApi};
use studyroom_types::{Room, RoomCode, RoomCodeError};

use crate::error::EndSessionError;
use crate::navigation::{Navigator, Route};
use crate::session::SessionProvider;

pub const ROOM_NOT_FOUND: &str = "Room not found. Please check the code.";
pub const JOIN_FAILED: &str = "Failed to join room. Please try again.";
pub const CREATE_FAILED: &str = "Could not create room. Try again.";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JoinOutcome {
    /// Blank input; nothing was queried.
    Ignored,
    /// Inline validation message; no navigation.
    NotFound(&'static str),
    Failed(&'static str),
    Joined(RoomCode),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CreateOutcome {
    /// Nobody is signed in; the user was sent to the sign-in view instead.
    SignInRequired,
    Created(RoomCode),
    Failed(&'static str),
}

/// Creates, joins and ends rooms, moving the user between views.
pub struct RoomController {
    rooms: Option<Arc<dyn RoomStore>>,
    summaries: Arc<dyn SummaryApi>,
    session: SessionProvider,
    navigator: Arc<dyn Navigator>,
    language: String,
    ending: AtomicBool,
}

impl RoomController {
    pub fn new(
        rooms: Option<Arc<dyn RoomStore>>,
        summaries: Arc<dyn SummaryApi>,
        session: SessionProvider,
        navigator: Arc<dyn Navigator>,
        language: impl Into<String>,
    ) -> Self {
        Self {
            rooms,
            summaries,
            session,
            navigator,
            language: language.into(),
            ending: AtomicBool::new(false),
        }
    }

    pub async fn join(&self, input: &str) -> JoinOutcome {
        let code = match RoomCode::parse(input) {
            Ok(code) => code,
            Err(RoomCodeError::Empty) => return JoinOutcome::Ignored,
            // Such a code can never exist.
            Err(RoomCodeError::InvalidCharacter(_)) => {
                return JoinOutcome::NotFound(ROOM_NOT_FOUND);
            }
        };
        let Some(rooms) = &self.rooms else {
            error!("Cannot join room {}: room store is not configured", code);
            return JoinOutcome::Failed(JOIN_FAILED);
        };

        match rooms.room_exists(&code).await {
            Ok(true) => {
                info!("Joining room {}", code);
                self.navigator.navigate(Route::Room(code.clone()));
                JoinOutcome::Joined(code)
            }
            Ok(false) => {
                warn!("Room {} does not exist", code);
                JoinOutcome::NotFound(ROOM_NOT_FOUND)
            }
            Err(e) => {
                error!("Failed to look up room {}: {}", code, e);
                JoinOutcome::Failed(JOIN_FAILED)
            }
        }
    }

    /// Create a room owned by the signed-in user and enter it.
    pub async fn create(&self) -> CreateOutcome {
        let Some(identity) = self.session.identity() else {
            self.navigator.navigate(Route::Login);
            return CreateOutcome::SignInRequired;
        };
        let Some(rooms) = &self.rooms else {
            error!("Cannot create room: room store is not configured");
            return CreateOutcome::Failed(CREATE_FAILED);
        };

        // Codes are not checked for collisions.
        let room = Room::new_for(identity.id);
        match rooms.insert_room(&room).await {
            Ok(()) => {
                info!("Created room {} for {}", room.room_id, identity.id);
                self.navigator.navigate(Route::Room(room.room_id.clone()));
                CreateOutcome::Created(room.room_id)
            }
            Err(e) => {
                error!("Failed to create room: {}", e);
                CreateOutcome::Failed(CREATE_FAILED)
            }
        }
    }

    /// Analyse the room's conversation, persist the analysis, then show it.
    /// Any failure stops the sequence and leaves the user in the room.
    pub async fn end_session(&self, room: &RoomCode) -> Result<(), EndSessionError> {
        if self
            .ending
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(EndSessionError::Busy);
        }
        let _ending = BusyGuard(&self.ending);

        let analysis = self
            .summaries
            .generate_summary(room, &self.language)
            .await
            .and_then(|analysis| match analysis.error() {
                Some(reason) => Err(ApiError::Rejected(reason.to_string())),
                None => Ok(analysis),
            })
            .map_err(|e| {
                error!("Failed to generate analysis for room {}: {}", room, e);
                EndSessionError::Generate(e)
            })?;

        self.summaries
            .save_summary(room, &analysis)
            .await
            .map_err(|e| {
                error!("Failed to save analysis for room {}: {}", room, e);
                EndSessionError::Save(e)
            })?;

        info!("Session for room {} ended", room);
        self.navigator.navigate(Route::Summary(room.clone()));
        Ok(())
    }

    pub fn is_ending(&self) -> bool {
        self.ending.load(Ordering::Acquire)
    }
}

struct BusyGuard<'a>(&'a AtomicBool);

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}
