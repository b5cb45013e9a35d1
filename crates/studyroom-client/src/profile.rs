use std::path::Path;
use std::sync::Arc;

use tracing::info;
use uuid::Uuid;

use studyroom_api::AvatarStorage;
use studyroom_types::{Profile, ProfileUpdate};

use crate::error::SessionError;
use crate::session::SessionProvider;

/// Profile page actions. All writes go through the [`SessionProvider`] so
/// every consumer sees the new profile.
pub struct ProfileEditor {
    session: SessionProvider,
    storage: Arc<dyn AvatarStorage>,
}

impl ProfileEditor {
    pub fn new(session: SessionProvider, storage: Arc<dyn AvatarStorage>) -> Self {
        Self { session, storage }
    }

    pub async fn rename(&self, name: &str) -> Result<Profile, SessionError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(SessionError::InvalidInput("display name cannot be empty"));
        }
        self.session
            .update_profile(ProfileUpdate {
                display_name: Some(name.to_string()),
                ..Default::default()
            })
            .await
    }

    /// Store a new avatar image and make it the active one, at the head of
    /// the recent list.
    pub async fn upload_avatar(
        &self,
        bytes: Vec<u8>,
        file_name: &str,
    ) -> Result<Profile, SessionError> {
        let identity = self.session.identity().ok_or(SessionError::NotSignedIn)?;
        if bytes.is_empty() {
            return Err(SessionError::InvalidInput("avatar file is empty"));
        }
        let (ext, content_type) = image_type(file_name)
            .ok_or(SessionError::InvalidInput("avatar must be a png, jpeg, gif or webp image"))?;

        let path = format!("avatars/{}/{}.{}", identity.id, Uuid::new_v4(), ext);
        let url = self
            .storage
            .upload_avatar(&path, bytes, content_type)
            .await?;
        info!("Uploaded avatar for {} to {}", identity.id, path);

        let avatars = self
            .session
            .profile()
            .map(|profile| profile.avatars)
            .unwrap_or_default()
            .promoted(url.clone());
        self.session
            .update_profile(ProfileUpdate {
                avatar_url: Some(url),
                avatars: Some(avatars),
                ..Default::default()
            })
            .await
    }

    /// Switch back to one of the recent avatars.
    pub async fn select_avatar(&self, url: &str) -> Result<Profile, SessionError> {
        self.session.identity().ok_or(SessionError::NotSignedIn)?;
        let profile = self
            .session
            .profile()
            .ok_or(SessionError::InvalidInput("profile is not loaded"))?;
        if !profile.avatars.contains(url) {
            return Err(SessionError::InvalidInput("not one of the recent avatars"));
        }
        self.session
            .update_profile(ProfileUpdate {
                avatar_url: Some(url.to_string()),
                avatars: Some(profile.avatars.promoted(url)),
                ..Default::default()
            })
            .await
    }
}

/// Extension and content type for an avatar file name.
fn image_type(file_name: &str) -> Option<(&'static str, &'static str)> {
    let ext = Path::new(file_name)
        .extension()?
        .to_str()?
        .to_ascii_lowercase();
    match ext.as_str() {
        "png" => Some(("png", "image/png")),
        "jpg" | "jpeg" => Some(("jpg", "image/jpeg")),
        "gif" => Some(("gif", "image/gif")),
        "webp" => Some(("webp", "image/webp")),
        _ => None,
    }
}
