use crate::backend::{Backend, ProfileFields};
use crate::extractors::CurrentUser;

use super::saver::ProfileSaver;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
    /// Initial fetch in flight.
    Loading,
    /// Fields populated from the last fetch or a local edit.
    Ready,
    /// An upsert in flight.
    Saving,
}

/// User-visible outcome of the last load or save.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Notice {
    Updated,
    UpdateFailed,
    LoadFailed,
    NoAvatarSelected,
    UploadFailed,
}

impl Notice {
    pub fn message(&self) -> &'static str {
        match self {
            Notice::Updated => "Profile updated!",
            Notice::UpdateFailed => "Error updating the data!",
            Notice::LoadFailed => "Error loading user data!",
            Notice::NoAvatarSelected => "You must select an image to upload.",
            Notice::UploadFailed => "Error uploading avatar!",
        }
    }

    pub fn is_error(&self) -> bool {
        !matches!(self, Notice::Updated)
    }
}

/// The profile form for one signed-in user.
///
/// `persisted` mirrors what the backend holds as far as this form knows;
/// `draft` is what the user is looking at. Text edits only touch the draft
/// until [`ProfileSync::save`]. An avatar upload commits the new key with the
/// persisted text fields, so unsaved text edits stay in the draft.
///
/// Nothing is committed until a load has succeeded: a save built on an
/// unknown row would overwrite its columns with empty values.
#[derive(Debug, Clone)]
pub struct ProfileSync {
    user_id: String,
    access_token: String,
    state: SyncState,
    loaded: bool,
    persisted: ProfileFields,
    draft: ProfileFields,
    notice: Option<Notice>,
}

impl ProfileSync {
    pub fn new(user: &CurrentUser) -> Self {
        Self {
            user_id: user.id.clone(),
            access_token: user.access_token.clone(),
            state: SyncState::Loading,
            loaded: false,
            persisted: ProfileFields::default(),
            draft: ProfileFields::default(),
            notice: None,
        }
    }

    pub fn state(&self) -> SyncState {
        self.state
    }

    /// Whether the stored row is known, either fetched or confirmed missing.
    pub fn is_loaded(&self) -> bool {
        self.loaded
    }

    pub fn draft(&self) -> &ProfileFields {
        &self.draft
    }

    pub fn persisted(&self) -> &ProfileFields {
        &self.persisted
    }

    pub fn notice(&self) -> Option<Notice> {
        self.notice
    }

    /// Surface a problem that happened outside a load or save, such as a
    /// rejected avatar upload.
    pub fn report(&mut self, notice: Notice) {
        self.notice = Some(notice);
    }

    /// Fetch the profile row. A missing row leaves the fields empty.
    pub async fn load(&mut self, backend: &dyn Backend) {
        self.state = SyncState::Loading;
        match backend.profile(&self.access_token, &self.user_id).await {
            Ok(Some(fields)) => {
                self.persisted = fields.clone();
                self.draft = fields;
                self.loaded = true;
            }
            Ok(None) => {
                tracing::debug!(user_id = %self.user_id, "No profile row yet");
                self.loaded = true;
            }
            Err(e) => {
                tracing::error!(user_id = %self.user_id, "Failed to load profile: {}", e);
                self.notice = Some(Notice::LoadFailed);
            }
        }
        self.state = SyncState::Ready;
    }

    pub fn edit_full_name(&mut self, value: Option<String>) {
        if self.accepts_edits() {
            self.draft.full_name = normalize(value);
        }
    }

    pub fn edit_username(&mut self, value: Option<String>) {
        if self.accepts_edits() {
            self.draft.username = normalize(value).filter(|name| name != "@");
        }
    }

    /// Persist the whole draft.
    pub async fn save(&mut self, saver: &ProfileSaver) -> bool {
        let fields = self.draft.clone();
        self.commit(fields, saver).await
    }

    /// A new avatar landed in storage under `key`; save it right away.
    pub async fn avatar_uploaded(&mut self, key: String, saver: &ProfileSaver) -> bool {
        self.draft.avatar_url = Some(key.clone());
        let fields = ProfileFields {
            full_name: self.persisted.full_name.clone(),
            username: self.persisted.username.clone(),
            avatar_url: Some(key),
        };
        self.commit(fields, saver).await
    }

    async fn commit(&mut self, fields: ProfileFields, saver: &ProfileSaver) -> bool {
        if !self.loaded {
            tracing::warn!(user_id = %self.user_id, "Refusing to save a profile that failed to load");
            self.notice = Some(Notice::LoadFailed);
            return false;
        }
        self.state = SyncState::Saving;
        let saved = match saver
            .save(&self.user_id, &self.access_token, &fields)
            .await
        {
            Ok(_) => {
                self.persisted = fields;
                self.notice = Some(Notice::Updated);
                true
            }
            Err(e) => {
                tracing::warn!(user_id = %self.user_id, "Profile save failed: {}", e);
                self.notice = Some(Notice::UpdateFailed);
                false
            }
        };
        self.state = SyncState::Ready;
        saved
    }

    fn accepts_edits(&self) -> bool {
        if self.state != SyncState::Ready {
            tracing::debug!(state = ?self.state, "Ignoring profile edit");
            return false;
        }
        true
    }
}

fn normalize(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}
