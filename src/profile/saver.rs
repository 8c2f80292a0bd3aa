use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use crate::backend::{Backend, BackendResult, Profile, ProfileFields, UserData};

/// What a call to [`ProfileSaver::save`] ended up doing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveOutcome {
    /// Both rows were upserted with this `updated_at`.
    Saved(DateTime<Utc>),
    /// Identical to the save just committed for this user; nothing was sent.
    Coalesced,
}

#[derive(Default)]
struct SaveSlot {
    last: Option<(Instant, ProfileFields)>,
}

/// The single save path for profile rows.
///
/// Saves for one user run one at a time, and a save identical to the one
/// committed less than `debounce` ago is coalesced. Every save that does go
/// out upserts `profiles` and `user_data` with the same id and timestamp.
#[derive(Clone)]
pub struct ProfileSaver {
    backend: Arc<dyn Backend>,
    debounce: Duration,
    slots: Arc<Mutex<HashMap<String, Arc<Mutex<SaveSlot>>>>>,
}

impl ProfileSaver {
    pub fn new(backend: Arc<dyn Backend>, debounce: Duration) -> Self {
        Self {
            backend,
            debounce,
            slots: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    async fn slot(&self, user_id: &str) -> Arc<Mutex<SaveSlot>> {
        let mut slots = self.slots.lock().await;
        let debounce = self.debounce;
        // Forget idle users whose last save can no longer be coalesced with.
        slots.retain(|_, slot| {
            Arc::strong_count(slot) > 1
                || slot.try_lock().map_or(true, |s| {
                    s.last
                        .as_ref()
                        .is_some_and(|(at, _)| at.elapsed() < debounce)
                })
        });
        slots
            .entry(user_id.to_string())
            .or_default()
            .clone()
    }

    pub async fn save(
        &self,
        user_id: &str,
        access_token: &str,
        fields: &ProfileFields,
    ) -> BackendResult<SaveOutcome> {
        let slot = self.slot(user_id).await;
        let mut slot = slot.lock().await;

        if let Some((at, last)) = &slot.last {
            if last == fields && at.elapsed() < self.debounce {
                tracing::debug!(user_id, "Coalesced duplicate profile save");
                return Ok(SaveOutcome::Coalesced);
            }
        }

        let updated_at = Utc::now();
        let profile = Profile::new(user_id, fields, updated_at);
        let user_data = UserData {
            id: user_id.to_string(),
            updated_at,
        };

        // Both writes are attempted; they are not transactional.
        let (profile_result, user_data_result) = futures::join!(
            self.backend.upsert_profile(access_token, &profile),
            self.backend.upsert_user_data(access_token, &user_data),
        );
        if let Err(e) = &profile_result {
            tracing::error!(user_id, "profiles upsert failed: {}", e);
        }
        if let Err(e) = &user_data_result {
            tracing::error!(user_id, "user_data upsert failed: {}", e);
        }
        profile_result?;
        user_data_result?;

        slot.last = Some((Instant::now(), fields.clone()));
        tracing::info!(user_id, "Profile saved");
        Ok(SaveOutcome::Saved(updated_at))
    }
}
