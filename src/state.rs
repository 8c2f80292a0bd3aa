use std::sync::Arc;

use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use tokio::sync::Mutex;

use crate::auth::oauth::OAuthFlowStore;
use crate::backend::Backend;
use crate::config::Config;
use crate::profile::ProfileSaver;

pub type DbPool = Pool<SqliteConnectionManager>;

#[derive(Clone)]
pub struct AppState {
    pub db: DbPool,
    pub config: Config,
    pub backend: Arc<dyn Backend>,
    pub oauth_flows: Arc<Mutex<OAuthFlowStore>>,
    pub profile_saver: ProfileSaver,
}

impl AppState {
    pub fn new(db: DbPool, config: Config, backend: Arc<dyn Backend>) -> Self {
        let profile_saver = ProfileSaver::new(
            backend.clone(),
            std::time::Duration::from_millis(config.profile.save_debounce_ms),
        );
        Self {
            db,
            config,
            backend,
            oauth_flows: Arc::new(Mutex::new(OAuthFlowStore::new())),
            profile_saver,
        }
    }
}
