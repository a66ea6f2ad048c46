use std::sync::{Arc, Mutex};
use std::time::Instant;

use palaver_shared::ChatError;
use palaver_store::Database;

use crate::blob_store::BlobStore;
use crate::config::ServerConfig;
use crate::rate_limit::RateLimiter;
use crate::typing::TypingRegistry;

/// The single database handle, shared by every request.
///
/// Each request holds the lock for one short synchronous store call, never
/// across an `.await`.
#[derive(Clone)]
pub struct SharedDb(Arc<Mutex<Database>>);

impl SharedDb {
    pub fn new(db: Database) -> Self {
        Self(Arc::new(Mutex::new(db)))
    }

    pub fn with<T, E>(&self, f: impl FnOnce(&Database) -> Result<T, E>) -> Result<T, ChatError>
    where
        E: Into<ChatError>,
    {
        let db = self
            .0
            .lock()
            .map_err(|_| ChatError::Transient("database lock poisoned".into()))?;
        f(&db).map_err(Into::into)
    }
}

#[derive(Clone)]
pub struct AppState {
    pub db: SharedDb,
    pub blob_store: Arc<BlobStore>,
    pub typing: TypingRegistry,
    pub rate_limiter: RateLimiter,
    pub config: Arc<ServerConfig>,
    pub started_at: Instant,
}
