//! Client configuration.
//!
//! Every interval defaults to the shared constants; the headless binary
//! reads the server address and credentials from the environment.

use std::time::Duration;

use palaver_shared::constants::{
    CONVERSATIONS_POLL_INTERVAL, DEFAULT_HTTP_PORT, HEARTBEAT_FAILURE_THRESHOLD,
    HEARTBEAT_INTERVAL, INACTIVITY_TIMEOUT, LOGOUT_REDIRECT_DELAY, PRESENCE_POLL_INTERVAL,
    PRESENCE_RETRY_DELAY, PRIVATE_POLL_INTERVAL, PROFILE_POLL_INTERVAL, ROOM_POLL_INTERVAL,
    UNREAD_POLL_INTERVAL,
};

/// Period of each polling loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncIntervals {
    pub room: Duration,
    pub private: Duration,
    pub presence: Duration,
    pub unread: Duration,
    pub conversations: Duration,
    pub profile: Duration,
}

impl Default for SyncIntervals {
    fn default() -> Self {
        Self {
            room: ROOM_POLL_INTERVAL,
            private: PRIVATE_POLL_INTERVAL,
            presence: PRESENCE_POLL_INTERVAL,
            unread: UNREAD_POLL_INTERVAL,
            conversations: CONVERSATIONS_POLL_INTERVAL,
            profile: PROFILE_POLL_INTERVAL,
        }
    }
}

/// Timers of the session liveness monitor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LivenessSettings {
    pub heartbeat_interval: Duration,
    /// Delay before the single presence retry after a failed heartbeat.
    pub presence_retry_delay: Duration,
    /// Consecutive failures before the warning becomes persistent.
    pub failure_threshold: u32,
}

impl Default for LivenessSettings {
    fn default() -> Self {
        Self {
            heartbeat_interval: HEARTBEAT_INTERVAL,
            presence_retry_delay: PRESENCE_RETRY_DELAY,
            failure_threshold: HEARTBEAT_FAILURE_THRESHOLD,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InactivitySettings {
    pub threshold: Duration,
    /// Pause between the inactivity notice and the logout redirect.
    pub redirect_delay: Duration,
}

impl Default for InactivitySettings {
    fn default() -> Self {
        Self {
            threshold: INACTIVITY_TIMEOUT,
            redirect_delay: LOGOUT_REDIRECT_DELAY,
        }
    }
}

#[derive(Clone)]
pub struct ClientConfig {
    /// Env: `PALAVER_SERVER_URL`
    pub server_url: String,
    /// Env: `PALAVER_USER`
    pub handle: Option<String>,
    /// Env: `PALAVER_PASSWORD`
    pub password: Option<String>,
    /// Private conversation to open at start. Env: `PALAVER_PEER`
    pub peer: Option<String>,
    pub sync: SyncIntervals,
    pub liveness: LivenessSettings,
    pub inactivity: InactivitySettings,
}

impl std::fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientConfig")
            .field("server_url", &self.server_url)
            .field("handle", &self.handle)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("peer", &self.peer)
            .field("sync", &self.sync)
            .field("liveness", &self.liveness)
            .field("inactivity", &self.inactivity)
            .finish()
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server_url: format!("http://127.0.0.1:{DEFAULT_HTTP_PORT}"),
            handle: None,
            password: None,
            peer: None,
            sync: SyncIntervals::default(),
            liveness: LivenessSettings::default(),
            inactivity: InactivitySettings::default(),
        }
    }
}

impl ClientConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(url) = non_empty("PALAVER_SERVER_URL") {
            config.server_url = url.trim_end_matches('/').to_string();
        }
        config.handle = non_empty("PALAVER_USER");
        config.password = non_empty("PALAVER_PASSWORD");
        config.peer = non_empty("PALAVER_PEER");
        config
    }
}
