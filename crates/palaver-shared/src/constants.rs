use std::time::Duration;

/// Application name
pub const APP_NAME: &str = "Palaver";

/// Freshness window after which an identity without activity counts as offline
pub const ONLINE_WINDOW: Duration = Duration::from_secs(300);

/// Idle time after which the inactivity guard forces a logout
pub const INACTIVITY_TIMEOUT: Duration = Duration::from_secs(300);

/// Room message poll interval
pub const ROOM_POLL_INTERVAL: Duration = Duration::from_millis(3_000);

/// Private message poll interval
pub const PRIVATE_POLL_INTERVAL: Duration = Duration::from_millis(2_000);

/// Unread private message count poll interval
pub const UNREAD_POLL_INTERVAL: Duration = Duration::from_millis(5_000);

/// Online user list poll interval
pub const PRESENCE_POLL_INTERVAL: Duration = Duration::from_millis(10_000);

/// Conversation list poll interval
pub const CONVERSATIONS_POLL_INTERVAL: Duration = Duration::from_millis(15_000);

/// Slow refresh of the selected peer's profile card
pub const PROFILE_POLL_INTERVAL: Duration = Duration::from_millis(60_000);

/// Session heartbeat interval
pub const HEARTBEAT_INTERVAL: Duration = Duration::from_millis(30_000);

/// Delay before the single presence retry after a failed heartbeat
pub const PRESENCE_RETRY_DELAY: Duration = Duration::from_secs(5);

/// Consecutive heartbeat failures before the connectivity warning sticks
pub const HEARTBEAT_FAILURE_THRESHOLD: u32 = 3;

/// Delay between the inactivity notice and the logout redirect
pub const LOGOUT_REDIRECT_DELAY: Duration = Duration::from_secs(3);

/// Lifetime of a typing indicator without a refresh
pub const TYPING_EXPIRY: Duration = Duration::from_secs(3);

/// Default number of room messages in a snapshot read
pub const DEFAULT_ROOM_WINDOW: u32 = 50;

/// Upper bound on any single window read
pub const MAX_WINDOW: u32 = 500;

/// Maximum message body length in characters
pub const MAX_BODY_CHARS: usize = 5_000;

/// Maximum signature length in characters
pub const MAX_SIGNATURE_CHARS: usize = 200;

/// Handle length bounds
pub const MIN_HANDLE_LEN: usize = 3;
pub const MAX_HANDLE_LEN: usize = 32;

/// Minimum password length
pub const MIN_PASSWORD_LEN: usize = 6;

/// Default HTTP API port (server)
pub const DEFAULT_HTTP_PORT: u16 = 8080;

/// Maximum upload size in bytes (10 MiB)
pub const MAX_UPLOAD_SIZE: usize = 10 * 1024 * 1024;
