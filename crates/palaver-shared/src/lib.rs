//! Types shared by the palaver server, store and client: identities,
//! conversation scopes, the message body sum type, the action protocol and
//! the error taxonomy every layer maps into.

pub mod clock;
pub mod constants;
pub mod error;
pub mod message;
pub mod protocol;
pub mod types;

pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{ChatError, ErrorCode};
pub use message::{AssetRef, MessageBody};
pub use types::{ConversationScope, Handle, PresenceView, Role};
