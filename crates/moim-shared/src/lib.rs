//! Types shared by every moim crate: identifiers, the chat row model,
//! realtime insert events, constants and the chat error taxonomy.

pub mod constants;
pub mod error;
pub mod protocol;
pub mod types;

pub use error::{ChatError, ChatResult};
pub use protocol::{Author, ChatMessage, ChatRow, InsertEvent, NewChat};
pub use types::{MeetingId, MessageId, UserId};
